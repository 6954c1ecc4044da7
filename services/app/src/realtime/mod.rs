//! services/app/src/realtime/mod.rs
//!
//! The realtime notification and chat client. A `RealtimeClient` is a cheap
//! handle; the connection itself lives in a driver task that owns the
//! `ConnectionMachine`, the single transport connection and its subscriptions.
//! `RealtimeClient::follow_sessions` ties that connection to the session lifecycle.

mod client;
mod driver;
mod session_link;

pub use client::{ConnectionStatus, RealtimeClient, RealtimeError, RealtimeHandler};
