//! services/app/src/lib.rs
//!
//! The marketplace client service: adapters for the external collaborators,
//! the realtime notification client, the notification store and the HTTP proxy.

pub mod adapters;
pub mod config;
pub mod error;
pub mod notifications;
pub mod realtime;
pub mod web;
