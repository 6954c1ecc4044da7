//! services/app/src/notifications/mod.rs
//!
//! The process-wide notification store and the poller that keeps it in step
//! with the REST backend.

mod poller;
mod store;

pub use poller::NotificationPoller;
pub use store::NotificationStore;
