//! services/app/src/error.rs
//!
//! Defines the primary error type for the app service.

use crate::config::ConfigError;
use crate::realtime::RealtimeError;
use marketplace_core::PortError;

/// The primary error type for the `app` service.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// The realtime channel failed or its driver task is gone.
    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    /// Represents an error from the HTTP client library.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
