//! services/app/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use marketplace_core::ReconnectPolicy;
use tracing::Level;
use uuid::Uuid;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub api_base_url: String,
    pub realtime_url: String,
    pub auth_url: Option<String>,
    pub log_level: Level,
    pub cors_origin: String,
    pub reconnect: ReconnectPolicy,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub access_token: Option<String>,
    pub user_id: Option<Uuid>,
    pub session_ttl: Duration,
    pub auth_email: Option<String>,
    pub auth_password: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server Settings ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", "0.0.0.0:3000")?;
        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Collaborator Endpoints ---
        let api_base_url = required(&lookup, "API_BASE_URL")?
            .trim_end_matches('/')
            .to_string();
        let realtime_url = required(&lookup, "REALTIME_URL")?;
        let auth_url = lookup("AUTH_URL")
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim_end_matches('/').to_string());

        // --- Realtime & Polling ---
        let base_delay_ms: u64 = parse_or(&lookup, "RECONNECT_BASE_DELAY_MS", "1000")?;
        let max_attempts: u32 = parse_or(&lookup, "RECONNECT_MAX_ATTEMPTS", "5")?;
        let max_delay_ms: u64 = parse_or(&lookup, "RECONNECT_MAX_DELAY_MS", "30000")?;
        if base_delay_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "RECONNECT_BASE_DELAY_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let reconnect = ReconnectPolicy {
            base_delay: Duration::from_millis(base_delay_ms),
            max_attempts,
            max_delay: Duration::from_millis(max_delay_ms.max(base_delay_ms)),
        };

        let poll_secs: u64 = parse_or(&lookup, "NOTIFICATION_POLL_SECS", "30")?;
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "NOTIFICATION_POLL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let timeout_secs: u64 = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", "15")?;

        // --- Optional Credentials ---
        let access_token = lookup("ACCESS_TOKEN").filter(|v| !v.trim().is_empty());
        let user_id = lookup("USER_ID")
            .map(|v| {
                Uuid::parse_str(v.trim())
                    .map_err(|e| ConfigError::InvalidValue("USER_ID".to_string(), e.to_string()))
            })
            .transpose()?;
        let ttl_secs: u64 = parse_or(&lookup, "SESSION_TTL_SECS", "3600")?;
        let auth_email = lookup("AUTH_EMAIL").filter(|v| !v.trim().is_empty());
        let auth_password = lookup("AUTH_PASSWORD").filter(|v| !v.is_empty());

        Ok(Self {
            bind_address,
            api_base_url,
            realtime_url,
            auth_url,
            log_level,
            cors_origin,
            reconnect,
            poll_interval: Duration::from_secs(poll_secs),
            request_timeout: Duration::from_secs(timeout_secs),
            access_token,
            user_id,
            session_ttl: Duration::from_secs(ttl_secs),
            auth_email,
            auth_password,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}
