//! crates/marketplace_core/src/connection.rs
//!
//! The realtime connection state machine. It performs no I/O and reads no clock:
//! every transition returns a [`Directive`] that the async driver carries out,
//! which keeps connect/reconnect/backoff behaviour testable without a network.
//!
//! A connection is *proven* once it delivers a frame or stays up for the
//! policy's `max_delay`. Connections lost before that count against the retry
//! budget, so a broker that accepts the handshake and then fails every time
//! still runs out of attempts.

use std::time::Duration;

use crate::domain::ConnectionState;

/// Why a connect request was refused before any transport was touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("an access token is required to open the realtime channel")]
    Unauthenticated,
    #[error("no realtime address configured")]
    MissingAddress,
}

/// How a live or pending connection was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The broker rejected our credentials. Never retried.
    Auth,
    Transport,
    Protocol,
}

/// The side effect the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Nothing,
    OpenTransport,
    Subscribe,
    ScheduleReconnect(Duration),
    /// Cancel any reconnect timer, drop subscriptions, close the transport.
    Teardown,
    /// Retry budget exhausted or failure is terminal; stay disconnected.
    GiveUp,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry that follows the `failures`-th consecutive failure.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let ceiling = self.max_delay.max(self.base_delay);
        let exponent = failures.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(ceiling)
            .min(ceiling)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    failures: u32,
    reconnect_pending: bool,
    disconnect_requested: bool,
    last_error: Option<String>,
    last_failure: Option<FailureKind>,
    proven: bool,
    /// Connections in the current streak that were lost before being proven.
    unproven_losses: u32,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            failures: 0,
            reconnect_pending: false,
            disconnect_requested: false,
            last_error: None,
            last_failure: None,
            proven: false,
            unproven_losses: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures since the last successful connection.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// How the last connection attempt or live connection was lost.
    pub fn last_failure(&self) -> Option<FailureKind> {
        self.last_failure
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Caller asks for a connection. Idempotent while connecting or connected.
    pub fn connect(&mut self, access_token: &str, address: &str) -> Result<Directive, ConnectError> {
        if access_token.trim().is_empty() {
            self.last_error = Some(ConnectError::Unauthenticated.to_string());
            self.last_failure = Some(FailureKind::Auth);
            return Err(ConnectError::Unauthenticated);
        }
        if address.trim().is_empty() {
            self.last_error = Some(ConnectError::MissingAddress.to_string());
            self.last_failure = None;
            return Err(ConnectError::MissingAddress);
        }

        match self.state {
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Closing => Ok(Directive::Nothing),
            ConnectionState::Disconnected => {
                self.disconnect_requested = false;
                self.reconnect_pending = false;
                self.failures = 0;
                self.unproven_losses = 0;
                self.last_error = None;
                self.last_failure = None;
                self.state = ConnectionState::Connecting;
                Ok(Directive::OpenTransport)
            }
        }
    }

    /// The handshake completed.
    pub fn transport_opened(&mut self) -> Directive {
        if self.state != ConnectionState::Connecting {
            // A handshake that finished after the caller walked away.
            return Directive::Teardown;
        }
        self.state = ConnectionState::Connected;
        self.failures = 0;
        self.proven = false;
        self.last_error = None;
        self.last_failure = None;
        Directive::Subscribe
    }

    /// The live connection delivered a frame or outlived `max_delay`.
    /// Returns `true` the first time this happens for a connection.
    pub fn connection_proven(&mut self) -> bool {
        if self.state != ConnectionState::Connected || self.proven {
            return false;
        }
        self.proven = true;
        self.unproven_losses = 0;
        true
    }

    /// The handshake failed or a live connection dropped.
    pub fn transport_failed(&mut self, kind: FailureKind, message: impl Into<String>) -> Directive {
        let lost_unproven = self.state == ConnectionState::Connected && !self.proven;
        self.state = ConnectionState::Disconnected;
        self.proven = false;
        self.last_error = Some(message.into());
        self.last_failure = Some(kind);

        if kind == FailureKind::Auth {
            self.reconnect_pending = false;
            return Directive::GiveUp;
        }
        if self.disconnect_requested {
            return Directive::Nothing;
        }

        self.failures = self.failures.saturating_add(1);
        let streak = self.failures.saturating_add(self.unproven_losses);
        if lost_unproven {
            self.unproven_losses = self.unproven_losses.saturating_add(1);
        }
        if streak >= self.policy.max_attempts {
            self.reconnect_pending = false;
            return Directive::GiveUp;
        }
        self.reconnect_pending = true;
        Directive::ScheduleReconnect(self.policy.delay_for(streak))
    }

    /// The backoff timer elapsed.
    pub fn reconnect_due(&mut self) -> Directive {
        if !self.reconnect_pending
            || self.disconnect_requested
            || self.state != ConnectionState::Disconnected
        {
            return Directive::Nothing;
        }
        self.reconnect_pending = false;
        self.state = ConnectionState::Connecting;
        Directive::OpenTransport
    }

    /// Caller asks to go offline. Disables auto-reconnect until the next `connect`.
    pub fn disconnect(&mut self) -> Directive {
        self.disconnect_requested = true;
        self.reconnect_pending = false;
        self.proven = false;
        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            self.state = ConnectionState::Closing;
        }
        Directive::Teardown
    }

    /// Teardown finished.
    pub fn closed(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}
