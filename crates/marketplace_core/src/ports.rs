//! crates/marketplace_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture: the backend REST
//! API, the identity provider and the realtime message broker all live outside
//! this workspace and are reached only through these ports.

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::{
    AuthGrant, Category, ChatMessage, Item, ItemUpdate, NewItem, ReadReceipt,
    RemoteNotification, Session, UserProfile,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (HTTP, websocket).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{message}")]
    Backend { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// The HTTP status a route handler should answer with for this error.
    pub fn status(&self) -> u16 {
        match self {
            PortError::NotFound(_) => 404,
            PortError::Unauthorized => 401,
            PortError::Backend { status, .. } => *status,
            _ => 500,
        }
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Identity
//=========================================================================================

/// Supplies the current session to every other component.
pub trait SessionProvider: Send + Sync {
    fn current(&self) -> Option<Session>;

    /// A receiver that observes every sign-in and sign-out.
    fn watch(&self) -> watch::Receiver<Option<Session>>;
}

/// The third-party identity provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> PortResult<AuthGrant>;

    async fn sign_up(&self, email: &str, password: &str) -> PortResult<AuthGrant>;

    async fn refresh_session(&self, refresh_token: &str) -> PortResult<AuthGrant>;

    async fn sign_out(&self, access_token: &str) -> PortResult<()>;

    async fn request_password_reset(&self, email: &str) -> PortResult<()>;
}

//=========================================================================================
// REST Backend
//=========================================================================================

/// The marketplace REST API. Every call is authenticated with a bearer token.
#[async_trait]
pub trait MarketplaceBackend: Send + Sync {
    // --- Items ---
    async fn list_items(&self, token: &str, category_id: Option<i64>) -> PortResult<Vec<Item>>;

    async fn get_item(&self, token: &str, item_id: i64) -> PortResult<Item>;

    async fn create_item(&self, token: &str, item: &NewItem) -> PortResult<Item>;

    async fn update_item(&self, token: &str, item_id: i64, update: &ItemUpdate)
        -> PortResult<Item>;

    async fn delete_item(&self, token: &str, item_id: i64) -> PortResult<()>;

    // --- Categories ---
    async fn list_categories(&self, token: &str) -> PortResult<Vec<Category>>;

    async fn list_subcategories(&self, token: &str, parent_id: i64) -> PortResult<Vec<Category>>;

    // --- Users & Chat ---
    async fn get_user_profile(&self, token: &str, user_id: Uuid) -> PortResult<UserProfile>;

    async fn get_chat_history(&self, token: &str, conversation_id: i64)
        -> PortResult<Vec<ChatMessage>>;

    // --- Notifications ---
    async fn list_notifications(&self, token: &str) -> PortResult<Vec<RemoteNotification>>;

    async fn mark_notifications_read(&self, token: &str, receipt: &ReadReceipt) -> PortResult<()>;
}

//=========================================================================================
// Realtime Transport
//=========================================================================================

/// Handle the broker assigns to one topic subscription on one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

/// A message delivered on one of the connection's subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub subscription: SubscriptionId,
    pub destination: String,
    pub body: String,
}

/// Opens authenticated connections to the message broker.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        address: &str,
        access_token: &str,
    ) -> PortResult<Box<dyn TransportConnection>>;
}

/// One live, handshaken connection. Owned by exactly one client at a time.
#[async_trait]
pub trait TransportConnection: Send {
    async fn subscribe(&mut self, topic: &str) -> PortResult<SubscriptionId>;

    async fn unsubscribe(&mut self, id: &SubscriptionId) -> PortResult<()>;

    async fn send(&mut self, destination: &str, body: &str) -> PortResult<()>;

    /// Waits for the next message. `None` means the peer closed the connection.
    /// Must be cancel-safe: dropping the future loses no buffered message.
    async fn next_message(&mut self) -> Option<PortResult<InboundFrame>>;

    async fn close(&mut self) -> PortResult<()>;
}
