//! crates/marketplace_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! Payloads that cross a process boundary are parsed and validated here,
//! so everything past this module works with typed, checked values.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Longest notification text accepted from the wire.
pub const MAX_MESSAGE_LEN: usize = 2000;

//=========================================================================================
// Session & Connection
//=========================================================================================

/// The authenticated user's current token and identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.trim().is_empty() && self.expires_at > now
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// What the identity provider hands back after sign-in, sign-up or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub session: Session,
    pub refresh_token: Option<String>,
}

/// Lifecycle of the single realtime connection owned by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    pub fn indicator(self) -> StatusIndicator {
        match self {
            ConnectionState::Connected => StatusIndicator::Connected,
            ConnectionState::Connecting => StatusIndicator::Connecting,
            ConnectionState::Disconnected | ConnectionState::Closing => {
                StatusIndicator::Disconnected
            }
        }
    }
}

/// The tri-state connection badge shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusIndicator {
    Connected,
    Connecting,
    Disconnected,
}

//=========================================================================================
// Boundary Validation
//=========================================================================================

/// Raised when an inbound payload is not JSON of the expected shape.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Checks run on a payload after it has been deserialized.
pub trait Validate {
    fn validate(&self) -> Result<(), PayloadError>;
}

/// Parses a raw JSON string and validates the result.
pub fn parse_payload<T: DeserializeOwned + Validate>(raw: &str) -> Result<T, PayloadError> {
    let value: T = serde_json::from_str(raw)?;
    value.validate()?;
    Ok(value)
}

fn validate_notification_fields(
    kind: &str,
    message: &str,
    related_entity: &str,
) -> Result<(), PayloadError> {
    if kind.trim().is_empty() {
        return Err(PayloadError::Invalid("notification type is empty".to_string()));
    }
    if related_entity.trim().is_empty() {
        return Err(PayloadError::Invalid("related entity is empty".to_string()));
    }
    if message.chars().count() > MAX_MESSAGE_LEN {
        return Err(PayloadError::Invalid(format!(
            "message exceeds {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    Ok(())
}

//=========================================================================================
// Notifications
//=========================================================================================

/// Stable identifier shared by every notification about the same
/// conversation or item between the same two people.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationKey(String);

impl NotificationKey {
    pub fn derive(kind: &str, related_entity: &str, a: Uuid, b: Uuid) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{}|{}|{}|{}", kind, related_entity, lo, hi))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NotificationKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A single inbound realtime message describing a new notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    #[serde(alias = "type")]
    pub kind: String,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    #[serde(default)]
    pub message: String,
    pub related_entity: String,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        parse_payload(raw)
    }

    pub fn key(&self) -> NotificationKey {
        NotificationKey::derive(
            &self.kind,
            &self.related_entity,
            self.sender_id,
            self.recipient_id,
        )
    }
}

impl Validate for NotificationEvent {
    fn validate(&self) -> Result<(), PayloadError> {
        validate_notification_fields(&self.kind, &self.message, &self.related_entity)
    }
}

/// A notification as listed by the REST backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNotification {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(alias = "type")]
    pub kind: String,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    #[serde(default)]
    pub message: String,
    pub related_entity: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "one")]
    pub unread_count: u32,
}

fn one() -> u32 {
    1
}

impl RemoteNotification {
    pub fn key(&self) -> NotificationKey {
        NotificationKey::derive(
            &self.kind,
            &self.related_entity,
            self.sender_id,
            self.recipient_id,
        )
    }
}

impl Validate for RemoteNotification {
    fn validate(&self) -> Result<(), PayloadError> {
        validate_notification_fields(&self.kind, &self.message, &self.related_entity)
    }
}

/// The UI-facing projection of one or more notifications sharing a key.
///
/// Unread counts are tracked per origin: `rest_unread` is replaced on every
/// poll, `live_unread` grows with each realtime push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub key: NotificationKey,
    pub kind: String,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub message: String,
    pub related_entity: String,
    pub timestamp: DateTime<Utc>,
    pub rest_unread: u32,
    pub live_unread: u32,
    pub read_at: Option<DateTime<Utc>>,
    pub from_rest: bool,
    pub from_realtime: bool,
}

impl NotificationRecord {
    pub fn unread_count(&self) -> u32 {
        self.rest_unread.saturating_add(self.live_unread)
    }

    pub fn is_read(&self) -> bool {
        self.unread_count() == 0
    }

    /// Whether something stamped at `timestamp` is already covered by a local read.
    pub fn read_covers(&self, timestamp: DateTime<Utc>) -> bool {
        self.read_at.is_some_and(|read_at| timestamp <= read_at)
    }

    pub fn receipt(&self) -> ReadReceipt {
        ReadReceipt {
            related_entity: self.related_entity.clone(),
            sender_id: self.sender_id,
        }
    }
}

/// Body of the "mark as read" call persisted to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub related_entity: String,
    pub sender_id: Uuid,
}

//=========================================================================================
// Marketplace Resources
//=========================================================================================

/// A free item offered by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category_id: i64,
    pub owner_id: Uuid,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "available")]
    pub available: bool,
    pub created_at: DateTime<Utc>,
}

fn available() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category_id: i64,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl Validate for NewItem {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.title.trim().is_empty() {
            return Err(PayloadError::Invalid("title is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
}

/// A node of the category hierarchy; roots have no parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

/// One message in a conversation about an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: Uuid,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl Validate for ChatMessage {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.content.is_empty() {
            return Err(PayloadError::Invalid("chat message is empty".to_string()));
        }
        Ok(())
    }
}

/// Outbound "send message" payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingChatMessage {
    pub conversation_id: i64,
    pub content: String,
}

/// Outbound "start conversation" payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStart {
    pub item_id: i64,
    pub recipient_id: Uuid,
    pub content: String,
}
