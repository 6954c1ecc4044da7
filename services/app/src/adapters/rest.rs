//! services/app/src/adapters/rest.rs
//!
//! This module contains the REST adapter, the concrete implementation of the
//! `MarketplaceBackend` port. It talks JSON over HTTP to the backend service
//! using `reqwest`, and maps non-2xx answers onto `PortError`.

use std::time::Duration;

use async_trait::async_trait;
use marketplace_core::domain::Validate;
use marketplace_core::{
    Category, ChatMessage, Item, ItemUpdate, MarketplaceBackend, NewItem, PayloadError, PortError,
    PortResult, ReadReceipt, RemoteNotification, UserProfile,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A REST adapter that implements the `MarketplaceBackend` port.
#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
}

impl RestBackend {
    /// Creates a new `RestBackend` rooted at `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> PortResult<T> {
        let response = checked(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| PortError::Unexpected(format!("unexpected response body: {}", e)))
    }

    async fn execute(&self, request: RequestBuilder) -> PortResult<()> {
        checked(request).await.map(|_| ())
    }
}

//=========================================================================================
// Response Helpers
//=========================================================================================

pub(crate) async fn checked(request: RequestBuilder) -> PortResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| PortError::Transport(e.to_string()))?;
    if response.status().is_success() {
        return Ok(response);
    }
    Err(error_from(response).await)
}

/// Turns a failed response into a `PortError`, keeping the backend's own message.
async fn error_from(response: Response) -> PortError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| {
            ["error", "message", "detail"]
                .iter()
                .find_map(|field| value.get(*field).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Backend request failed")
                .to_string()
        });

    match status {
        StatusCode::NOT_FOUND => PortError::NotFound(message),
        StatusCode::UNAUTHORIZED => PortError::Unauthorized,
        other => PortError::Backend {
            status: other.as_u16(),
            message,
        },
    }
}

/// Keeps the well-formed entries of a list, logging and dropping the rest.
fn validated<T: DeserializeOwned + Validate>(raw: Vec<serde_json::Value>, what: &str) -> Vec<T> {
    raw.into_iter()
        .filter_map(|value| {
            let parsed = serde_json::from_value::<T>(value)
                .map_err(PayloadError::from)
                .and_then(|parsed| parsed.validate().map(|_| parsed));
            match parsed {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("Dropping malformed {} from backend: {}", what, e);
                    None
                }
            }
        })
        .collect()
}

//=========================================================================================
// `MarketplaceBackend` Trait Implementation
//=========================================================================================

#[async_trait]
impl MarketplaceBackend for RestBackend {
    async fn list_items(&self, token: &str, category_id: Option<i64>) -> PortResult<Vec<Item>> {
        let mut request = self.client.get(self.url("/items")).bearer_auth(token);
        if let Some(category_id) = category_id {
            request = request.query(&[("categoryId", category_id)]);
        }
        self.fetch(request).await
    }

    async fn get_item(&self, token: &str, item_id: i64) -> PortResult<Item> {
        let url = self.url(&format!("/items/{}", item_id));
        self.fetch(self.client.get(url).bearer_auth(token)).await
    }

    async fn create_item(&self, token: &str, item: &NewItem) -> PortResult<Item> {
        let request = self.client.post(self.url("/items")).bearer_auth(token).json(item);
        self.fetch(request).await
    }

    async fn update_item(
        &self,
        token: &str,
        item_id: i64,
        update: &ItemUpdate,
    ) -> PortResult<Item> {
        let url = self.url(&format!("/items/{}", item_id));
        self.fetch(self.client.put(url).bearer_auth(token).json(update))
            .await
    }

    async fn delete_item(&self, token: &str, item_id: i64) -> PortResult<()> {
        let url = self.url(&format!("/items/{}", item_id));
        self.execute(self.client.delete(url).bearer_auth(token)).await
    }

    async fn list_categories(&self, token: &str) -> PortResult<Vec<Category>> {
        self.fetch(self.client.get(self.url("/categories")).bearer_auth(token))
            .await
    }

    async fn list_subcategories(&self, token: &str, parent_id: i64) -> PortResult<Vec<Category>> {
        let url = self.url(&format!("/categories/{}/children", parent_id));
        self.fetch(self.client.get(url).bearer_auth(token)).await
    }

    async fn get_user_profile(&self, token: &str, user_id: Uuid) -> PortResult<UserProfile> {
        let url = self.url(&format!("/users/{}", user_id));
        self.fetch(self.client.get(url).bearer_auth(token)).await
    }

    async fn get_chat_history(
        &self,
        token: &str,
        conversation_id: i64,
    ) -> PortResult<Vec<ChatMessage>> {
        let url = self.url(&format!("/conversations/{}/messages", conversation_id));
        let raw: Vec<serde_json::Value> = self.fetch(self.client.get(url).bearer_auth(token)).await?;
        Ok(validated(raw, "chat message"))
    }

    async fn list_notifications(&self, token: &str) -> PortResult<Vec<RemoteNotification>> {
        let request = self.client.get(self.url("/notifications")).bearer_auth(token);
        let raw: Vec<serde_json::Value> = self.fetch(request).await?;
        Ok(validated(raw, "notification"))
    }

    async fn mark_notifications_read(&self, token: &str, receipt: &ReadReceipt) -> PortResult<()> {
        let request = self
            .client
            .post(self.url("/notifications/read"))
            .bearer_auth(token)
            .json(receipt);
        self.execute(request).await
    }
}
