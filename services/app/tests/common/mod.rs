//! Shared fakes for the integration tests: a scripted in-memory transport,
//! an in-memory backend and a handler that records what it is given.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use app_lib::realtime::RealtimeHandler;
use marketplace_core::{
    Category, ChatMessage, InboundFrame, Item, ItemUpdate, MarketplaceBackend, NewItem,
    NotificationEvent, PortError, PortResult, ReadReceipt, RemoteNotification, Session,
    SubscriptionId, Transport, TransportConnection, UserProfile,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

pub const ADDRESS: &str = "ws://broker.test/ws";

pub fn user(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn session_for(user_id: Uuid, token: &str) -> Session {
    Session {
        user_id,
        access_token: token.to_string(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn event(sender: Uuid, recipient: Uuid, related: &str, secs: i64) -> NotificationEvent {
    NotificationEvent {
        kind: "chat".to_string(),
        sender_id: sender,
        recipient_id: recipient,
        message: format!("message at {}", secs),
        related_entity: related.to_string(),
        timestamp: at(secs),
    }
}

pub fn remote(sender: Uuid, recipient: Uuid, related: &str, secs: i64, unread: u32) -> RemoteNotification {
    RemoteNotification {
        id: Some(secs),
        kind: "chat".to_string(),
        sender_id: sender,
        recipient_id: recipient,
        message: format!("remote at {}", secs),
        related_entity: related.to_string(),
        timestamp: at(secs),
        unread_count: unread,
    }
}

/// Lets the driver task run until it blocks again.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

//=========================================================================================
// Fake Transport
//=========================================================================================

#[derive(Default)]
struct TransportState {
    outcomes: VecDeque<PortError>,
    open_delay: Duration,
    open_times: Vec<Instant>,
    tokens: Vec<String>,
    live: usize,
    max_live: usize,
    next_subscription: u32,
    subscriptions: Vec<(SubscriptionId, String)>,
    inbound: Option<mpsc::UnboundedSender<PortResult<InboundFrame>>>,
    log: Vec<String>,
    sent: Vec<(String, String)>,
}

/// A transport whose open attempts follow a script of failures, then succeed.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next opens fail with these errors, in order; later opens succeed.
    pub fn failing_with(errors: impl IntoIterator<Item = PortError>) -> Self {
        let transport = Self::new();
        transport.state.lock().unwrap().outcomes.extend(errors);
        transport
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().unwrap().open_delay = delay;
    }

    pub fn push_failures(&self, errors: impl IntoIterator<Item = PortError>) {
        self.state.lock().unwrap().outcomes.extend(errors);
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().open_times.len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().open_times.clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens.clone()
    }

    pub fn live(&self) -> usize {
        self.state.lock().unwrap().live
    }

    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Topics with a live subscription on the current connection.
    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .map(|(_, topic)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    /// Pushes `body` to whoever is subscribed to `topic`. Returns false if nobody is.
    pub fn deliver(&self, topic: &str, body: &str) -> bool {
        let state = self.state.lock().unwrap();
        let Some((id, _)) = state.subscriptions.iter().find(|(_, t)| t == topic) else {
            return false;
        };
        let Some(inbound) = state.inbound.as_ref() else {
            return false;
        };
        inbound
            .send(Ok(InboundFrame {
                subscription: id.clone(),
                destination: topic.to_string(),
                body: body.to_string(),
            }))
            .is_ok()
    }

    /// The broker drops the connection without an error.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock().unwrap();
        state.inbound = None;
        state.subscriptions.clear();
    }

    /// The live connection reports an error.
    pub fn fail_connection(&self, err: PortError) {
        let state = self.state.lock().unwrap();
        if let Some(inbound) = state.inbound.as_ref() {
            let _ = inbound.send(Err(err));
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _address: &str, access_token: &str) -> PortResult<Box<dyn TransportConnection>> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.open_times.push(Instant::now());
            state.tokens.push(access_token.to_string());
            state.log.push("open".to_string());
            state.open_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.outcomes.pop_front() {
            state.log.push(format!("open failed: {}", err));
            return Err(err);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.inbound = Some(tx);
        state.subscriptions.clear();
        state.live += 1;
        state.max_live = state.max_live.max(state.live);
        Ok(Box::new(FakeConnection {
            state: self.state.clone(),
            inbound: rx,
            open: true,
        }))
    }
}

struct FakeConnection {
    state: Arc<Mutex<TransportState>>,
    inbound: mpsc::UnboundedReceiver<PortResult<InboundFrame>>,
    open: bool,
}

impl FakeConnection {
    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.state.lock().unwrap().live -= 1;
        }
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl TransportConnection for FakeConnection {
    async fn subscribe(&mut self, topic: &str) -> PortResult<SubscriptionId> {
        let mut state = self.state.lock().unwrap();
        let id = SubscriptionId(format!("sub-{}", state.next_subscription));
        state.next_subscription += 1;
        state.subscriptions.push((id.clone(), topic.to_string()));
        state.log.push(format!("subscribe {}", topic));
        Ok(id)
    }

    async fn unsubscribe(&mut self, id: &SubscriptionId) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        state.subscriptions.retain(|(live, _)| live != id);
        state.log.push(format!("unsubscribe {}", id.0));
        Ok(())
    }

    async fn send(&mut self, destination: &str, body: &str) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        state.sent.push((destination.to_string(), body.to_string()));
        state.log.push(format!("send {}", destination));
        Ok(())
    }

    async fn next_message(&mut self) -> Option<PortResult<InboundFrame>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) -> PortResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.log.push("close".to_string());
            state.subscriptions.clear();
        }
        self.release();
        Ok(())
    }
}

//=========================================================================================
// Recording Handler
//=========================================================================================

#[derive(Default)]
pub struct RecordingHandler {
    pub notifications: Mutex<Vec<NotificationEvent>>,
    pub chats: Mutex<Vec<ChatMessage>>,
}

impl RecordingHandler {
    pub fn notifications(&self) -> Vec<NotificationEvent> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn chats(&self) -> Vec<ChatMessage> {
        self.chats.lock().unwrap().clone()
    }
}

impl RealtimeHandler for RecordingHandler {
    fn on_notification(&self, event: NotificationEvent) {
        self.notifications.lock().unwrap().push(event);
    }

    fn on_chat_message(&self, message: ChatMessage) {
        self.chats.lock().unwrap().push(message);
    }
}

//=========================================================================================
// Fake Backend
//=========================================================================================

/// In-memory backend serving only the notification endpoints.
pub struct FakeBackend {
    pub notifications: Mutex<PortResult<Vec<RemoteNotification>>>,
    pub receipts: Mutex<Vec<(String, ReadReceipt)>>,
    pub fail_mark_read: Mutex<bool>,
    pub list_calls: Mutex<usize>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            notifications: Mutex::new(Ok(Vec::new())),
            receipts: Mutex::new(Vec::new()),
            fail_mark_read: Mutex::new(false),
            list_calls: Mutex::new(0),
        }
    }
}

impl FakeBackend {
    pub fn serve(&self, notifications: Vec<RemoteNotification>) {
        *self.notifications.lock().unwrap() = Ok(notifications);
    }

    pub fn go_offline(&self) {
        *self.notifications.lock().unwrap() =
            Err(PortError::Transport("connection refused".to_string()));
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    pub fn receipts(&self) -> Vec<(String, ReadReceipt)> {
        self.receipts.lock().unwrap().clone()
    }
}

fn unused<T>() -> PortResult<T> {
    Err(PortError::Unexpected("not served by the fake backend".to_string()))
}

#[async_trait]
impl MarketplaceBackend for FakeBackend {
    async fn list_items(&self, _token: &str, _category_id: Option<i64>) -> PortResult<Vec<Item>> {
        unused()
    }

    async fn get_item(&self, _token: &str, _item_id: i64) -> PortResult<Item> {
        unused()
    }

    async fn create_item(&self, _token: &str, _item: &NewItem) -> PortResult<Item> {
        unused()
    }

    async fn update_item(&self, _token: &str, _item_id: i64, _update: &ItemUpdate) -> PortResult<Item> {
        unused()
    }

    async fn delete_item(&self, _token: &str, _item_id: i64) -> PortResult<()> {
        unused()
    }

    async fn list_categories(&self, _token: &str) -> PortResult<Vec<Category>> {
        unused()
    }

    async fn list_subcategories(&self, _token: &str, _parent_id: i64) -> PortResult<Vec<Category>> {
        unused()
    }

    async fn get_user_profile(&self, _token: &str, _user_id: Uuid) -> PortResult<UserProfile> {
        unused()
    }

    async fn get_chat_history(&self, _token: &str, _conversation_id: i64) -> PortResult<Vec<ChatMessage>> {
        unused()
    }

    async fn list_notifications(&self, _token: &str) -> PortResult<Vec<RemoteNotification>> {
        *self.list_calls.lock().unwrap() += 1;
        self.notifications.lock().unwrap().clone()
    }

    async fn mark_notifications_read(&self, token: &str, receipt: &ReadReceipt) -> PortResult<()> {
        if *self.fail_mark_read.lock().unwrap() {
            return Err(PortError::Transport("connection reset".to_string()));
        }
        self.receipts
            .lock()
            .unwrap()
            .push((token.to_string(), receipt.clone()));
        Ok(())
    }
}

//=========================================================================================
// Throwaway HTTP Servers
//=========================================================================================

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_server(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub uri: String,
    pub authorization: Option<String>,
    pub body: String,
}

/// Every request the fake backend received, in order.
#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<SeenRequest>>>);

impl RequestLog {
    pub fn all(&self) -> Vec<SeenRequest> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> SeenRequest {
        self.all().pop().expect("no request reached the backend")
    }
}

pub const OWNER: u128 = 42;

pub fn item_json(id: i64, title: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "title": title,
        "description": "Solid oak",
        "categoryId": 2,
        "ownerId": user(OWNER),
        "imageUrls": [],
        "available": true,
        "createdAt": at(0),
    })
}

/// A stand-in for the marketplace backend and identity provider.
pub fn fake_backend(log: RequestLog) -> axum::Router {
    axum::Router::new().fallback(respond).with_state(log)
}

async fn respond(
    axum::extract::State(log): axum::extract::State<RequestLog>,
    method: axum::http::Method,
    uri: axum::http::Uri,
    headers: axum::http::HeaderMap,
    body: String,
) -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::Json;
    use serde_json::json;

    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    log.0.lock().unwrap().push(SeenRequest {
        method: method.to_string(),
        uri: uri.to_string(),
        authorization: authorization.clone(),
        body: body.clone(),
    });

    if authorization.as_deref() == Some("Bearer expired") {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "token expired" }))).into_response();
    }

    let token = |access: &str, expires_in: i64| {
        Json(json!({
            "access_token": access,
            "refresh_token": "refresh-2",
            "expires_in": expires_in,
            "user": { "id": user(1) },
        }))
        .into_response()
    };

    match (method.as_str(), uri.path()) {
        ("GET", "/items") => Json(json!([item_json(1, "Oak table")])).into_response(),
        ("GET", "/items/1") | ("PUT", "/items/1") => Json(item_json(1, "Oak table")).into_response(),
        ("GET", "/items/9") => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": "Item 9 not found" }))).into_response()
        }
        ("POST", "/items") => {
            let sent: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
            let title = sent["title"].as_str().unwrap_or_default().to_string();
            (StatusCode::CREATED, Json(item_json(5, &title))).into_response()
        }
        ("DELETE", "/items/1") => StatusCode::NO_CONTENT.into_response(),
        ("GET", "/categories") => Json(json!([{ "id": 1, "name": "Furniture" }])).into_response(),
        ("GET", "/categories/1/children") => {
            Json(json!([{ "id": 2, "name": "Tables", "parentId": 1 }])).into_response()
        }
        ("GET", "/categories/13/children") => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "message": "category 13 is archived" })),
        )
            .into_response(),
        ("GET", path) if path.starts_with("/users/") => Json(json!({
            "id": path.trim_start_matches("/users/"),
            "displayName": "Ann",
        }))
        .into_response(),
        ("GET", "/conversations/7/messages") => Json(json!([
            { "id": 1, "conversationId": 7, "senderId": user(2), "content": "Hi", "sentAt": at(1) },
            { "id": 2, "conversationId": 7, "senderId": user(2), "content": "", "sentAt": at(2) },
            { "unexpected": true },
        ]))
        .into_response(),
        ("GET", "/conversations/500/messages") => {
            (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
        }
        ("GET", "/notifications") => Json(json!([{
            "id": 3,
            "type": "chat",
            "senderId": user(2),
            "recipientId": user(1),
            "message": "New message",
            "relatedEntity": "conversation:7",
            "timestamp": at(10),
            "unreadCount": 2,
        }]))
        .into_response(),
        ("POST", "/notifications/read") | ("POST", "/logout") => {
            StatusCode::NO_CONTENT.into_response()
        }
        ("POST", "/recover") => Json(json!({})).into_response(),
        ("POST", "/signup") => token("signup-token", 3600),
        ("POST", "/token") => {
            let sent: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
            let query = uri.query().unwrap_or_default();
            if query.contains("grant_type=refresh_token") && sent["refresh_token"] == "refresh-1" {
                token("refreshed-token", 3600)
            } else if query.contains("grant_type=refresh_token") && sent["refresh_token"] == "refresh-forever" {
                token("forever-token", i64::MAX)
            } else if query.contains("grant_type=password") && sent["password"] == "secret" {
                token("password-token", 3600)
            } else {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" }))).into_response()
            }
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}
