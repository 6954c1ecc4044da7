//! The HTTP adapters against a throwaway local backend.

mod common;

use std::time::Duration;

use app_lib::adapters::{HttpAuthProvider, RestBackend};
use common::{fake_backend, spawn_server, user, RequestLog};
use marketplace_core::{
    AuthProvider, ItemUpdate, MarketplaceBackend, NewItem, PortError, ReadReceipt,
};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn backend() -> (RestBackend, RequestLog) {
    let log = RequestLog::default();
    let url = spawn_server(fake_backend(log.clone())).await;
    (RestBackend::new(url, TIMEOUT).unwrap(), log)
}

#[tokio::test]
async fn list_items_forwards_token_and_category_filter() {
    let (backend, log) = backend().await;

    let items = backend.list_items("token-1", Some(2)).await.unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "Oak table");
    let seen = log.last();
    assert_eq!(seen.uri, "/items?categoryId=2");
    assert_eq!(seen.authorization.as_deref(), Some("Bearer token-1"));
}

#[tokio::test]
async fn item_crud_round_trips_through_the_backend() {
    let (backend, log) = backend().await;
    let new_item = NewItem {
        title: "Desk lamp".to_string(),
        description: String::new(),
        category_id: 2,
        image_urls: Vec::new(),
        location: None,
    };

    let created = backend.create_item("token-1", &new_item).await.unwrap();
    assert_eq!(created.title, "Desk lamp");
    let body: serde_json::Value = serde_json::from_str(&log.last().body).unwrap();
    assert_eq!(body["categoryId"], 2);

    let update = ItemUpdate {
        available: Some(false),
        ..ItemUpdate::default()
    };
    backend.update_item("token-1", 1, &update).await.unwrap();
    assert_eq!(log.last().body, r#"{"available":false}"#);

    backend.delete_item("token-1", 1).await.unwrap();
    assert_eq!(log.last().method, "DELETE");
}

#[tokio::test]
async fn backend_errors_keep_status_and_message() {
    let (backend, _) = backend().await;

    assert_eq!(
        backend.get_item("token-1", 9).await.unwrap_err(),
        PortError::NotFound("Item 9 not found".to_string())
    );
    assert_eq!(
        backend.get_item("expired", 1).await.unwrap_err(),
        PortError::Unauthorized
    );
    assert_eq!(
        backend.list_subcategories("token-1", 13).await.unwrap_err(),
        PortError::Backend {
            status: 422,
            message: "category 13 is archived".to_string()
        }
    );
    assert_eq!(
        backend.get_chat_history("token-1", 500).await.unwrap_err(),
        PortError::Backend {
            status: 500,
            message: "Internal Server Error".to_string()
        }
    );
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let backend = RestBackend::new("http://127.0.0.1:9", TIMEOUT).unwrap();
    let err = backend.list_categories("token-1").await.unwrap_err();
    assert!(matches!(err, PortError::Transport(_)));
}

#[tokio::test]
async fn malformed_chat_messages_are_dropped() {
    let (backend, _) = backend().await;

    let history = backend.get_chat_history("token-1", 7).await.unwrap();

    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "Hi");
}

#[tokio::test]
async fn categories_and_profiles_parse() {
    let (backend, _) = backend().await;

    let roots = backend.list_categories("token-1").await.unwrap();
    assert_eq!(roots[0].parent_id, None);
    let children = backend.list_subcategories("token-1", 1).await.unwrap();
    assert_eq!(children[0].parent_id, Some(1));

    let profile = backend.get_user_profile("token-1", user(2)).await.unwrap();
    assert_eq!(profile.id, user(2));
    assert_eq!(profile.display_name, "Ann");
}

#[tokio::test]
async fn notifications_list_and_read_receipts() {
    let (backend, log) = backend().await;

    let notifications = backend.list_notifications("token-1").await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].unread_count, 2);
    assert_eq!(notifications[0].kind, "chat");

    let receipt = ReadReceipt {
        related_entity: "conversation:7".to_string(),
        sender_id: user(2),
    };
    backend.mark_notifications_read("token-1", &receipt).await.unwrap();
    let seen = log.last();
    assert_eq!(seen.uri, "/notifications/read");
    let body: serde_json::Value = serde_json::from_str(&seen.body).unwrap();
    assert_eq!(body["relatedEntity"], "conversation:7");
    assert_eq!(body["senderId"], user(2).to_string());
}

#[tokio::test]
async fn identity_provider_flows() {
    let log = RequestLog::default();
    let url = spawn_server(fake_backend(log.clone())).await;
    let auth = HttpAuthProvider::new(url, TIMEOUT).unwrap();

    let grant = auth.sign_in("ann@example.com", "secret").await.unwrap();
    assert_eq!(grant.session.access_token, "password-token");
    assert_eq!(grant.session.user_id, user(1));
    assert!(grant.session.is_valid());
    assert_eq!(grant.refresh_token.as_deref(), Some("refresh-2"));

    assert_eq!(
        auth.sign_in("ann@example.com", "wrong").await.unwrap_err(),
        PortError::Unauthorized
    );

    let refreshed = auth.refresh_session("refresh-1").await.unwrap();
    assert_eq!(refreshed.session.access_token, "refreshed-token");

    let signed_up = auth.sign_up("bob@example.com", "hunter22").await.unwrap();
    assert_eq!(signed_up.session.access_token, "signup-token");

    auth.sign_out("password-token").await.unwrap();
    assert_eq!(log.last().authorization.as_deref(), Some("Bearer password-token"));

    auth.request_password_reset("ann@example.com").await.unwrap();
    assert_eq!(log.last().uri, "/recover");
}

#[tokio::test]
async fn absurd_token_lifetime_is_rejected_not_trusted() {
    let url = spawn_server(fake_backend(RequestLog::default())).await;
    let auth = HttpAuthProvider::new(url, TIMEOUT).unwrap();

    let err = auth.refresh_session("refresh-forever").await.unwrap_err();

    assert!(matches!(err, PortError::Unexpected(message) if message.contains("out of range")));
}
