//! Notification store and poller behaviour against the in-memory backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use app_lib::adapters::SessionHandle;
use app_lib::notifications::{NotificationPoller, NotificationStore};
use app_lib::realtime::RealtimeClient;
use common::{event, remote, session_for, settle, user, FakeBackend, FakeTransport, ADDRESS};
use marketplace_core::subscriptions::notification_topic;
use marketplace_core::{ReconnectPolicy, SessionProvider};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

struct Fixture {
    backend: Arc<FakeBackend>,
    sessions: Arc<SessionHandle>,
    store: NotificationStore,
}

fn fixture() -> Fixture {
    let backend = Arc::new(FakeBackend::default());
    let sessions = Arc::new(SessionHandle::new());
    let store = NotificationStore::new(backend.clone(), sessions.clone());
    Fixture {
        backend,
        sessions,
        store,
    }
}

fn signed_in() -> Fixture {
    let fixture = fixture();
    fixture.sessions.set(session_for(user(1), "token-1"));
    fixture
}

#[tokio::test]
async fn refresh_without_a_session_does_nothing() {
    let f = fixture();
    f.backend.serve(vec![remote(user(2), user(1), "conversation:7", 10, 1)]);

    f.store.refresh().await;

    assert_eq!(f.backend.list_calls(), 0);
    assert!(f.store.snapshot().is_empty());
}

#[tokio::test]
async fn refresh_merges_the_backend_list_newest_first() {
    let f = signed_in();
    f.backend.serve(vec![
        remote(user(2), user(1), "conversation:7", 10, 1),
        remote(user(3), user(1), "conversation:8", 20, 2),
    ]);

    f.store.refresh().await;

    let records = f.store.snapshot();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].related_entity, "conversation:8");
    assert_eq!(f.store.unread_total(), 3);
}

#[tokio::test]
async fn refresh_while_offline_keeps_the_last_snapshot() {
    let f = signed_in();
    f.backend.serve(vec![remote(user(2), user(1), "conversation:7", 10, 2)]);
    f.store.refresh().await;
    let before = f.store.snapshot();

    f.backend.go_offline();
    f.store.refresh().await;

    assert_eq!(f.store.snapshot(), before);
    assert_eq!(f.backend.list_calls(), 2);
}

#[tokio::test]
async fn refresh_keeps_realtime_only_records() {
    let f = signed_in();
    f.store.ingest(&event(user(4), user(1), "item:3", 30));
    f.backend.serve(vec![remote(user(2), user(1), "conversation:7", 10, 1)]);

    f.store.refresh().await;

    assert_eq!(f.store.snapshot().len(), 2);
}

#[tokio::test]
async fn ingesting_the_same_event_twice_is_idempotent() {
    let f = signed_in();
    let pushed = event(user(2), user(1), "conversation:7", 10);

    assert!(f.store.ingest(&pushed));
    assert!(!f.store.ingest(&pushed));

    assert_eq!(f.store.snapshot().len(), 1);
    assert_eq!(f.store.unread_total(), 1);
}

#[tokio::test]
async fn events_for_the_same_pair_merge_into_the_latest() {
    let f = signed_in();
    f.store.ingest(&event(user(2), user(1), "conversation:7", 10));
    f.store.ingest(&event(user(1), user(2), "conversation:7", 20));

    let records = f.store.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp, common::at(20));
    assert_eq!(records[0].unread_count(), 2);

    f.backend.serve(vec![remote(user(2), user(1), "conversation:7", 15, 3)]);
    f.store.refresh().await;
    let records = f.store.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].unread_count(), 5);
    assert_eq!(records[0].timestamp, common::at(20));
}

#[tokio::test]
async fn mark_read_is_optimistic_idempotent_and_persisted_once() {
    let f = signed_in();
    let pushed = event(user(2), user(1), "conversation:7", 10);
    f.store.ingest(&pushed);
    let key = pushed.key();

    assert!(f.store.mark_read(&key).await);
    assert_eq!(f.store.unread_total(), 0);
    assert!(!f.store.mark_read(&key).await);
    assert_eq!(f.store.unread_total(), 0);

    let receipts = f.backend.receipts();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].0, "token-1");
    assert_eq!(receipts[0].1.related_entity, "conversation:7");
    assert_eq!(receipts[0].1.sender_id, user(2));
}

#[tokio::test]
async fn failed_read_persistence_is_not_rolled_back() {
    let f = signed_in();
    *f.backend.fail_mark_read.lock().unwrap() = true;
    let pushed = event(user(2), user(1), "conversation:7", 10);
    f.store.ingest(&pushed);

    assert!(f.store.mark_read(&pushed.key()).await);
    assert_eq!(f.store.unread_total(), 0);
    assert!(f.backend.receipts().is_empty());
}

#[tokio::test]
async fn a_poll_does_not_resurrect_locally_read_notifications() {
    let f = signed_in();
    f.backend.serve(vec![remote(user(2), user(1), "conversation:7", 10, 2)]);
    f.store.refresh().await;
    let key = f.store.snapshot()[0].key.clone();
    f.store.mark_read(&key).await;

    f.store.refresh().await;

    assert_eq!(f.store.unread_total(), 0);
}

#[tokio::test]
async fn subscribers_see_every_change() {
    let f = signed_in();
    let mut updates = f.store.subscribe();

    f.store.ingest(&event(user(2), user(1), "conversation:7", 10));
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().unread_total(), 1);

    f.store.ingest(&event(user(2), user(1), "conversation:7", 10));
    assert!(!updates.has_changed().unwrap());

    let key = f.store.snapshot()[0].key.clone();
    assert!(f.store.remove(&key).is_some());
    assert!(updates.has_changed().unwrap());
    assert!(updates.borrow_and_update().is_empty());
}

#[tokio::test(start_paused = true)]
async fn realtime_pushes_land_in_the_store() {
    let f = signed_in();
    let transport = FakeTransport::new();
    let client = RealtimeClient::spawn(
        Arc::new(transport.clone()),
        ReconnectPolicy::default(),
        Arc::new(f.store.clone()),
    );
    client.connect(&session_for(user(1), "token-1"), ADDRESS).await.unwrap();
    settle().await;

    let body = serde_json::to_string(&event(user(2), user(1), "conversation:7", 10)).unwrap();
    assert!(transport.deliver(&notification_topic(user(1)), &body));
    assert!(transport.deliver(&notification_topic(user(1)), &body));
    settle().await;

    assert_eq!(f.store.snapshot().len(), 1);
    assert_eq!(f.store.unread_total(), 1);
}

#[tokio::test(start_paused = true)]
async fn poller_follows_the_session() {
    let f = signed_in();
    f.backend.serve(vec![remote(user(2), user(1), "conversation:7", 10, 1)]);
    let shutdown = CancellationToken::new();
    let poller = NotificationPoller::spawn(
        f.store.clone(),
        f.sessions.clone(),
        Duration::from_secs(30),
        shutdown.clone(),
    );

    settle().await;
    assert_eq!(f.backend.list_calls(), 1);
    assert_eq!(f.store.snapshot().len(), 1);

    sleep(Duration::from_millis(30_001)).await;
    settle().await;
    assert_eq!(f.backend.list_calls(), 2);

    f.sessions.clear();
    settle().await;
    assert!(f.store.snapshot().is_empty());
    sleep(Duration::from_secs(120)).await;
    assert_eq!(f.backend.list_calls(), 2);

    f.sessions.set(session_for(user(1), "token-2"));
    settle().await;
    assert_eq!(f.backend.list_calls(), 3);
    assert!(f.sessions.current().is_some());

    shutdown.cancel();
    poller.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn signing_out_closes_the_realtime_channel_and_keeps_the_store_empty() {
    let f = signed_in();
    let transport = FakeTransport::new();
    let client = RealtimeClient::spawn(
        Arc::new(transport.clone()),
        ReconnectPolicy::default(),
        Arc::new(f.store.clone()),
    );
    let shutdown = CancellationToken::new();
    let poller = NotificationPoller::spawn(
        f.store.clone(),
        f.sessions.clone(),
        Duration::from_secs(30),
        shutdown.clone(),
    );
    let link = client.follow_sessions(f.sessions.clone(), ADDRESS, shutdown.clone());
    settle().await;
    assert_eq!(transport.live(), 1);

    let topic = notification_topic(user(1));
    let pushed = serde_json::to_string(&event(user(2), user(1), "conversation:7", 10)).unwrap();
    assert!(transport.deliver(&topic, &pushed));
    settle().await;
    assert_eq!(f.store.unread_total(), 1);

    f.sessions.clear();
    settle().await;
    assert_eq!(transport.live(), 0);
    let late = serde_json::to_string(&event(user(2), user(1), "conversation:7", 11)).unwrap();
    assert!(!transport.deliver(&topic, &late));
    settle().await;
    assert!(f.store.snapshot().is_empty());
    assert_eq!(f.store.unread_total(), 0);

    // The next sign-in, as someone else, gets a channel of its own.
    f.sessions.set(session_for(user(3), "token-3"));
    settle().await;
    assert_eq!(transport.live(), 1);
    assert_eq!(transport.subscribed_topics(), vec![notification_topic(user(3))]);
    assert_eq!(
        transport.tokens(),
        vec!["token-1".to_string(), "token-3".to_string()]
    );

    shutdown.cancel();
    link.await.unwrap();
    poller.await.unwrap();
    client.shutdown().await;
    assert_eq!(transport.live(), 0);
}
