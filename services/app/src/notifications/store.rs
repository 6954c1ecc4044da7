//! services/app/src/notifications/store.rs
//!
//! `NotificationStore` wraps a `NotificationSet` in a `watch` channel. Every
//! mutation runs inside `send_modify`/`send_if_modified`, so readers only
//! ever see a complete set.

use std::sync::Arc;

use marketplace_core::{
    ChatMessage, MarketplaceBackend, NotificationEvent, NotificationKey, NotificationRecord,
    NotificationSet, Session, SessionProvider,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::realtime::RealtimeHandler;

#[derive(Clone)]
pub struct NotificationStore {
    state: Arc<watch::Sender<NotificationSet>>,
    backend: Arc<dyn MarketplaceBackend>,
    sessions: Arc<dyn SessionProvider>,
}

impl NotificationStore {
    pub fn new(backend: Arc<dyn MarketplaceBackend>, sessions: Arc<dyn SessionProvider>) -> Self {
        let (state, _) = watch::channel(NotificationSet::new());
        Self {
            state: Arc::new(state),
            backend,
            sessions,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationSet> {
        self.state.subscribe()
    }

    /// The current records, newest first.
    pub fn snapshot(&self) -> Vec<NotificationRecord> {
        self.state.borrow().records().cloned().collect()
    }

    pub fn unread_total(&self) -> u32 {
        self.state.borrow().unread_total()
    }

    fn valid_session(&self) -> Option<Session> {
        self.sessions.current().filter(Session::is_valid)
    }

    /// Pulls the backend's list and merges it in. Errors are logged and the
    /// previous snapshot stays visible.
    pub async fn refresh(&self) {
        let Some(session) = self.valid_session() else {
            debug!("Skipping notification refresh: no valid session.");
            return;
        };

        let remote = match self.backend.list_notifications(&session.access_token).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Notification refresh failed, keeping the last snapshot: {}", e);
                return;
            }
        };

        let still_current = self
            .sessions
            .current()
            .is_some_and(|current| current.user_id == session.user_id);
        if !still_current {
            debug!("Session changed during refresh; discarding the result.");
            return;
        }

        let fetched = remote.len();
        self.state.send_modify(|set| set.apply_rest_snapshot(remote));
        debug!("Merged {} notification(s) from the backend.", fetched);
    }

    /// Folds a realtime event in. Returns `false` for an exact duplicate.
    pub fn ingest(&self, event: &NotificationEvent) -> bool {
        self.state.send_if_modified(|set| set.ingest(event))
    }

    /// Marks one record read locally, then tells the backend. The backend call
    /// is best effort: a failure is logged and the local state is kept.
    pub async fn mark_read(&self, key: &NotificationKey) -> bool {
        let mut receipt = None;
        self.state.send_if_modified(|set| {
            let changed = set.mark_read(key);
            if changed {
                receipt = set.get(key).map(NotificationRecord::receipt);
            }
            changed
        });
        let Some(receipt) = receipt else {
            return false;
        };

        match self.valid_session() {
            Some(session) => {
                if let Err(e) = self
                    .backend
                    .mark_notifications_read(&session.access_token, &receipt)
                    .await
                {
                    warn!("Could not persist read state for {}: {}", key, e);
                }
            }
            None => debug!("No valid session; read state for {} kept locally.", key),
        }
        true
    }

    pub fn remove(&self, key: &NotificationKey) -> Option<NotificationRecord> {
        let mut removed = None;
        self.state.send_if_modified(|set| {
            removed = set.remove(key);
            removed.is_some()
        });
        removed
    }

    pub fn clear(&self) {
        self.state.send_if_modified(|set| {
            let had_records = !set.is_empty();
            set.clear();
            had_records
        });
    }
}

impl RealtimeHandler for NotificationStore {
    fn on_notification(&self, event: NotificationEvent) {
        if !self.ingest(&event) {
            debug!("Ignoring duplicate notification {}", event.key());
        }
    }

    fn on_chat_message(&self, message: ChatMessage) {
        info!(
            "Chat message {} in conversation {} from {}",
            message.id, message.conversation_id, message.sender_id
        );
    }
}
