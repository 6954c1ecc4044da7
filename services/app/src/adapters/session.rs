//! services/app/src/adapters/session.rs
//!
//! The in-process `SessionProvider`: a watch channel holding the current session.
//! Constructed once at startup and handed to every component that needs it.

use marketplace_core::{Session, SessionProvider};
use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct SessionHandle {
    tx: watch::Sender<Option<Session>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn set(&self, session: Session) {
        info!("Session established for user {}", session.user_id);
        self.tx.send_replace(Some(session));
    }

    pub fn clear(&self) {
        if self.tx.send_replace(None).is_some() {
            info!("Session cleared");
        }
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProvider for SessionHandle {
    fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }
}
