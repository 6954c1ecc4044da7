//! services/app/src/notifications/poller.rs
//!
//! Refreshes the store on a fixed interval while a valid session exists.
//! Clearing the session stops polling at once and empties the store; the
//! next valid session starts it again with an immediate refresh.

use std::sync::Arc;
use std::time::Duration;

use marketplace_core::{Session, SessionProvider};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::NotificationStore;

pub struct NotificationPoller;

impl NotificationPoller {
    pub fn spawn(
        store: NotificationStore,
        sessions: Arc<dyn SessionProvider>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(poll_loop(store, sessions, every, shutdown))
    }
}

fn ticker(every: Duration) -> Interval {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn poll_loop(
    store: NotificationStore,
    sessions: Arc<dyn SessionProvider>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut session_rx = sessions.watch();
    let mut active: Option<Uuid> = None;
    let mut ticks = ticker(every);

    loop {
        let user = session_rx
            .borrow_and_update()
            .as_ref()
            .filter(|session| session.is_valid())
            .map(|session: &Session| session.user_id);

        if user != active {
            if let Some(previous) = active {
                store.clear();
                info!("Stopped notification polling for {}.", previous);
            }
            if let Some(next) = user {
                ticks = ticker(every);
                info!("Polling notifications for {} every {:?}.", next, every);
            }
            active = user;
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = session_rx.changed() => {
                if changed.is_err() {
                    debug!("Session source dropped; stopping the poller.");
                    break;
                }
            }
            _ = ticks.tick(), if active.is_some() => store.refresh().await,
        }
    }
    debug!("Notification poller stopped.");
}
