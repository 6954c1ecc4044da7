//! services/app/src/realtime/session_link.rs
//!
//! Keeps the realtime channel in step with the signed-in session. A new valid
//! session connects (the driver swaps connections when the user changes), a
//! refreshed token is handed over for later reconnects, and a cleared or
//! expired session disconnects.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use marketplace_core::{Session, SessionProvider};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::{connect, disconnect, Command, RealtimeError};

pub(crate) async fn follow_sessions(
    commands: mpsc::Sender<Command>,
    sessions: Arc<dyn SessionProvider>,
    address: String,
    shutdown: CancellationToken,
) {
    let mut session_rx = sessions.watch();
    let mut linked: Option<Uuid> = None;

    loop {
        let session = session_rx
            .borrow_and_update()
            .clone()
            .filter(Session::is_valid);

        let outcome = match &session {
            Some(session) => {
                if linked != Some(session.user_id) {
                    info!("Linking the realtime channel to {}.", session.user_id);
                }
                linked = Some(session.user_id);
                connect(&commands, session, &address).await
            }
            None => match linked.take() {
                Some(previous) => {
                    info!("Session for {} ended; closing the realtime channel.", previous);
                    disconnect(&commands).await
                }
                None => Ok(()),
            },
        };
        match outcome {
            Ok(()) => {}
            Err(RealtimeError::Closed) => break,
            Err(e) => warn!("Could not follow the session change: {}", e),
        }

        let expires_in = session
            .as_ref()
            .map(|session| (session.expires_at - Utc::now()).to_std().unwrap_or_default());

        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = session_rx.changed() => {
                if changed.is_err() {
                    debug!("Session source dropped; no longer following sessions.");
                    break;
                }
            }
            _ = sleep(expires_in.unwrap_or(Duration::ZERO)), if expires_in.is_some() => {
                debug!("Session expired without a refresh.");
            }
        }
    }
    debug!("Session link stopped.");
}
