//! services/app/src/bin/notify.rs
//!
//! Signs in (or uses a provided token), keeps the notification store fed by
//! both the poller and the realtime channel, and logs every change until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use app_lib::{
    adapters::{HttpAuthProvider, RestBackend, SessionHandle, StompWsTransport},
    config::Config,
    error::AppError,
    notifications::{NotificationPoller, NotificationStore},
    realtime::RealtimeClient,
};
use chrono::Utc;
use marketplace_core::{AuthGrant, AuthProvider, MarketplaceBackend, Session, SessionProvider};
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long before expiry the session is refreshed.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting notification client...");

    // --- 2. Initialize Adapters ---
    let backend: Arc<dyn MarketplaceBackend> = Arc::new(RestBackend::new(
        config.api_base_url.clone(),
        config.request_timeout,
    )?);
    let auth = match &config.auth_url {
        Some(url) => Some(HttpAuthProvider::new(url.clone(), config.request_timeout)?),
        None => None,
    };
    let sessions = Arc::new(SessionHandle::new());

    // --- 3. Establish a Session ---
    let grant = establish_session(&config, auth.as_ref()).await?;
    sessions.set(grant.session.clone());

    // --- 4. Start the Store, Poller & Realtime Client ---
    let shutdown = CancellationToken::new();
    let store = NotificationStore::new(backend, sessions.clone());
    let poller = NotificationPoller::spawn(
        store.clone(),
        sessions.clone(),
        config.poll_interval,
        shutdown.clone(),
    );
    let client = RealtimeClient::spawn(
        Arc::new(StompWsTransport::new(config.request_timeout)),
        config.reconnect,
        Arc::new(store.clone()),
    );
    let link = client.follow_sessions(
        sessions.clone(),
        config.realtime_url.clone(),
        shutdown.clone(),
    );

    let reauth = Arc::new(Notify::new());
    let refresher = match (auth.clone(), grant.refresh_token.clone()) {
        (Some(auth), Some(refresh_token)) => Some(tokio::spawn(keep_session_fresh(
            auth,
            sessions.clone(),
            refresh_token,
            reauth.clone(),
            shutdown.clone(),
        ))),
        _ => None,
    };

    // --- 5. Report Until Ctrl-C ---
    let mut updates = store.subscribe();
    let mut status = client.subscribe_status();
    let mut reauth_requested_for: Option<String> = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down.");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let set = updates.borrow_and_update().clone();
                info!("{} notification(s), {} unread.", set.len(), set.unread_total());
                let latest = set.records().next().cloned();
                if let Some(latest) = latest {
                    info!("Latest: [{}] {}", latest.kind, latest.message);
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                match &current.error {
                    Some(error) => warn!("Realtime {:?} (attempt {}): {}", current.indicator(), current.attempt, error),
                    None => info!("Realtime {:?}", current.indicator()),
                }
                if current.needs_reauth() {
                    let token = sessions.current().map(|session| session.access_token);
                    if refresher.is_some() && token.is_some() && token != reauth_requested_for {
                        info!("Realtime credentials refused; refreshing the session.");
                        reauth_requested_for = token;
                        reauth.notify_one();
                    } else if refresher.is_none() {
                        warn!("Realtime credentials refused and no refresh token is available; set a new ACCESS_TOKEN.");
                    }
                }
            }
        }
    }

    // --- 6. Teardown ---
    shutdown.cancel();
    let _ = link.await;
    client.disconnect().await?;
    client.shutdown().await;
    let _ = poller.await;
    if let Some(refresher) = refresher {
        let _ = refresher.await;
    }
    if let (Some(auth), Some(session)) = (auth.as_ref(), sessions.current()) {
        if grant.refresh_token.is_some() {
            if let Err(e) = auth.sign_out(&session.access_token).await {
                warn!("Sign-out failed: {}", e);
            }
        }
    }
    sessions.clear();
    Ok(())
}

/// Uses `ACCESS_TOKEN`/`USER_ID` when both are set, otherwise signs in with
/// `AUTH_EMAIL`/`AUTH_PASSWORD` against the identity provider.
async fn establish_session(
    config: &Config,
    auth: Option<&HttpAuthProvider>,
) -> Result<AuthGrant, AppError> {
    if let (Some(token), Some(user_id)) = (&config.access_token, config.user_id) {
        let ttl = chrono::Duration::from_std(config.session_ttl)
            .map_err(|e| AppError::Internal(format!("SESSION_TTL_SECS out of range: {}", e)))?;
        return Ok(AuthGrant {
            session: Session {
                user_id,
                access_token: token.clone(),
                expires_at: Utc::now() + ttl,
            },
            refresh_token: None,
        });
    }

    match (auth, &config.auth_email, &config.auth_password) {
        (Some(auth), Some(email), Some(password)) => Ok(auth.sign_in(email, password).await?),
        _ => Err(AppError::Internal(
            "set ACCESS_TOKEN and USER_ID, or AUTH_URL, AUTH_EMAIL and AUTH_PASSWORD".to_string(),
        )),
    }
}

/// Refreshes the session shortly before it expires, or at once when `reauth`
/// fires. A failed refresh clears the session, which stops polling and closes
/// the realtime channel.
async fn keep_session_fresh(
    auth: HttpAuthProvider,
    sessions: Arc<SessionHandle>,
    mut refresh_token: String,
    reauth: Arc<Notify>,
    shutdown: CancellationToken,
) {
    loop {
        let Some(session) = sessions.current() else {
            return;
        };
        let wait = (session.expires_at - Utc::now())
            .to_std()
            .unwrap_or_default()
            .saturating_sub(REFRESH_MARGIN);

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = sleep(wait) => {}
            _ = reauth.notified() => {}
        }

        match auth.refresh_session(&refresh_token).await {
            Ok(grant) => {
                if let Some(next) = grant.refresh_token {
                    refresh_token = next;
                }
                info!("Session refreshed until {}", grant.session.expires_at);
                sessions.set(grant.session);
            }
            Err(e) => {
                warn!("Session refresh failed: {}", e);
                sessions.clear();
                return;
            }
        }
    }
}
