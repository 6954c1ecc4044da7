//! services/app/src/realtime/client.rs
//!
//! The public face of the realtime channel: a handle that sends commands to
//! the driver task and watches the status it publishes.

use std::sync::Arc;

use marketplace_core::subscriptions::{SEND_MESSAGE_DESTINATION, START_CONVERSATION_DESTINATION};
use marketplace_core::{
    ChatMessage, ConnectError, ConnectionState, ConversationStart, FailureKind,
    NotificationEvent, OutgoingChatMessage, PortError, ReconnectPolicy, Session,
    SessionProvider, StatusIndicator, Transport,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::driver::Driver;
use super::session_link::follow_sessions;

const COMMAND_BUFFER: usize = 32;

//=========================================================================================
// Handler, Status & Errors
//=========================================================================================

/// Receives every well-formed message delivered on a subscribed topic.
/// Called from the driver task, so implementations must not block.
pub trait RealtimeHandler: Send + Sync {
    fn on_notification(&self, event: NotificationEvent);

    fn on_chat_message(&self, message: ChatMessage) {
        let _ = message;
    }
}

/// Snapshot of the connection, published after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful connection.
    pub attempt: u32,
    pub error: Option<String>,
    /// Cause of the last failure; `None` once a connection succeeds.
    pub failure: Option<FailureKind>,
    pub reconnect_pending: bool,
}

impl ConnectionStatus {
    pub fn indicator(&self) -> StatusIndicator {
        self.state.indicator()
    }

    /// The channel stopped because its credentials were refused. Only a fresh
    /// session passed to `connect` brings it back.
    pub fn needs_reauth(&self) -> bool {
        self.state == ConnectionState::Disconnected && self.failure == Some(FailureKind::Auth)
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            error: None,
            failure: None,
            reconnect_pending: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("the realtime channel is not connected")]
    NotConnected,
    #[error("the realtime client has shut down")]
    Closed,
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("could not encode outgoing message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub(crate) enum Command {
    Connect {
        session: Session,
        address: String,
        reply: oneshot::Sender<Result<(), ConnectError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Watch(i64),
    Unwatch(i64),
    Send {
        destination: &'static str,
        body: String,
        reply: oneshot::Sender<Result<(), RealtimeError>>,
    },
}

//=========================================================================================
// The Client Handle
//=========================================================================================

pub struct RealtimeClient {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RealtimeClient {
    /// Starts the driver task. Must be called from within a tokio runtime.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        handler: Arc<dyn RealtimeHandler>,
    ) -> Self {
        let (commands, inbox) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        let shutdown = CancellationToken::new();
        let driver = Driver::new(transport, handler, policy, status_tx);
        let task = tokio::spawn(driver.run(inbox, shutdown.clone()));
        Self {
            commands,
            status,
            shutdown,
            task: Some(task),
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RealtimeError> {
        request(&self.commands, build).await
    }

    /// Opens the channel for `session`. Returns once the attempt has started;
    /// watch the status for the outcome. A no-op while connecting or connected
    /// as the same user; a different user replaces the current connection.
    pub async fn connect(&self, session: &Session, address: &str) -> Result<(), RealtimeError> {
        connect(&self.commands, session, address).await
    }

    /// Cancels any pending retry, unsubscribes and closes the connection.
    /// Auto-reconnect stays off until the next `connect`.
    pub async fn disconnect(&self) -> Result<(), RealtimeError> {
        disconnect(&self.commands).await
    }

    /// Ties the channel to the session lifecycle: every valid session is
    /// connected (switching users as needed) and a cleared or expired session
    /// disconnects. Runs until `shutdown` fires or the session source goes away.
    pub fn follow_sessions(
        &self,
        sessions: Arc<dyn SessionProvider>,
        address: impl Into<String>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(follow_sessions(
            self.commands.clone(),
            sessions,
            address.into(),
            shutdown,
        ))
    }

    pub async fn watch_conversation(&self, conversation_id: i64) -> Result<(), RealtimeError> {
        self.commands
            .send(Command::Watch(conversation_id))
            .await
            .map_err(|_| RealtimeError::Closed)
    }

    pub async fn unwatch_conversation(&self, conversation_id: i64) -> Result<(), RealtimeError> {
        self.commands
            .send(Command::Unwatch(conversation_id))
            .await
            .map_err(|_| RealtimeError::Closed)
    }

    pub async fn send_message(&self, message: &OutgoingChatMessage) -> Result<(), RealtimeError> {
        self.publish(SEND_MESSAGE_DESTINATION, serde_json::to_string(message)?)
            .await
    }

    pub async fn start_conversation(&self, start: &ConversationStart) -> Result<(), RealtimeError> {
        self.publish(START_CONVERSATION_DESTINATION, serde_json::to_string(start)?)
            .await
    }

    async fn publish(&self, destination: &'static str, body: String) -> Result<(), RealtimeError> {
        self.request(|reply| Command::Send {
            destination,
            body,
            reply,
        })
        .await?
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Tears the connection down and waits for the driver task to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

pub(crate) async fn request<T>(
    commands: &mpsc::Sender<Command>,
    build: impl FnOnce(oneshot::Sender<T>) -> Command,
) -> Result<T, RealtimeError> {
    let (reply, response) = oneshot::channel();
    commands
        .send(build(reply))
        .await
        .map_err(|_| RealtimeError::Closed)?;
    response.await.map_err(|_| RealtimeError::Closed)
}

pub(crate) async fn connect(
    commands: &mpsc::Sender<Command>,
    session: &Session,
    address: &str,
) -> Result<(), RealtimeError> {
    request(commands, |reply| Command::Connect {
        session: session.clone(),
        address: address.to_string(),
        reply,
    })
    .await??;
    Ok(())
}

pub(crate) async fn disconnect(commands: &mpsc::Sender<Command>) -> Result<(), RealtimeError> {
    request(commands, |reply| Command::Disconnect { reply }).await
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
