//! services/app/src/realtime/driver.rs
//!
//! The task behind a `RealtimeClient`. It feeds commands, handshake results,
//! backoff timers and inbound frames into the `ConnectionMachine` and carries
//! out the directives it returns. At most one transport connection exists at
//! any time, and it is only ever touched from this task.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::BoxFuture;
use marketplace_core::domain::parse_payload;
use marketplace_core::{
    ChatMessage, ConnectionMachine, ConnectionState, Directive, FailureKind, InboundFrame,
    NotificationEvent, PortError, PortResult, ReconnectPolicy, Session, SubscriptionSet,
    TopicKind, Transport, TransportConnection,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::{Command, ConnectionStatus, RealtimeError, RealtimeHandler};

type Opening = BoxFuture<'static, PortResult<Box<dyn TransportConnection>>>;

/// Credentials and address for the current connect cycle.
struct Target {
    session: Session,
    address: String,
}

pub(crate) struct Driver {
    transport: Arc<dyn Transport>,
    handler: Arc<dyn RealtimeHandler>,
    machine: ConnectionMachine,
    subscriptions: SubscriptionSet,
    target: Option<Target>,
    connection: Option<Box<dyn TransportConnection>>,
    opening: Option<Opening>,
    retry: Option<Pin<Box<Sleep>>>,
    /// Runs while a fresh connection has yet to prove itself.
    proving: Option<Pin<Box<Sleep>>>,
    status: watch::Sender<ConnectionStatus>,
}

impl Driver {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn RealtimeHandler>,
        policy: ReconnectPolicy,
        status: watch::Sender<ConnectionStatus>,
    ) -> Self {
        Self {
            transport,
            handler,
            machine: ConnectionMachine::new(policy),
            subscriptions: SubscriptionSet::default(),
            target: None,
            connection: None,
            opening: None,
            retry: None,
            proving: None,
            status,
        }
    }

    //=====================================================================================
    // Control Loop
    //=====================================================================================

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Realtime client dropped, shutting down.");
                    break;
                }

                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },

                result = wait_open(&mut self.opening) => {
                    self.opening = None;
                    self.on_open_result(result).await;
                }

                _ = wait_timer(&mut self.retry) => {
                    self.retry = None;
                    let directive = self.machine.reconnect_due();
                    self.apply(directive).await;
                }

                _ = wait_timer(&mut self.proving) => {
                    self.proving = None;
                    if self.machine.connection_proven() {
                        debug!("Realtime connection is stable.");
                    }
                }

                inbound = next_inbound(&mut self.connection) => self.on_inbound(inbound).await,
            }
        }

        let directive = self.machine.disconnect();
        self.apply(directive).await;
        debug!("Realtime driver stopped.");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect {
                session,
                address,
                reply,
            } => {
                let switching_user = self
                    .target
                    .as_ref()
                    .is_some_and(|target| target.session.user_id != session.user_id);
                if switching_user {
                    // The previous user's conversations are not the new user's.
                    if self.machine.state() != ConnectionState::Disconnected {
                        info!("Switching the realtime channel to {}.", session.user_id);
                        let directive = self.machine.disconnect();
                        self.apply(directive).await;
                    }
                    self.subscriptions = SubscriptionSet::default();
                    self.target = None;
                }

                // An expired session is treated exactly like a missing token.
                let token = if session.is_valid() {
                    session.access_token.clone()
                } else {
                    String::new()
                };
                match self.machine.connect(&token, &address) {
                    Ok(directive) => {
                        if directive == Directive::OpenTransport {
                            self.subscriptions.retarget(session.user_id);
                            self.target = Some(Target { session, address });
                        } else if let Some(target) = self.target.as_mut() {
                            // Same user with a refreshed token: keep it for the next reconnect.
                            if target.session.user_id == session.user_id {
                                target.session = session;
                            }
                        }
                        self.apply(directive).await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        warn!("Refusing to open the realtime channel: {}", e);
                        self.publish();
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Disconnect { reply } => {
                info!("Disconnect requested.");
                let directive = self.machine.disconnect();
                self.apply(directive).await;
                let _ = reply.send(());
            }
            Command::Watch(conversation_id) => {
                let Some(topic) = self.subscriptions.watch_conversation(conversation_id) else {
                    return;
                };
                if self.machine.state() != ConnectionState::Connected {
                    return;
                }
                let Some(connection) = self.connection.as_mut() else {
                    return;
                };
                match connection.subscribe(&topic).await {
                    Ok(id) => {
                        if let Some(duplicate) = self.subscriptions.bind(&topic, id) {
                            let _ = connection.unsubscribe(&duplicate).await;
                        }
                    }
                    Err(e) => self.connection_lost(&e, "subscribe failed"),
                }
            }
            Command::Unwatch(conversation_id) => {
                let handle = self.subscriptions.unwatch_conversation(conversation_id);
                if let (Some(handle), Some(connection)) = (handle, self.connection.as_mut()) {
                    if let Err(e) = connection.unsubscribe(&handle).await {
                        debug!("Unsubscribe from conversation {} failed: {}", conversation_id, e);
                    }
                }
            }
            Command::Send {
                destination,
                body,
                reply,
            } => {
                let connection = match self.connection.as_mut() {
                    Some(connection) if self.machine.state() == ConnectionState::Connected => {
                        connection
                    }
                    _ => {
                        let _ = reply.send(Err(RealtimeError::NotConnected));
                        return;
                    }
                };
                match connection.send(destination, &body).await {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        self.connection_lost(&e, "send failed");
                        let _ = reply.send(Err(e.into()));
                    }
                }
            }
        }
    }

    //=====================================================================================
    // Directive Execution
    //=====================================================================================

    async fn apply(&mut self, directive: Directive) {
        match directive {
            Directive::Nothing => {}
            Directive::OpenTransport => self.begin_open().await,
            Directive::Subscribe => self.resubscribe().await,
            Directive::Teardown => self.teardown().await,
            other => self.schedule(other),
        }
        self.publish();
    }

    /// Handles the directives a failure can produce. Never opens anything itself.
    fn schedule(&mut self, directive: Directive) {
        match directive {
            Directive::ScheduleReconnect(delay) => {
                info!(
                    "Reconnecting in {:?} (attempt {} of {}).",
                    delay,
                    self.machine.failures() + 1,
                    self.machine.policy().max_attempts
                );
                self.retry = Some(Box::pin(sleep(delay)));
            }
            Directive::GiveUp => {
                self.retry = None;
                error!(
                    "Realtime channel gave up: {}",
                    self.machine.last_error().unwrap_or("unknown error")
                );
            }
            Directive::Nothing => {}
            other => debug!("Ignoring {:?} after a failure.", other),
        }
        self.publish();
    }

    async fn begin_open(&mut self) {
        self.retry = None;
        self.proving = None;
        if let Some(mut stale) = self.connection.take() {
            for id in self.subscriptions.clear_live() {
                let _ = stale.unsubscribe(&id).await;
            }
            let _ = stale.close().await;
        }

        let Some(target) = self.target.as_ref().filter(|t| t.session.is_valid()) else {
            let directive = self
                .machine
                .transport_failed(FailureKind::Auth, "session expired before reconnecting");
            self.schedule(directive);
            return;
        };

        info!("Opening realtime connection to {}", target.address);
        let transport = self.transport.clone();
        let address = target.address.clone();
        let token = target.session.access_token.clone();
        self.opening = Some(Box::pin(async move { transport.open(&address, &token).await }));
    }

    async fn on_open_result(&mut self, result: PortResult<Box<dyn TransportConnection>>) {
        match result {
            Ok(connection) => {
                self.connection = Some(connection);
                let directive = self.machine.transport_opened();
                self.apply(directive).await;
            }
            Err(e) => {
                warn!("Realtime connection attempt failed: {}", e);
                let directive = self.machine.transport_failed(failure_kind(&e), e.to_string());
                self.schedule(directive);
            }
        }
    }

    /// Brings the live subscriptions in line with the wanted topics on a fresh connection.
    async fn resubscribe(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        let plan = self.subscriptions.plan_resubscribe();
        for id in &plan.stale {
            if let Err(e) = connection.unsubscribe(id).await {
                debug!("Dropping stale subscription {} failed: {}", id.0, e);
            }
        }

        let mut failure = None;
        for topic in &plan.topics {
            match connection.subscribe(topic).await {
                Ok(id) => {
                    if let Some(duplicate) = self.subscriptions.bind(topic, id) {
                        let _ = connection.unsubscribe(&duplicate).await;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        match failure {
            Some(e) => self.connection_lost(&e, "subscribe failed"),
            None => {
                info!(
                    "Realtime channel connected with {} subscription(s).",
                    self.subscriptions.live_count()
                );
                self.proving = Some(Box::pin(sleep(self.machine.policy().max_delay)));
            }
        }
    }

    async fn teardown(&mut self) {
        self.retry = None;
        self.opening = None;
        self.proving = None;
        let handles = self.subscriptions.clear_live();
        if let Some(mut connection) = self.connection.take() {
            for id in &handles {
                if let Err(e) = connection.unsubscribe(id).await {
                    debug!("Unsubscribe {} during teardown failed: {}", id.0, e);
                }
            }
            if let Err(e) = connection.close().await {
                debug!("Closing the realtime connection failed: {}", e);
            }
            info!("Realtime connection closed.");
        }
        self.machine.closed();
    }

    //=====================================================================================
    // Inbound Traffic
    //=====================================================================================

    async fn on_inbound(&mut self, inbound: Option<PortResult<InboundFrame>>) {
        match inbound {
            Some(Ok(frame)) => {
                if self.machine.connection_proven() {
                    self.proving = None;
                }
                self.dispatch(frame);
            }
            Some(Err(e)) => self.connection_lost(&e, "connection error"),
            None => {
                let closed = PortError::Transport("connection closed by broker".to_string());
                self.connection_lost(&closed, "connection lost");
            }
        }
    }

    fn dispatch(&self, frame: InboundFrame) {
        match self.subscriptions.resolve(&frame.subscription) {
            Some(TopicKind::Notifications) => match NotificationEvent::parse(&frame.body) {
                Ok(event) => self.handler.on_notification(event),
                Err(e) => warn!("Dropping malformed notification on {}: {}", frame.destination, e),
            },
            Some(TopicKind::Conversation(conversation_id)) => {
                match parse_payload::<ChatMessage>(&frame.body) {
                    Ok(message) => self.handler.on_chat_message(message),
                    Err(e) => warn!(
                        "Dropping malformed chat message for conversation {}: {}",
                        conversation_id, e
                    ),
                }
            }
            None => debug!(
                "Dropping message for unknown subscription {} ({})",
                frame.subscription.0, frame.destination
            ),
        }
    }

    /// The live connection is gone. Its subscriptions died with it.
    fn connection_lost(&mut self, cause: &PortError, context: &str) {
        warn!("Realtime {}: {}", context, cause);
        self.connection = None;
        self.proving = None;
        self.subscriptions.clear_live();
        let directive = self.machine.transport_failed(failure_kind(cause), cause.to_string());
        self.schedule(directive);
    }

    fn publish(&self) {
        let next = ConnectionStatus {
            state: self.machine.state(),
            attempt: self.machine.failures(),
            error: self.machine.last_error().map(str::to_string),
            failure: self.machine.last_failure(),
            reconnect_pending: self.machine.reconnect_pending(),
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

fn failure_kind(err: &PortError) -> FailureKind {
    match err {
        PortError::Unauthorized => FailureKind::Auth,
        PortError::Protocol(_) => FailureKind::Protocol,
        _ => FailureKind::Transport,
    }
}

//=========================================================================================
// Select Helpers (pending while the slot is empty)
//=========================================================================================

async fn wait_open(opening: &mut Option<Opening>) -> PortResult<Box<dyn TransportConnection>> {
    match opening {
        Some(opening) => opening.await,
        None => pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.await,
        None => pending().await,
    }
}

async fn next_inbound(
    connection: &mut Option<Box<dyn TransportConnection>>,
) -> Option<PortResult<InboundFrame>> {
    match connection {
        Some(connection) => connection.next_message().await,
        None => pending().await,
    }
}
