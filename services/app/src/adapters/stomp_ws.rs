//! services/app/src/adapters/stomp_ws.rs
//!
//! The realtime transport adapter: STOMP frames carried over a websocket
//! opened with `tokio-tungstenite`. Implements the `Transport` port.
//!
//! The bearer token is sent twice, once on the HTTP upgrade request and once in
//! the STOMP CONNECT frame, since brokers differ in where they authenticate.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use marketplace_core::{
    InboundFrame, PortError, PortResult, SubscriptionId, Transport, TransportConnection,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue, StatusCode},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};

use crate::adapters::stomp::Frame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// Opens STOMP-over-websocket connections to the message broker.
#[derive(Clone, Debug)]
pub struct StompWsTransport {
    handshake_timeout: Duration,
}

impl StompWsTransport {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for StompWsTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Transport for StompWsTransport {
    async fn open(
        &self,
        address: &str,
        access_token: &str,
    ) -> PortResult<Box<dyn TransportConnection>> {
        let bearer = format!("Bearer {}", access_token);
        let mut request = address
            .into_client_request()
            .map_err(|e| PortError::Transport(format!("invalid realtime address: {}", e)))?;
        let header = HeaderValue::from_str(&bearer).map_err(|_| PortError::Unauthorized)?;
        request.headers_mut().insert(AUTHORIZATION, header);
        let host = request.uri().host().unwrap_or("localhost").to_string();

        let (mut ws, _) = timeout(self.handshake_timeout, connect_async(request))
            .await
            .map_err(|_| PortError::Transport("websocket upgrade timed out".to_string()))?
            .map_err(map_ws_error)?;

        let connect = Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0")
            .header("Authorization", bearer);
        ws.send(Message::Text(connect.encode().into()))
            .await
            .map_err(map_ws_error)?;

        timeout(self.handshake_timeout, await_connected(&mut ws))
            .await
            .map_err(|_| PortError::Transport("STOMP handshake timed out".to_string()))??;

        info!("STOMP session established with {}", address);
        Ok(Box::new(StompWsConnection {
            ws,
            next_subscription: 0,
            pending: VecDeque::new(),
        }))
    }
}

async fn await_connected(ws: &mut WsStream) -> PortResult<()> {
    while let Some(message) = ws.next().await {
        let Some(text) = frame_text(message.map_err(map_ws_error)?)? else {
            continue;
        };
        for frame in Frame::decode_all(&text)? {
            match frame.command.as_str() {
                "CONNECTED" => return Ok(()),
                "ERROR" => return Err(error_frame(&frame)),
                other => debug!("Ignoring {} frame during handshake", other),
            }
        }
    }
    Err(PortError::Transport(
        "connection closed during STOMP handshake".to_string(),
    ))
}

//=========================================================================================
// The Live Connection
//=========================================================================================

pub struct StompWsConnection {
    ws: WsStream,
    next_subscription: u64,
    pending: VecDeque<Frame>,
}

impl StompWsConnection {
    async fn send_frame(&mut self, frame: Frame) -> PortResult<()> {
        self.ws
            .send(Message::Text(frame.encode().into()))
            .await
            .map_err(map_ws_error)
    }
}

#[async_trait]
impl TransportConnection for StompWsConnection {
    async fn subscribe(&mut self, topic: &str) -> PortResult<SubscriptionId> {
        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        self.send_frame(
            Frame::new("SUBSCRIBE")
                .header("id", id.clone())
                .header("destination", topic)
                .header("ack", "auto"),
        )
        .await?;
        Ok(SubscriptionId(id))
    }

    async fn unsubscribe(&mut self, id: &SubscriptionId) -> PortResult<()> {
        self.send_frame(Frame::new("UNSUBSCRIBE").header("id", id.0.clone()))
            .await
    }

    async fn send(&mut self, destination: &str, body: &str) -> PortResult<()> {
        self.send_frame(
            Frame::new("SEND")
                .header("destination", destination)
                .header("content-type", "application/json")
                .body(body),
        )
        .await
    }

    async fn next_message(&mut self) -> Option<PortResult<InboundFrame>> {
        loop {
            while let Some(frame) = self.pending.pop_front() {
                match frame.command.as_str() {
                    "MESSAGE" => {
                        let subscription = frame.get("subscription").unwrap_or_default().to_string();
                        let destination = frame.get("destination").unwrap_or_default().to_string();
                        return Some(Ok(InboundFrame {
                            subscription: SubscriptionId(subscription),
                            destination,
                            body: frame.body,
                        }));
                    }
                    "ERROR" => return Some(Err(error_frame(&frame))),
                    other => debug!("Ignoring {} frame", other),
                }
            }

            let message = match self.ws.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(map_ws_error(e))),
            };
            if let Message::Close(close) = &message {
                debug!("Broker closed the websocket: {:?}", close);
                return None;
            }
            match frame_text(message) {
                Ok(Some(text)) => match Frame::decode_all(&text) {
                    Ok(frames) => self.pending.extend(frames),
                    Err(e) => return Some(Err(e.into())),
                },
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn close(&mut self) -> PortResult<()> {
        let _ = self.send_frame(Frame::new("DISCONNECT")).await;
        self.ws.close(None).await.map_err(map_ws_error)
    }
}

//=========================================================================================
// Error Mapping Helpers
//=========================================================================================

/// Extracts STOMP text from a websocket message; control frames yield `None`.
fn frame_text(message: Message) -> PortResult<Option<String>> {
    match message {
        Message::Text(text) => Ok(Some(text.as_str().to_string())),
        Message::Binary(bytes) => std::str::from_utf8(&bytes)
            .map(|text| Some(text.to_string()))
            .map_err(|e| PortError::Protocol(format!("binary frame is not UTF-8: {}", e))),
        Message::Close(_) => Err(PortError::Transport("websocket closed".to_string())),
        _ => Ok(None),
    }
}

fn map_ws_error(err: tungstenite::Error) -> PortError {
    match err {
        tungstenite::Error::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            PortError::Unauthorized
        }
        other => PortError::Transport(other.to_string()),
    }
}

/// Brokers report rejected credentials as an ERROR frame; tell those apart
/// from ordinary protocol errors so the client does not retry them.
fn error_frame(frame: &Frame) -> PortError {
    let message = frame.get("message").unwrap_or("broker error");
    let text = format!("{} {}", message, frame.body).to_lowercase();
    let auth_markers = ["unauthor", "401", "403", "forbidden", "expired", "invalid token", "authentication"];
    if auth_markers.iter().any(|marker| text.contains(marker)) {
        PortError::Unauthorized
    } else if frame.body.trim().is_empty() {
        PortError::Protocol(message.to_string())
    } else {
        PortError::Protocol(format!("{}: {}", message, frame.body.trim()))
    }
}
