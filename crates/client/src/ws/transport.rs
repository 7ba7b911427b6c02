//! Socket transport seam and the tokio-tungstenite implementation.
//!
//! A transport opens one socket per [`ConnectionId`], reports what happens on
//! it as [`TransportEvent`]s, and writes whatever it receives through the
//! returned [`SocketHandle`]. It knows nothing about frames or handshakes.

use std::fmt;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
        Message,
    },
};

/// Identifies one socket for the lifetime of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Something that happened on a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Error(String),
    Closed,
}

/// Something to do on a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: String,
    pub protocol: &'static str,
}

/// Reports events for one connection back to its owner.
#[derive(Debug, Clone)]
pub struct EventSender {
    connection: ConnectionId,
    tx: UnboundedSender<(ConnectionId, TransportEvent)>,
}

impl EventSender {
    pub fn new(connection: ConnectionId, tx: UnboundedSender<(ConnectionId, TransportEvent)>) -> Self {
        Self { connection, tx }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Returns `false` once the owner is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.connection, event)).is_ok()
    }
}

/// Write side of an open socket. Dropping it closes the socket.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    outbound: UnboundedSender<Outbound>,
}

impl SocketHandle {
    pub fn channel() -> (Self, UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { outbound }, rx)
    }

    pub fn send_text(&self, text: String) -> bool {
        self.outbound.send(Outbound::Text(text)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Opens sockets.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a socket. Must not block; progress is reported through
    /// `events`, starting with `Open` or `Error`, and ending with `Closed`.
    fn open(&self, request: ConnectRequest, events: EventSender) -> SocketHandle;
}

/// Native WebSocket transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn open(&self, request: ConnectRequest, events: EventSender) -> SocketHandle {
        let (handle, outbound) = SocketHandle::channel();
        tokio::spawn(run_socket(request, events, outbound));
        handle
    }
}

async fn run_socket(
    request: ConnectRequest,
    events: EventSender,
    mut outbound: UnboundedReceiver<Outbound>,
) {
    let connection = events.connection();

    let mut client_request = match request.url.as_str().into_client_request() {
        Ok(client_request) => client_request,
        Err(e) => {
            events.emit(TransportEvent::Error(format!("invalid socket request: {e}")));
            events.emit(TransportEvent::Closed);
            return;
        }
    };
    client_request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(request.protocol));

    let stream = match connect_async(client_request).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            events.emit(TransportEvent::Error(e.to_string()));
            events.emit(TransportEvent::Closed);
            return;
        }
    };

    tracing::debug!(%connection, "socket open");
    if !events.emit(TransportEvent::Open) {
        return;
    }

    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(%connection, frame = %text.as_str(), "socket received");
                    if !events.emit(TransportEvent::Message(text.as_str().to_owned())) {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(%connection, ?frame, "socket received close frame");
                    break;
                }
                // Pong is handled by tungstenite; binary frames are not part of the protocol
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    events.emit(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            },
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    tracing::trace!(%connection, frame = %text, "socket sending");
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        events.emit(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    tracing::debug!(%connection, "socket closed");
    events.emit(TransportEvent::Closed);
}
