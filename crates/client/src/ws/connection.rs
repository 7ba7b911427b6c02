//! One socket, its handshake, and the subscriptions multiplexed over it.
//!
//! A [`ConnectionManager`] is single use: it goes `Opening -> Initializing ->
//! Ready -> Closed` and never back. Every transport event for its socket is fed
//! through [`ConnectionManager::handle_event`], which is the only place the
//! stage changes.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use homewire_shared::{protocol, ClientFrame, ServerFrame, StartPayload, SubscriptionId};
use serde_json::Value;
use tokio::sync::oneshot;

use super::registry::SubscriptionRegistry;
use super::transport::{ConnectRequest, ConnectionId, EventSender, SocketHandle, Transport, TransportEvent};
use crate::error::ConnectionError;

/// Handshake stage of one socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket requested, transport not open yet
    Opening,
    /// `connection_init` sent, waiting for `connection_ack`
    Initializing,
    Ready,
    Closed,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

type ConnectResult = Result<(), ConnectionError>;

/// Resolves once the handshake completes or fails.
///
/// Dropping it abandons the wait but does not close the socket.
#[derive(Debug)]
pub struct PendingConnect {
    rx: oneshot::Receiver<ConnectResult>,
}

impl Future for PendingConnect {
    type Output = ConnectResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ConnectionError::Abandoned)))
    }
}

pub struct ConnectionManager {
    id: ConnectionId,
    state: ConnectionState,
    connect_called: bool,
    socket: Option<SocketHandle>,
    registry: SubscriptionRegistry,
    pending: Option<oneshot::Sender<ConnectResult>>,
    on_disconnect: Option<Box<dyn FnOnce() + Send>>,
    on_complete: Option<CompleteHook>,
}

/// Told the id and topic of every subscription the server completes
pub type CompleteHook = Box<dyn FnMut(&SubscriptionId, &str) + Send>;

impl ConnectionManager {
    /// `on_disconnect` runs at most once, when a ready socket is lost or has
    /// to be abandoned. It does not run for [`close`](Self::close).
    pub fn new(id: ConnectionId, on_disconnect: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            state: ConnectionState::Opening,
            connect_called: false,
            socket: None,
            registry: SubscriptionRegistry::new(),
            pending: None,
            on_disconnect: Some(Box::new(on_disconnect)),
            on_complete: None,
        }
    }

    /// Called after a server `complete` has removed a subscription.
    pub fn set_on_complete(&mut self, hook: impl FnMut(&SubscriptionId, &str) + Send + 'static) {
        self.on_complete = Some(Box::new(hook));
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Open the socket and start the handshake.
    ///
    /// The returned future resolves after `connection_ack`. Events for the
    /// socket arrive through `events` and must be passed back to
    /// [`handle_event`](Self::handle_event).
    pub fn connect(
        &mut self,
        transport: &dyn Transport,
        request: ConnectRequest,
        events: EventSender,
    ) -> Result<PendingConnect, ConnectionError> {
        if self.connect_called {
            return Err(ConnectionError::AlreadyConnecting);
        }
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        self.connect_called = true;

        let (tx, rx) = oneshot::channel();
        self.pending = Some(tx);

        tracing::info!(connection = %self.id, "opening subscription socket");
        self.socket = Some(transport.open(request, events));

        Ok(PendingConnect { rx })
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        match (self.state, event) {
            (ConnectionState::Closed, event) => {
                tracing::trace!(connection = %self.id, ?event, "event after close ignored");
            }
            (_, TransportEvent::Error(reason)) => self.fail(ConnectionError::Transport(reason)),
            (_, TransportEvent::Closed) => self.fail(ConnectionError::SocketClosed),
            (ConnectionState::Opening, TransportEvent::Open) => {
                self.state = ConnectionState::Initializing;
                tracing::info!(connection = %self.id, "socket open; sending connection_init");
                self.send_frame(&ClientFrame::connection_init());
            }
            (stage, TransportEvent::Open) => self.unexpected(stage, "open event".to_string()),
            (_, TransportEvent::Message(text)) => self.handle_message(&text),
        }
    }

    fn handle_message(&mut self, text: &str) {
        let frame = match protocol::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                // Undecodable input is fatal even on a ready socket
                let stage = self.state;
                self.fail(ConnectionError::Protocol {
                    stage,
                    detail: e.to_string(),
                });
                return;
            }
        };

        match (self.state, frame) {
            (ConnectionState::Initializing, ServerFrame::ConnectionAck) => {
                self.state = ConnectionState::Ready;
                tracing::info!(connection = %self.id, "connection_ack received");
                self.resolve(Ok(()));
            }
            (ConnectionState::Initializing | ConnectionState::Ready, ServerFrame::KeepAlive) => {}
            (ConnectionState::Ready, ServerFrame::StartAck { id }) => {
                if self.registry.mark_ready(&id) {
                    tracing::debug!(connection = %self.id, subscription = %id, "start_ack received");
                } else {
                    tracing::warn!(connection = %self.id, subscription = %id, "start_ack for unknown subscription");
                }
            }
            (ConnectionState::Ready, ServerFrame::Data { id, payload }) => {
                self.registry.route_data(&id, payload);
            }
            (ConnectionState::Ready, ServerFrame::Complete { id }) => {
                let Some(subscription) = self.registry.remove(&id) else {
                    tracing::warn!(connection = %self.id, subscription = %id, "complete for unknown subscription");
                    return;
                };
                tracing::info!(
                    connection = %self.id,
                    subscription = %id,
                    topic = %subscription.topic,
                    "server completed subscription"
                );
                if let Some(hook) = self.on_complete.as_mut() {
                    hook(&id, &subscription.topic);
                }
            }
            (stage, frame) => self.unexpected(stage, format!("`{}` frame", frame.kind())),
        }
    }

    /// Start a subscription for `topic`. Data reaches `callback` only after the
    /// server acknowledges the returned id.
    pub fn send(
        &mut self,
        topic: &str,
        payload: StartPayload,
        callback: impl FnMut(Value) + Send + 'static,
    ) -> Result<SubscriptionId, ConnectionError> {
        if self.state != ConnectionState::Ready || self.socket.is_none() {
            return Err(ConnectionError::NotReady(self.state));
        }

        let id = self.registry.register(topic, callback);
        let frame = ClientFrame::Start {
            id: id.clone(),
            payload,
        };
        let text = match protocol::encode(&frame) {
            Ok(text) => text,
            Err(e) => {
                self.registry.remove(&id);
                return Err(e.into());
            }
        };

        tracing::debug!(connection = %self.id, subscription = %id, topic, "sending start");
        self.send_text(text);
        Ok(id)
    }

    /// Forget a subscription, telling the server if the socket is usable.
    /// Unknown ids are ignored.
    pub fn stop(&mut self, id: &SubscriptionId) {
        let Some(subscription) = self.registry.remove(id) else {
            return;
        };
        tracing::debug!(connection = %self.id, subscription = %id, topic = %subscription.topic, "stopping subscription");
        if self.state == ConnectionState::Ready {
            self.send_frame(&ClientFrame::Stop { id: id.clone() });
        }
    }

    /// Stop every subscription registered for `topic`.
    pub fn stop_topic(&mut self, topic: &str) {
        for id in self.registry.ids_for_topic(topic) {
            self.stop(&id);
        }
    }

    /// Close the socket. Idempotent; a pending connect resolves with
    /// [`ConnectionError::Closed`].
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        tracing::info!(connection = %self.id, stage = ?self.state, "closing subscription socket");
        self.shut_down();
        self.resolve(Err(ConnectionError::Closed));
    }

    fn unexpected(&mut self, stage: ConnectionState, detail: String) {
        if stage == ConnectionState::Ready {
            // The socket is still usable
            tracing::error!(connection = %self.id, %detail, "unexpected message on ready connection");
            return;
        }
        self.fail(ConnectionError::Protocol { stage, detail });
    }

    /// Force the connection closed. Before `Ready` this rejects the pending
    /// connect; after, it notifies the owner.
    fn fail(&mut self, error: ConnectionError) {
        let was_ready = self.state == ConnectionState::Ready;
        self.shut_down();

        if was_ready {
            tracing::error!(connection = %self.id, %error, "subscription socket lost");
            if let Some(on_disconnect) = self.on_disconnect.take() {
                on_disconnect();
            }
        } else {
            tracing::warn!(connection = %self.id, %error, "connection attempt failed");
            self.resolve(Err(error));
        }
    }

    fn shut_down(&mut self) {
        self.state = ConnectionState::Closed;
        let dropped = self.registry.remove_all();
        if dropped > 0 {
            tracing::debug!(connection = %self.id, dropped, "subscriptions discarded with socket");
        }
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
    }

    fn resolve(&mut self, result: ConnectResult) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.send(result);
        }
    }

    fn send_frame(&mut self, frame: &ClientFrame) {
        match protocol::encode(frame) {
            Ok(text) => self.send_text(text),
            Err(e) => tracing::error!(connection = %self.id, error = %e, "failed to encode frame"),
        }
    }

    fn send_text(&mut self, text: String) {
        let delivered = self
            .socket
            .as_ref()
            .map(|socket| socket.send_text(text))
            .unwrap_or(false);
        if !delivered {
            tracing::warn!(connection = %self.id, "socket writer gone; frame dropped");
        }
    }
}
