//! In-memory transport whose sockets are driven by the test.

use std::time::Duration;

use homewire_client::ws::{
    ConnectRequest, EventSender, Outbound, SocketHandle, Transport, TransportEvent,
};
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{timeout, Instant};

/// Long enough to cover the largest reconnect delay a test waits through
const WAIT: Duration = Duration::from_secs(120);

/// Hands every socket the coordinator opens to the test.
pub struct MockTransport {
    sockets: UnboundedSender<MockSocket>,
}

impl MockTransport {
    pub fn new() -> (Self, SocketQueue) {
        let (sockets, rx) = mpsc::unbounded_channel();
        (Self { sockets }, SocketQueue { rx })
    }
}

impl Transport for MockTransport {
    fn open(&self, request: ConnectRequest, events: EventSender) -> SocketHandle {
        let (handle, outbound) = SocketHandle::channel();
        let _ = self.sockets.send(MockSocket {
            request,
            events,
            outbound,
            opened_at: Instant::now(),
        });
        handle
    }
}

pub struct SocketQueue {
    rx: UnboundedReceiver<MockSocket>,
}

impl SocketQueue {
    /// Wait for the next socket, letting the paused clock run forward.
    pub async fn next(&mut self) -> MockSocket {
        match timeout(WAIT, self.rx.recv()).await {
            Ok(Some(socket)) => socket,
            Ok(None) => panic!("transport dropped while waiting for a socket"),
            Err(_) => panic!("no socket opened within {WAIT:?}"),
        }
    }

    /// Assert nothing connects for `window`.
    pub async fn assert_none_within(&mut self, window: Duration) {
        if let Ok(Some(socket)) = timeout(window, self.rx.recv()).await {
            panic!("unexpected socket opened to {}", socket.request.url);
        }
    }
}

/// One socket as seen from the server side.
pub struct MockSocket {
    pub request: ConnectRequest,
    pub events: EventSender,
    pub outbound: UnboundedReceiver<Outbound>,
    pub opened_at: Instant,
}

impl MockSocket {
    pub fn open(&self) {
        self.events.emit(TransportEvent::Open);
    }

    pub fn send(&self, frame: Value) {
        self.events.emit(TransportEvent::Message(frame.to_string()));
    }

    pub fn send_raw(&self, text: &str) {
        self.events.emit(TransportEvent::Message(text.to_string()));
    }

    /// The connection attempt is refused.
    pub fn refuse(&self) {
        self.events.emit(TransportEvent::Error("connection refused".to_string()));
        self.events.emit(TransportEvent::Closed);
    }

    /// The server goes away.
    pub fn drop_connection(&self) {
        self.events.emit(TransportEvent::Closed);
    }

    pub fn ack(&self, id: &str) {
        self.send(json!({ "type": "start_ack", "id": id }));
    }

    pub fn data(&self, id: &str, payload: Value) {
        self.send(json!({ "type": "data", "id": id, "payload": payload }));
    }

    /// Open, expect `connection_init` and acknowledge it.
    pub async fn handshake(&mut self) {
        self.open();
        let init = self.next_frame().await;
        assert_eq!(init["type"], "connection_init", "first frame: {init}");
        self.send(json!({ "type": "connection_ack" }));
    }

    pub async fn next_frame(&mut self) -> Value {
        match timeout(WAIT, self.outbound.recv()).await {
            Ok(Some(Outbound::Text(text))) => serde_json::from_str(&text)
                .unwrap_or_else(|e| panic!("client sent invalid JSON ({e}): {text}")),
            Ok(Some(Outbound::Close)) => panic!("socket closed while waiting for a frame"),
            Ok(None) => panic!("socket handle dropped while waiting for a frame"),
            Err(_) => panic!("no frame within {WAIT:?}"),
        }
    }

    /// Expect a `start` frame; returns its id and payload.
    pub async fn expect_start(&mut self) -> (String, Value) {
        let frame = self.next_frame().await;
        assert_eq!(frame["type"], "start", "expected start, got {frame}");
        let id = frame["id"]
            .as_str()
            .unwrap_or_else(|| panic!("start without id: {frame}"))
            .to_string();
        (id, frame["payload"].clone())
    }

    /// Handshake, then expect one `start` per topic and acknowledge each.
    /// Returns the subscription ids in the order they were started.
    pub async fn go_live(&mut self, topics: usize) -> Vec<String> {
        self.handshake().await;
        let mut ids = Vec::new();
        for _ in 0..topics {
            let (id, _) = self.expect_start().await;
            self.ack(&id);
            ids.push(id);
        }
        ids
    }

    /// Wait for the client to close the socket; returns the frames sent
    /// before the close.
    pub async fn expect_closed(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        loop {
            match timeout(WAIT, self.outbound.recv()).await {
                Ok(Some(Outbound::Text(text))) => {
                    frames.push(serde_json::from_str(&text).expect("client sent invalid JSON"))
                }
                Ok(Some(Outbound::Close)) | Ok(None) => return frames,
                Err(_) => panic!("socket not closed within {WAIT:?}"),
            }
        }
    }

    /// Assert the client sends nothing for `window`.
    pub async fn assert_silent_for(&mut self, window: Duration) {
        if let Ok(Some(outbound)) = timeout(window, self.outbound.recv()).await {
            panic!("unexpected outbound: {outbound:?}");
        }
    }
}
