//! graphql-ws frame definitions and the JSON codec used on the subscription socket.
//!
//! Every frame is a JSON object carried as one text message. The `type` field
//! selects the frame kind; `id` ties subscription frames to a subscription.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;
use crate::models::SubscriptionId;

/// Subprotocol requested in the `Sec-WebSocket-Protocol` header
pub const GRAPHQL_WS_PROTOCOL: &str = "graphql-ws";

/// Inbound frame type names
pub const TYPE_CONNECTION_ACK: &str = "connection_ack";
pub const TYPE_KEEP_ALIVE: &str = "ka";
pub const TYPE_START_ACK: &str = "start_ack";
pub const TYPE_DATA: &str = "data";
pub const TYPE_COMPLETE: &str = "complete";

/// Body of a `start` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartPayload {
    pub query: String,
    /// Sent as `null` when absent
    pub variables: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Start {
        id: SubscriptionId,
        payload: StartPayload,
    },
    Stop {
        id: SubscriptionId,
    },
}

impl ClientFrame {
    pub fn connection_init() -> Self {
        ClientFrame::ConnectionInit { payload: None }
    }
}

/// Frames the server sends.
///
/// `Other` carries any well-formed frame whose type this client does not
/// handle. Whether that is a protocol error depends on the connection stage,
/// so decoding does not reject it.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    ConnectionAck,
    KeepAlive,
    StartAck { id: SubscriptionId },
    Data { id: SubscriptionId, payload: Value },
    Complete { id: SubscriptionId },
    Other { kind: String },
}

impl ServerFrame {
    /// The wire name of this frame's type
    pub fn kind(&self) -> &str {
        match self {
            ServerFrame::ConnectionAck => TYPE_CONNECTION_ACK,
            ServerFrame::KeepAlive => TYPE_KEEP_ALIVE,
            ServerFrame::StartAck { .. } => TYPE_START_ACK,
            ServerFrame::Data { .. } => TYPE_DATA,
            ServerFrame::Complete { .. } => TYPE_COMPLETE,
            ServerFrame::Other { kind } => kind,
        }
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    /// Missing and `null` both decode as `Value::Null`
    #[serde(default)]
    payload: Value,
}

fn required<T>(value: Option<T>, kind: &str, field: &'static str) -> Result<T, CodecError> {
    value.ok_or_else(|| CodecError::MissingField {
        kind: kind.to_string(),
        field,
    })
}

/// Serialize an outbound frame to its text form.
pub fn encode(frame: &ClientFrame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Parse one inbound text message.
pub fn decode(text: &str) -> Result<ServerFrame, CodecError> {
    let RawFrame { kind, id, payload } =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let id = id.map(SubscriptionId::from);

    let frame = match kind.as_str() {
        TYPE_CONNECTION_ACK => ServerFrame::ConnectionAck,
        TYPE_KEEP_ALIVE => ServerFrame::KeepAlive,
        TYPE_START_ACK => ServerFrame::StartAck {
            id: required(id, &kind, "id")?,
        },
        TYPE_COMPLETE => ServerFrame::Complete {
            id: required(id, &kind, "id")?,
        },
        TYPE_DATA => ServerFrame::Data {
            id: required(id, &kind, "id")?,
            payload,
        },
        _ => ServerFrame::Other { kind },
    };

    Ok(frame)
}
