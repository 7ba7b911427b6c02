//! Client error types.

use homewire_shared::CodecError;
use thiserror::Error;

use crate::ws::connection::ConnectionState;

/// Failures of a single connection attempt or of a call on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connect has already been called on this connection")]
    AlreadyConnecting,
    #[error("connection is not ready (state: {0:?})")]
    NotReady(ConnectionState),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("socket closed before the handshake completed")]
    SocketClosed,
    #[error("protocol error while {stage:?}: {detail}")]
    Protocol {
        stage: ConnectionState,
        detail: String,
    },
    #[error("connection closed")]
    Closed,
    #[error("connection attempt abandoned")]
    Abandoned,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Invalid client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid endpoint `{endpoint}`: {reason}")]
    Endpoint { endpoint: String, reason: String },
    #[error("invalid value `{value}` for {var}")]
    Invalid { var: &'static str, value: String },
}

/// The coordinator task has already stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("subscription coordinator has stopped")]
pub struct CoordinatorStopped;
