//! Shared error types for frame decoding and update payloads.

use thiserror::Error;

/// A frame could not be encoded or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("`{kind}` frame is missing `{field}`")]
    MissingField { kind: String, field: &'static str },
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// A `data` payload did not describe an entity update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload is neither an entity update nor a server event")]
    UnknownShape,
    #[error("payload is missing `{0}`")]
    MissingField(&'static str),
    #[error("payload field `{0}` has an unexpected type")]
    InvalidField(&'static str),
    #[error("embedded event payload is not valid JSON: {0}")]
    Json(String),
}
