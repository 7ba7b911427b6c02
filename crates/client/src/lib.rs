//! Homewire client - live smart-home state over graphql-ws
//!
//! This crate keeps a local [`Snapshot`](homewire_shared::Snapshot) of entity
//! properties current: it fetches the full state, subscribes to per-topic
//! updates, merges them as they arrive, and resynchronises after the socket
//! drops.

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod ws;

pub use auth::{CredentialSource, Credentials, NoCredentials};
pub use config::{AuthPlacement, ClientConfig};
pub use error::{ConfigError, ConnectionError, CoordinatorStopped};
pub use ws::{
    CoordinatorHandle, SnapshotSource, SubscriptionCoordinator, Transport, TungsteniteTransport,
};
