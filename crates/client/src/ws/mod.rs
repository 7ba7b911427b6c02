//! WebSocket live updates over the graphql-ws protocol.
//!
//! This module provides:
//! - One socket per connection attempt, with the `connection_init` handshake
//! - Per-topic subscriptions routed by subscription id
//! - Snapshot-then-subscribe resynchronisation with exponential backoff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               SubscriptionCoordinator               │
//! │  (one task: desired topics, snapshot, live status)  │
//! └─────────────────────────────────────────────────────┘
//!          │                 │                  │
//!          ▼                 ▼                  ▼
//!   ┌──────────────┐ ┌────────────────┐ ┌──────────────┐
//!   │SnapshotSource│ │ConnectionManager│ │   Backoff    │
//!   │ (full state) │ │ (one socket)   │ │ (retry delay)│
//!   └──────────────┘ └────────────────┘ └──────────────┘
//!                            │
//!                ┌───────────┴───────────┐
//!                ▼                       ▼
//!     ┌─────────────────────┐ ┌─────────────────────┐
//!     │SubscriptionRegistry │ │      Transport      │
//!     │ (id -> callback)    │ │ (tokio-tungstenite) │
//!     └─────────────────────┘ └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let handle = SubscriptionCoordinator::spawn(
//!     ClientConfig::from_env()?,
//!     TungsteniteTransport,
//!     my_snapshot_source,
//!     || Some(Credentials::new(token(), "home")),
//! )?;
//! handle.on_snapshot_changed(|snapshot| println!("{} entities", snapshot.len()))?;
//! handle.on_live_status_changed(|live| println!("live: {live}"))?;
//! handle.set_desired_topics(["house-1"])?;
//! ```

pub mod connection;
pub mod coordinator;
pub mod reconnect;
pub mod registry;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState, PendingConnect};
pub use coordinator::{CoordinatorHandle, SnapshotSource, SubscriptionCoordinator};
pub use reconnect::{Backoff, BackoffPolicy};
pub use registry::{RouteOutcome, SubscriptionRegistry, SubscriptionState};
pub use transport::{
    ConnectRequest, ConnectionId, EventSender, Outbound, SocketHandle, Transport, TransportEvent,
    TungsteniteTransport,
};
