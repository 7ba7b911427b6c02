//! Common test utilities for the coordinator integration tests
//!
//! This module provides:
//! - `MockTransport`, whose sockets the test opens, feeds and inspects
//! - `MockSnapshotSource`, a scripted snapshot collaborator
//! - `Observer`, which records snapshot and live-status notifications

#![allow(dead_code)]

pub mod mock_transport;

pub use mock_transport::MockTransport;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use homewire_client::{ClientConfig, CoordinatorHandle, SnapshotSource};
use homewire_shared::{PropertyMap, Snapshot};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;

pub const ENDPOINT: &str = "ws://hub.test/subscriptions";

const WAIT: Duration = Duration::from_secs(120);

pub fn config() -> ClientConfig {
    homewire_client::logging::init_for_tests();
    ClientConfig {
        endpoint: ENDPOINT.to_string(),
        ..ClientConfig::default()
    }
}

pub fn properties(pairs: &[(&str, &str)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// A house with one lamp.
pub fn house_snapshot() -> Snapshot {
    let mut snapshot = Snapshot::new();
    snapshot.insert("E1", properties(&[("powerState", "true"), ("brightness", "80")]));
    snapshot
}

/// Serves a fixed snapshot, or fails while `failing` is set.
#[derive(Clone, Default)]
pub struct MockSnapshotSource {
    snapshot: Arc<Mutex<Snapshot>>,
    failing: Arc<AtomicBool>,
    fetches: Arc<AtomicUsize>,
    requested: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockSnapshotSource {
    pub fn serving(snapshot: Snapshot) -> Self {
        let source = Self::default();
        *source.snapshot.lock().unwrap() = snapshot;
        source
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Topic sets of every fetch so far
    pub fn requested(&self) -> Vec<Vec<String>> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotSource for MockSnapshotSource {
    async fn fetch_snapshot(&self, topics: &[String]) -> anyhow::Result<Snapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(topics.to_vec());
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("hub returned 503");
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

/// Records what the coordinator reports to its listeners.
pub struct Observer {
    snapshots: UnboundedReceiver<Snapshot>,
    live: UnboundedReceiver<bool>,
}

impl Observer {
    pub fn attach(handle: &CoordinatorHandle) -> Self {
        let (snapshot_tx, snapshots) = mpsc::unbounded_channel();
        let (live_tx, live) = mpsc::unbounded_channel();
        handle
            .on_snapshot_changed(move |snapshot| {
                let _ = snapshot_tx.send(snapshot.clone());
            })
            .unwrap();
        handle
            .on_live_status_changed(move |live| {
                let _ = live_tx.send(live);
            })
            .unwrap();
        Self { snapshots, live }
    }

    pub async fn next_snapshot(&mut self) -> Snapshot {
        match timeout(WAIT, self.snapshots.recv()).await {
            Ok(Some(snapshot)) => snapshot,
            _ => panic!("no snapshot notification within {WAIT:?}"),
        }
    }

    pub async fn next_live(&mut self) -> bool {
        match timeout(WAIT, self.live.recv()).await {
            Ok(Some(live)) => live,
            _ => panic!("no live-status notification within {WAIT:?}"),
        }
    }

    /// Nothing is pending right now.
    pub fn assert_quiet(&mut self) {
        assert!(self.snapshots.try_recv().is_err(), "unexpected snapshot notification");
        assert!(self.live.try_recv().is_err(), "unexpected live-status notification");
    }
}

/// `actual` is `expected` after `since`, within scheduling slack.
pub fn assert_elapsed(since: tokio::time::Instant, actual: tokio::time::Instant, expected: Duration) {
    let elapsed = actual.duration_since(since);
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(50),
        "expected {expected:?} between events, got {elapsed:?}"
    );
}
