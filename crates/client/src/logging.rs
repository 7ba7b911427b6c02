//! Tracing setup for applications embedding the client.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the host application.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"homewire_client=info"`).
///
/// Returns `false` when a global subscriber was already installed.
pub fn init(default_directive: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// Same as [`init`] but writes through the test harness so output is captured
/// per test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "homewire_client=debug".into()))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
