//! Shared test utilities for snmp-engine integration tests.

// Allow dead code and unused imports since not all test files use all utilities
#![allow(dead_code)]
#![allow(unused_imports)]

mod agent;
mod fixtures;
mod stream;

pub use agent::MockAgent;
pub use fixtures::*;
pub use stream::collect_stream;

/// Route `snmp_engine` tracing to the test output, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
