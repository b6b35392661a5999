//! # Logging
//!
//! Installs a `tracing` subscriber for binaries and tests. Library code only
//! emits events; it never installs a subscriber on its own.

use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "busbind=info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a fmt subscriber on stderr, filtered by `RUST_LOG` (or [`DEFAULT_FILTER`]).
///
/// Later calls, or calls after another subscriber was installed, are ignored.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Like [`init`], but writes through the test harness so output is captured per test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .try_init();
}
