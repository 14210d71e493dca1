//! Development tracing for the engine.
//!
//! Tracing output goes to stderr and is controlled by `RUST_LOG`. It is not
//! part of the product output: action logs and verification results are
//! returned to the caller and, if wanted, persisted with `io::run_log`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Defaults to `warn` when `RUST_LOG` is unset.
///
/// ```bash
/// RUST_LOG=engine=debug engine verify
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
