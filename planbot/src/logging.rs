//! Tracing setup for the service.
//!
//! Everything the service does is logged to stderr; stdout is reserved for
//! command output such as `check-config` and `classify`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` so a plain `planbot run` reports each
/// poll pass.
///
/// # Example
/// ```bash
/// RUST_LOG=planbot=debug planbot run --once
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
