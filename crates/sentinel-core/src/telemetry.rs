//! Structured logging bootstrap, called once per binary before the
//! broker or vector store is touched (§6).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global `tracing` subscriber: `RUST_LOG`-driven
/// filtering plus JSON-formatted output, so every worker's logs are
/// uniformly machine-parseable in production.
///
/// Safe to call once per process; a second call is a no-op (the
/// underlying `set_global_default` error is swallowed, matching the
/// "best effort, never fatal" posture of the rest of the telemetry
/// surface).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true))
        .try_init();
}
