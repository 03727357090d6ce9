// src/utils/logging.rs
use tracing_subscriber::{fmt, EnvFilter};

/// Sets up the logging framework using tracing_subscriber.
/// Reads log level filters from the `RUST_LOG` environment variable.
/// Falls back to "info", or "debug" when `verbose` is set.
pub fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // try_init so a second call (tests, batch reruns) is a no-op instead of a panic
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    tracing::debug!("Logging setup complete (default level: {}).", default_level);
}
