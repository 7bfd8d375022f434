//! Tracing subscriber setup.
//!
//! The library itself only emits `tracing` events; applications call one of
//! these once at startup to see them.

use crate::config::LoggingConfig;

/// Initialize the tracing subscriber with the given configuration.
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(config.show_target)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    // A subscriber installed earlier (e.g. by a host application) wins
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Initialize logging with defaults (useful for tests and quick scripts).
pub fn init_default_logging() {
    init_logging(&LoggingConfig::default());
}
