//! Logging setup for the binary and for ad-hoc test runs.

use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl LogFormat {
    fn from_env() -> Self {
        std::env::var("COLLECTIVE_LOG_FORMAT")
            .map(|s| match s.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            })
            .unwrap_or(LogFormat::Pretty)
    }
}

/// Initialize logging. `RUST_LOG` controls the level (default `info`),
/// `COLLECTIVE_LOG_FORMAT` picks json, compact or pretty output.
pub fn init_logging() {
    init_logging_with_format(LogFormat::from_env());
}

pub fn init_logging_with_format(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // try_init: a second initialisation (e.g. from several tests) is not an error
    let _ = match format {
        LogFormat::Pretty => fmt().with_env_filter(filter).with_target(true).try_init(),
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .try_init(),
        LogFormat::Compact => fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .try_init(),
    };
}
