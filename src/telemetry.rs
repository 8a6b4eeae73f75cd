//! Telemetry setup for pihole-exporter.
//!
//! `RUST_LOG` takes precedence; otherwise the level comes from the debug flag.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "pihole_exporter=debug,warn").
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// `debug` when the flag is set, `info` otherwise.
    pub fn from_debug(debug: bool) -> Self {
        let log_level = if debug { "debug" } else { "info" };
        Self {
            log_level: log_level.to_string(),
        }
    }
}

/// Install the global tracing subscriber.
pub fn init(config: &TelemetryConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}
