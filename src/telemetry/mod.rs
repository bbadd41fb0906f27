//! Structured logging setup
//!
//! Installs a `tracing_subscriber` registry with an `EnvFilter` and either a
//! JSON or a compact human-readable formatter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Emit JSON lines instead of compact text
    pub json_format: bool,
    /// Filter directive, e.g. `info` or `pdm_proof_ledger=debug`
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "pdm-proof-ledger".to_string(),
            json_format: false,
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("PDM_SERVICE_NAME")
                .unwrap_or_else(|_| "pdm-proof-ledger".to_string()),
            json_format: std::env::var("LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            log_level: std::env::var("LOG_LEVEL")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::registry().with(config.env_filter());

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        subscriber.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact();
        subscriber.with(fmt_layer).try_init()?;
    }

    tracing::debug!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        json = config.json_format,
        "telemetry initialized"
    );
    Ok(())
}
