//! Tracing subscriber setup for the gateway binary.
//!
//! `RUST_LOG` wins when set. Otherwise the configured level applies to
//! everything except the gateway crates, which log at `debug`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: &str) -> String {
    format!("{level},xhaunt_xmpp=debug,xhaunt_store=debug")
}

/// Install the global subscriber. Can only succeed once per process.
pub fn init(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(&logging.level)))?;

    let registry = tracing_subscriber::registry().with(filter);

    if logging.json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        registry.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true);
        registry.with(fmt_layer).try_init()?;
    }

    tracing::info!(level = %logging.level, json = logging.json, "Telemetry initialized");

    Ok(())
}
