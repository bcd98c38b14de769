//! Tracing subscriber setup for the binary.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSection;

/// `RUST_LOG` when set, otherwise the configured filter.
pub fn env_filter(logging: &LoggingSection) -> Result<EnvFilter> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
            .with_context(|| format!("Invalid RUST_LOG filter: '{}'", directives)),
        _ => EnvFilter::try_new(&logging.filter)
            .with_context(|| format!("Invalid logging.filter: '{}'", logging.filter)),
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays
/// reserved for command output.
pub fn init(logging: &LoggingSection, json: bool) -> Result<()> {
    let filter = env_filter(logging)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if json || logging.json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.with_target(false).try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
