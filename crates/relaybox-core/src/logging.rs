/*!
 * Logging functionality for RelayBox.
 *
 * This module provides tracing setup and the spans that components receive
 * at construction time.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Log level used when `LOG_LEVEL` is unset
pub const DEFAULT_LOG_LEVEL: &str = "debug";

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter(DEFAULT_LOG_LEVEL)
}

/// Initialize the logging system with a specific filter
///
/// `RUST_LOG` takes precedence when it is set. Level names are accepted in
/// any case, so `DEBUG` and `debug` are equivalent.
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "relaybox_engine=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter.to_ascii_lowercase()))
        .map_err(|e| Error::config(format!("Invalid log filter '{}': {}", filter, e)))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a component
///
/// # Arguments
///
/// * `name` - The name of the component
/// * `id` - An optional ID for the component instance
pub fn component_span(name: &str, id: Option<&str>) -> Span {
    match id {
        Some(id) => tracing::info_span!("component", name = %name, id = %id),
        None => tracing::info_span!("component", name = %name),
    }
}
