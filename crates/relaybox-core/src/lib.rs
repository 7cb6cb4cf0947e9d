/*!
 * RelayBox Core
 *
 * This crate provides the core functionality for the RelayBox bridge,
 * including typed values, configuration, logging and signalling helpers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// RelayBox core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
///
/// Installs the global tracing subscriber with the given filter.
pub fn init(log_level: &str) -> Result<(), error::Error> {
    logging::init_with_filter(log_level)?;
    tracing::info!("RelayBox Core {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
