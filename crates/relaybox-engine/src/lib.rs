/*!
 * RelayBox Engine
 *
 * This crate drives the RelayBox bridge: it gates the poll loop on the
 * broker connection, publishes sensor readings and applies configuration
 * changes received on control topics.
 */

#![warn(missing_docs)]

// Re-export core types
pub use relaybox_core::prelude;

pub mod control;
pub mod error;
pub mod orchestrator;

// Re-export main types for convenience
pub use control::{Category, ControlRequest, ControlTopic};
pub use error::{Error, Result};
pub use orchestrator::{Lifecycle, Orchestrator};

/// RelayBox engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
