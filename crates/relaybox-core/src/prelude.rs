/*!
 * Prelude module for RelayBox Core.
 *
 * This module re-exports commonly used types and functions from the RelayBox Core crate
 * to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{Value, ValueType};

// Re-export config types
pub use crate::config::{ConfigKey, ConfigStore, Configuration};

// Re-export utilities
pub use crate::utils::{round_to, Signal};

// Re-export logging helpers
pub use crate::logging::{component_span, Span};
pub use tracing::{debug, error, info, trace, warn};
