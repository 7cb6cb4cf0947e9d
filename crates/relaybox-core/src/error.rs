/*!
 * Error types for the RelayBox core crate.
 */
use thiserror::Error;

/// Error type for RelayBox core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be resolved or is not usable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration could not be written back to storage
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A value could not be coerced to the requested type
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Result type for RelayBox core operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new configuration error
    pub fn config<S: AsRef<str>>(msg: S) -> Self {
        Error::Config(msg.as_ref().to_string())
    }

    /// Create a new persistence error
    pub fn persistence<S: AsRef<str>>(msg: S) -> Self {
        Error::Persistence(msg.as_ref().to_string())
    }

    /// Create a new invalid value error
    pub fn invalid_value<S: AsRef<str>>(msg: S) -> Self {
        Error::InvalidValue(msg.as_ref().to_string())
    }

    /// Create a new runtime error
    pub fn runtime<S: AsRef<str>>(msg: S) -> Self {
        Error::Runtime(msg.as_ref().to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
