/*!
 * Error types for the RelayBox engine crate.
 */
use thiserror::Error;

/// Error type for RelayBox engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// Control message that cannot be interpreted
    #[error("Malformed control message: {0}")]
    MalformedMessage(String),

    /// Control topic with a category the bridge does not serve
    #[error("Unknown topic category: {0}")]
    UnknownCategory(String),

    /// Configuration key outside the fixed key set
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Value type tag other than integer, float or string
    #[error("Unsupported value type: {0}")]
    UnsupportedValueType(String),

    /// Value that does not coerce to the requested type
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Device error
    #[error("Device error: {0}")]
    Device(#[from] relaybox_devices::DeviceError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] relaybox_core::error::Error),
}

/// Result type for RelayBox engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new malformed message error
    pub fn malformed<S: AsRef<str>>(msg: S) -> Self {
        Error::MalformedMessage(msg.as_ref().to_string())
    }

    /// Create a new invalid value error
    pub fn invalid_value<S: AsRef<str>>(msg: S) -> Self {
        Error::InvalidValue(msg.as_ref().to_string())
    }

    /// Whether the error describes a bad control message rather than a fault
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::MalformedMessage(_)
                | Error::UnknownCategory(_)
                | Error::UnknownKey(_)
                | Error::UnsupportedValueType(_)
                | Error::InvalidValue(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::malformed("expected 4 segments").to_string(),
            "Malformed control message: expected 4 segments"
        );
        assert_eq!(
            Error::UnknownKey("FOO".to_string()).to_string(),
            "Unknown configuration key: FOO"
        );
    }

    #[test]
    fn test_rejections() {
        assert!(Error::invalid_value("x").is_rejection());
        assert!(Error::UnknownCategory("sensors".to_string()).is_rejection());
        assert!(!Error::Core(relaybox_core::error::Error::persistence("disk full")).is_rejection());
    }
}
