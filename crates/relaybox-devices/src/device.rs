/*!
 * Device reader trait and core reading abstractions.
 *
 * This module defines the sensor reading produced on every poll, the
 * settings a reader is constructed from, and the traits the orchestrator
 * uses to read and rebuild devices.
 */
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use relaybox_core::{
    config::Configuration,
    error::Error as CoreError,
    types::{Value, ValueType},
};

/// Error type for device and transport operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Opening a connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Fetching data over an open connection failed
    #[error("Read error: {0}")]
    Read(String),

    /// Publish/subscribe transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// The component is in an invalid state for the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Core error
    #[error("Core error: {0}")]
    CoreError(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        DeviceError::Serialization(err.to_string())
    }
}

/// One labeled reading taken from a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorValue {
    /// Identifier of the reporting module (the client id)
    pub module: String,
    /// Channel label
    pub sensor: String,
    /// Type tag of `value`
    pub value_type: ValueType,
    /// The decoded value
    pub value: Value,
    /// Unix seconds at decode time
    pub timestamp: i64,
}

impl SensorValue {
    /// Create a reading stamped with the current time
    pub fn new<M: Into<String>, S: Into<String>>(module: M, sensor: S, value: Value) -> Self {
        Self::with_timestamp(module, sensor, value, Utc::now().timestamp())
    }

    /// Create a reading with an explicit timestamp
    pub fn with_timestamp<M: Into<String>, S: Into<String>>(
        module: M,
        sensor: S,
        value: Value,
        timestamp: i64,
    ) -> Self {
        Self {
            module: module.into(),
            sensor: sensor.into(),
            value_type: value.value_type(),
            value,
            timestamp,
        }
    }

    /// JSON payload published for this reading
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SensorValue <{}, {}, {}, {}>",
            self.module, self.sensor, self.value, self.timestamp
        )
    }
}

/// Connection parameters captured by a reader at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSettings {
    /// Module identifier stamped on every reading
    pub id: String,
    /// Device host or IP address
    pub address: String,
    /// Device TCP port, `None` when the configured value is unusable
    pub port: Option<u16>,
    /// Modbus unit id, `None` when the configured value is unusable
    pub unit_id: Option<u8>,
    /// Synthesize readings instead of talking to the device
    pub dummy: bool,
}

impl ReaderSettings {
    /// Extract reader settings from a configuration snapshot
    pub fn from_configuration(config: &Configuration) -> Self {
        Self {
            id: config.client_id(),
            address: config.modbus_ip(),
            port: config.modbus_port().ok(),
            unit_id: config.modbus_unit().ok(),
            dummy: config.dummy_data(),
        }
    }

    /// Port and unit id to read from, if both are usable
    pub fn modbus_target(&self) -> Option<(u16, u8)> {
        self.port.zip(self.unit_id)
    }
}

/// A source of sensor readings
///
/// `read` never fails: unavailable devices yield an empty batch so that the
/// poll loop simply has nothing to publish for that tick.
#[async_trait]
pub trait DeviceReader: Send + Sync + Debug {
    /// Settings the reader was built with
    fn settings(&self) -> &ReaderSettings;

    /// Module identifier of the reader
    fn id(&self) -> &str {
        &self.settings().id
    }

    /// Take one batch of readings
    async fn read(&self) -> Vec<SensorValue>;

    /// Release the reader; later reads return nothing
    async fn close(&self);
}

/// Builds device readers from settings
pub trait ReaderFactory: Send + Sync + Debug {
    /// Construct a fresh reader
    fn build(&self, settings: ReaderSettings) -> Arc<dyn DeviceReader>;
}
