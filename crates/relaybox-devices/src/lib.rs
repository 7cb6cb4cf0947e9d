/*!
 * RelayBox Devices
 *
 * This crate provides the relay box reader and the protocol clients the
 * bridge uses: Modbus TCP toward the device and MQTT toward the broker.
 */

#![warn(missing_docs)]

// Re-export core types
pub use relaybox_core::prelude;

pub mod device;
pub mod devices;
pub mod protocol;
pub mod protocols;

pub use device::{DeviceError, DeviceReader, ReaderFactory, ReaderSettings, SensorValue};
pub use protocol::{InboundMessage, MessageHandler, ModbusConnector, RegisterClient, Transport};

/// RelayBox devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
