/*!
 * Protocol implementations for RelayBox.
 *
 * This module contains the concrete Modbus and MQTT clients.
 */

#[cfg(feature = "modbus")]
pub mod modbus;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "modbus")]
pub use modbus::TcpConnector;

#[cfg(feature = "mqtt")]
pub use mqtt::MqttTransport;
