/*!
 * Protocol definitions for RelayBox.
 *
 * This module provides the traits behind the two wire protocols the bridge
 * speaks: Modbus register access toward the relay box and publish/subscribe
 * messaging toward the broker.
 */
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::device::Result;

/// An open register session with a device
#[async_trait]
pub trait RegisterClient: Send {
    /// Read `count` holding registers starting at `start`
    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>>;

    /// Close the session
    async fn disconnect(&mut self) -> Result<()>;
}

/// Opens register sessions
#[async_trait]
pub trait ModbusConnector: Send + Sync + Debug {
    /// Connect to `address:port` addressing unit `unit_id`
    async fn connect(&self, address: &str, port: u16, unit_id: u8) -> Result<Box<dyn RegisterClient>>;
}

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on
    pub topic: String,
    /// Raw payload
    pub payload: Bytes,
}

impl InboundMessage {
    /// Create a new inbound message
    pub fn new<T: Into<String>, P: Into<Bytes>>(topic: T, payload: P) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Receives inbound messages from a transport
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message; messages are delivered one at a time
    async fn on_message(&self, message: InboundMessage);
}

/// Publish/subscribe transport
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Register the handler for inbound messages.
    ///
    /// Messages that arrive while no handler is registered are dropped.
    fn set_handler(&self, handler: Arc<dyn MessageHandler>);

    /// Begin the background connection and delivery tasks.
    ///
    /// Must be called from within a tokio runtime and at most once.
    fn start(self: Arc<Self>) -> Result<()>;

    /// Whether the broker session is currently established
    fn is_connected(&self) -> bool;

    /// Wait up to `timeout` for the session; returns the connection state
    async fn wait_connected(&self, timeout: Duration) -> bool;

    /// Publish a payload, waiting for a connection first.
    ///
    /// Returns `Ok(false)` when the transport is stopping and nothing was sent.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<bool>;

    /// Stop the background tasks and disconnect
    async fn stop(&self);
}
