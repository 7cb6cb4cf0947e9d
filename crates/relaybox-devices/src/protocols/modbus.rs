/*!
 * Modbus TCP connector.
 *
 * Opens a tokio-modbus session per request; the relay box is polled with a
 * fresh connection on every read.
 */
use async_trait::async_trait;
use tokio::net::lookup_host;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::debug;

use crate::device::{DeviceError, Result};
use crate::protocol::{ModbusConnector, RegisterClient};

/// Connects to devices over Modbus TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModbusConnector for TcpConnector {
    async fn connect(&self, address: &str, port: u16, unit_id: u8) -> Result<Box<dyn RegisterClient>> {
        let socket_addr = lookup_host((address, port))
            .await
            .map_err(|e| DeviceError::Connection(format!("Cannot resolve {}:{}: {}", address, port, e)))?
            .next()
            .ok_or_else(|| DeviceError::Connection(format!("No address for {}:{}", address, port)))?;

        debug!("Opening Modbus TCP session to {} (unit {})", socket_addr, unit_id);

        let ctx = tcp::connect_slave(socket_addr, Slave(unit_id))
            .await
            .map_err(|e| DeviceError::Connection(format!("Failed to connect to {}: {}", socket_addr, e)))?;

        Ok(Box::new(TcpRegisterClient { ctx }))
    }
}

/// Register session backed by a tokio-modbus context
struct TcpRegisterClient {
    ctx: Context,
}

#[async_trait]
impl RegisterClient for TcpRegisterClient {
    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        self.ctx
            .read_holding_registers(start, count)
            .await
            .map_err(|e| DeviceError::Read(e.to_string()))?
            .map_err(|e| DeviceError::Read(format!("Modbus exception: {:?}", e)))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.ctx
            .disconnect()
            .await
            .map_err(|e| DeviceError::Connection(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop a listener so the port is known to be closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TcpConnector::new().connect("127.0.0.1", port, 1).await;
        assert!(matches!(result, Err(DeviceError::Connection(_))));
    }
}
