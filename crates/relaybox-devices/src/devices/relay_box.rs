/*!
 * Relay box device implementation for RelayBox.
 *
 * The relay box exposes its telemetry as a block of holding registers. Each
 * read opens a Modbus session, fetches the block, closes the session and
 * decodes the leading registers into labeled sensor values. In dummy mode
 * the same labels are filled with random values instead.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, error, warn, Instrument};

use relaybox_core::{logging::component_span, types::Value, utils::round_to};

use crate::device::{DeviceReader, ReaderFactory, ReaderSettings, SensorValue};
use crate::protocol::ModbusConnector;

/// First holding register of the telemetry block
pub const REGISTER_START: u16 = 0;

/// Number of holding registers fetched per read
pub const REGISTER_COUNT: u16 = 80;

/// Volts per raw count on the voltage channels
pub const VOLTAGE_SCALE: f64 = 78.421 / 32768.0;

/// Decimal places kept on scaled values
pub const DECIMALS: u32 = 1;

/// Upper bound of synthesized dummy values
pub const DUMMY_MAX: f64 = 255.0;

/// How a channel's raw register is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Scaled to volts and rounded
    Voltage,
    /// Reported as the raw register value
    Raw,
}

/// One telemetry channel of the relay box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    /// Label reported as the sensor name
    pub label: &'static str,
    /// Decoding rule
    pub kind: ChannelKind,
}

const fn voltage(label: &'static str) -> Channel {
    Channel { label, kind: ChannelKind::Voltage }
}

const fn raw(label: &'static str) -> Channel {
    Channel { label, kind: ChannelKind::Raw }
}

/// Channel catalog, in register order
pub const CHANNELS: [Channel; 18] = [
    voltage("adc_vb"),
    voltage("adc_vch_1"),
    voltage("adc_vch_2"),
    voltage("adc_vch_3"),
    voltage("adc_vch_4"),
    raw("t_mod"),
    raw("global_faults"),
    raw("global_alarms"),
    raw("hourmeter_HI"),
    raw("hourmeter_LO"),
    raw("ch_faults_1"),
    raw("ch_faults_2"),
    raw("ch_faults_3"),
    raw("ch_faults_4"),
    raw("ch_alarms_1"),
    raw("ch_alarms_2"),
    raw("ch_alarms_3"),
    raw("ch_alarms_4"),
];

/// Decode a register block into one reading per catalog channel.
///
/// Registers beyond the catalog are ignored. A block shorter than the
/// catalog decodes to nothing.
pub fn decode_registers(module: &str, registers: &[u16]) -> Vec<SensorValue> {
    if registers.len() < CHANNELS.len() {
        warn!(
            "Register block too short: got {}, need {}",
            registers.len(),
            CHANNELS.len()
        );
        return Vec::new();
    }

    CHANNELS
        .iter()
        .zip(registers)
        .map(|(channel, &register)| {
            let value = match channel.kind {
                ChannelKind::Voltage => {
                    Value::Float(round_to(f64::from(register) * VOLTAGE_SCALE, DECIMALS))
                }
                ChannelKind::Raw => Value::Integer(i64::from(register)),
            };
            SensorValue::new(module, channel.label, value)
        })
        .collect()
}

/// Synthesize one random reading per catalog channel
pub fn dummy_readings(module: &str) -> Vec<SensorValue> {
    let mut rng = rand::rng();
    CHANNELS
        .iter()
        .map(|channel| {
            let value = round_to(rng.random_range(0.0..=DUMMY_MAX), DECIMALS);
            SensorValue::new(module, channel.label, Value::Float(value))
        })
        .collect()
}

/// Where readings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Read the device over Modbus
    Live,
    /// Generate random values
    Dummy,
}

/// Reader for one relay box
#[derive(Debug)]
pub struct RelayBox<C> {
    settings: ReaderSettings,
    connector: C,
    closed: AtomicBool,
    span: tracing::Span,
}

impl<C: ModbusConnector> RelayBox<C> {
    /// Create a reader; no connection is made until the first read
    pub fn new(settings: ReaderSettings, connector: C) -> Self {
        let span = component_span("relay_box", Some(&settings.id));
        Self {
            settings,
            connector,
            closed: AtomicBool::new(false),
            span,
        }
    }

    /// Read mode fixed at construction
    pub fn mode(&self) -> ReadMode {
        if self.settings.dummy {
            ReadMode::Dummy
        } else {
            ReadMode::Live
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn read_live(&self) -> Vec<SensorValue> {
        let settings = &self.settings;
        let Some((port, unit_id)) = settings.modbus_target() else {
            error!("No usable Modbus port or unit id for {}, skipping read", settings.address);
            return Vec::new();
        };

        let mut client = match self.connector.connect(&settings.address, port, unit_id).await {
            Ok(client) => client,
            Err(e) => {
                error!("Relay box at {}:{} unavailable: {}", settings.address, port, e);
                return Vec::new();
            }
        };

        let block = client
            .read_holding_registers(REGISTER_START, REGISTER_COUNT)
            .await;

        if let Err(e) = client.disconnect().await {
            debug!("Error closing Modbus session: {}", e);
        }

        match block {
            Ok(registers) => decode_registers(&settings.id, &registers),
            Err(e) => {
                error!("Failed to read registers from {}: {}", settings.address, e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl<C: ModbusConnector> DeviceReader for RelayBox<C> {
    fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    async fn read(&self) -> Vec<SensorValue> {
        if self.is_closed() {
            debug!("Read on closed relay box {}", self.settings.id);
            return Vec::new();
        }

        match self.mode() {
            ReadMode::Dummy => self.span.in_scope(|| dummy_readings(&self.settings.id)),
            ReadMode::Live => self.read_live().instrument(self.span.clone()).await,
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.span.in_scope(|| debug!("Relay box closed"));
        }
    }
}

/// Builds [`RelayBox`] readers sharing one connector
#[derive(Debug, Clone, Default)]
pub struct RelayBoxFactory<C> {
    connector: C,
}

impl<C> RelayBoxFactory<C>
where
    C: ModbusConnector + Clone + 'static,
{
    /// Create a factory around `connector`
    pub fn new(connector: C) -> Self {
        Self { connector }
    }
}

#[cfg(feature = "modbus")]
impl RelayBoxFactory<crate::protocols::modbus::TcpConnector> {
    /// Factory for readers that talk Modbus TCP
    pub fn tcp() -> Self {
        Self::new(crate::protocols::modbus::TcpConnector::new())
    }
}

impl<C> ReaderFactory for RelayBoxFactory<C>
where
    C: ModbusConnector + Clone + 'static,
{
    fn build(&self, settings: ReaderSettings) -> Arc<dyn DeviceReader> {
        Arc::new(RelayBox::new(settings, self.connector.clone()))
    }
}
