/*!
 * Orchestrator for the RelayBox bridge.
 *
 * Owns the configuration, the device reader and the transport. Runs the
 * poll loop once the broker is reachable and applies configuration changes
 * requested over MQTT.
 */
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn, Instrument};

use relaybox_core::{
    config::{ConfigKey, ConfigStore, Configuration},
    logging::{component_span, Span},
    types::{Value, ValueType},
    utils::Signal,
};
use relaybox_devices::{
    devices::RelayBoxFactory,
    protocols::MqttTransport,
    DeviceReader, InboundMessage, MessageHandler, ReaderFactory, ReaderSettings, Transport,
};

use crate::control::{self, Category, ControlRequest, ControlTopic};
use crate::error::{Error, Result};

/// How often `run` rechecks for shutdown while waiting for the broker
pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, not yet running
    Init,
    /// Waiting for the broker connection
    Connecting,
    /// Polling the device
    Running,
    /// Poll loop finished and transport stopped
    Stopped,
}

impl Lifecycle {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Init => "init",
            Lifecycle::Connecting => "connecting",
            Lifecycle::Running => "running",
            Lifecycle::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    store: ConfigStore,
    config: RwLock<Arc<Configuration>>,
    reader: RwLock<Arc<dyn DeviceReader>>,
    factory: Arc<dyn ReaderFactory>,
    transport: Arc<dyn Transport>,
    update: tokio::sync::Mutex<()>,
    lifecycle: Mutex<Lifecycle>,
    stop: Signal,
    span: Span,
}

/// Coordinates the poll loop and remote reconfiguration
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Build the bridge from the configuration in `store`.
    ///
    /// The resolved configuration is written back to the store; a failed
    /// write is logged and does not abort start-up. Fails when the MQTT
    /// settings cannot be used.
    pub fn init(store: ConfigStore) -> Result<Self> {
        let config = store.resolve()?;

        match store.save(&config) {
            Ok(()) => debug!("Configuration persisted to {}", store.path().display()),
            Err(e) => warn!("Failed to persist configuration: {}", e),
        }

        let transport = MqttTransport::connect(&config, control::subscriptions(&config.client_id()))?;
        Ok(Self::with_components(
            store,
            config,
            Arc::new(transport),
            Arc::new(RelayBoxFactory::tcp()),
        ))
    }

    /// Build the bridge from explicit parts.
    ///
    /// The control handler is registered with `transport` before returning,
    /// so it must not have been started yet.
    pub fn with_components(
        store: ConfigStore,
        config: Configuration,
        transport: Arc<dyn Transport>,
        factory: Arc<dyn ReaderFactory>,
    ) -> Self {
        let reader = build_reader(factory.as_ref(), &config);
        let span = component_span("orchestrator", Some(&config.client_id()));

        let inner = Arc::new(Inner {
            store,
            config: RwLock::new(Arc::new(config)),
            reader: RwLock::new(reader),
            factory,
            transport,
            update: tokio::sync::Mutex::new(()),
            lifecycle: Mutex::new(Lifecycle::Init),
            stop: Signal::new(),
            span,
        });

        inner.transport.set_handler(Arc::new(ControlHandler {
            inner: Arc::downgrade(&inner),
        }));

        Self { inner }
    }

    /// Current configuration snapshot
    pub fn configuration(&self) -> Arc<Configuration> {
        self.inner.configuration()
    }

    /// Current device reader
    pub fn reader(&self) -> Arc<dyn DeviceReader> {
        self.inner.reader()
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> Lifecycle {
        *self.inner.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle that stops `run` when set
    pub fn shutdown_handle(&self) -> Signal {
        self.inner.stop.clone()
    }

    /// Request shutdown
    pub fn shutdown(&self) {
        self.inner.stop.set();
    }

    /// Start the transport and poll until shutdown is requested.
    ///
    /// The transport is stopped after the poll loop has exited.
    pub async fn run(&self) -> Result<()> {
        let inner = &self.inner;
        async {
            inner.set_lifecycle(Lifecycle::Connecting);
            if let Err(e) = inner.transport.clone().start() {
                error!("Failed to start transport: {}", e);
                inner.set_lifecycle(Lifecycle::Stopped);
                return Err(Error::from(e));
            }

            info!("Waiting for MQTT connection");
            let mut connected = false;
            while !inner.stop.is_set() {
                if inner.transport.wait_connected(CONNECT_POLL_INTERVAL).await {
                    connected = true;
                    break;
                }
            }

            if connected && !inner.stop.is_set() {
                inner.set_lifecycle(Lifecycle::Running);
                info!("Polling started");
                loop {
                    inner.poll_once().await;
                    let interval = inner.configuration().reading_interval();
                    if inner.stop.wait_timeout(interval).await {
                        break;
                    }
                }
            }

            info!("Shutting down");
            inner.transport.stop().await;
            inner.set_lifecycle(Lifecycle::Stopped);
            Ok(())
        }
        .instrument(inner.span.clone())
        .await
    }

    /// Run one poll iteration; returns the number of readings published
    pub async fn poll_once(&self) -> usize {
        self.inner.poll_once().instrument(self.inner.span.clone()).await
    }

    /// Interpret one inbound control message
    pub async fn handle_control_message(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.inner
            .handle_control_message(topic, payload)
            .instrument(self.inner.span.clone())
            .await
    }

    /// Change one configuration value and rebuild the device reader.
    ///
    /// Fails only for an unknown key, an unsupported value type or a value
    /// that does not coerce; the configuration is then left unchanged.
    pub async fn change_configuration(
        &self,
        key: &str,
        value: &serde_json::Value,
        value_type: &str,
    ) -> Result<()> {
        self.inner
            .change_configuration(key, value, value_type)
            .instrument(self.inner.span.clone())
            .await
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.inner.store)
            .field("lifecycle", &self.lifecycle())
            .field("transport", &self.inner.transport)
            .finish()
    }
}

impl Inner {
    fn configuration(&self) -> Arc<Configuration> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn reader(&self) -> Arc<dyn DeviceReader> {
        self.reader
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if *lifecycle != state {
            debug!("Lifecycle {} -> {}", *lifecycle, state);
            *lifecycle = state;
        }
    }

    async fn poll_once(&self) -> usize {
        if !self.configuration().is_enabled() {
            debug!("Reading disabled");
            return 0;
        }

        let readings = self.reader().read().await;
        if readings.is_empty() {
            debug!("No readings this tick");
            return 0;
        }

        let mut published = 0;
        for reading in readings {
            debug!("{}", reading);
            let payload = match reading.to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to serialize {}: {}", reading.sensor, e);
                    continue;
                }
            };

            match self.transport.publish(&control::sensor_topic(&reading), payload).await {
                Ok(true) => published += 1,
                Ok(false) => {
                    debug!("Transport stopping, abandoning remaining readings");
                    break;
                }
                Err(e) => error!("Failed to publish {}: {}", reading.sensor, e),
            }
        }
        published
    }

    async fn handle_control_message(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let control = ControlTopic::parse(topic)?;

        match control.category {
            Category::Actuators => {
                info!(
                    "Actuator request for {}: {}",
                    control.key,
                    String::from_utf8_lossy(payload)
                );
                Ok(())
            }
            Category::Configurations => {
                let request = ControlRequest::decode(payload)?;
                self.change_configuration(&control.key, &request.value, &request.value_type)
                    .await?;

                let response = control.response_topic();
                if self.transport.publish(&response, payload.to_vec()).await? {
                    debug!("Acknowledged on {}", response);
                }
                Ok(())
            }
        }
    }

    async fn change_configuration(
        &self,
        key: &str,
        value: &serde_json::Value,
        value_type: &str,
    ) -> Result<()> {
        let config_key = ConfigKey::parse(key).ok_or_else(|| Error::UnknownKey(key.to_string()))?;
        let value_type: ValueType = value_type
            .parse()
            .map_err(|_| Error::UnsupportedValueType(value_type.to_string()))?;
        let value = Value::coerce(value, value_type).map_err(|e| Error::invalid_value(e.to_string()))?;

        let _update = self.update.lock().await;

        let next = self.configuration().with_value(config_key, value);
        info!("{} changed to {}", config_key, next.get(config_key));
        let snapshot = Arc::new(next);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        if let Err(e) = self.store.save(&snapshot) {
            warn!("Failed to persist configuration: {}", e);
        }

        let fresh = build_reader(self.factory.as_ref(), &snapshot);
        let superseded = std::mem::replace(
            &mut *self.reader.write().unwrap_or_else(PoisonError::into_inner),
            fresh,
        );
        superseded.close().await;
        debug!("Device reader rebuilt");

        Ok(())
    }
}

fn build_reader(factory: &dyn ReaderFactory, config: &Configuration) -> Arc<dyn DeviceReader> {
    let settings = ReaderSettings::from_configuration(config);
    if !settings.dummy && settings.modbus_target().is_none() {
        error!(
            "Modbus port or unit id for {} is unusable, no readings until it is changed",
            settings.address
        );
    }
    factory.build(settings)
}

/// Routes transport messages to the orchestrator without owning it
struct ControlHandler {
    inner: Weak<Inner>,
}

#[async_trait]
impl MessageHandler for ControlHandler {
    async fn on_message(&self, message: InboundMessage) {
        let Some(inner) = self.inner.upgrade() else {
            debug!("Orchestrator gone, dropping message on {}", message.topic);
            return;
        };

        let span = inner.span.clone();
        let result = inner
            .handle_control_message(&message.topic, &message.payload)
            .instrument(span)
            .await;

        match result {
            Ok(()) => {}
            Err(Error::UnknownCategory(category)) => {
                error!("Unknown topic category '{}' on {}", category, message.topic)
            }
            Err(e) if e.is_rejection() => warn!("Rejected control message on {}: {}", message.topic, e),
            Err(e) => error!("Failed to handle control message on {}: {}", message.topic, e),
        }
    }
}
