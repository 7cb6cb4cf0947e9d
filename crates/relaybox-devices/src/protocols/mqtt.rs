/*!
 * MQTT transport for RelayBox.
 *
 * Wraps a rumqttc client and event loop. A background task drives the event
 * loop and tracks the connection; a second task hands inbound messages to
 * the registered handler one at a time.
 */
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Instrument};

use relaybox_core::{
    config::Configuration, error::Error as CoreError, logging::component_span, utils::Signal,
};

use crate::device::{DeviceError, Result};
use crate::protocol::{InboundMessage, MessageHandler, Transport};

/// Keep-alive interval negotiated with the broker
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Capacity of the rumqttc request channel
pub const REQUEST_CAPACITY: usize = 64;

/// How often a blocked publish rechecks for shutdown
pub const PUBLISH_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Pause between reconnection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long `stop` lets the event loop flush the DISCONNECT packet
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Client half of an MQTT session
#[async_trait]
pub trait MqttClient: Send + Sync + fmt::Debug + 'static {
    /// Subscribe to a topic filter at QoS 1
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Publish a payload at QoS 0
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Request a clean disconnect
    async fn disconnect(&self) -> Result<()>;
}

#[async_trait]
impl MqttClient for AsyncClient {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        // Called from the event loop task, so it must not wait on that loop
        self.try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| DeviceError::Transport(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        AsyncClient::publish(self, topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| DeviceError::Transport(e.to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        self.try_disconnect()
            .map_err(|e| DeviceError::Transport(e.to_string()))
    }
}

/// Event half of an MQTT session
#[async_trait]
pub trait EventSource: Send + 'static {
    /// Drive the session until the next event
    async fn poll(&mut self) -> Result<Event>;
}

#[async_trait]
impl EventSource for EventLoop {
    async fn poll(&mut self) -> Result<Event> {
        EventLoop::poll(self)
            .await
            .map_err(|e| DeviceError::Connection(e.to_string()))
    }
}

/// MQTT transport with automatic reconnection
pub struct MqttTransport<C = AsyncClient, E = EventLoop> {
    broker: String,
    client: C,
    subscriptions: Vec<String>,
    connected: Signal,
    closing: Signal,
    exiting: Signal,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    events: Mutex<Option<E>>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    span: tracing::Span,
}

impl MqttTransport {
    /// Build a transport for the broker named in `config`.
    ///
    /// Nothing touches the network until [`Transport::start`] is called.
    /// Fails when the client id or port cannot be used for an MQTT session.
    pub fn connect(config: &Configuration, subscriptions: Vec<String>) -> Result<Self> {
        let client_id = config.client_id();
        // rumqttc panics on these ids
        if client_id.is_empty() || client_id.starts_with(' ') {
            return Err(CoreError::config(format!("invalid MQTT client id '{}'", client_id)).into());
        }
        let host = config.mqtt_hostname();
        let port = config.mqtt_port()?;

        let mut options = MqttOptions::new(client_id.clone(), host.clone(), port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, events) = AsyncClient::new(options, REQUEST_CAPACITY);
        Ok(Self::new(format!("{}:{}", host, port), client, events, subscriptions)
            .with_span(component_span("mqtt", Some(&client_id))))
    }
}

impl<C, E> MqttTransport<C, E>
where
    C: MqttClient,
    E: EventSource,
{
    /// Create a transport over an existing client and event source
    pub fn new<B: Into<String>>(broker: B, client: C, events: E, subscriptions: Vec<String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            broker: broker.into(),
            client,
            subscriptions,
            connected: Signal::new(),
            closing: Signal::new(),
            exiting: Signal::new(),
            handler: RwLock::new(None),
            events: Mutex::new(Some(events)),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            tasks: Mutex::new(Vec::new()),
            span: component_span("mqtt", None),
        }
    }

    /// Replace the span the background tasks run in
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Broker address as `host:port`
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Topic filters applied on every connection
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Apply one event from the session to the transport state
    pub async fn handle_event(&self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("Connected to MQTT broker at {}", self.broker);
                    self.subscribe_all().await;
                    self.connected.set();
                } else {
                    error!("MQTT broker at {} refused connection: {:?}", self.broker, ack.code);
                    self.connected.clear();
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
                self.connected.clear();
            }
            Event::Incoming(Packet::Publish(publish)) => {
                trace!("Received publish on topic {}", publish.topic);
                let message = InboundMessage::new(publish.topic, publish.payload);
                if self.inbound_tx.send(message).is_err() {
                    warn!("Inbound dispatcher is gone, dropping message");
                }
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                debug!("Disconnect sent to {}", self.broker);
                self.connected.clear();
                self.exiting.set();
            }
            other => trace!("MQTT event: {:?}", other),
        }
    }

    async fn subscribe_all(&self) {
        for topic in &self.subscriptions {
            match self.client.subscribe(topic).await {
                Ok(()) => debug!("Subscribed to {}", topic),
                Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
            }
        }
    }

    async fn drive(self: Arc<Self>, mut events: E) {
        info!("Connecting to MQTT broker at {}", self.broker);
        loop {
            let polled = tokio::select! {
                biased;
                _ = self.exiting.wait() => break,
                polled = events.poll() => polled,
            };

            match polled {
                Ok(event) => self.handle_event(event).await,
                Err(e) => {
                    if self.connected.is_set() {
                        warn!("Connection to {} lost: {}", self.broker, e);
                    } else {
                        debug!("Connection to {} failed: {}", self.broker, e);
                    }
                    self.connected.clear();
                    if self.closing.is_set() || self.exiting.wait_timeout(RECONNECT_DELAY).await {
                        break;
                    }
                }
            }
        }
        debug!("MQTT event loop stopped");
    }

    async fn dispatch(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<InboundMessage>) {
        loop {
            let message = tokio::select! {
                _ = self.exiting.wait() => break,
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let handler = self.handler.read().ok().and_then(|handler| handler.clone());
            match handler {
                Some(handler) => handler.on_message(message).await,
                None => warn!("No handler registered, dropping message on {}", message.topic),
            }
        }
        debug!("MQTT dispatcher stopped");
    }
}

#[async_trait]
impl<C, E> Transport for MqttTransport<C, E>
where
    C: MqttClient,
    E: EventSource,
{
    fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        match self.handler.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(_) => error!("Handler slot is poisoned"),
        }
    }

    fn start(self: Arc<Self>) -> Result<()> {
        let events = self
            .events
            .lock()
            .map_err(|_| DeviceError::InvalidState("event source lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| DeviceError::InvalidState("transport already started".to_string()))?;
        let inbound = self
            .inbound_rx
            .lock()
            .map_err(|_| DeviceError::InvalidState("inbound queue lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| DeviceError::InvalidState("transport already started".to_string()))?;

        let driver = tokio::spawn(self.clone().drive(events).instrument(self.span.clone()));
        let dispatcher = tokio::spawn(self.clone().dispatch(inbound).instrument(self.span.clone()));

        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| DeviceError::InvalidState("task list lock poisoned".to_string()))?;
        tasks.push(driver);
        tasks.push(dispatcher);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.is_set()
    }

    async fn wait_connected(&self, timeout: Duration) -> bool {
        self.connected.wait_timeout(timeout).await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<bool> {
        loop {
            if self.closing.is_set() {
                debug!("Transport stopping, not publishing to {}", topic);
                return Ok(false);
            }
            if self.connected.wait_timeout(PUBLISH_POLL_INTERVAL).await {
                break;
            }
            trace!("Waiting for connection to publish to {}", topic);
        }
        if self.closing.is_set() {
            return Ok(false);
        }

        trace!("Publishing {} bytes to {}", payload.len(), topic);
        self.client.publish(topic, payload).await?;
        Ok(true)
    }

    async fn stop(&self) {
        info!("Stopping MQTT transport");
        self.closing.set();

        // The event loop keeps running until it has sent the DISCONNECT
        match self.client.disconnect().await {
            Ok(()) if self.connected.is_set() => {
                if !self.exiting.wait_timeout(DISCONNECT_TIMEOUT).await {
                    warn!("Disconnect from {} not confirmed, closing anyway", self.broker);
                }
            }
            Ok(()) => {}
            Err(e) => debug!("Disconnect request failed: {}", e),
        }
        self.exiting.set();

        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!("MQTT task ended abnormally: {}", e);
            }
        }

        self.connected.clear();
        if let Ok(mut slot) = self.handler.write() {
            slot.take();
        }
    }
}

impl<C: fmt::Debug, E> fmt::Debug for MqttTransport<C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttTransport")
            .field("broker", &self.broker)
            .field("client", &self.client)
            .field("subscriptions", &self.subscriptions)
            .field("connected", &self.connected.is_set())
            .field("closing", &self.closing.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaybox_core::{config::ConfigKey, types::Value};
    use rumqttc::{ConnAck, Publish};
    use tokio::time::{sleep, timeout};
    use tokio_test::{assert_pending, assert_ready, task};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Subscribe(String),
        Publish(String, Vec<u8>),
        Disconnect,
    }

    #[derive(Debug, Clone, Default)]
    struct FakeClient {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl FakeClient {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MqttClient for FakeClient {
        async fn subscribe(&self, topic: &str) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Subscribe(topic.to_string()));
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Publish(topic.to_string(), payload));
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Disconnect);
            Ok(())
        }
    }

    struct FakeEvents {
        rx: mpsc::UnboundedReceiver<Result<Event>>,
    }

    #[async_trait]
    impl EventSource for FakeEvents {
        async fn poll(&mut self) -> Result<Event> {
            match self.rx.recv().await {
                Some(event) => event,
                None => std::future::pending().await,
            }
        }
    }

    struct RecordingHandler {
        tx: mpsc::UnboundedSender<InboundMessage>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn on_message(&self, message: InboundMessage) {
            let _ = self.tx.send(message);
        }
    }

    type TestTransport = MqttTransport<FakeClient, FakeEvents>;

    fn transport() -> (Arc<TestTransport>, mpsc::UnboundedSender<Result<Event>>, FakeClient) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = FakeClient::default();
        let subscriptions = vec![
            "configurations/RB_1/+/request".to_string(),
            "actuators/RB_1/+/request".to_string(),
        ];
        let transport = MqttTransport::new("localhost:1883", client.clone(), FakeEvents { rx }, subscriptions);
        (Arc::new(transport), tx, client)
    }

    fn connack(code: ConnectReturnCode) -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code,
        }))
    }

    fn inbound(topic: &str, payload: &str) -> Event {
        Event::Incoming(Packet::Publish(Publish::new(topic, QoS::AtLeastOnce, payload)))
    }

    #[test_log::test(tokio::test)]
    async fn test_publish_waits_for_connection() {
        let (transport, events, client) = transport();
        transport.clone().start().unwrap();

        let publisher = transport.clone();
        let publish = tokio::spawn(async move {
            publisher.publish("sensors/RB_1/t_mod", b"25".to_vec()).await
        });

        sleep(Duration::from_millis(50)).await;
        assert!(!publish.is_finished());
        assert!(client.calls().is_empty());

        events.send(Ok(connack(ConnectReturnCode::Success))).unwrap();
        let sent = timeout(Duration::from_secs(2), publish).await.unwrap().unwrap().unwrap();
        assert!(sent);

        assert_eq!(
            client.calls(),
            vec![
                Call::Subscribe("configurations/RB_1/+/request".to_string()),
                Call::Subscribe("actuators/RB_1/+/request".to_string()),
                Call::Publish("sensors/RB_1/t_mod".to_string(), b"25".to_vec()),
            ]
        );

        transport.stop().await;
    }

    #[tokio::test]
    async fn test_publish_pending_while_disconnected() {
        let (transport, _events, client) = transport();

        let mut publish = task::spawn(transport.publish("sensors/RB_1/adc_vb", b"1".to_vec()));
        assert_pending!(publish.poll());
        assert!(client.calls().is_empty());

        transport.handle_event(connack(ConnectReturnCode::Success)).await;
        assert!(publish.is_woken());
        assert!(assert_ready!(publish.poll()).unwrap());
        assert_eq!(
            client.calls().last(),
            Some(&Call::Publish("sensors/RB_1/adc_vb".to_string(), b"1".to_vec()))
        );
    }

    #[tokio::test]
    async fn test_subscriptions_reapplied_on_reconnect() {
        let (transport, _events, client) = transport();

        transport.handle_event(connack(ConnectReturnCode::Success)).await;
        assert!(transport.is_connected());

        transport.handle_event(Event::Incoming(Packet::Disconnect)).await;
        assert!(!transport.is_connected());
        assert!(!transport.wait_connected(Duration::from_millis(10)).await);

        transport.handle_event(connack(ConnectReturnCode::Success)).await;
        assert!(transport.is_connected());

        let subscribes = client
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Subscribe(_)))
            .count();
        assert_eq!(subscribes, 4);
    }

    #[tokio::test]
    async fn test_refused_connection_stays_disconnected() {
        let (transport, _events, client) = transport();

        transport.handle_event(connack(ConnectReturnCode::NotAuthorized)).await;
        assert!(!transport.is_connected());
        assert!(client.calls().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_poll_error_clears_connection() {
        let (transport, events, _client) = transport();
        transport.clone().start().unwrap();

        events.send(Ok(connack(ConnectReturnCode::Success))).unwrap();
        assert!(transport.wait_connected(Duration::from_secs(1)).await);

        events
            .send(Err(DeviceError::Connection("connection reset".to_string())))
            .unwrap();
        sleep(Duration::from_millis(100)).await;
        assert!(!transport.is_connected());

        events.send(Ok(connack(ConnectReturnCode::Success))).unwrap();
        assert!(transport.wait_connected(Duration::from_secs(3)).await);

        transport.stop().await;
    }

    #[tokio::test]
    async fn test_messages_reach_handler() {
        let (transport, events, _client) = transport();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.set_handler(Arc::new(RecordingHandler { tx }));
        transport.clone().start().unwrap();

        events
            .send(Ok(inbound("configurations/RB_1/ENABLE/request", r#"{"value": 0, "value_type": "integer"}"#)))
            .unwrap();

        let message = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(message.topic, "configurations/RB_1/ENABLE/request");
        assert_eq!(&message.payload[..], br#"{"value": 0, "value_type": "integer"}"#);

        transport.stop().await;
    }

    #[tokio::test]
    async fn test_message_without_handler_is_dropped() {
        let (transport, events, _client) = transport();
        transport.clone().start().unwrap();

        events.send(Ok(inbound("actuators/RB_1/relay_1/request", "first"))).unwrap();
        sleep(Duration::from_millis(50)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.set_handler(Arc::new(RecordingHandler { tx }));
        events.send(Ok(inbound("actuators/RB_1/relay_1/request", "second"))).unwrap();

        let message = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(&message.payload[..], b"second");

        transport.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_blocked_publish() {
        let (transport, _events, client) = transport();
        transport.clone().start().unwrap();

        let publisher = transport.clone();
        let publish = tokio::spawn(async move {
            publisher.publish("sensors/RB_1/adc_vb", b"{}".to_vec()).await
        });
        sleep(Duration::from_millis(20)).await;

        transport.stop().await;
        let sent = timeout(Duration::from_secs(1), publish).await.unwrap().unwrap().unwrap();
        assert!(!sent);

        let calls = client.calls();
        assert!(calls.contains(&Call::Disconnect));
        assert!(!calls.iter().any(|call| matches!(call, Call::Publish(..))));
        assert!(!transport.is_connected());
    }

    #[test_log::test(tokio::test)]
    async fn test_stop_flushes_disconnect() {
        let (transport, events, client) = transport();
        transport.clone().start().unwrap();
        events.send(Ok(connack(ConnectReturnCode::Success))).unwrap();
        assert!(transport.wait_connected(Duration::from_secs(1)).await);

        let stopper = transport.clone();
        let stop = tokio::spawn(async move { stopper.stop().await });

        sleep(Duration::from_millis(50)).await;
        assert!(client.calls().contains(&Call::Disconnect));
        assert!(!stop.is_finished());
        assert!(!transport.publish("sensors/RB_1/t_mod", b"1".to_vec()).await.unwrap());

        events.send(Ok(Event::Outgoing(Outgoing::Disconnect))).unwrap();
        timeout(Duration::from_millis(500), stop).await.unwrap().unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_stop_gives_up_on_unconfirmed_disconnect() {
        let (transport, events, _client) = transport();
        transport.clone().start().unwrap();
        events.send(Ok(connack(ConnectReturnCode::Success))).unwrap();
        assert!(transport.wait_connected(Duration::from_secs(1)).await);

        timeout(DISCONNECT_TIMEOUT * 2, transport.stop()).await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_connect_rejects_unusable_client_id() {
        let config = Configuration::default().with_value(ConfigKey::ClientId, Value::from(""));
        assert!(matches!(
            MqttTransport::connect(&config, Vec::new()),
            Err(DeviceError::CoreError(_))
        ));

        let config = Configuration::default().with_value(ConfigKey::ClientId, Value::from(" RB_1"));
        let transport = MqttTransport::connect(&config, Vec::new()).unwrap();
        assert_eq!(transport.broker(), "mosquitto:1883");
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (transport, _events, _client) = transport();
        transport.clone().start().unwrap();
        assert!(matches!(
            transport.clone().start(),
            Err(DeviceError::InvalidState(_))
        ));
        transport.stop().await;
    }

    #[tokio::test]
    async fn test_connect_builds_broker_address() {
        let config = Configuration::default();
        let transport = MqttTransport::connect(&config, vec!["a/b".to_string()]).unwrap();
        assert_eq!(transport.broker(), "mosquitto:1883");
        assert_eq!(transport.subscriptions(), ["a/b".to_string()]);
    }
}
