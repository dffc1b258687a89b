use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::{RwLock, broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::connection::{BrokerConnection, ConnectionState, ReconnectPolicy, ReconnectStep};
use crate::error::BrokerError;
use crate::event::{ConnectionEvent, ConnectionStatus, PublishedMeta};

/// Longest topic the MQTT wire format can carry.
pub const MAX_TOPIC_BYTES: usize = 65_535;

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const MESSAGE_CHANNEL_CAPACITY: usize = 256;

/// Connection-level settings for [`MqttConnection`].
#[derive(Clone)]
pub struct MqttSettings {
    /// Generated (`courier-<random>`) when absent.
    pub client_id: Option<String>,
    /// Overrides credentials embedded in the URL.
    pub username: Option<String>,
    pub password: Option<String>,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub reconnect: ReconnectPolicy,
    /// How long `connect()` waits for the broker's CONNACK.
    pub connect_timeout: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            username: None,
            password: None,
            clean_session: true,
            keep_alive: Duration::from_secs(60),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("clean_session", &self.clean_session)
            .field("keep_alive", &self.keep_alive)
            .field("reconnect", &self.reconnect)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl MqttSettings {
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Options for one MQTT publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MqttPublishOptions {
    pub qos: u8,
    pub retain: bool,
    /// Accepted for API compatibility; the client sets DUP itself on
    /// retransmission.
    pub dup: bool,
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// Reject topics that cannot be published to.
pub fn validate_topic(topic: &str) -> Result<(), BrokerError> {
    check_topic_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(BrokerError::InvalidTopic(format!(
            "wildcards are not allowed in publish topic `{topic}`"
        )));
    }
    Ok(())
}

/// Reject malformed subscription filters. `+` must fill a whole level and
/// `#` may only appear as the last level.
pub fn validate_topic_filter(filter: &str) -> Result<(), BrokerError> {
    check_topic_common(filter)?;
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let misplaced_hash = level.contains('#') && (*level != "#" || i + 1 != levels.len());
        let misplaced_plus = level.contains('+') && *level != "+";
        if misplaced_hash || misplaced_plus {
            return Err(BrokerError::InvalidTopic(format!(
                "invalid wildcard in filter `{filter}`"
            )));
        }
    }
    Ok(())
}

fn check_topic_common(topic: &str) -> Result<(), BrokerError> {
    if topic.is_empty() {
        return Err(BrokerError::InvalidTopic("topic must not be empty".into()));
    }
    if topic.len() > MAX_TOPIC_BYTES {
        return Err(BrokerError::InvalidTopic(format!(
            "topic is {} bytes, limit is {MAX_TOPIC_BYTES}",
            topic.len()
        )));
    }
    if topic.starts_with("$SYS/") {
        return Err(BrokerError::InvalidTopic(format!(
            "`{topic}` is reserved for broker statistics"
        )));
    }
    if topic.contains('\0') {
        return Err(BrokerError::InvalidTopic("topic contains a NUL byte".into()));
    }
    Ok(())
}

pub fn validate_qos(qos: u8) -> Result<QoS, BrokerError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BrokerError::InvalidQos(other)),
    }
}

fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// Translate a broker URL and settings into client options.
///
/// `mqtt://` and `mqtts://` connect over TCP (TLS for the latter);
/// `ws://` and `wss://` hand the whole URL to the websocket transport.
pub fn mqtt_options(broker_url: &str, settings: &MqttSettings) -> Result<MqttOptions, BrokerError> {
    let invalid = |reason: String| BrokerError::InvalidUrl {
        url: broker_url.to_owned(),
        reason,
    };
    let url = Url::parse(broker_url).map_err(|e| invalid(e.to_string()))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host".into()))?;

    let client_id = settings
        .client_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .map_or_else(generated_client_id, str::to_owned);

    let scheme = url.scheme().to_ascii_lowercase();
    let mut options = match scheme.as_str() {
        "mqtt" | "tcp" => MqttOptions::new(client_id, host, url.port().unwrap_or(1883)),
        "mqtts" | "ssl" => {
            let mut options = MqttOptions::new(client_id, host, url.port().unwrap_or(8883));
            options.set_transport(Transport::tls_with_default_config());
            options
        }
        "ws" => {
            let mut options = MqttOptions::new(client_id, broker_url, url.port().unwrap_or(80));
            options.set_transport(Transport::Ws);
            options
        }
        "wss" => {
            let mut options = MqttOptions::new(client_id, broker_url, url.port().unwrap_or(443));
            options.set_transport(Transport::wss_with_default_config());
            options
        }
        other => return Err(invalid(format!("unsupported scheme `{other}`"))),
    };

    options.set_keep_alive(settings.keep_alive);
    options.set_clean_session(settings.clean_session);

    let username = settings
        .username
        .clone()
        .or_else(|| Some(url.username().to_owned()).filter(|u| !u.is_empty()));
    if let Some(username) = username {
        let password = settings
            .password
            .clone()
            .or_else(|| url.password().map(str::to_owned))
            .unwrap_or_default();
        options.set_credentials(username, password);
    }
    Ok(options)
}

fn generated_client_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("courier-{}", &id[..12])
}

struct Session {
    client: AsyncClient,
    driver: CancellationToken,
}

struct MqttInner {
    broker_id: String,
    broker_url: String,
    settings: MqttSettings,
    state: ConnectionState,
    session: RwLock<Option<Session>>,
    subscriptions: Mutex<HashMap<String, QoS>>,
    messages: broadcast::Sender<MqttMessage>,
}

impl MqttInner {
    fn subscriptions(&self) -> MutexGuard<'_, HashMap<String, QoS>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An MQTT client connection driven by a background event-loop task.
///
/// The event loop reconnects on its own after a transport error; this type
/// paces those attempts with [`ReconnectPolicy`] and restores tracked
/// subscriptions after every CONNACK.
#[derive(Clone)]
pub struct MqttConnection {
    inner: Arc<MqttInner>,
}

impl std::fmt::Debug for MqttConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConnection")
            .field("broker_id", &self.inner.broker_id)
            .field("status", &self.inner.state.status())
            .finish_non_exhaustive()
    }
}

impl MqttConnection {
    pub fn new(broker_id: impl Into<String>, broker_url: impl Into<String>, settings: MqttSettings) -> Self {
        let (messages, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MqttInner {
                broker_id: broker_id.into(),
                broker_url: broker_url.into(),
                settings,
                state: ConnectionState::new(),
                session: RwLock::new(None),
                subscriptions: Mutex::new(HashMap::new()),
                messages,
            }),
        }
    }

    async fn client(&self) -> Result<AsyncClient, BrokerError> {
        if self.inner.state.is_closed() {
            return Err(BrokerError::Closed);
        }
        match self.inner.session.read().await.as_ref() {
            Some(session) if self.inner.state.status() == ConnectionStatus::Connected => {
                Ok(session.client.clone())
            }
            _ => Err(BrokerError::NotConnected),
        }
    }

    /// Hand `payload` to the client's request queue.
    ///
    /// `Ok` means the packet was queued for the event loop, not that the
    /// broker acknowledged it: at QoS 1/2 the PUBACK/PUBCOMP arrives later
    /// and is only visible as a [`ConnectionEvent::Debug`].
    #[instrument(skip(self, payload), fields(broker_id = %self.inner.broker_id, bytes = payload.len()))]
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: MqttPublishOptions,
    ) -> Result<(), BrokerError> {
        validate_topic(topic)?;
        let qos = validate_qos(options.qos)?;
        let client = self.client().await?;
        let bytes = payload.len();
        client
            .publish(topic, qos, options.retain, payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        self.inner
            .state
            .emit(ConnectionEvent::MessagePublished(PublishedMeta {
                destination: topic.to_owned(),
                routing_key: None,
                bytes,
                at: Utc::now(),
            }));
        Ok(())
    }

    /// Subscribe to `filter`. The subscription is tracked and restored after
    /// reconnects.
    pub async fn subscribe(&self, filter: &str, qos: u8) -> Result<(), BrokerError> {
        validate_topic_filter(filter)?;
        let qos = validate_qos(qos)?;
        let client = self.client().await?;
        client
            .subscribe(filter, qos)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        self.inner.subscriptions().insert(filter.to_owned(), qos);
        debug!(broker_id = %self.inner.broker_id, filter, "subscribed");
        Ok(())
    }

    pub async fn unsubscribe(&self, filter: &str) -> Result<(), BrokerError> {
        let client = self.client().await?;
        client
            .unsubscribe(filter)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        self.inner.subscriptions().remove(filter);
        Ok(())
    }

    /// Currently tracked subscription filters, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut filters: Vec<String> = self.inner.subscriptions().keys().cloned().collect();
        filters.sort();
        filters
    }

    /// Receive messages arriving on subscribed topics from now on.
    pub fn messages(&self) -> broadcast::Receiver<MqttMessage> {
        self.inner.messages.subscribe()
    }
}

#[async_trait]
impl BrokerConnection for MqttConnection {
    fn broker_id(&self) -> &str {
        &self.inner.broker_id
    }

    fn broker_url(&self) -> &str {
        &self.inner.broker_url
    }

    #[instrument(skip(self), fields(broker_id = %self.inner.broker_id))]
    async fn connect(&self) -> Result<(), BrokerError> {
        let inner = &self.inner;
        if inner.state.is_closed() {
            return Err(BrokerError::Closed);
        }
        if inner.state.status() == ConnectionStatus::Connected {
            return Ok(());
        }

        let options = mqtt_options(&inner.broker_url, &inner.settings)?;
        if let Some(previous) = inner.session.write().await.take() {
            previous.driver.cancel();
        }

        inner.state.reset_attempts();
        inner.state.set_connecting();
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let driver = inner.state.closed_token().child_token();
        let (first_tx, first_rx) = oneshot::channel();
        tokio::spawn(drive(
            Arc::clone(inner),
            client.clone(),
            eventloop,
            driver.clone(),
            first_tx,
        ));
        *inner.session.write().await = Some(Session {
            client,
            driver: driver.clone(),
        });

        let outcome = match tokio::time::timeout(inner.settings.connect_timeout, first_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BrokerError::Connect("event loop stopped".into())),
            Err(_) => Err(BrokerError::Connect(format!(
                "no CONNACK within {:?}",
                inner.settings.connect_timeout
            ))),
        };
        if let Err(e) = &outcome {
            warn!(error = %e, "MQTT connect failed");
            driver.cancel();
            inner.session.write().await.take();
            inner.state.set_error(e.to_string());
        } else {
            info!("connected to MQTT broker");
        }
        outcome
    }

    async fn disconnect(&self) {
        self.inner.state.set_closed();
        if let Some(session) = self.inner.session.write().await.take() {
            if let Err(e) = session.client.disconnect().await {
                debug!(error = %e, "MQTT disconnect request failed");
            }
            session.driver.cancel();
        }
        debug!(broker_id = %self.inner.broker_id, "MQTT connection closed");
    }

    fn status(&self) -> ConnectionStatus {
        self.inner.state.status()
    }

    fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.state.watch()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.state.subscribe()
    }
}

/// Poll the event loop until cancelled. The first CONNACK or error is
/// reported through `first`; later errors are paced by the reconnect
/// policy.
async fn drive(
    inner: Arc<MqttInner>,
    client: AsyncClient,
    mut eventloop: EventLoop,
    cancel: CancellationToken,
    first: oneshot::Sender<Result<(), BrokerError>>,
) {
    let mut first = Some(first);
    let policy = inner.settings.reconnect.clone();
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                inner.state.set_connected();
                if let Some(first) = first.take() {
                    let _ = first.send(Ok(()));
                } else {
                    info!(broker_id = %inner.broker_id, "reconnected to MQTT broker");
                    resubscribe(&inner, &client).await;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = inner.messages.send(MqttMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                    qos: qos_level(publish.qos),
                    retain: publish.retain,
                });
            }
            Ok(other) => {
                inner.state.emit(ConnectionEvent::Debug(format!("{other:?}")));
            }
            Err(e) => {
                if let Some(first) = first.take() {
                    let _ = first.send(Err(BrokerError::Connect(e.to_string())));
                    break;
                }
                warn!(broker_id = %inner.broker_id, error = %e, "MQTT connection error");
                inner.state.set_error(e.to_string());

                let ReconnectStep::Retry { attempt, delay } =
                    inner.state.next_reconnect(&policy, &inner.broker_id)
                else {
                    break;
                };
                debug!(broker_id = %inner.broker_id, attempt, ?delay, "waiting before MQTT reconnect");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                inner.state.set_connecting();
            }
        }
    }
}

async fn resubscribe(inner: &MqttInner, client: &AsyncClient) {
    let filters: Vec<(String, QoS)> = inner
        .subscriptions()
        .iter()
        .map(|(filter, qos)| (filter.clone(), *qos))
        .collect();
    for (filter, qos) in filters {
        if let Err(e) = client.subscribe(filter.as_str(), qos).await {
            warn!(broker_id = %inner.broker_id, filter, error = %e, "resubscribe failed");
        }
    }
}
