use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use courier_core::{ExecutionResult, PayloadFormat, RetryStrategy};
use courier_template::{TemplateContext, TemplateResolver};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::amqp::{AmqpConnection, AmqpMessageOptions, ExchangeType};
use crate::error::BrokerError;
use crate::format::{content_type, format_payload};
use crate::mqtt::{MqttConnection, MqttPublishOptions, validate_qos};
use crate::pool::ConnectionPool;
use crate::transport::{AmqpTransport, MqttTransport};

/// Retry and formatting settings shared by both publishers.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherSettings {
    pub max_retries: u32,
    /// Delay before the first retry; doubles for every further retry.
    pub retry_delay: Duration,
    pub format: PayloadFormat,
    /// Pool key; defaults to the broker URL.
    pub broker_id: Option<String>,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            format: PayloadFormat::Json,
            broker_id: None,
        }
    }
}

impl PublisherSettings {
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: PayloadFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_broker_id(mut self, broker_id: impl Into<String>) -> Self {
        self.broker_id = Some(broker_id.into());
        self
    }

    fn strategy(&self) -> RetryStrategy {
        RetryStrategy::exponential(self.retry_delay, 2.0)
    }
}

/// Per-call publish input.
#[derive(Debug, Clone)]
pub struct PublishRequest<O> {
    pub template_context: TemplateContext,
    /// Replaces the topic/exchange template given at initialization.
    pub override_topic: Option<String>,
    /// Replaces the publisher's default message options.
    pub options: Option<O>,
    /// Stops further retries once cancelled.
    pub cancel: Option<CancellationToken>,
}

impl<O> Default for PublishRequest<O> {
    fn default() -> Self {
        Self {
            template_context: TemplateContext::new(),
            override_topic: None,
            options: None,
            cancel: None,
        }
    }
}

impl<O> PublishRequest<O> {
    pub fn new(template_context: TemplateContext) -> Self {
        Self {
            template_context,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_override_topic(mut self, topic: impl Into<String>) -> Self {
        self.override_topic = Some(topic.into());
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: O) -> Self {
        self.options = Some(options);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Outcome of one publish, including every retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    #[serde(flatten)]
    pub result: ExecutionResult,
    /// Resolved exchange (AMQP) or topic (MQTT).
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    pub message_id: String,
    pub attempts: u32,
}

impl PublishResult {
    pub fn success(&self) -> bool {
        self.result.success
    }

    fn rejected(error: &BrokerError, destination: String, message_id: String, started: Instant) -> Self {
        Self {
            result: ExecutionResult::failed(error.to_string(), started.elapsed()),
            destination,
            routing_key: None,
            message_id,
            attempts: 0,
        }
    }
}

/// Errors that no retry can fix.
fn is_permanent(err: &BrokerError) -> bool {
    matches!(
        err,
        BrokerError::InvalidUrl { .. }
            | BrokerError::InvalidTopic(_)
            | BrokerError::InvalidQos(_)
            | BrokerError::Format(_)
            | BrokerError::Template(_)
            | BrokerError::Closed
            | BrokerError::Cancelled
    )
}

/// Run `attempt_once` up to `max_retries + 1` times, sleeping between
/// failures. Returns the retries consumed and the final outcome.
///
/// A cancelled `cancel` ends the loop before the next attempt.
async fn with_retries<F, Fut>(
    settings: &PublisherSettings,
    destination: &str,
    cancel: &CancellationToken,
    mut attempt_once: F,
) -> (u32, Result<(), BrokerError>)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), BrokerError>>,
{
    let strategy = settings.strategy();
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return (attempt, Err(BrokerError::Cancelled));
        }
        debug!(destination, attempt, "publishing message");
        match attempt_once().await {
            Ok(()) => return (attempt, Ok(())),
            Err(err) if is_permanent(&err) || attempt >= settings.max_retries => {
                return (attempt, Err(err));
            }
            Err(err) => {
                let delay = strategy.delay_for(attempt);
                warn!(destination, attempt, ?delay, error = %err, "publish failed, retrying");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!(destination, attempt, "publish cancelled during backoff");
                        return (attempt, Err(BrokerError::Cancelled));
                    }
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

fn finish(
    outcome: (u32, Result<(), BrokerError>),
    destination: String,
    routing_key: Option<String>,
    message_id: String,
    started: Instant,
) -> PublishResult {
    let (retries, result) = outcome;
    let result = match result {
        Ok(()) => {
            info!(%destination, retries, "message published");
            ExecutionResult::succeeded(started.elapsed())
        }
        Err(err) => {
            warn!(%destination, retries, error = %err, "publish gave up");
            ExecutionResult::failed(err.to_string(), started.elapsed())
        }
    };
    PublishResult {
        result: result.with_retries(retries),
        destination,
        routing_key,
        message_id,
        attempts: retries + 1,
    }
}

/// AMQP publisher options.
#[derive(Debug, Clone)]
pub struct AmqpPublisherOptions {
    /// Routing-key template.
    pub routing_key: String,
    /// Explicit exchange type; inferred from the exchange name otherwise.
    pub exchange_type: Option<ExchangeType>,
    pub durable: bool,
    pub message: AmqpMessageOptions,
    pub settings: PublisherSettings,
}

impl Default for AmqpPublisherOptions {
    fn default() -> Self {
        Self {
            routing_key: String::new(),
            exchange_type: None,
            durable: true,
            message: AmqpMessageOptions::default(),
            settings: PublisherSettings::default(),
        }
    }
}

impl AmqpPublisherOptions {
    #[must_use]
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    #[must_use]
    pub fn with_exchange_type(mut self, kind: ExchangeType) -> Self {
        self.exchange_type = Some(kind);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: PublisherSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Publishes payloads to a templated AMQP exchange through a shared pool.
///
/// Exchange and routing-key templates accept `{context:path}` lookups and
/// get a fresh `{uuid}` on every call.
pub struct AmqpPublisher<C = AmqpConnection> {
    pool: Arc<ConnectionPool<C>>,
    broker_id: String,
    broker_url: String,
    exchange_template: String,
    options: AmqpPublisherOptions,
    resolver: TemplateResolver,
}

impl<C: AmqpTransport> AmqpPublisher<C> {
    pub fn initialize(
        pool: Arc<ConnectionPool<C>>,
        broker_url: impl Into<String>,
        exchange_template: impl Into<String>,
        options: AmqpPublisherOptions,
    ) -> Self {
        let broker_url = broker_url.into();
        let broker_id = options
            .settings
            .broker_id
            .clone()
            .unwrap_or_else(|| broker_url.clone());
        Self {
            pool,
            broker_id,
            broker_url,
            exchange_template: exchange_template.into(),
            options,
            resolver: TemplateResolver::new().with_context_paths().with_fresh_uuid(),
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: TemplateResolver) -> Self {
        self.resolver = resolver.with_context_paths().with_fresh_uuid();
        self
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    #[instrument(skip_all, fields(broker_id = %self.broker_id))]
    pub async fn publish(
        &self,
        payload: &Value,
        request: PublishRequest<AmqpMessageOptions>,
    ) -> PublishResult {
        let started = Instant::now();
        let context = &request.template_context;
        let template = request
            .override_topic
            .as_deref()
            .unwrap_or(&self.exchange_template);

        let mut message = request.options.unwrap_or_else(|| self.options.message.clone());
        let message_id = message
            .message_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let resolved = self.resolver.resolve_static(template, context).and_then(|exchange| {
            let routing_key = self.resolver.resolve_static(&self.options.routing_key, context)?;
            Ok((exchange, routing_key))
        });
        let (exchange, routing_key) = match resolved {
            Ok(pair) => pair,
            Err(e) => {
                let err = BrokerError::Template(e.to_string());
                return PublishResult::rejected(&err, template.to_owned(), message_id, started);
            }
        };

        let format = self.options.settings.format;
        let body = match format_payload(payload, format) {
            Ok(body) => body,
            Err(err) => return PublishResult::rejected(&err, exchange, message_id, started),
        };

        message.message_id = Some(message_id.clone());
        message
            .content_type
            .get_or_insert_with(|| content_type(format).to_owned());
        message
            .timestamp
            .get_or_insert_with(|| u64::try_from(Utc::now().timestamp()).unwrap_or_default());

        let kind = self
            .options
            .exchange_type
            .unwrap_or_else(|| ExchangeType::infer(&exchange));

        let cancel = request.cancel.unwrap_or_default();
        let outcome = with_retries(&self.options.settings, &exchange, &cancel, || {
            self.attempt(&exchange, kind, &routing_key, &body, &message)
        })
        .await;
        finish(outcome, exchange.clone(), Some(routing_key.clone()), message_id, started)
    }

    async fn attempt(
        &self,
        exchange: &str,
        kind: ExchangeType,
        routing_key: &str,
        body: &[u8],
        message: &AmqpMessageOptions,
    ) -> Result<(), BrokerError> {
        let conn = self.pool.acquire(&self.broker_id, &self.broker_url).await?;
        conn.declare_exchange(exchange, kind, self.options.durable).await?;
        if conn.publish(exchange, routing_key, body, message).await? {
            Ok(())
        } else {
            Err(BrokerError::Publish("broker nacked message".into()))
        }
    }
}

/// MQTT publisher options.
#[derive(Debug, Clone, Default)]
pub struct MqttPublisherOptions {
    pub qos: u8,
    pub retain: bool,
    pub settings: PublisherSettings,
}

impl MqttPublisherOptions {
    #[must_use]
    pub fn with_qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: PublisherSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Publishes payloads to a templated MQTT topic through a shared pool.
pub struct MqttPublisher<C = MqttConnection> {
    pool: Arc<ConnectionPool<C>>,
    broker_id: String,
    broker_url: String,
    topic_template: String,
    options: MqttPublisherOptions,
    resolver: TemplateResolver,
}

impl<C: MqttTransport> MqttPublisher<C> {
    pub fn initialize(
        pool: Arc<ConnectionPool<C>>,
        broker_url: impl Into<String>,
        topic_template: impl Into<String>,
        options: MqttPublisherOptions,
    ) -> Self {
        let broker_url = broker_url.into();
        let broker_id = options
            .settings
            .broker_id
            .clone()
            .unwrap_or_else(|| broker_url.clone());
        Self {
            pool,
            broker_id,
            broker_url,
            topic_template: topic_template.into(),
            options,
            resolver: TemplateResolver::new(),
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: TemplateResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    #[instrument(skip_all, fields(broker_id = %self.broker_id))]
    pub async fn publish(
        &self,
        payload: &Value,
        request: PublishRequest<MqttPublishOptions>,
    ) -> PublishResult {
        let started = Instant::now();
        let message_id = Uuid::new_v4().to_string();
        let template = request
            .override_topic
            .as_deref()
            .unwrap_or(&self.topic_template);

        let topic = match self.resolver.resolve_static(template, &request.template_context) {
            Ok(topic) => topic,
            Err(e) => {
                let err = BrokerError::Template(e.to_string());
                return PublishResult::rejected(&err, template.to_owned(), message_id, started);
            }
        };

        let options = request.options.unwrap_or(MqttPublishOptions {
            qos: self.options.qos,
            retain: self.options.retain,
            dup: false,
        });
        if let Err(err) = validate_qos(options.qos) {
            return PublishResult::rejected(&err, topic, message_id, started);
        }

        let body = match format_payload(payload, self.options.settings.format) {
            Ok(body) => body,
            Err(err) => return PublishResult::rejected(&err, topic, message_id, started),
        };

        let cancel = request.cancel.unwrap_or_default();
        let outcome = with_retries(&self.options.settings, &topic, &cancel, || {
            self.attempt(&topic, &body, options)
        })
        .await;
        finish(outcome, topic.clone(), None, message_id, started)
    }

    async fn attempt(
        &self,
        topic: &str,
        body: &[u8],
        options: MqttPublishOptions,
    ) -> Result<(), BrokerError> {
        let conn = self.pool.acquire(&self.broker_id, &self.broker_url).await?;
        conn.validate_topic(topic)?;
        conn.publish(topic, body.to_vec(), options).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::pool::tests::FakeConnection;
    use crate::pool::{ConnectionFactory, PoolSettings};

    #[async_trait]
    impl AmqpTransport for FakeConnection {
        async fn declare_exchange(
            &self,
            _exchange: &str,
            _kind: ExchangeType,
            _durable: bool,
        ) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn publish(
            &self,
            exchange: &str,
            routing_key: &str,
            payload: &[u8],
            _options: &AmqpMessageOptions,
        ) -> Result<bool, BrokerError> {
            self.publish_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(BrokerError::Publish("channel closed".into()));
            }
            self.published.lock().unwrap().push((
                exchange.to_owned(),
                Some(routing_key.to_owned()),
                payload.to_vec(),
            ));
            Ok(true)
        }
    }

    #[async_trait]
    impl MqttTransport for FakeConnection {
        async fn publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
            _options: MqttPublishOptions,
        ) -> Result<(), BrokerError> {
            self.publish_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(BrokerError::Publish("not acknowledged".into()));
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_owned(), None, payload));
            Ok(())
        }
    }

    fn pool(fail_publish: bool) -> Arc<ConnectionPool<FakeConnection>> {
        let factory: ConnectionFactory<FakeConnection> = Arc::new(move |id: &str, url: &str| {
            let conn = FakeConnection::new(id, url, false);
            conn.fail_publish.store(fail_publish, Ordering::SeqCst);
            Arc::new(conn)
        });
        Arc::new(ConnectionPool::new(PoolSettings::default(), factory))
    }

    #[tokio::test]
    async fn always_failing_publish_uses_every_retry() {
        tokio::time::pause();
        let pool = pool(true);
        let publisher = AmqpPublisher::initialize(
            Arc::clone(&pool),
            "amqp://broker",
            "events",
            AmqpPublisherOptions::default()
                .with_settings(PublisherSettings::default().with_max_retries(2)),
        );

        let result = publisher.publish(&json!({"a": 1}), PublishRequest::default()).await;

        assert!(!result.success());
        assert_eq!(result.result.retries, Some(2));
        assert_eq!(result.attempts, 3);
        let conn = pool.get("amqp://broker").unwrap();
        assert_eq!(conn.publish_calls.load(Ordering::SeqCst), 3);
        assert!(result.result.error.unwrap().contains("channel closed"));
    }

    #[tokio::test]
    async fn cancellation_stops_retrying_during_backoff() {
        tokio::time::pause();
        let pool = pool(true);
        let publisher = MqttPublisher::initialize(
            Arc::clone(&pool),
            "mqtt://broker",
            "a/b",
            MqttPublisherOptions::default()
                .with_settings(PublisherSettings::default().with_max_retries(5)),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let request = PublishRequest::default().with_cancellation(cancel);
        let result = publisher.publish(&json!({}), request).await;

        assert!(!result.success());
        assert_eq!(result.result.error.as_deref(), Some("publish cancelled"));
        assert_eq!(result.attempts, 1);
        let conn = pool.get("mqtt://broker").unwrap();
        assert_eq!(conn.publish_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn amqp_resolves_exchange_and_routing_key() {
        let pool = pool(false);
        let publisher = AmqpPublisher::initialize(
            Arc::clone(&pool),
            "amqp://broker",
            "orders.{region}",
            AmqpPublisherOptions::default()
                .with_routing_key("order.{context:order.status}")
                .with_settings(PublisherSettings::default().with_broker_id("main")),
        );
        let context = TemplateContext::new()
            .with("region", "eu")
            .with("order", json!({"status": "paid"}));

        let result = publisher
            .publish(&json!({"id": 7}), PublishRequest::new(context))
            .await;

        assert!(result.success(), "{result:?}");
        assert_eq!(result.result.retries, Some(0));
        assert_eq!(result.destination, "orders.eu");
        assert_eq!(result.routing_key.as_deref(), Some("order.paid"));
        let conn = pool.get("main").unwrap();
        let published = conn.published.lock().unwrap();
        assert_eq!(
            published[0],
            ("orders.eu".into(), Some("order.paid".into()), br#"{"id":7}"#.to_vec())
        );
    }

    #[tokio::test]
    async fn mqtt_override_topic_and_text_format() {
        let pool = pool(false);
        let publisher = MqttPublisher::initialize(
            Arc::clone(&pool),
            "mqtt://broker",
            "devices/{device}/events",
            MqttPublisherOptions::default().with_qos(1).with_settings(
                PublisherSettings::default().with_format(PayloadFormat::Text),
            ),
        );

        let request = PublishRequest::new(TemplateContext::new().with("device", "d1"))
            .with_override_topic("alerts/{device}");
        let result = publisher.publish(&json!("hello"), request).await;

        assert!(result.success());
        assert_eq!(result.destination, "alerts/d1");
        let conn = pool.get("mqtt://broker").unwrap();
        assert_eq!(conn.published.lock().unwrap()[0].2, b"hello");
    }

    #[tokio::test]
    async fn invalid_topic_is_not_retried() {
        let pool = pool(false);
        let publisher = MqttPublisher::initialize(
            Arc::clone(&pool),
            "mqtt://broker",
            "$SYS/{device}",
            MqttPublisherOptions::default(),
        );

        let result = publisher
            .publish(
                &json!({}),
                PublishRequest::new(TemplateContext::new().with("device", "d1")),
            )
            .await;

        assert!(!result.success());
        assert_eq!(result.attempts, 1);
        assert_eq!(pool.get("mqtt://broker").unwrap().publish_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_qos_is_rejected_before_connecting() {
        let pool = pool(false);
        let publisher = MqttPublisher::initialize(
            Arc::clone(&pool),
            "mqtt://broker",
            "a/b",
            MqttPublisherOptions::default().with_qos(5),
        );

        let result = publisher.publish(&json!({}), PublishRequest::default()).await;

        assert!(!result.success());
        assert_eq!(result.attempts, 0);
        assert_eq!(pool.stats().active, 0);
    }
}
