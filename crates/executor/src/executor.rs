use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_broker::{
    AmqpConnection, AmqpPublisher, AmqpPublisherOptions, AmqpTransport, ConnectionPool,
    ExchangeType, MqttConnection, MqttPublisher, MqttPublisherOptions, MqttTransport,
    PublishRequest, PublisherSettings,
};
use courier_core::{
    Action, ActionKind, ActionPayload, ActionResult, AmqpPublishConfig, EmailConfig,
    ExecutionResult, HttpPostConfig, MqttPublishConfig, PayloadFormat, ServiceCredential,
    SlackConfig, ValidationError,
};
use courier_crypto::{ExposeSecret, SecretVault};
use courier_http::truncate_body;
use courier_template::{TemplateContext, TemplateResolver};
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ExecutorConfig;
use crate::error::ExecutorError;
use crate::signing::{DEFAULT_SIGNATURE_HEADER, sign_body};

/// Header carrying a service credential when its metadata names none.
const DEFAULT_CREDENTIAL_HEADER: &str = "Authorization";

/// Runs one [`Action`] against its transport under the action's deadline.
///
/// Every outcome, including timeouts, non-2xx responses, and unreachable
/// brokers, is reported as an [`ActionResult`]; nothing is raised to the
/// caller. At most [`ExecutorConfig::max_concurrent`] dispatches run at
/// once.
///
/// `A` and `M` are the connection types behind the AMQP and MQTT pools.
pub struct ActionExecutor<A = AmqpConnection, M = MqttConnection> {
    config: ExecutorConfig,
    vault: Arc<SecretVault>,
    client: Client,
    resolver: TemplateResolver,
    semaphore: Arc<Semaphore>,
    amqp: Option<Arc<ConnectionPool<A>>>,
    mqtt: Option<Arc<ConnectionPool<M>>>,
}

impl<A, M> std::fmt::Debug for ActionExecutor<A, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("config", &self.config)
            .field("vault_configured", &self.vault.is_configured())
            .field("amqp", &self.amqp.is_some())
            .field("mqtt", &self.mqtt.is_some())
            .finish_non_exhaustive()
    }
}

impl ActionExecutor {
    /// Create an executor. Broker actions fail until pools are attached
    /// with [`with_amqp_pool`](Self::with_amqp_pool) /
    /// [`with_mqtt_pool`](Self::with_mqtt_pool).
    pub fn new(config: ExecutorConfig, vault: Arc<SecretVault>) -> Result<Self, ExecutorError> {
        let client = Client::builder().user_agent(&config.user_agent).build()?;
        Ok(Self::with_client(config, vault, client))
    }

    /// Create an executor around an existing HTTP client.
    pub fn with_client(config: ExecutorConfig, vault: Arc<SecretVault>, client: Client) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            vault,
            client,
            resolver: TemplateResolver::new(),
            semaphore,
            amqp: None,
            mqtt: None,
        }
    }
}

impl<A, M> ActionExecutor<A, M> {
    /// Route `AMQP_PUBLISH` actions through `pool`.
    #[must_use]
    pub fn with_amqp_pool<P>(self, pool: Arc<ConnectionPool<P>>) -> ActionExecutor<P, M> {
        ActionExecutor {
            config: self.config,
            vault: self.vault,
            client: self.client,
            resolver: self.resolver,
            semaphore: self.semaphore,
            amqp: Some(pool),
            mqtt: self.mqtt,
        }
    }

    /// Route `MQTT_PUBLISH` actions through `pool`.
    #[must_use]
    pub fn with_mqtt_pool<P>(self, pool: Arc<ConnectionPool<P>>) -> ActionExecutor<A, P> {
        ActionExecutor {
            config: self.config,
            vault: self.vault,
            client: self.client,
            resolver: self.resolver,
            semaphore: self.semaphore,
            amqp: self.amqp,
            mqtt: Some(pool),
        }
    }

    /// Replace the resolver used for Slack messages and email bodies.
    #[must_use]
    pub fn with_resolver(mut self, resolver: TemplateResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Build an action from wire parts, applying
    /// [`ExecutorConfig::default_timeout_ms`] when the config carries no
    /// `timeoutMs`.
    pub fn build_action(&self, action_type: &str, config: Value) -> Result<Action, ValidationError> {
        let explicit = ["timeoutMs", "timeout_ms"]
            .iter()
            .any(|key| config.get(key).is_some_and(|v| !v.is_null()));
        let action = Action::from_parts(action_type, config)?;
        Ok(if explicit {
            action
        } else {
            action.with_timeout_ms(self.config.default_timeout_ms)
        })
    }
}

impl<A: AmqpTransport, M: MqttTransport> ActionExecutor<A, M> {
    /// Dispatch `action` with a fresh cancellation scope.
    pub async fn execute_action(
        &self,
        action: &Action,
        payload: &ActionPayload,
        credential: Option<&ServiceCredential>,
    ) -> ActionResult {
        self.execute_action_cancellable(action, payload, credential, &CancellationToken::new())
            .await
    }

    /// Dispatch `action`, abandoning it when the deadline passes or `cancel`
    /// fires.
    ///
    /// The deadline covers the wait for a concurrency slot as well as the
    /// dispatch itself. The in-flight request is dropped on either event. A
    /// deadline is reported as `"Timeout after <ms>ms"`.
    #[instrument(
        skip(self, action, payload, credential, cancel),
        fields(action_type = action.type_name(), timeout_ms = action.timeout_ms)
    )]
    pub async fn execute_action_cancellable(
        &self,
        action: &Action,
        payload: &ActionPayload,
        credential: Option<&ServiceCredential>,
        cancel: &CancellationToken,
    ) -> ActionResult {
        let started = Instant::now();
        let timeout_ms = action.timeout_ms;
        // Armed before the permit wait.
        let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
        let scope = cancel.child_token();

        let run = async {
            let Ok(_permit) = self.semaphore.acquire().await else {
                return Ok::<_, ExecutorError>(ExecutionResult::failed(
                    "executor is shut down",
                    started.elapsed(),
                ));
            };
            self.dispatch(action, payload, credential, &scope, started).await
        };
        let result = tokio::select! {
            biased;
            () = scope.cancelled() => {
                ExecutionResult::failed("Execution cancelled", started.elapsed())
            }
            () = deadline => {
                scope.cancel();
                warn!("action deadline reached, request aborted");
                ExecutionResult::timed_out(timeout_ms, started.elapsed())
            }
            result = run => match result {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "action failed before completing");
                    ExecutionResult::failed(e.to_string(), started.elapsed())
                }
            },
        };

        if result.success {
            info!(duration_ms = result.duration_ms, "action executed");
        } else {
            debug!(error = ?result.error, duration_ms = result.duration_ms, "action did not succeed");
        }
        result
    }

    async fn dispatch(
        &self,
        action: &Action,
        payload: &ActionPayload,
        credential: Option<&ServiceCredential>,
        scope: &CancellationToken,
        started: Instant,
    ) -> Result<ExecutionResult, ExecutorError> {
        match &action.kind {
            ActionKind::HttpPost(config) => self.http_post(config, payload, credential, started).await,
            ActionKind::Slack(config) => self.slack(config, payload, credential, started).await,
            ActionKind::Email(config) => self.email(config, payload, credential, started).await,
            ActionKind::Store => Ok(ExecutionResult::succeeded(started.elapsed())),
            ActionKind::AmqpPublish(config) => self.amqp_publish(config, payload, scope).await,
            ActionKind::MqttPublish(config) => self.mqtt_publish(config, payload, scope).await,
            ActionKind::Unsupported { action_type } => Ok(ExecutionResult::failed(
                format!("Unsupported action type {action_type}"),
                started.elapsed(),
            )),
        }
    }

    fn reveal(&self, credential: &ServiceCredential) -> Result<String, ExecutorError> {
        let secret = self.vault.decrypt(&credential.secret)?;
        Ok(secret.expose_secret().clone())
    }

    async fn http_post(
        &self,
        config: &HttpPostConfig,
        payload: &ActionPayload,
        credential: Option<&ServiceCredential>,
        started: Instant,
    ) -> Result<ExecutionResult, ExecutorError> {
        let body = payload.raw_body();
        let mut request = self
            .client
            .post(&config.url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, &self.config.user_agent);
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }

        if let Some(secret) = &config.hmac_secret {
            let header = config
                .hmac_header
                .as_deref()
                .unwrap_or(DEFAULT_SIGNATURE_HEADER);
            request = request.header(header, sign_body(secret, body.as_bytes()));
        }

        if let Some(credential) = credential {
            let secret = self.reveal(credential)?;
            let header = credential
                .meta_str("header")
                .unwrap_or(DEFAULT_CREDENTIAL_HEADER);
            let prefix = credential.meta_str("prefix").unwrap_or(
                if header.eq_ignore_ascii_case(DEFAULT_CREDENTIAL_HEADER) {
                    "Bearer"
                } else {
                    ""
                },
            );
            let value = if prefix.is_empty() {
                secret
            } else {
                format!("{prefix} {secret}")
            };
            request = request.header(header, value);
        }

        debug!(url = %config.url, bytes = body.len(), "posting callback");
        let response = request.body(body.to_owned()).send().await?;
        Ok(into_result(response, started).await)
    }

    async fn slack(
        &self,
        config: &SlackConfig,
        payload: &ActionPayload,
        credential: Option<&ServiceCredential>,
        started: Instant,
    ) -> Result<ExecutionResult, ExecutorError> {
        let webhook_url = match (&config.webhook_url, credential) {
            (Some(url), _) => url.clone(),
            (None, Some(credential)) => self.reveal(credential)?,
            (None, None) => return Err(ExecutorError::MissingCredential("SLACK")),
        };

        let context = TemplateContext::from(payload.template_variables());
        let text = match &config.message {
            Some(template) => self.resolver.resolve_template(template, &context).await?,
            None => dump(&payload.body_value()),
        };

        let response = self
            .client
            .post(&webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await?;
        Ok(into_result(response, started).await)
    }

    async fn email(
        &self,
        config: &EmailConfig,
        payload: &ActionPayload,
        credential: Option<&ServiceCredential>,
        started: Instant,
    ) -> Result<ExecutionResult, ExecutorError> {
        let credential = credential.ok_or(ExecutorError::MissingCredential("EMAIL"))?;
        let recipients = config.to.to_vec();
        if recipients.is_empty() {
            return Err(ValidationError::MissingField {
                action_type: "EMAIL",
                field: "to",
            }
            .into());
        }
        if config.subject.trim().is_empty() {
            return Err(ValidationError::MissingField {
                action_type: "EMAIL",
                field: "subject",
            }
            .into());
        }
        let api_key = self.reveal(credential)?;

        let context = TemplateContext::from(payload.template_variables());
        let subject = self.resolver.resolve_template(&config.subject, &context).await?;
        let content = match &config.template {
            Some(template) => self.resolver.resolve_template(template, &context).await?,
            None => dump(&payload.body_value()),
        };
        let content_type = if content.trim_start().starts_with('<') {
            "text/html"
        } else {
            "text/plain"
        };
        let from = config
            .from
            .as_deref()
            .or_else(|| credential.meta_str("from"))
            .unwrap_or(&self.config.email_from);

        let message = json!({
            "personalizations": [{
                "to": recipients.iter().map(|email| json!({ "email": email })).collect::<Vec<_>>(),
            }],
            "from": { "email": from },
            "subject": subject,
            "content": [{ "type": content_type, "value": content }],
        });

        debug!(recipients = recipients.len(), "sending email");
        let response = self
            .client
            .post(&self.config.email_api_url)
            .bearer_auth(api_key)
            .json(&message)
            .send()
            .await?;
        Ok(into_result(response, started).await)
    }

    fn publisher_settings(&self, broker_id: &str, format: PayloadFormat) -> PublisherSettings {
        PublisherSettings::default()
            .with_broker_id(broker_id)
            .with_format(format)
            .with_max_retries(self.config.broker_max_retries)
            .with_retry_delay(self.config.broker_retry_delay())
    }

    async fn amqp_publish(
        &self,
        config: &AmqpPublishConfig,
        payload: &ActionPayload,
        scope: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutorError> {
        let pool = self
            .amqp
            .as_ref()
            .ok_or(ExecutorError::BrokerUnavailable("AMQP"))?;
        let kind = ExchangeType::resolve(config.exchange_type.as_deref(), &config.exchange);
        let publisher = AmqpPublisher::initialize(
            Arc::clone(pool),
            config.broker_url.clone(),
            config.exchange.clone(),
            AmqpPublisherOptions::default()
                .with_routing_key(config.routing_key.clone())
                .with_exchange_type(kind)
                .with_settings(self.publisher_settings(config.broker_id(), config.format)),
        );
        let request = PublishRequest::new(TemplateContext::from(payload.template_variables()))
            .with_cancellation(scope.clone());
        Ok(publisher.publish(&payload.body_value(), request).await.result)
    }

    async fn mqtt_publish(
        &self,
        config: &MqttPublishConfig,
        payload: &ActionPayload,
        scope: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutorError> {
        let pool = self
            .mqtt
            .as_ref()
            .ok_or(ExecutorError::BrokerUnavailable("MQTT"))?;
        let publisher = MqttPublisher::initialize(
            Arc::clone(pool),
            config.broker_url.clone(),
            config.topic.clone(),
            MqttPublisherOptions::default()
                .with_qos(config.qos)
                .with_retain(config.retain)
                .with_settings(self.publisher_settings(config.broker_id(), config.format)),
        );
        let request = PublishRequest::new(TemplateContext::from(payload.template_variables()))
            .with_cancellation(scope.clone());
        Ok(publisher.publish(&payload.body_value(), request).await.result)
    }
}

/// Default message text: the payload pretty-printed.
fn dump(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

async fn into_result(response: reqwest::Response, started: Instant) -> ExecutionResult {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => truncate_body(&body),
        Err(e) => {
            warn!(error = %e, "failed to read response body");
            String::new()
        }
    };

    let result = if status.is_success() {
        ExecutionResult::succeeded(started.elapsed())
    } else {
        ExecutionResult::failed(
            format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ),
            started.elapsed(),
        )
    };
    let result = result.with_status(status.as_u16());
    if body.is_empty() {
        result
    } else {
        result.with_body(body)
    }
}
