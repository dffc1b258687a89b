use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Timeout applied when an action config carries no `timeoutMs`.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Transport discriminator of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    HttpPost,
    Slack,
    Email,
    Store,
    AmqpPublish,
    MqttPublish,
}

impl ActionType {
    pub const ALL: [Self; 6] = [
        Self::HttpPost,
        Self::Slack,
        Self::Email,
        Self::Store,
        Self::AmqpPublish,
        Self::MqttPublish,
    ];

    /// Returns the wire name of the action type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HttpPost => "HTTP_POST",
            Self::Slack => "SLACK",
            Self::Email => "EMAIL",
            Self::Store => "STORE",
            Self::AmqpPublish => "AMQP_PUBLISH",
            Self::MqttPublish => "MQTT_PUBLISH",
        }
    }

    /// Case-insensitive lookup by wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialization format of a broker message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    #[serde(alias = "JSON")]
    Json,
    #[serde(alias = "TEXT")]
    Text,
    #[serde(alias = "XML")]
    Xml,
}

/// `HTTP_POST` config: a one-shot signed callback.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct HttpPostConfig {
    /// Target URL.
    #[serde(default, alias = "callbackUrl", alias = "callback_url")]
    pub url: String,
    /// Extra request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// When set, the raw body is signed with HMAC-SHA256.
    #[serde(default, alias = "hmacSecret", skip_serializing_if = "Option::is_none")]
    pub hmac_secret: Option<String>,
    /// Header carrying the signature. Defaults to `X-Signature`.
    #[serde(default, alias = "hmacHeader", skip_serializing_if = "Option::is_none")]
    pub hmac_header: Option<String>,
}

impl std::fmt::Debug for HttpPostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPostConfig")
            .field("url", &self.url)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("hmac_secret", &self.hmac_secret.as_ref().map(|_| "[REDACTED]"))
            .field("hmac_header", &self.hmac_header)
            .finish()
    }
}

/// `SLACK` config: an incoming-webhook post.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Incoming-webhook URL. When absent, the decrypted service credential
    /// is used instead.
    #[serde(default, alias = "webhookUrl", skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Message text. Defaults to a dump of the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("webhook_url", &self.webhook_url.as_ref().map(|_| "[REDACTED]"))
            .field("message", &self.message)
            .finish()
    }
}

/// One or several recipient addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    /// A single address, or a comma-separated list.
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    /// Flatten into trimmed, non-empty addresses.
    pub fn to_vec(&self) -> Vec<String> {
        let split = |s: &str| -> Vec<String> {
            s.split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        };
        match self {
            Self::One(s) => split(s),
            Self::Many(list) => list.iter().flat_map(|s| split(s)).collect(),
        }
    }
}

impl Default for Recipients {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

/// `EMAIL` config: a transactional email-provider call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub to: Recipients,
    #[serde(default)]
    pub subject: String,
    /// Body template rendered against the payload variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Sender override; falls back to the credential's `from` metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// `AMQP_PUBLISH` config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AmqpPublishConfig {
    #[serde(default, alias = "brokerUrl")]
    pub broker_url: String,
    /// Pool key; defaults to the broker URL.
    #[serde(default, alias = "brokerId", skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<String>,
    /// Exchange name template.
    #[serde(default)]
    pub exchange: String,
    /// Routing-key template.
    #[serde(default, alias = "routingKey")]
    pub routing_key: String,
    /// Explicit exchange type (`direct`, `topic`, `fanout`, `headers`).
    /// When absent the type is inferred from the exchange name.
    #[serde(default, alias = "exchangeType", skip_serializing_if = "Option::is_none")]
    pub exchange_type: Option<String>,
    #[serde(default)]
    pub format: PayloadFormat,
}

impl AmqpPublishConfig {
    pub fn broker_id(&self) -> &str {
        self.broker_id.as_deref().unwrap_or(&self.broker_url)
    }
}

/// `MQTT_PUBLISH` config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MqttPublishConfig {
    #[serde(default, alias = "brokerUrl")]
    pub broker_url: String,
    /// Pool key; defaults to the broker URL.
    #[serde(default, alias = "brokerId", skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<String>,
    /// Topic template.
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub format: PayloadFormat,
}

impl MqttPublishConfig {
    pub fn broker_id(&self) -> &str {
        self.broker_id.as_deref().unwrap_or(&self.broker_url)
    }
}

/// Typed, per-transport action configuration.
#[derive(Debug, Clone)]
pub enum ActionKind {
    HttpPost(HttpPostConfig),
    Slack(SlackConfig),
    Email(EmailConfig),
    /// The caller persists the payload itself.
    Store,
    AmqpPublish(AmqpPublishConfig),
    MqttPublish(MqttPublishConfig),
    /// An action type this engine does not know. Kept so the executor can
    /// report it as a structured failure instead of rejecting the call.
    Unsupported { action_type: String },
}

impl ActionKind {
    /// Wire name of the action type.
    pub fn type_name(&self) -> &str {
        match self {
            Self::HttpPost(_) => ActionType::HttpPost.as_str(),
            Self::Slack(_) => ActionType::Slack.as_str(),
            Self::Email(_) => ActionType::Email.as_str(),
            Self::Store => ActionType::Store.as_str(),
            Self::AmqpPublish(_) => ActionType::AmqpPublish.as_str(),
            Self::MqttPublish(_) => ActionType::MqttPublish.as_str(),
            Self::Unsupported { action_type } => action_type,
        }
    }

    fn config_value(&self) -> serde_json::Value {
        let value = match self {
            Self::HttpPost(c) => serde_json::to_value(c),
            Self::Slack(c) => serde_json::to_value(c),
            Self::Email(c) => serde_json::to_value(c),
            Self::AmqpPublish(c) => serde_json::to_value(c),
            Self::MqttPublish(c) => serde_json::to_value(c),
            Self::Store | Self::Unsupported { .. } => Ok(serde_json::json!({})),
        };
        value.unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// One outbound delivery: typed transport config plus a hard timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawAction", into = "RawAction")]
pub struct Action {
    pub kind: ActionKind,
    pub timeout_ms: u64,
}

/// Wire shape: `{ "type": "...", "config": { ..., "timeoutMs": n } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAction {
    #[serde(rename = "type")]
    action_type: String,
    #[serde(default)]
    config: serde_json::Value,
}

impl TryFrom<RawAction> for Action {
    type Error = ValidationError;

    fn try_from(raw: RawAction) -> Result<Self, Self::Error> {
        Self::from_parts(&raw.action_type, raw.config)
    }
}

impl From<Action> for RawAction {
    fn from(action: Action) -> Self {
        let mut config = action.kind.config_value();
        if let Some(map) = config.as_object_mut() {
            map.insert("timeoutMs".into(), action.timeout_ms.into());
        }
        Self {
            action_type: action.kind.type_name().to_owned(),
            config,
        }
    }
}

impl Action {
    /// Create an action with the default timeout. The config is validated.
    pub fn new(kind: ActionKind) -> Result<Self, ValidationError> {
        validate_kind(&kind)?;
        Ok(Self {
            kind,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        })
    }

    /// Override the timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms.max(1);
        self
    }

    /// Build an action from its wire parts: a type name and an untyped
    /// config map. Unknown type names produce [`ActionKind::Unsupported`];
    /// known types are decoded and validated here, once.
    pub fn from_parts(action_type: &str, config: serde_json::Value) -> Result<Self, ValidationError> {
        let config = match config {
            serde_json::Value::Null => serde_json::json!({}),
            serde_json::Value::Object(_) => config,
            other => {
                return Err(ValidationError::invalid(
                    "config",
                    format!("expected an object, got {other}"),
                ));
            }
        };
        let timeout_ms = read_timeout(&config)?;

        let kind = match ActionType::parse(action_type) {
            None => ActionKind::Unsupported {
                action_type: action_type.to_owned(),
            },
            Some(ActionType::HttpPost) => ActionKind::HttpPost(decode(ActionType::HttpPost, config)?),
            Some(ActionType::Slack) => ActionKind::Slack(decode(ActionType::Slack, config)?),
            Some(ActionType::Email) => ActionKind::Email(decode(ActionType::Email, config)?),
            Some(ActionType::Store) => ActionKind::Store,
            Some(ActionType::AmqpPublish) => {
                ActionKind::AmqpPublish(decode(ActionType::AmqpPublish, config)?)
            }
            Some(ActionType::MqttPublish) => {
                ActionKind::MqttPublish(decode(ActionType::MqttPublish, config)?)
            }
        };

        validate_kind(&kind)?;
        Ok(Self { kind, timeout_ms })
    }

    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }
}

fn read_timeout(config: &serde_json::Value) -> Result<u64, ValidationError> {
    let raw = config.get("timeoutMs").or_else(|| config.get("timeout_ms"));
    match raw {
        None | Some(serde_json::Value::Null) => Ok(DEFAULT_TIMEOUT_MS),
        Some(value) => match value.as_u64() {
            Some(0) | None => Err(ValidationError::invalid(
                "timeoutMs",
                format!("expected a positive integer, got {value}"),
            )),
            Some(ms) => Ok(ms),
        },
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    action_type: ActionType,
    config: serde_json::Value,
) -> Result<T, ValidationError> {
    serde_json::from_value(config).map_err(|e| ValidationError::InvalidConfig {
        action_type: action_type.as_str(),
        reason: e.to_string(),
    })
}

fn require(action_type: ActionType, field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::missing(action_type.as_str(), field))
    } else {
        Ok(())
    }
}

fn require_scheme(field: &'static str, url: &str, schemes: &[&str]) -> Result<(), ValidationError> {
    let scheme = url.split_once("://").map(|(s, _)| s.to_ascii_lowercase());
    match scheme {
        Some(s) if schemes.contains(&s.as_str()) => Ok(()),
        _ => Err(ValidationError::invalid(
            field,
            format!("`{url}` must use one of: {}", schemes.join(", ")),
        )),
    }
}

fn validate_kind(kind: &ActionKind) -> Result<(), ValidationError> {
    match kind {
        ActionKind::HttpPost(c) => {
            require(ActionType::HttpPost, "url", &c.url)?;
            require_scheme("url", &c.url, &["http", "https"])
        }
        ActionKind::Slack(c) => match &c.webhook_url {
            Some(url) => require_scheme("webhookUrl", url, &["http", "https"]),
            None => Ok(()),
        },
        ActionKind::Email(c) => {
            if c.to.to_vec().is_empty() {
                return Err(ValidationError::missing(ActionType::Email.as_str(), "to"));
            }
            require(ActionType::Email, "subject", &c.subject)
        }
        ActionKind::AmqpPublish(c) => {
            require(ActionType::AmqpPublish, "brokerUrl", &c.broker_url)?;
            require_scheme("brokerUrl", &c.broker_url, &["amqp", "amqps"])?;
            require(ActionType::AmqpPublish, "exchange", &c.exchange)
        }
        ActionKind::MqttPublish(c) => {
            require(ActionType::MqttPublish, "brokerUrl", &c.broker_url)?;
            require_scheme("brokerUrl", &c.broker_url, &["mqtt", "mqtts", "ws", "wss"])?;
            require(ActionType::MqttPublish, "topic", &c.topic)?;
            if c.qos > 2 {
                return Err(ValidationError::invalid(
                    "qos",
                    format!("must be 0, 1 or 2, got {}", c.qos),
                ));
            }
            Ok(())
        }
        ActionKind::Store | ActionKind::Unsupported { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn http_post_accepts_callback_url_alias() {
        let action = Action::from_parts(
            "HTTP_POST",
            json!({"callbackUrl": "https://example.com/hook", "hmacSecret": "s"}),
        )
        .unwrap();
        let ActionKind::HttpPost(config) = &action.kind else {
            panic!("expected HttpPost, got {:?}", action.kind);
        };
        assert_eq!(config.url, "https://example.com/hook");
        assert_eq!(config.hmac_secret.as_deref(), Some("s"));
        assert_eq!(action.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn timeout_is_read_from_config() {
        let action = Action::from_parts(
            "HTTP_POST",
            json!({"url": "http://localhost", "timeoutMs": 50}),
        )
        .unwrap();
        assert_eq!(action.timeout_ms, 50);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = Action::from_parts("STORE", json!({"timeoutMs": 0})).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "timeoutMs", .. }));
    }

    #[test]
    fn missing_url_is_a_validation_error() {
        let err = Action::from_parts("HTTP_POST", json!({})).unwrap_err();
        assert_eq!(err, ValidationError::missing("HTTP_POST", "url"));
    }

    #[test]
    fn email_requires_to_and_subject() {
        let err = Action::from_parts("EMAIL", json!({"subject": "hi"})).unwrap_err();
        assert_eq!(err, ValidationError::missing("EMAIL", "to"));

        let err = Action::from_parts("EMAIL", json!({"to": "a@example.com"})).unwrap_err();
        assert_eq!(err, ValidationError::missing("EMAIL", "subject"));

        let action = Action::from_parts(
            "EMAIL",
            json!({"to": "a@example.com, b@example.com", "subject": "hi"}),
        )
        .unwrap();
        let ActionKind::Email(config) = action.kind else {
            panic!("expected Email");
        };
        assert_eq!(config.to.to_vec(), vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn mqtt_rejects_bad_qos_and_scheme() {
        let err = Action::from_parts(
            "MQTT_PUBLISH",
            json!({"brokerUrl": "mqtt://localhost", "topic": "t", "qos": 3}),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "qos", .. }));

        let err = Action::from_parts(
            "MQTT_PUBLISH",
            json!({"brokerUrl": "amqp://localhost", "topic": "t"}),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "brokerUrl", .. }));
    }

    #[test]
    fn amqp_broker_id_defaults_to_url() {
        let action = Action::from_parts(
            "AMQP_PUBLISH",
            json!({"brokerUrl": "amqp://localhost", "exchange": "events", "routingKey": "a.b"}),
        )
        .unwrap();
        let ActionKind::AmqpPublish(config) = action.kind else {
            panic!("expected AmqpPublish");
        };
        assert_eq!(config.broker_id(), "amqp://localhost");
        assert_eq!(config.routing_key, "a.b");
        assert_eq!(config.format, PayloadFormat::Json);
    }

    #[test]
    fn unknown_type_is_kept_as_unsupported() {
        let action = Action::from_parts("FAX", json!({})).unwrap();
        assert_eq!(action.type_name(), "FAX");
        assert!(matches!(action.kind, ActionKind::Unsupported { .. }));
    }

    #[test]
    fn deserializes_from_wire_shape() {
        let action: Action = serde_json::from_value(json!({
            "type": "slack",
            "config": {"webhookUrl": "https://hooks.slack.com/x", "timeoutMs": 2500}
        }))
        .unwrap();
        assert_eq!(action.type_name(), "SLACK");
        assert_eq!(action.timeout_ms, 2500);

        let back = serde_json::to_value(&action).unwrap();
        assert_eq!(back["type"], "SLACK");
        assert_eq!(back["config"]["timeoutMs"], 2500);
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = HttpPostConfig {
            url: "https://example.com".into(),
            hmac_secret: Some("hmac-placeholder".into()),
            ..HttpPostConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hmac-placeholder"));
        assert!(debug.contains("[REDACTED]"));
    }
}
