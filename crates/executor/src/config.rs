use std::time::Duration;

use serde::Deserialize;

/// Default endpoint for `EMAIL` actions (SendGrid v3 mail send).
pub const DEFAULT_EMAIL_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Configuration for the [`ActionExecutor`](crate::ActionExecutor).
///
/// # Examples
///
/// ```
/// use courier_executor::ExecutorConfig;
///
/// let config = ExecutorConfig::default();
/// assert_eq!(config.default_timeout_ms, 10_000);
/// assert_eq!(config.max_concurrent, 10);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Deadline for actions that do not carry their own `timeoutMs`.
    pub default_timeout_ms: u64,
    /// Maximum number of actions dispatched at the same time. Enforced via
    /// a [`tokio::sync::Semaphore`].
    pub max_concurrent: usize,
    /// Transactional email provider endpoint.
    pub email_api_url: String,
    /// Sender used when neither the action nor the credential names one.
    pub email_from: String,
    pub user_agent: String,
    /// Retries for `AMQP_PUBLISH`/`MQTT_PUBLISH` inside the deadline.
    pub broker_max_retries: u32,
    pub broker_retry_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: courier_core::DEFAULT_TIMEOUT_MS,
            max_concurrent: 10,
            email_api_url: DEFAULT_EMAIL_API_URL.to_owned(),
            email_from: "noreply@courier.local".to_owned(),
            user_agent: format!("courier/{}", env!("CARGO_PKG_VERSION")),
            broker_max_retries: 3,
            broker_retry_delay_ms: 1000,
        }
    }
}

impl ExecutorConfig {
    pub fn broker_retry_delay(&self) -> Duration {
        Duration::from_millis(self.broker_retry_delay_ms)
    }

    #[must_use]
    pub fn with_email_api_url(mut self, url: impl Into<String>) -> Self {
        self.email_api_url = url.into();
        self
    }

    #[must_use]
    pub fn with_broker_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.broker_max_retries = max_retries;
        self.broker_retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }
}
