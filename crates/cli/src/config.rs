use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use courier_broker::{AmqpPool, AmqpSettings, MqttPool, MqttSettings, PoolSettings, ReconnectPolicy};
use courier_crypto::DEFAULT_KEY_ENV;
use courier_executor::ExecutorConfig;
use courier_http::DispatcherSettings;
use courier_notify::{OrchestratorSettings, SmtpSettings};
use serde::Deserialize;

/// Top-level configuration, loaded from `courier.toml`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// `"production"` turns a missing master key into a start-up error log.
    pub environment: String,
    pub logging: LoggingConfig,
    pub vault: VaultConfig,
    pub executor: ExecutorConfig,
    pub http: HttpConfig,
    pub amqp: AmqpConfig,
    pub mqtt: MqttConfig,
    /// Email alerts are disabled when absent.
    pub smtp: Option<SmtpSettings>,
    pub notifications: NotificationsConfig,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_owned(),
            logging: LoggingConfig::default(),
            vault: VaultConfig::default(),
            executor: ExecutorConfig::default(),
            http: HttpConfig::default(),
            amqp: AmqpConfig::default(),
            mqtt: MqttConfig::default(),
            smtp: None,
            notifications: NotificationsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Environment variable holding the hex-encoded master key.
    pub master_key_env: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            master_key_env: DEFAULT_KEY_ENV.to_owned(),
        }
    }
}

/// Settings for the standalone `request` command.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub timeout_ms: u64,
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            timeout_ms: 30_000,
            max_redirects: 5,
        }
    }
}

impl HttpConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn dispatcher_settings(&self, user_agent: &str) -> DispatcherSettings {
        DispatcherSettings::default()
            .with_user_agent(user_agent)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_redirects(self.max_redirects)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AmqpConfig {
    pub max_connections: usize,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub heartbeat_secs: u16,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_reconnect_attempts: 10,
            reconnect_delay_ms: 1000,
            heartbeat_secs: 60,
        }
    }
}

impl AmqpConfig {
    pub fn pool(&self) -> AmqpPool {
        let settings = AmqpSettings::default()
            .with_heartbeat_secs(self.heartbeat_secs)
            .with_reconnect(reconnect_policy(
                self.max_reconnect_attempts,
                self.reconnect_delay_ms,
            ));
        AmqpPool::amqp(pool_settings(self.max_connections), settings)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub max_connections: usize,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub keep_alive_secs: u64,
    /// Client id prefix; one is generated per connection when unset.
    pub client_id: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_reconnect_attempts: 10,
            reconnect_delay_ms: 1000,
            keep_alive_secs: 60,
            client_id: None,
        }
    }
}

impl MqttConfig {
    pub fn pool(&self) -> MqttPool {
        let mut settings = MqttSettings::default()
            .with_keep_alive(Duration::from_secs(self.keep_alive_secs))
            .with_reconnect(reconnect_policy(
                self.max_reconnect_attempts,
                self.reconnect_delay_ms,
            ));
        if let Some(client_id) = &self.client_id {
            settings = settings.with_client_id(client_id);
        }
        MqttPool::mqtt(pool_settings(self.max_connections), settings)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub push_max_retries: u32,
    pub push_base_delay_ms: u64,
    pub push_timeout_ms: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            push_max_retries: 3,
            push_base_delay_ms: 1000,
            push_timeout_ms: 10_000,
        }
    }
}

impl NotificationsConfig {
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings::default()
            .with_push_max_retries(self.push_max_retries)
            .with_push_base_delay(Duration::from_millis(self.push_base_delay_ms))
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

fn pool_settings(max_connections: usize) -> PoolSettings {
    PoolSettings {
        max_connections,
        ..PoolSettings::default()
    }
}

fn reconnect_policy(max_attempts: u32, delay_ms: u64) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        base_delay: Duration::from_millis(delay_ms),
    }
}

impl CourierConfig {
    /// Load `path`, or the defaults when it does not exist. Returns whether
    /// the file was found.
    pub fn load(path: &Path) -> anyhow::Result<(Self, bool)> {
        if !path.exists() {
            return Ok((Self::default(), false));
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok((config, true))
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Apply `SMTP_HOST`, `SMTP_PORT`, `SMTP_SECURE`, `SMTP_USER` and
    /// `SMTP_PASS` from `lookup`. Setting any of them enables email alerts.
    pub fn apply_smtp_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("SMTP_HOST");
        let port = lookup("SMTP_PORT");
        let secure = lookup("SMTP_SECURE");
        let user = lookup("SMTP_USER");
        let pass = lookup("SMTP_PASS");
        if host.is_none() && port.is_none() && secure.is_none() && user.is_none() && pass.is_none() {
            return Ok(());
        }

        let smtp = self.smtp.get_or_insert_with(SmtpSettings::default);
        if let Some(host) = host {
            smtp.host = host;
        }
        if let Some(port) = port {
            smtp.port = port
                .trim()
                .parse()
                .with_context(|| format!("SMTP_PORT is not a port number: {port}"))?;
        }
        if let Some(secure) = secure {
            smtp.secure = matches!(
                secure.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if user.is_some() {
            smtp.username = user;
        }
        if pass.is_some() {
            smtp.password = pass;
        }
        Ok(())
    }
}
