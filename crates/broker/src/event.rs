use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle state of one broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        }
    }

    /// Connected, or about to be.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connected | Self::Connecting)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of a message handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedMeta {
    /// Exchange (AMQP) or topic (MQTT).
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    pub bytes: usize,
    pub at: DateTime<Utc>,
}

/// Notifications emitted by a connection to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting,
    Connected,
    Error(String),
    Closed,
    Debug(String),
    MessagePublished(PublishedMeta),
}
