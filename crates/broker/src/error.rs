use thiserror::Error;

/// Errors raised by broker connections and publishers.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("invalid broker URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("broker connection is not established")]
    NotConnected,

    /// The connection was closed with an explicit `disconnect()`.
    #[error("broker connection was closed")]
    Closed,

    /// Automatic reconnection gave up; a fresh `connect()` is required.
    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error("AMQP channel error: {0}")]
    Channel(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("invalid QoS {0}: must be 0, 1 or 2")]
    InvalidQos(u8),

    #[error("failed to format payload: {0}")]
    Format(String),

    #[error("template error: {0}")]
    Template(String),

    /// The caller gave up on the publish while it was waiting to retry.
    #[error("publish cancelled")]
    Cancelled,
}

impl BrokerError {
    /// Whether another attempt (possibly after reconnecting) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::NotConnected | Self::Channel(_) | Self::Publish(_) | Self::Subscribe(_)
        )
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        Self::Channel(err.to_string())
    }
}

/// Errors raised by [`ConnectionPool`](crate::ConnectionPool).
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Every slot is taken by another broker.
    #[error("connection pool is full ({max} connections)")]
    Capacity { max: usize },

    #[error("failed to connect broker `{broker_id}`: {source}")]
    Connect {
        broker_id: String,
        #[source]
        source: BrokerError,
    },

    #[error("connection pool has been shut down")]
    ShutDown,
}

impl PoolError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Capacity { .. } => true,
            Self::Connect { source, .. } => source.is_retryable(),
            Self::ShutDown => false,
        }
    }
}

impl From<PoolError> for BrokerError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Connect { source, .. } => source,
            PoolError::ShutDown => Self::Closed,
            capacity @ PoolError::Capacity { .. } => Self::Connect(capacity.to_string()),
        }
    }
}
