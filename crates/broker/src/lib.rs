//! Pooled AMQP and MQTT connections and the publishers built on them.
//!
//! Connections are owned by an explicitly constructed [`ConnectionPool`]
//! (one per protocol) that the composition root creates, shares, and shuts
//! down. Each connection reports its lifecycle through a status watch and
//! a [`ConnectionEvent`] broadcast, and reconnects on its own after
//! transport errors until its [`ReconnectPolicy`] is exhausted.
//!
//! Publishers resolve their exchange/topic templates per call, format the
//! payload ([`format_payload`]), and retry failed publishes with
//! exponential backoff.

pub mod amqp;
pub mod connection;
pub mod error;
pub mod event;
pub mod format;
pub mod mqtt;
pub mod pool;
pub mod publisher;
pub mod transport;

pub use amqp::{
    AmqpConnection, AmqpDelivery, AmqpMessageOptions, AmqpSettings, ExchangeType, QueueOptions,
};
pub use connection::{BrokerConnection, ReconnectPolicy};
pub use error::{BrokerError, PoolError};
pub use event::{ConnectionEvent, ConnectionStatus, PublishedMeta};
pub use format::{content_type, format_payload, to_xml};
pub use mqtt::{
    MAX_TOPIC_BYTES, MqttConnection, MqttMessage, MqttPublishOptions, MqttSettings, validate_qos,
    validate_topic, validate_topic_filter,
};
pub use pool::{ConnectionFactory, ConnectionPool, PoolSettings, PoolStats};
pub use publisher::{
    AmqpPublisher, AmqpPublisherOptions, MqttPublisher, MqttPublisherOptions, PublishRequest,
    PublishResult, PublisherSettings,
};
pub use transport::{AmqpTransport, MqttTransport};

/// Pool of AMQP connections.
pub type AmqpPool = ConnectionPool<AmqpConnection>;
/// Pool of MQTT connections.
pub type MqttPool = ConnectionPool<MqttConnection>;

impl AmqpPool {
    /// Pool whose entries are [`AmqpConnection`]s built from `connection`.
    pub fn amqp(settings: PoolSettings, connection: AmqpSettings) -> Self {
        ConnectionPool::new(
            settings,
            std::sync::Arc::new(move |id: &str, url: &str| {
                std::sync::Arc::new(AmqpConnection::new(id, url, connection.clone()))
            }),
        )
    }
}

impl MqttPool {
    /// Pool whose entries are [`MqttConnection`]s built from `connection`.
    pub fn mqtt(settings: PoolSettings, connection: MqttSettings) -> Self {
        ConnectionPool::new(
            settings,
            std::sync::Arc::new(move |id: &str, url: &str| {
                std::sync::Arc::new(MqttConnection::new(id, url, connection.clone()))
            }),
        )
    }
}
