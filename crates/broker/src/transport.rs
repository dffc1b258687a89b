use async_trait::async_trait;

use crate::amqp::{AmqpConnection, AmqpMessageOptions, ExchangeType};
use crate::connection::BrokerConnection;
use crate::error::BrokerError;
use crate::mqtt::{MqttConnection, MqttPublishOptions, validate_topic};

/// The AMQP operations a publisher needs.
#[async_trait]
pub trait AmqpTransport: BrokerConnection {
    async fn declare_exchange(
        &self,
        exchange: &str,
        kind: ExchangeType,
        durable: bool,
    ) -> Result<(), BrokerError>;

    /// Returns the broker's flow-control signal (`false` on nack).
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        options: &AmqpMessageOptions,
    ) -> Result<bool, BrokerError>;
}

/// The MQTT operations a publisher needs.
#[async_trait]
pub trait MqttTransport: BrokerConnection {
    fn validate_topic(&self, topic: &str) -> Result<(), BrokerError> {
        validate_topic(topic)
    }

    /// Queue `payload` for `topic`. Success does not imply a broker ack.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: MqttPublishOptions,
    ) -> Result<(), BrokerError>;
}

#[async_trait]
impl AmqpTransport for AmqpConnection {
    async fn declare_exchange(
        &self,
        exchange: &str,
        kind: ExchangeType,
        durable: bool,
    ) -> Result<(), BrokerError> {
        AmqpConnection::declare_exchange(self, exchange, kind, durable).await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        options: &AmqpMessageOptions,
    ) -> Result<bool, BrokerError> {
        AmqpConnection::publish(self, exchange, routing_key, payload, options).await
    }
}

#[async_trait]
impl MqttTransport for MqttConnection {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: MqttPublishOptions,
    ) -> Result<(), BrokerError> {
        MqttConnection::publish(self, topic, payload, options).await
    }
}
