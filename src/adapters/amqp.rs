use crate::config::BrokerSettings;
use crate::domain::model::{Delivery, PublishTarget, Topology};
use crate::domain::ports::BrokerGateway;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicPublishOptions, ConfirmSelectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};

const PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// RabbitMQ over AMQP 0-9-1. One connection and one confirm-mode channel
/// per process invocation.
pub struct AmqpGateway {
    connection: Connection,
    channel: Channel,
}

impl AmqpGateway {
    pub async fn connect(settings: &BrokerSettings) -> Result<Self> {
        let uri = settings.amqp_uri()?;
        tracing::info!(
            host = %settings.host,
            port = settings.port,
            vhost = %settings.vhost,
            "🔌 Connecting to RabbitMQ"
        );

        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(|e| {
                EtlError::transport(format!(
                    "cannot connect to {}:{}: {}",
                    settings.host, settings.port, e
                ))
            })?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        Ok(Self {
            connection,
            channel,
        })
    }

    pub async fn close(&self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "bye").await {
            tracing::warn!("⚠️  Failed to close channel: {}", e);
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "bye").await {
            tracing::warn!("⚠️  Failed to close connection: {}", e);
        }
        tracing::debug!("RabbitMQ connection closed");
    }
}

#[async_trait]
impl BrokerGateway for AmqpGateway {
    async fn ensure_topology(&self, topology: &Topology) -> Result<()> {
        let durable = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        for queue in &topology.queues {
            self.channel
                .queue_declare(queue, durable, FieldTable::default())
                .await?;
        }

        if let Some(fanout) = &topology.fanout {
            self.channel
                .exchange_declare(
                    &fanout.name,
                    ExchangeKind::Fanout,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            for queue in &fanout.bound_queues {
                self.channel
                    .queue_bind(
                        queue,
                        &fanout.name,
                        "",
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
            }
        }

        tracing::debug!(queues = topology.queues.len(), "Topology declared");
        Ok(())
    }

    async fn fetch_one(&self, queue: &str) -> Result<Option<Delivery>> {
        let message = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: false })
            .await?;

        Ok(message.map(|mut message| Delivery {
            tag: message.delivery.delivery_tag,
            queue: queue.to_string(),
            redelivered: message.delivery.redelivered,
            body: std::mem::take(&mut message.delivery.data),
        }))
    }

    async fn acknowledge(&self, delivery: Delivery) -> Result<()> {
        self.channel
            .basic_ack(delivery.tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn publish(&self, target: &PublishTarget, body: &[u8]) -> Result<()> {
        let (exchange, routing_key) = match target {
            PublishTarget::Queue(queue) => ("", queue.as_str()),
            PublishTarget::Exchange(exchange) => (exchange.as_str(), ""),
        };
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());

        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(EtlError::transport(format!(
                "broker refused message for {}",
                target
            )));
        }
        Ok(())
    }
}
