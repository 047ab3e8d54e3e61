//! RabbitMQ broker backed by `lapin` (feature `amqp`).

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    ConfirmSelectOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{debug, instrument, warn};

use crate::domain::{BrokerError, ConsumerTag, Delivery, DeliveryTag};
use crate::ports::{Broker, BrokerChannel, BrokerConnection, Subscription};

const REPLY_SUCCESS: u16 = 200;

/// Capacity of the buffer between the lapin consumer and the loop.
const DELIVERY_BUFFER: usize = 16;

#[derive(Clone, Default)]
pub struct AmqpBroker {
    properties: ConnectionProperties,
}

impl AmqpBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_properties(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    #[instrument(level = "debug", skip(self))]
    async fn connect(&self, url: &str) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        let connection = Connection::connect(url, self.properties.clone()).await?;
        debug!("connected to AMQP broker");
        Ok(Box::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let channel = self.connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(Box::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.connection
            .close(REPLY_SUCCESS, "sweep finished")
            .await?;
        Ok(())
    }
}

struct AmqpChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    #[instrument(level = "debug", skip(self))]
    async fn consume(
        &self,
        queue: &str,
        consumer: &ConsumerTag,
    ) -> Result<Subscription, BrokerError> {
        let mut stream = self
            .channel
            .basic_consume(
                queue,
                consumer.as_str(),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let (tx, subscription) = Subscription::channel(consumer.clone(), DELIVERY_BUFFER);
        let tag = consumer.clone();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let next = match item {
                    Ok(delivery) => Some(Delivery::new(delivery.delivery_tag, delivery.data)),
                    Err(e) => {
                        warn!(consumer = %tag, error = %e, "consumer error");
                        None
                    }
                };
                let failed = next.is_none();
                if tx.send(next).await.is_err() || failed {
                    break;
                }
            }
            debug!(consumer = %tag, "consumer stream ended");
        });

        Ok(subscription)
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(tag.as_u64(), BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn nack_requeue(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let options = BasicNackOptions {
            multiple: false,
            requeue: true,
        };
        self.channel.basic_nack(tag.as_u64(), options).await?;
        Ok(())
    }

    async fn cancel(&self, consumer: &ConsumerTag) -> Result<(), BrokerError> {
        self.channel
            .basic_cancel(consumer.as_str(), BasicCancelOptions::default())
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.channel.close(REPLY_SUCCESS, "sweep finished").await?;
        Ok(())
    }
}
