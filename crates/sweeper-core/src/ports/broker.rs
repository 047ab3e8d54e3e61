//! Broker port - メッセージブローカーへの抽象化
//!
//! ループが必要とする能力だけを定義します:
//! connect → create_channel → consume / ack / nack(requeue) / cancel / close。
//!
//! # 実装
//! - **InMemoryBroker**: テスト・ローカル用（`impls::inmem_broker`）
//! - **AmqpBroker**: lapin による RabbitMQ 実装（feature `amqp`）
//!
//! # 設計原則
//! - 接続とチャネルはループ 1 回ごとに取得し、ループが所有して必ず close する
//! - プロセス全体で共有するハンドルは持たない

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{BrokerError, ConsumerTag, Delivery, DeliveryTag};

/// Opens connections to a broker.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn BrokerConnection>, BrokerError>;
}

/// A live broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a channel with publisher confirms enabled.
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// A confirmed, bidirectional channel to the broker.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Start consuming `queue` under the given consumer tag.
    async fn consume(&self, queue: &str, consumer: &ConsumerTag)
    -> Result<Subscription, BrokerError>;

    /// Permanently remove one delivery.
    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Return exactly this delivery to the queue (`multiple=false, requeue=true`).
    async fn nack_requeue(&self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Cancel a subscription. Deliveries already in flight may still arrive.
    async fn cancel(&self, consumer: &ConsumerTag) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Stream of deliveries for one consumer.
///
/// Each item is one invocation of the broker's delivery callback. `None` items
/// stand for a callback without a usable message; a closed stream means the
/// broker ended the subscription. Both surface from [`Subscription::next`] as `None`.
pub struct Subscription {
    consumer: ConsumerTag,
    deliveries: mpsc::Receiver<Option<Delivery>>,
}

impl Subscription {
    pub fn new(consumer: ConsumerTag, deliveries: mpsc::Receiver<Option<Delivery>>) -> Self {
        Self {
            consumer,
            deliveries,
        }
    }

    /// Create a subscription and the sender a broker implementation feeds it with.
    pub fn channel(
        consumer: ConsumerTag,
        capacity: usize,
    ) -> (mpsc::Sender<Option<Delivery>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(consumer, rx))
    }

    pub fn consumer_tag(&self) -> &ConsumerTag {
        &self.consumer
    }

    /// Wait for the next delivery. `None` means there is no usable delivery.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await.flatten()
    }
}
