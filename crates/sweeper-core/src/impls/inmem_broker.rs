//! InMemoryBroker - テスト・ローカル用のブローカー
//!
//! # 学習ポイント
//! - tokio::sync::Mutex + Notify による配送の待機
//! - 配送タスク（feeder）を spawn して mpsc で Subscription に流す
//! - AMQP と同じく、close されたチャネルの未 ack メッセージはキューに戻る
//!
//! # 振る舞い
//! - `nack_requeue` はメッセージをキューの末尾に戻す（消費者から見るとキューが一周する）
//! - チャネル close 時の未 ack メッセージは元の順序のままキューの先頭に戻る
//! - `Faults` で connect / channel / consume / ack / nack を失敗させられる
//! - すべての呼び出しは `CallLog` に記録される（失敗した呼び出しも含む）

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::domain::{BrokerError, ConsumerTag, Delivery, DeliveryTag};
use crate::ports::{Broker, BrokerChannel, BrokerConnection, Subscription};

/// Capacity of each subscription's delivery buffer (prefetch).
const PREFETCH: usize = 1;

/// Injected failures. Each `Some(message)` makes that operation fail with
/// `BrokerError::Operation(message)`.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub connect: Option<String>,
    pub create_channel: Option<String>,
    pub consume: Option<String>,
    pub ack: Option<String>,
    pub nack: Option<String>,
}

/// Record of every call made against the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    pub connects: usize,
    pub delivered: usize,
    pub acks: Vec<DeliveryTag>,
    pub nacks: Vec<DeliveryTag>,
    pub cancels: Vec<ConsumerTag>,
    pub channel_closes: usize,
    pub connection_closes: usize,
}

#[derive(Debug, Clone)]
enum Entry {
    Message(Vec<u8>),
    /// A delivery callback with no usable message.
    Invalid,
}

#[derive(Debug)]
struct Unacked {
    channel: u64,
    queue: String,
    payload: Vec<u8>,
}

#[derive(Debug)]
struct Consumer {
    channel: u64,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Entry>>,
    /// Delivered but not yet acked or requeued, by tag.
    unacked: BTreeMap<u64, Unacked>,
    consumers: HashMap<ConsumerTag, Consumer>,
    closed_channels: Vec<u64>,
    next_tag: u64,
    next_channel: u64,
    faults: Faults,
    calls: CallLog,
}

impl BrokerState {
    fn is_live(&self, consumer: &ConsumerTag, channel: u64) -> bool {
        !self.closed_channels.contains(&channel)
            && self
                .consumers
                .get(consumer)
                .is_some_and(|c| !c.cancelled)
    }

    /// Pop the next entry of `queue` and mark it unacked on `channel`.
    fn take_next(&mut self, queue: &str, channel: u64) -> Option<Option<Delivery>> {
        let entry = self.queues.get_mut(queue)?.pop_front()?;
        self.calls.delivered += 1;
        match entry {
            Entry::Message(payload) => {
                self.next_tag += 1;
                let tag = self.next_tag;
                self.unacked.insert(
                    tag,
                    Unacked {
                        channel,
                        queue: queue.to_string(),
                        payload: payload.clone(),
                    },
                );
                Some(Some(Delivery::new(tag, payload)))
            }
            Entry::Invalid => Some(None),
        }
    }
}

struct Inner {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// In-memory broker with redelivery, fault injection and a call log.
///
/// # 使用例
/// ```ignore
/// let broker = InMemoryBroker::new();
/// broker.publish("jobs", br#"{"id":1}"#.to_vec()).await;
/// let removed = SweepLoop::builder()
///     .url("memory://local")
///     .queue("jobs")
///     .strategy(strategy)
///     .build()?
///     .run(&broker)
///     .await?;
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_faults(Faults::default())
    }

    pub fn with_faults(faults: Faults) -> Self {
        let state = BrokerState {
            faults,
            ..BrokerState::default()
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                notify: Notify::new(),
            }),
        }
    }

    /// Append a message to `queue`.
    pub async fn publish(&self, queue: &str, payload: impl Into<Vec<u8>>) {
        self.push(queue, Entry::Message(payload.into())).await;
    }

    /// Append a JSON message to `queue`.
    pub async fn publish_json(&self, queue: &str, value: &serde_json::Value) {
        self.publish(queue, value.to_string()).await;
    }

    /// Append a delivery that carries no usable message.
    pub async fn publish_invalid(&self, queue: &str) {
        self.push(queue, Entry::Invalid).await;
    }

    async fn push(&self, queue: &str, entry: Entry) {
        {
            let mut state = self.inner.state.lock().await;
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(entry);
        }
        self.inner.notify.notify_waiters();
    }

    pub async fn calls(&self) -> CallLog {
        self.inner.state.lock().await.calls.clone()
    }

    /// Messages waiting in `queue` (not counting unacked deliveries).
    pub async fn depth(&self, queue: &str) -> usize {
        let state = self.inner.state.lock().await;
        state.queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Payloads waiting in `queue`, head first.
    pub async fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        let state = self.inner.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|q| {
                q.iter()
                    .filter_map(|entry| match entry {
                        Entry::Message(payload) => Some(payload.clone()),
                        Entry::Invalid => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn unacked(&self) -> usize {
        self.inner.state.lock().await.unacked.len()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self, _url: &str) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        let mut state = self.inner.state.lock().await;
        state.calls.connects += 1;
        if let Some(message) = &state.faults.connect {
            return Err(BrokerError::operation(message.clone()));
        }
        Ok(Box::new(InMemoryConnection {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct InMemoryConnection {
    inner: Arc<Inner>,
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let mut state = self.inner.state.lock().await;
        if let Some(message) = &state.faults.create_channel {
            return Err(BrokerError::operation(message.clone()));
        }
        state.next_channel += 1;
        Ok(Box::new(InMemoryChannel {
            id: state.next_channel,
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.state.lock().await.calls.connection_closes += 1;
        Ok(())
    }
}

struct InMemoryChannel {
    id: u64,
    inner: Arc<Inner>,
}

impl InMemoryChannel {
    fn ensure_open(&self, state: &BrokerState) -> Result<(), BrokerError> {
        if state.closed_channels.contains(&self.id) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    fn take_unacked(&self, state: &mut BrokerState, tag: DeliveryTag) -> Result<Unacked, BrokerError> {
        match state.unacked.remove(&tag.as_u64()) {
            Some(entry) if entry.channel == self.id => Ok(entry),
            Some(entry) => {
                // 他のチャネルのタグには触らない
                state.unacked.insert(tag.as_u64(), entry);
                Err(BrokerError::operation(format!("unknown delivery tag {tag}")))
            }
            None => Err(BrokerError::operation(format!("unknown delivery tag {tag}"))),
        }
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn consume(
        &self,
        queue: &str,
        consumer: &ConsumerTag,
    ) -> Result<Subscription, BrokerError> {
        {
            let mut state = self.inner.state.lock().await;
            self.ensure_open(&state)?;
            if let Some(message) = &state.faults.consume {
                return Err(BrokerError::operation(message.clone()));
            }
            state.queues.entry(queue.to_string()).or_default();
            state.consumers.insert(
                consumer.clone(),
                Consumer {
                    channel: self.id,
                    cancelled: false,
                },
            );
        }

        let (tx, subscription) = Subscription::channel(consumer.clone(), PREFETCH);
        let inner = Arc::clone(&self.inner);
        let queue = queue.to_string();
        let consumer = consumer.clone();
        let channel = self.id;

        // feeder: キューから取り出して Subscription に流す
        tokio::spawn(async move {
            loop {
                let next = loop {
                    // notified() を先に作っておかないと通知を取りこぼす
                    let notified = inner.notify.notified();
                    {
                        let mut state = inner.state.lock().await;
                        if !state.is_live(&consumer, channel) {
                            return;
                        }
                        if let Some(next) = state.take_next(&queue, channel) {
                            break next;
                        }
                    }
                    notified.await;
                };
                // receiver が drop されていたら、未 ack 分はチャネル close で戻る
                if tx.send(next).await.is_err() {
                    return;
                }
            }
        });

        Ok(subscription)
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock().await;
        state.calls.acks.push(tag);
        self.ensure_open(&state)?;
        if let Some(message) = &state.faults.ack {
            return Err(BrokerError::operation(message.clone()));
        }
        self.take_unacked(&mut state, tag)?;
        Ok(())
    }

    async fn nack_requeue(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        {
            let mut state = self.inner.state.lock().await;
            state.calls.nacks.push(tag);
            self.ensure_open(&state)?;
            if let Some(message) = &state.faults.nack {
                return Err(BrokerError::operation(message.clone()));
            }
            let entry = self.take_unacked(&mut state, tag)?;
            state
                .queues
                .entry(entry.queue)
                .or_default()
                .push_back(Entry::Message(entry.payload));
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn cancel(&self, consumer: &ConsumerTag) -> Result<(), BrokerError> {
        {
            let mut state = self.inner.state.lock().await;
            state.calls.cancels.push(consumer.clone());
            self.ensure_open(&state)?;
            match state.consumers.get_mut(consumer) {
                Some(entry) => entry.cancelled = true,
                None => {
                    return Err(BrokerError::operation(format!("unknown consumer {consumer}")));
                }
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        {
            let mut state = self.inner.state.lock().await;
            state.calls.channel_closes += 1;
            self.ensure_open(&state)?;
            state.closed_channels.push(self.id);

            let tags: Vec<u64> = state
                .unacked
                .iter()
                .filter(|(_, entry)| entry.channel == self.id)
                .map(|(tag, _)| *tag)
                .collect();
            // 先頭に戻すので、逆順に push_front して元の順序を保つ
            for tag in tags.into_iter().rev() {
                if let Some(entry) = state.unacked.remove(&tag) {
                    state
                        .queues
                        .entry(entry.queue)
                        .or_default()
                        .push_front(Entry::Message(entry.payload));
                }
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn open(broker: &InMemoryBroker) -> Box<dyn BrokerChannel> {
        let connection = broker.connect("memory://local").await.unwrap();
        connection.create_channel().await.unwrap()
    }

    async fn next(sub: &mut Subscription) -> Option<Delivery> {
        tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn delivers_in_order_and_ack_removes() {
        let broker = InMemoryBroker::new();
        broker.publish("q", b"a".to_vec()).await;
        broker.publish("q", b"b".to_vec()).await;

        let channel = open(&broker).await;
        let mut sub = channel.consume("q", &ConsumerTag::new("c")).await.unwrap();

        let first = next(&mut sub).await.unwrap();
        assert_eq!(first.payload, b"a");
        channel.ack(first.tag).await.unwrap();

        let second = next(&mut sub).await.unwrap();
        assert_eq!(second.payload, b"b");
        channel.ack(second.tag).await.unwrap();

        assert_eq!(broker.depth("q").await, 0);
        assert_eq!(broker.unacked().await, 0);
        assert_eq!(broker.calls().await.acks.len(), 2);
    }

    #[tokio::test]
    async fn nack_requeues_to_the_tail() {
        let broker = InMemoryBroker::new();
        broker.publish("q", b"a".to_vec()).await;
        broker.publish("q", b"b".to_vec()).await;

        let channel = open(&broker).await;
        let mut sub = channel.consume("q", &ConsumerTag::new("c")).await.unwrap();

        let first = next(&mut sub).await.unwrap();
        channel.nack_requeue(first.tag).await.unwrap();
        let second = next(&mut sub).await.unwrap();
        assert_eq!(second.payload, b"b");
        channel.ack(second.tag).await.unwrap();

        let again = next(&mut sub).await.unwrap();
        assert_eq!(again.payload, b"a");
        assert_ne!(again.tag, first.tag);
    }

    #[tokio::test]
    async fn close_returns_unacked_messages_in_order() {
        let broker = InMemoryBroker::new();
        for payload in [b"a", b"b", b"c"] {
            broker.publish("q", payload.to_vec()).await;
        }

        let channel = open(&broker).await;
        let mut sub = channel.consume("q", &ConsumerTag::new("c")).await.unwrap();
        let first = next(&mut sub).await.unwrap();
        assert_eq!(first.payload, b"a");

        channel.close().await.unwrap();
        drop(sub);

        assert_eq!(
            broker.messages("q").await,
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert!(matches!(channel.ack(first.tag).await, Err(BrokerError::Closed)));
    }

    #[tokio::test]
    async fn invalid_entry_yields_none() {
        let broker = InMemoryBroker::new();
        broker.publish_invalid("q").await;

        let channel = open(&broker).await;
        let mut sub = channel.consume("q", &ConsumerTag::new("c")).await.unwrap();
        assert!(next(&mut sub).await.is_none());
    }

    #[tokio::test]
    async fn injected_faults_surface_verbatim() {
        let broker = InMemoryBroker::with_faults(Faults {
            ack: Some("channel.ack.error".to_string()),
            ..Faults::default()
        });
        broker.publish("q", b"a".to_vec()).await;

        let channel = open(&broker).await;
        let mut sub = channel.consume("q", &ConsumerTag::new("c")).await.unwrap();
        let delivery = next(&mut sub).await.unwrap();

        let err = channel.ack(delivery.tag).await.unwrap_err();
        assert_eq!(err.to_string(), "channel.ack.error");
        assert_eq!(broker.calls().await.acks, vec![delivery.tag]);
    }

    #[tokio::test]
    async fn connect_fault_fails_connect() {
        let broker = InMemoryBroker::with_faults(Faults {
            connect: Some("Connection Error".to_string()),
            ..Faults::default()
        });
        let err = broker.connect("memory://local").await.err().unwrap();
        assert_eq!(err.to_string(), "Connection Error");
    }

    #[tokio::test]
    async fn cancelled_consumer_stops_receiving() {
        let broker = InMemoryBroker::new();
        let channel = open(&broker).await;
        let consumer = ConsumerTag::new("c");
        let mut sub = channel.consume("q", &consumer).await.unwrap();

        channel.cancel(&consumer).await.unwrap();
        broker.publish("q", b"late".to_vec()).await;

        // feeder が終了すると Subscription は閉じる
        assert!(next(&mut sub).await.is_none());
        assert_eq!(broker.depth("q").await, 1);
        assert_eq!(broker.calls().await.cancels, vec![consumer]);
    }
}
