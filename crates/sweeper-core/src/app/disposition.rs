//! DispositionEngine - 1 件の Delivery を ack か requeue する
//!
//! Delivery は値で受け取る（消費する）ので、同じ Delivery を 2 回処分することはできません。
//! ack / nack の失敗はフォールバックせず、そのまま致命的エラーとして返します。

use tracing::debug;

use crate::domain::{Delivery, SweepError};
use crate::ports::BrokerChannel;

/// What happened to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Requeued,
}

impl Disposition {
    /// Contribution to the removed count.
    pub fn removed_delta(self) -> u64 {
        match self {
            Disposition::Acked => 1,
            Disposition::Requeued => 0,
        }
    }
}

pub struct DispositionEngine<'a> {
    channel: &'a dyn BrokerChannel,
}

impl<'a> DispositionEngine<'a> {
    pub fn new(channel: &'a dyn BrokerChannel) -> Self {
        Self { channel }
    }

    /// Ack when `remove`, otherwise requeue exactly this delivery.
    pub async fn dispose(&self, delivery: Delivery, remove: bool) -> Result<Disposition, SweepError> {
        if remove {
            debug!(tag = %delivery.tag, "acking message");
            self.channel
                .ack(delivery.tag)
                .await
                .map_err(SweepError::Disposition)?;
            Ok(Disposition::Acked)
        } else {
            debug!(tag = %delivery.tag, "requeueing message");
            self.channel
                .nack_requeue(delivery.tag)
                .await
                .map_err(SweepError::Disposition)?;
            Ok(Disposition::Requeued)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConsumerTag;
    use crate::impls::{Faults, InMemoryBroker};
    use crate::ports::Broker;
    use rstest::rstest;

    async fn one_delivery(broker: &InMemoryBroker) -> (Box<dyn BrokerChannel>, Delivery) {
        broker.publish("q", b"m".to_vec()).await;
        let connection = broker.connect("memory://local").await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        let mut sub = channel.consume("q", &ConsumerTag::new("c")).await.unwrap();
        let delivery = sub.next().await.unwrap();
        (channel, delivery)
    }

    #[rstest]
    #[case::remove(true, Disposition::Acked, 1)]
    #[case::keep(false, Disposition::Requeued, 0)]
    #[tokio::test]
    async fn dispose_maps_decision_to_call(
        #[case] remove: bool,
        #[case] expected: Disposition,
        #[case] delta: u64,
    ) {
        let broker = InMemoryBroker::new();
        let (channel, delivery) = one_delivery(&broker).await;
        let tag = delivery.tag;

        let engine = DispositionEngine::new(channel.as_ref());
        let disposition = engine.dispose(delivery, remove).await.unwrap();
        assert_eq!(disposition, expected);
        assert_eq!(disposition.removed_delta(), delta);

        let calls = broker.calls().await;
        if remove {
            assert_eq!(calls.acks, vec![tag]);
            assert!(calls.nacks.is_empty());
        } else {
            assert!(calls.acks.is_empty());
            assert_eq!(calls.nacks, vec![tag]);
        }
    }

    #[tokio::test]
    async fn ack_failure_is_not_retried_as_requeue() {
        let broker = InMemoryBroker::with_faults(Faults {
            ack: Some("channel.ack.error".to_string()),
            ..Faults::default()
        });
        let (channel, delivery) = one_delivery(&broker).await;

        let engine = DispositionEngine::new(channel.as_ref());
        let err = engine.dispose(delivery, true).await.unwrap_err();
        assert!(matches!(err, SweepError::Disposition(_)));
        assert_eq!(err.to_string(), "channel.ack.error");
        assert!(broker.calls().await.nacks.is_empty());
    }

    #[tokio::test]
    async fn nack_failure_surfaces_broker_error() {
        let broker = InMemoryBroker::with_faults(Faults {
            nack: Some("channel.nack.error".to_string()),
            ..Faults::default()
        });
        let (channel, delivery) = one_delivery(&broker).await;

        let engine = DispositionEngine::new(channel.as_ref());
        let err = engine.dispose(delivery, false).await.unwrap_err();
        assert_eq!(err.to_string(), "channel.nack.error");
        assert!(broker.calls().await.acks.is_empty());
    }
}
