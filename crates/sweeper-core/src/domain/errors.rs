//! Errors - ブローカー操作とスイープループのエラー
//!
//! # 分類
//! - 起動時: Connection / Channel / Subscribe（ブローカーのエラーをそのまま返す）
//! - 消費中: InvalidDelivery / Disposition / Predicate / IdleTimeout
//!
//! コアはどのエラーもリトライしません。リトライ方針は呼び出し側の責務です。

use std::time::Duration;

use thiserror::Error;

/// Error returned by caller-supplied predicates and key extractors.
pub type PredicateError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by a broker capability (connect, channel, consume, ack, ...).
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The message is kept verbatim so callers see exactly what the broker said.
    #[error("{0}")]
    Operation(String),

    #[error("channel closed")]
    Closed,

    #[cfg(feature = "amqp")]
    #[error(transparent)]
    Amqp(#[from] lapin::Error),
}

impl BrokerError {
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }
}

/// The failure side of a sweep outcome.
#[derive(Debug, Error)]
pub enum SweepError {
    /// Broker unreachable or handshake failed.
    #[error(transparent)]
    Connection(BrokerError),

    /// Channel creation failed on a live connection.
    #[error(transparent)]
    Channel(BrokerError),

    /// The consume call itself failed.
    #[error(transparent)]
    Subscribe(BrokerError),

    /// The subscription produced no usable delivery.
    #[error("message is not defined")]
    InvalidDelivery,

    /// Acknowledge or requeue failed. The broker error is surfaced unchanged.
    #[error(transparent)]
    Disposition(BrokerError),

    /// A caller predicate or key extractor failed.
    #[error("predicate failed: {0}")]
    Predicate(#[source] PredicateError),

    /// No delivery arrived within the idle window.
    #[error("no message received in {}s", .window.as_secs_f64())]
    IdleTimeout {
        window: Duration,
        /// Messages removed before the window elapsed.
        removed: u64,
    },
}

impl SweepError {
    /// Messages acknowledged before the failure, when the failure carries that count.
    pub fn removed(&self) -> Option<u64> {
        match self {
            SweepError::IdleTimeout { removed, .. } => Some(*removed),
            _ => None,
        }
    }
}
