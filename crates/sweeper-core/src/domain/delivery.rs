//! Delivery - ブローカーから受け取った 1 件のメッセージ
//!
//! Delivery は Channel が所有しており、コアが ack か requeue するまで
//! 「処分待ち」の状態にあります。コアは受け取った Delivery をちょうど 1 回だけ処分します。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Broker-assigned tag used to ack or requeue a delivery.
///
/// Tags are only meaningful on the channel that produced them.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for DeliveryTag {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delivery-{}", self.0)
    }
}

/// ConsumerTag は subscription を識別する
///
/// ループは自分の subscription を cancel する必要があるため、
/// 実行ごとに ULID ベースのタグを生成します（例: `sweeper-01J...`）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerTag(String);

impl ConsumerTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Generate a fresh `sweeper-<ULID>` tag.
    pub fn generate() -> Self {
        Self(format!("sweeper-{}", Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque message body. Callers decode it however they like.
pub type Payload = [u8];

/// One message instance handed to the consumer by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(tag: impl Into<DeliveryTag>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            tag: tag.into(),
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Decode the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        foo: String,
    }

    #[test]
    fn json_decodes_payload() {
        let delivery = Delivery::new(7, br#"{"foo":"bar","baz":"quux"}"#.to_vec());
        let sample: Sample = delivery.json().unwrap();
        assert_eq!(sample.foo, "bar");
        assert_eq!(delivery.tag, DeliveryTag::new(7));
    }

    #[test]
    fn generated_consumer_tags_are_unique_and_prefixed() {
        let a = ConsumerTag::generate();
        let b = ConsumerTag::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sweeper-"));
    }
}
