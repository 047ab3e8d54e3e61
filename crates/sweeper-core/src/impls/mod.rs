//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryBroker**: テスト・ローカル用のブローカー
//! - **AmqpBroker**: lapin による RabbitMQ 実装（feature `amqp`）

pub mod inmem_broker;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use self::inmem_broker::{CallLog, Faults, InMemoryBroker};

#[cfg(feature = "amqp")]
pub use self::amqp::AmqpBroker;
