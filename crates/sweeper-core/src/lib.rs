//! sweeper-core
//!
//! Core building blocks for draining unwanted messages out of a broker queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（delivery, decision, strategy, state, errors）
//! - **ports**: 抽象化レイヤー（Broker, BrokerConnection, BrokerChannel, Subscription）
//! - **app**: アプリケーションロジック（builder, config, sweep_loop, cycle, idle, disposition）
//! - **impls**: 実装（InMemoryBroker、feature `amqp` で AmqpBroker）
//!
//! # 使用例
//! ```ignore
//! use sweeper_core::prelude::*;
//!
//! let strategy = LoopStrategy::cycle_detect(
//!     remove_when(|payload| Ok(payload.starts_with(b"junk"))),
//!     JsonPointerKey::new("/id"),
//! );
//! let removed = SweepLoop::builder()
//!     .config(&SweepConfig::from_env()?)
//!     .strategy(strategy)
//!     .build()?
//!     .run(&AmqpBroker::default())
//!     .await?;
//! ```

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub mod prelude {
    pub use crate::app::{SweepConfig, SweepLoop, SweepLoopBuilder};
    pub use crate::domain::{
        CycleKey, Instruction, JsonPointerKey, LoopStrategy, Payload, PredicateError, SweepError,
        check_with, key_from, remove_when,
    };
    #[cfg(feature = "amqp")]
    pub use crate::impls::AmqpBroker;
    pub use crate::impls::InMemoryBroker;
}
