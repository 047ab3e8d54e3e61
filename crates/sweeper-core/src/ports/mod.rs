//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。ループはブローカーの具体的な実装を知りません。

pub mod broker;

pub use self::broker::{Broker, BrokerChannel, BrokerConnection, Subscription};
