//! SweepConfig - 接続先・キュー名・タイミングの設定
//!
//! 環境変数:
//! - `RABBITMQ_URL` / `RABBITMQ_QUEUE`（必須）
//! - `RABBITMQ_DELETE_MESSAGE_TIMEOUT`: 一周検出後の drain 猶予（ms）
//! - `RABBITMQ_IDLE_TIMEOUT`: Instructed 戦略のアイドル時間（ms）
//!
//! 数値として読めない値や 0 はデフォルトに戻ります。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{DEFAULT_DRAIN_GRACE, DEFAULT_IDLE_TIMEOUT};

pub const URL_VAR: &str = "RABBITMQ_URL";
pub const QUEUE_VAR: &str = "RABBITMQ_QUEUE";
pub const DRAIN_GRACE_VAR: &str = "RABBITMQ_DELETE_MESSAGE_TIMEOUT";
pub const IDLE_TIMEOUT_VAR: &str = "RABBITMQ_IDLE_TIMEOUT";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub url: String,
    pub queue: String,
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_drain_grace_ms() -> u64 {
    DEFAULT_DRAIN_GRACE.as_millis() as u64
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_millis() as u64
}

impl SweepConfig {
    pub fn new(url: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue: queue.into(),
            drain_grace_ms: default_drain_grace_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source (the process environment, a map in tests, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(URL_VAR).ok_or(ConfigError::MissingVar(URL_VAR))?;
        let queue = lookup(QUEUE_VAR).ok_or(ConfigError::MissingVar(QUEUE_VAR))?;
        let mut config = Self::new(url, queue);
        if let Some(ms) = positive_millis(lookup(DRAIN_GRACE_VAR)) {
            config.drain_grace_ms = ms;
        }
        if let Some(ms) = positive_millis(lookup(IDLE_TIMEOUT_VAR)) {
            config.idle_timeout_ms = ms;
        }
        Ok(config)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

fn positive_millis(raw: Option<String>) -> Option<u64> {
    raw?.trim().parse::<u64>().ok().filter(|ms| *ms > 0)
}
