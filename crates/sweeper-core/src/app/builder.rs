//! SweepLoopBuilder - ループの構築
//!
//! # Fail-fast 設計
//! - url / queue / strategy が揃っていなければ build() で BuildError を返す
//! - アイドル時間 0 は即タイムアウトになるので拒否する

use std::time::Duration;

use super::config::SweepConfig;
use super::sweep_loop::SweepLoop;
use crate::domain::LoopStrategy;

/// BuildError はループ構築時のエラー
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("broker url is required")]
    MissingUrl,

    #[error("queue name is required")]
    MissingQueue,

    #[error("a loop strategy is required")]
    MissingStrategy,

    #[error("idle timeout must be greater than zero")]
    ZeroIdleTimeout,
}

/// # 使用例
/// ```ignore
/// let sweep = SweepLoop::builder()
///     .url("amqp://localhost:5672")
///     .queue("sendqueue")
///     .strategy(LoopStrategy::instructed(checker))
///     .build()?;
/// let removed = sweep.run(&broker).await?;
/// ```
#[derive(Debug, Default)]
pub struct SweepLoopBuilder {
    url: Option<String>,
    queue: Option<String>,
    strategy: Option<LoopStrategy>,
    drain_grace: Option<Duration>,
    idle_timeout: Option<Duration>,
}

impl SweepLoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn strategy(mut self, strategy: LoopStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = Some(grace);
        self
    }

    pub fn idle_timeout(mut self, window: Duration) -> Self {
        self.idle_timeout = Some(window);
        self
    }

    /// Take url, queue and both timings from `config`.
    pub fn config(self, config: &SweepConfig) -> Self {
        self.url(config.url.clone())
            .queue(config.queue.clone())
            .drain_grace(config.drain_grace())
            .idle_timeout(config.idle_timeout())
    }

    pub fn build(self) -> Result<SweepLoop, BuildError> {
        let url = self.url.filter(|u| !u.is_empty()).ok_or(BuildError::MissingUrl)?;
        let queue = self
            .queue
            .filter(|q| !q.is_empty())
            .ok_or(BuildError::MissingQueue)?;
        let mut strategy = self.strategy.ok_or(BuildError::MissingStrategy)?;

        if let Some(grace) = self.drain_grace {
            strategy = strategy.with_drain_grace(grace);
        }
        if let Some(window) = self.idle_timeout {
            strategy = strategy.with_idle_timeout(window);
        }
        if strategy.idle_timeout() == Some(Duration::ZERO) {
            return Err(BuildError::ZeroIdleTimeout);
        }

        Ok(SweepLoop::new(url, queue, strategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Instruction, LoopStrategy, check_with};

    fn instructed() -> LoopStrategy {
        LoopStrategy::instructed(check_with(|_| Ok(Instruction::new(true, true))))
    }

    #[test]
    fn test_build_success() {
        let sweep = SweepLoopBuilder::new()
            .url("amqp://local")
            .queue("MY_QUEUE")
            .strategy(instructed())
            .build()
            .unwrap();
        assert_eq!(sweep.queue(), "MY_QUEUE");
        assert_eq!(sweep.url(), "amqp://local");
    }

    #[test]
    fn test_build_missing_parts() {
        let err = SweepLoopBuilder::new().queue("q").strategy(instructed()).build();
        assert_eq!(err.err(), Some(BuildError::MissingUrl));

        let err = SweepLoopBuilder::new().url("amqp://local").strategy(instructed()).build();
        assert_eq!(err.err(), Some(BuildError::MissingQueue));

        let err = SweepLoopBuilder::new().url("amqp://local").queue("q").build();
        assert_eq!(err.err(), Some(BuildError::MissingStrategy));
    }

    #[test]
    fn test_build_rejects_zero_idle_timeout() {
        let err = SweepLoopBuilder::new()
            .url("amqp://local")
            .queue("q")
            .strategy(instructed())
            .idle_timeout(Duration::ZERO)
            .build();
        assert_eq!(err.err(), Some(BuildError::ZeroIdleTimeout));
    }

    #[test]
    fn test_config_timings_reach_the_strategy() {
        let mut config = SweepConfig::new("amqp://local", "q");
        config.idle_timeout_ms = 250;
        let sweep = SweepLoopBuilder::new()
            .strategy(instructed())
            .config(&config)
            .build()
            .unwrap();
        assert_eq!(
            sweep.strategy().idle_timeout(),
            Some(Duration::from_millis(250))
        );
    }
}
