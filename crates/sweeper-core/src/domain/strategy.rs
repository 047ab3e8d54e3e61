//! LoopStrategy - ループの終了方針
//!
//! 2 つの終了方針は別々の思想から来ているため、マージせずに別の variant として残します。
//! - **CycleDetect**: 最初のメッセージのキーが再び現れたら「キューを一周した」とみなして終了。
//!   アイドルタイムアウトはありません。
//! - **Instructed**: `MessageChecker` が `proceed=false` を返したら終了。
//!   配送が `idle_timeout` の間途絶えたら異常終了します。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::decision::{CycleKeyExtractor, MessageChecker, RemovePredicate};

/// Default idle window for the instructed strategy.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Default time to let in-flight deliveries drain after a cycle is detected.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(1000);

#[derive(Clone)]
pub enum LoopStrategy {
    CycleDetect {
        remove: Arc<dyn RemovePredicate>,
        key: Arc<dyn CycleKeyExtractor>,
        drain_grace: Duration,
    },
    Instructed {
        checker: Arc<dyn MessageChecker>,
        idle_timeout: Duration,
    },
}

impl LoopStrategy {
    /// Cycle detection with [`DEFAULT_DRAIN_GRACE`].
    pub fn cycle_detect(
        remove: impl RemovePredicate + 'static,
        key: impl CycleKeyExtractor + 'static,
    ) -> Self {
        Self::CycleDetect {
            remove: Arc::new(remove),
            key: Arc::new(key),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    /// Instruction-driven termination with [`DEFAULT_IDLE_TIMEOUT`].
    pub fn instructed(checker: impl MessageChecker + 'static) -> Self {
        Self::Instructed {
            checker: Arc::new(checker),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Override the drain grace period. No effect on `Instructed`.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        if let Self::CycleDetect { drain_grace, .. } = &mut self {
            *drain_grace = grace;
        }
        self
    }

    /// Override the idle window. No effect on `CycleDetect`.
    pub fn with_idle_timeout(mut self, window: Duration) -> Self {
        if let Self::Instructed { idle_timeout, .. } = &mut self {
            *idle_timeout = window;
        }
        self
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CycleDetect { .. } => "cycle_detect",
            Self::Instructed { .. } => "instructed",
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self {
            Self::CycleDetect { .. } => None,
            Self::Instructed { idle_timeout, .. } => Some(*idle_timeout),
        }
    }
}

impl fmt::Debug for LoopStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetect { drain_grace, .. } => f
                .debug_struct("CycleDetect")
                .field("drain_grace", drain_grace)
                .finish_non_exhaustive(),
            Self::Instructed { idle_timeout, .. } => f
                .debug_struct("Instructed")
                .field("idle_timeout", idle_timeout)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::{Instruction, JsonPointerKey, check_with, remove_when};

    #[test]
    fn defaults_are_explicit() {
        let strategy = LoopStrategy::instructed(check_with(|_| Ok(Instruction::new(true, true))));
        assert_eq!(strategy.idle_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(strategy.name(), "instructed");

        let strategy =
            LoopStrategy::cycle_detect(remove_when(|_| Ok(false)), JsonPointerKey::new("/id"));
        assert_eq!(strategy.idle_timeout(), None);
        assert!(matches!(
            strategy,
            LoopStrategy::CycleDetect { drain_grace, .. } if drain_grace == DEFAULT_DRAIN_GRACE
        ));
    }

    #[test]
    fn overrides_only_touch_their_own_variant() {
        let strategy = LoopStrategy::instructed(check_with(|_| Ok(Instruction::new(true, true))))
            .with_drain_grace(Duration::from_secs(9))
            .with_idle_timeout(Duration::from_secs(3));
        assert_eq!(strategy.idle_timeout(), Some(Duration::from_secs(3)));

        let strategy =
            LoopStrategy::cycle_detect(remove_when(|_| Ok(false)), JsonPointerKey::new("/id"))
                .with_idle_timeout(Duration::from_secs(3))
                .with_drain_grace(Duration::from_millis(10));
        assert_eq!(strategy.idle_timeout(), None);
        assert!(matches!(
            strategy,
            LoopStrategy::CycleDetect { drain_grace, .. } if drain_grace == Duration::from_millis(10)
        ));
    }
}
