//! State - スイープループの状態
//!
//! # 状態遷移
//! - Starting -> Consuming -> Stopping(reason) -> Closed
//! - Starting -> Closed（接続・チャネル・subscribe の失敗）
//!
//! LoopState はループ 1 回の実行中だけ存在し、ループ制御だけが変更します。

use std::fmt;

/// Why the loop left `Consuming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Cycle detected, or the checker said stop.
    Normal,
    /// Invalid delivery, failed disposition or failed predicate.
    Error,
    /// No delivery within the idle window.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Starting,
    Consuming,
    Stopping(StopReason),
    Closed,
}

impl LoopPhase {
    /// Deliveries arriving in this phase are ignored.
    pub fn is_stopping(self) -> bool {
        matches!(self, LoopPhase::Stopping(_) | LoopPhase::Closed)
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopPhase::Starting => f.write_str("starting"),
            LoopPhase::Consuming => f.write_str("consuming"),
            LoopPhase::Stopping(StopReason::Normal) => f.write_str("stopping_normal"),
            LoopPhase::Stopping(StopReason::Error) => f.write_str("stopping_error"),
            LoopPhase::Stopping(StopReason::Timeout) => f.write_str("stopping_timeout"),
            LoopPhase::Closed => f.write_str("closed"),
        }
    }
}

/// Mutable state of one loop invocation.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub removed: u64,
    phase: LoopPhase,
}

impl LoopState {
    pub fn new() -> Self {
        Self {
            removed: 0,
            phase: LoopPhase::Starting,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn is_stopping(&self) -> bool {
        self.phase.is_stopping()
    }

    pub fn begin_consuming(&mut self) {
        debug_assert_eq!(self.phase, LoopPhase::Starting);
        self.phase = LoopPhase::Consuming;
    }

    /// Enter `Stopping`. Returns false if the loop was already stopping,
    /// in which case the first reason is kept.
    pub fn stop(&mut self, reason: StopReason) -> bool {
        if self.phase.is_stopping() {
            return false;
        }
        self.phase = LoopPhase::Stopping(reason);
        true
    }

    pub fn close(&mut self) {
        self.phase = LoopPhase::Closed;
    }
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}
