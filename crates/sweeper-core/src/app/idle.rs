//! IdleTimeoutGuard - 配送が途絶えたことの検出（Instructed 戦略のみ）
//!
//! 単発タイマーを 1 つだけ持ち、配送のたびに deadline を張り直します。
//! タイマーが先に切れたらループは IdleTimeout で終了します。

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep};

#[derive(Debug)]
pub struct IdleTimeoutGuard {
    window: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl IdleTimeoutGuard {
    /// Arm the guard; the first deadline is `window` from now.
    pub fn arm(window: Duration) -> Self {
        Self {
            window,
            deadline: Box::pin(sleep(window)),
        }
    }

    /// Cancel the pending deadline and start a new one.
    pub fn on_delivery(&mut self) {
        self.deadline.as_mut().reset(Instant::now() + self.window);
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Resolves when no delivery was seen for a whole window.
    pub async fn expired(&mut self) {
        self.deadline.as_mut().await;
    }
}
