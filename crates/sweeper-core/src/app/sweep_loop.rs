//! SweepLoop - キューを掃除するループ本体
//!
//! # フロー
//! 1. Starting: connect → create_channel → consume（失敗したら即エラー）
//! 2. Consuming: 配送ごとに判定 → ack / requeue → 終了判定
//! 3. Stopping: CycleDetect の正常終了なら cancel して drain 猶予を待つ
//! 4. Closed: チャネルと接続を必ず close（どの終了経路でも 1 回だけ）
//!
//! # 並行性
//! ループは 1 本の論理スレッドで動く状態機械です。配送とアイドルタイマーは
//! `select!` で競合させるので、タイムアウトと正常終了は同時に起こりません。
//! 配送コールバックを並行に呼ぶブローカーに差し替える場合は、
//! Subscription の手前で直列化してください。

use std::time::Duration;

use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, debug, error, info, info_span, warn};
use ulid::Ulid;

use super::builder::SweepLoopBuilder;
use super::cycle::CycleDetector;
use super::disposition::DispositionEngine;
use super::idle::IdleTimeoutGuard;
use crate::domain::{
    ConsumerTag, CycleKeyExtractor, Delivery, LoopState, LoopStrategy, MessageChecker,
    Payload, PredicateError, RemovePredicate, StopReason, SweepError,
};
use crate::ports::{Broker, BrokerChannel, BrokerConnection, Subscription};

/// A configured sweep over one queue. Each [`SweepLoop::run`] is an independent
/// invocation with its own connection, channel and state.
pub struct SweepLoop {
    url: String,
    queue: String,
    strategy: LoopStrategy,
}

impl SweepLoop {
    pub fn builder() -> SweepLoopBuilder {
        SweepLoopBuilder::new()
    }

    pub(crate) fn new(url: String, queue: String, strategy: LoopStrategy) -> Self {
        Self {
            url,
            queue,
            strategy,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn strategy(&self) -> &LoopStrategy {
        &self.strategy
    }

    /// Run the loop to completion.
    ///
    /// Returns the number of removed (acked) messages, or the single failure
    /// that ended the loop.
    pub async fn run(&self, broker: &dyn Broker) -> Result<u64, SweepError> {
        let span = info_span!(
            "sweep",
            run_id = %Ulid::new(),
            queue = %self.queue,
            strategy = self.strategy.name(),
        );
        self.run_inner(broker).instrument(span).await
    }

    async fn run_inner(&self, broker: &dyn Broker) -> Result<u64, SweepError> {
        let mut state = LoopState::new();

        let connection = broker.connect(&self.url).await.map_err(|e| {
            error!(error = %e, "failed to connect");
            SweepError::Connection(e)
        })?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = %e, "failed to create channel");
                close_connection(connection).await;
                return Err(SweepError::Channel(e));
            }
        };

        let consumer = ConsumerTag::generate();
        let mut subscription = match channel.consume(&self.queue, &consumer).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(error = %e, "failed to consume");
                release(channel, connection).await;
                return Err(SweepError::Subscribe(e));
            }
        };

        state.begin_consuming();
        info!(consumer = %consumer, "consuming");

        let (result, mut state) = {
            let mut run = LoopRun::new(&self.strategy, channel.as_ref(), state);
            let result = run.consume(&mut subscription).await;

            if result.is_ok()
                && let LoopStrategy::CycleDetect { drain_grace, .. } = &self.strategy
            {
                if let Err(e) = channel.cancel(&consumer).await {
                    warn!(error = %e, "failed to cancel consumer");
                }
                run.drain(&mut subscription, *drain_grace).await;
            }
            (result, run.state)
        };

        drop(subscription);
        release(channel, connection).await;
        state.close();

        let removed = state.removed;
        match &result {
            Ok(()) => info!(removed, "sweep finished"),
            Err(e) => error!(error = %e, removed, "sweep failed"),
        }
        result.map(|()| removed)
    }
}

/// Close the channel, then the connection. Failures are logged, never returned,
/// so they cannot replace the outcome.
async fn release(channel: Box<dyn BrokerChannel>, connection: Box<dyn BrokerConnection>) {
    if let Err(e) = channel.close().await {
        warn!(error = %e, "failed to close channel");
    }
    close_connection(connection).await;
}

async fn close_connection(connection: Box<dyn BrokerConnection>) {
    if let Err(e) = connection.close().await {
        warn!(error = %e, "failed to close connection");
    }
}

/// Termination policy of one run.
enum Policy<'a> {
    CycleDetect {
        detector: CycleDetector,
        remove: &'a dyn RemovePredicate,
        key: &'a dyn CycleKeyExtractor,
    },
    Instructed {
        guard: IdleTimeoutGuard,
        checker: &'a dyn MessageChecker,
    },
}

/// Per-delivery verdict: dispose first, then stop if asked.
struct Verdict {
    remove: bool,
    stop: bool,
}

enum Step {
    Continue,
    Stop,
    Ignored,
}

struct LoopRun<'a> {
    state: LoopState,
    engine: DispositionEngine<'a>,
    policy: Policy<'a>,
}

impl<'a> LoopRun<'a> {
    fn new(strategy: &'a LoopStrategy, channel: &'a dyn BrokerChannel, state: LoopState) -> Self {
        let policy = match strategy {
            LoopStrategy::CycleDetect { remove, key, .. } => Policy::CycleDetect {
                detector: CycleDetector::new(),
                remove: remove.as_ref(),
                key: key.as_ref(),
            },
            LoopStrategy::Instructed {
                checker,
                idle_timeout,
            } => Policy::Instructed {
                guard: IdleTimeoutGuard::arm(*idle_timeout),
                checker: checker.as_ref(),
            },
        };
        Self {
            state,
            engine: DispositionEngine::new(channel),
            policy,
        }
    }

    /// Consume until a normal stop (`Ok`) or a failure.
    async fn consume(&mut self, subscription: &mut Subscription) -> Result<(), SweepError> {
        loop {
            let next = match &mut self.policy {
                Policy::CycleDetect { .. } => subscription.next().await,
                Policy::Instructed { guard, .. } => {
                    tokio::select! {
                        biased;
                        delivery = subscription.next() => delivery,
                        _ = guard.expired() => {
                            self.state.stop(StopReason::Timeout);
                            warn!(window = ?guard.window(), "no message received");
                            return Err(SweepError::IdleTimeout {
                                window: guard.window(),
                                removed: self.state.removed,
                            });
                        }
                    }
                }
            };

            match self.handle(next).await? {
                Step::Stop => return Ok(()),
                Step::Continue | Step::Ignored => {}
            }
        }
    }

    /// Handle one delivery callback.
    async fn handle(&mut self, delivery: Option<Delivery>) -> Result<Step, SweepError> {
        if self.state.is_stopping() {
            debug!("stopped already");
            return Ok(Step::Ignored);
        }

        let Some(delivery) = delivery else {
            warn!("delivery callback fired without a message");
            self.state.stop(StopReason::Error);
            return Err(SweepError::InvalidDelivery);
        };
        debug!(tag = %delivery.tag, "received message");

        let verdict = match &mut self.policy {
            Policy::CycleDetect {
                detector,
                remove,
                key,
            } => cycle_verdict(detector, *remove, *key, delivery.payload()),
            Policy::Instructed { guard, checker } => {
                guard.on_delivery();
                checker.check(delivery.payload()).map(|i| Verdict {
                    remove: i.remove,
                    stop: !i.proceed,
                })
            }
        };
        let verdict = match verdict {
            Ok(verdict) => verdict,
            Err(e) => {
                // この Delivery は処分しない。チャネル close でブローカーに戻る
                self.state.stop(StopReason::Error);
                return Err(SweepError::Predicate(e));
            }
        };

        let disposition = match self.engine.dispose(delivery, verdict.remove).await {
            Ok(disposition) => disposition,
            Err(e) => {
                self.state.stop(StopReason::Error);
                return Err(e);
            }
        };
        self.state.removed += disposition.removed_delta();

        if verdict.stop {
            self.state.stop(StopReason::Normal);
            return Ok(Step::Stop);
        }
        Ok(Step::Continue)
    }

    /// Swallow deliveries still in flight after cancel, for at most `grace`.
    async fn drain(&mut self, subscription: &mut Subscription, grace: Duration) {
        let deadline = Instant::now() + grace;
        loop {
            match timeout_at(deadline, subscription.next()).await {
                Ok(Some(delivery)) => {
                    // stopping 中なので Ignored になる
                    let _ = self.handle(Some(delivery)).await;
                }
                Ok(None) => {
                    debug!("subscription ended");
                    break;
                }
                Err(_) => break,
            }
        }
    }
}

fn cycle_verdict(
    detector: &mut CycleDetector,
    remove: &dyn RemovePredicate,
    key: &dyn CycleKeyExtractor,
    payload: &Payload,
) -> Result<Verdict, PredicateError> {
    let cycled = detector.observe(key.cycle_key(payload)?);
    if cycled {
        info!("cycle key seen again, queue traversed");
    }
    Ok(Verdict {
        remove: remove.should_remove(payload)?,
        stop: cycled,
    })
}
