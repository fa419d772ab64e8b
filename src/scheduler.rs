//! Periodic polling of the active channel.
//!
//! ```text
//! Idle ──start──▶ Connecting ──first good fetch──▶ Polling
//!   ▲                 │                               │
//!   └────stop─────────┴───────────────────────────────┘
//!                     └──fetch error (per policy)──▶ Failed
//! ```
//!
//! Every [`ChannelSyncScheduler::start`] mints a fresh [`Activation`] and
//! cancels the previous one before spawning the new poll task, so at most
//! one timer is live. A fetch already in flight for a cancelled activation
//! is allowed to finish; its handler must check [`Activation::is_live`]
//! before touching shared state.

use crate::error::SyncError;
use crate::message::Channel;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What to do when a poll fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// First failure fails the whole widget.
    Strict,
    /// Log and wait for the next tick.
    SkipTick,
    /// Retry with doubling delay; give up after `max_retries` consecutive failures.
    Backoff {
        #[serde(default = "default_max_retries")]
        max_retries: u32,
        #[serde(default = "default_initial_ms")]
        initial_ms: u64,
        #[serde(default = "default_max_ms")]
        max_ms: u64,
    },
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_ms() -> u64 {
    1_000
}

fn default_max_ms() -> u64 {
    60_000
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Backoff {
            max_retries: default_max_retries(),
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureAction {
    /// Wait for the regular tick.
    NextTick,
    /// Sleep, then fetch again straight away.
    RetryAfter(Duration),
    GiveUp,
}

impl FailurePolicy {
    /// Decide after `consecutive` failed fetches in a row (1-based).
    fn on_failure(self, consecutive: u32) -> FailureAction {
        match self {
            Self::Strict => FailureAction::GiveUp,
            Self::SkipTick => FailureAction::NextTick,
            Self::Backoff {
                max_retries,
                initial_ms,
                max_ms,
            } => {
                if consecutive > max_retries {
                    return FailureAction::GiveUp;
                }
                let factor = 1u64 << consecutive.saturating_sub(1).min(20);
                let delay = initial_ms.saturating_mul(factor).min(max_ms);
                FailureAction::RetryAfter(Duration::from_millis(delay))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Connecting,
    Polling,
    Failed,
}

/// One period during which a given channel is the poll target.
#[derive(Debug, Clone)]
pub struct Activation {
    generation: u64,
    channel: Channel,
    token: CancellationToken,
}

impl Activation {
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once the visitor switched away or the session stopped.
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }
}

/// The work done on every tick.
#[async_trait]
pub trait PollHandler: Send + Sync + 'static {
    /// Fetch once for `activation` and apply the result if it is still live.
    async fn poll(&self, activation: &Activation) -> Result<(), SyncError>;

    /// The scheduler stopped polling `activation` because of `error`.
    fn on_failed(&self, activation: &Activation, error: &SyncError);
}

struct SchedulerInner {
    phase: SyncPhase,
    generation: u64,
    current: Option<Activation>,
}

pub struct ChannelSyncScheduler {
    interval: Duration,
    policy: FailurePolicy,
    inner: Arc<Mutex<SchedulerInner>>,
}

impl ChannelSyncScheduler {
    pub fn new(interval: Duration, policy: FailurePolicy) -> Self {
        Self {
            interval,
            policy,
            inner: Arc::new(Mutex::new(SchedulerInner {
                phase: SyncPhase::Idle,
                generation: 0,
                current: None,
            })),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.inner.lock().phase
    }

    /// The live activation, if any.
    pub fn current(&self) -> Option<Activation> {
        self.inner.lock().current.clone()
    }

    /// Make `channel` the poll target: fetch now, then every interval.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, channel: Channel, handler: Arc<dyn PollHandler>) -> Activation {
        let activation = {
            let mut inner = self.inner.lock();
            if let Some(previous) = inner.current.take() {
                previous.token.cancel();
            }
            inner.generation += 1;
            let activation = Activation {
                generation: inner.generation,
                channel,
                token: CancellationToken::new(),
            };
            inner.current = Some(activation.clone());
            inner.phase = SyncPhase::Connecting;
            activation
        };

        tracing::info!(
            channel = %activation.channel.key(),
            generation = activation.generation,
            "sync: connecting"
        );
        tokio::spawn(run_poll_loop(
            Arc::clone(&self.inner),
            activation.clone(),
            handler,
            self.interval,
            self.policy,
        ));
        activation
    }

    /// Tear down the timer. `Failed` stays `Failed`.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.current.take() {
            previous.token.cancel();
            tracing::info!(channel = %previous.channel.key(), "sync: stopped");
        }
        if inner.phase != SyncPhase::Failed {
            inner.phase = SyncPhase::Idle;
        }
    }
}

impl Drop for ChannelSyncScheduler {
    fn drop(&mut self) {
        if let Some(current) = self.inner.lock().current.take() {
            current.token.cancel();
        }
    }
}

fn mark_polling(inner: &Mutex<SchedulerInner>, activation: &Activation) {
    let mut inner = inner.lock();
    let is_current = inner
        .current
        .as_ref()
        .is_some_and(|c| c.generation == activation.generation);
    if is_current && inner.phase == SyncPhase::Connecting {
        inner.phase = SyncPhase::Polling;
        tracing::debug!(channel = %activation.channel.key(), "sync: polling");
    }
}

fn mark_failed(inner: &Mutex<SchedulerInner>, activation: &Activation) -> bool {
    let mut inner = inner.lock();
    let is_current = inner
        .current
        .as_ref()
        .is_some_and(|c| c.generation == activation.generation);
    if is_current {
        inner.current = None;
        inner.phase = SyncPhase::Failed;
    }
    is_current
}

async fn run_poll_loop(
    inner: Arc<Mutex<SchedulerInner>>,
    activation: Activation,
    handler: Arc<dyn PollHandler>,
    interval: Duration,
    policy: FailurePolicy,
) {
    let token = activation.token.clone();
    let mut ticker = tokio::time::interval(interval);
    // A fetch that outlives the interval swallows the missed ticks.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = handler.poll(&activation).await;
        if token.is_cancelled() {
            break;
        }

        let err = match result {
            Ok(()) => {
                consecutive_failures = 0;
                mark_polling(&inner, &activation);
                continue;
            }
            Err(err) => err,
        };

        consecutive_failures += 1;
        match policy.on_failure(consecutive_failures) {
            FailureAction::NextTick => {
                tracing::warn!(channel = %activation.channel.key(), "sync: poll failed, waiting for next tick: {err}");
            }
            FailureAction::RetryAfter(delay) => {
                tracing::warn!(
                    channel = %activation.channel.key(),
                    attempt = consecutive_failures,
                    "sync: poll failed, retrying in {}ms: {err}",
                    delay.as_millis()
                );
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                ticker.reset_immediately();
            }
            FailureAction::GiveUp => {
                tracing::error!(channel = %activation.channel.key(), "sync: giving up: {err}");
                if mark_failed(&inner, &activation) {
                    handler.on_failed(&activation, &err);
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        polled: Mutex<Vec<String>>,
        applied: Mutex<Vec<String>>,
        fail: AtomicBool,
        fetch_delay: Mutex<Option<Duration>>,
        failed_calls: AtomicUsize,
    }

    impl Recorder {
        fn failing() -> Arc<Self> {
            let r = Self::default();
            r.fail.store(true, Ordering::SeqCst);
            Arc::new(r)
        }

        fn slow(delay: Duration) -> Arc<Self> {
            let r = Self::default();
            *r.fetch_delay.lock() = Some(delay);
            Arc::new(r)
        }

        fn polled(&self) -> Vec<String> {
            self.polled.lock().clone()
        }
    }

    #[async_trait]
    impl PollHandler for Recorder {
        async fn poll(&self, activation: &Activation) -> Result<(), SyncError> {
            let key = activation.channel().key().to_string();
            self.polled.lock().push(key.clone());
            let delay = *self.fetch_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::Fetch {
                    channel: key,
                    source: RemoteError::Api {
                        method: "conversations.history",
                        error: "ratelimited".into(),
                    },
                });
            }
            if activation.is_live() {
                self.applied.lock().push(key);
            }
            Ok(())
        }

        fn on_failed(&self, _activation: &Activation, _error: &SyncError) {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn general() -> Channel {
        Channel::new("C1", "general")
    }

    fn random() -> Channel {
        Channel::new("C2", "random")
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = FailurePolicy::Backoff {
            max_retries: 4,
            initial_ms: 1_000,
            max_ms: 3_000,
        };
        assert_eq!(
            policy.on_failure(1),
            FailureAction::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            policy.on_failure(2),
            FailureAction::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            policy.on_failure(3),
            FailureAction::RetryAfter(Duration::from_secs(3))
        );
        assert_eq!(policy.on_failure(5), FailureAction::GiveUp);
        assert_eq!(FailurePolicy::Strict.on_failure(1), FailureAction::GiveUp);
        assert_eq!(
            FailurePolicy::SkipTick.on_failure(100),
            FailureAction::NextTick
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_immediately_then_every_interval() {
        let scheduler = ChannelSyncScheduler::new(DEFAULT_POLL_INTERVAL, FailurePolicy::Strict);
        let rec = Arc::new(Recorder::default());
        assert_eq!(scheduler.phase(), SyncPhase::Idle);

        scheduler.start(general(), rec.clone());
        wait(10).await;
        assert_eq!(rec.polled().len(), 1);
        assert_eq!(scheduler.phase(), SyncPhase::Polling);

        wait(5_000).await;
        assert_eq!(rec.polled().len(), 2);
        wait(10_000).await;
        assert_eq!(rec.polled().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_channels_keeps_one_timer() {
        let scheduler = ChannelSyncScheduler::new(DEFAULT_POLL_INTERVAL, FailurePolicy::Strict);
        let rec = Arc::new(Recorder::default());

        let first = scheduler.start(general(), rec.clone());
        wait(10).await;
        let second = scheduler.start(random(), rec.clone());
        wait(10).await;
        assert!(!first.is_live());
        assert!(second.is_live());
        assert!(second.generation() > first.generation());

        wait(10_000).await;
        assert_eq!(rec.polled(), vec!["general", "random", "random", "random"]);
        assert_eq!(
            scheduler.current().map(|a| a.generation()),
            Some(second.generation())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_for_old_channel_is_not_applied() {
        let scheduler = ChannelSyncScheduler::new(DEFAULT_POLL_INTERVAL, FailurePolicy::Strict);
        let rec = Recorder::slow(Duration::from_secs(8));

        scheduler.start(general(), rec.clone());
        wait(1_000).await;
        scheduler.start(random(), rec.clone());
        wait(9_000).await;

        assert_eq!(rec.applied.lock().clone(), vec!["random"]);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_policy_fails_on_first_error() {
        let scheduler = ChannelSyncScheduler::new(DEFAULT_POLL_INTERVAL, FailurePolicy::Strict);
        let rec = Recorder::failing();

        scheduler.start(general(), rec.clone());
        wait(10).await;
        assert_eq!(scheduler.phase(), SyncPhase::Failed);
        assert_eq!(rec.failed_calls.load(Ordering::SeqCst), 1);
        assert!(scheduler.current().is_none());

        wait(30_000).await;
        assert_eq!(rec.polled().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_tick_policy_keeps_polling() {
        let scheduler = ChannelSyncScheduler::new(DEFAULT_POLL_INTERVAL, FailurePolicy::SkipTick);
        let rec = Recorder::failing();

        scheduler.start(general(), rec.clone());
        wait(10_010).await;
        assert_eq!(rec.polled().len(), 3);
        assert_eq!(scheduler.phase(), SyncPhase::Connecting);
        assert_eq!(rec.failed_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_policy_gives_up_after_retries() {
        let policy = FailurePolicy::Backoff {
            max_retries: 2,
            initial_ms: 1_000,
            max_ms: 60_000,
        };
        let scheduler = ChannelSyncScheduler::new(DEFAULT_POLL_INTERVAL, policy);
        let rec = Recorder::failing();

        scheduler.start(general(), rec.clone());
        wait(10).await;
        assert_eq!(rec.polled().len(), 1);
        wait(1_000).await;
        assert_eq!(rec.polled().len(), 2);
        wait(2_000).await;
        assert_eq!(rec.polled().len(), 3);
        assert_eq!(scheduler.phase(), SyncPhase::Failed);
        assert_eq!(rec.failed_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_recovers_after_success() {
        let policy = FailurePolicy::Backoff {
            max_retries: 1,
            initial_ms: 1_000,
            max_ms: 60_000,
        };
        let scheduler = ChannelSyncScheduler::new(DEFAULT_POLL_INTERVAL, policy);
        let rec = Recorder::failing();

        scheduler.start(general(), rec.clone());
        wait(10).await;
        rec.fail.store(false, Ordering::SeqCst);
        wait(1_000).await;
        assert_eq!(scheduler.phase(), SyncPhase::Polling);

        rec.fail.store(true, Ordering::SeqCst);
        wait(5_000).await;
        assert_ne!(scheduler.phase(), SyncPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tears_down_timer() {
        let scheduler = ChannelSyncScheduler::new(DEFAULT_POLL_INTERVAL, FailurePolicy::Strict);
        let rec = Arc::new(Recorder::default());

        let activation = scheduler.start(general(), rec.clone());
        wait(10).await;
        scheduler.stop();
        assert!(!activation.is_live());
        assert_eq!(scheduler.phase(), SyncPhase::Idle);

        wait(20_000).await;
        assert_eq!(rec.polled().len(), 1);
    }
}
