//! Scheduler loop and keep-alive heartbeat.
//!
//! The scheduler runs a [`PostingCycle`] once immediately, then once per
//! interval. After `failure_threshold` consecutive failures it sleeps an
//! extra cooldown before resuming. Every sleep races the
//! [`CancellationToken`], so shutdown never waits for a full interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Heartbeat period of [`keep_alive`].
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(14 * 60);

/// Something the scheduler can run on a timer.
#[async_trait]
pub trait PostingCycle: Send {
    /// Run once. Returns true on success.
    async fn run_cycle(&mut self, cancel: &CancellationToken) -> bool;
}

/// Scheduler timing and failure policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    /// How often remaining sleep time is logged.
    pub progress_log_interval: Duration,
    /// How often remaining cooldown time is logged.
    pub cooldown_log_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            failure_threshold: 5,
            cooldown: Duration::from_secs(1800),
            progress_log_interval: Duration::from_secs(900),
            cooldown_log_interval: Duration::from_secs(300),
        }
    }
}

/// Totals returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerSummary {
    pub post_count: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Live counters for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BotStats {
    pub started_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub post_count: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub running: bool,
}

impl BotStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            last_run_at: None,
            last_success_at: None,
            post_count: 0,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            running: false,
        }
    }
}

impl Default for BotStats {
    fn default() -> Self {
        Self::new()
    }
}

/// [`BotStats`] shared between the scheduler and readers.
#[derive(Debug, Clone, Default)]
pub struct SharedStats(Arc<RwLock<BotStats>>);

impl SharedStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> BotStats {
        self.0.read().clone()
    }

    fn update(&self, f: impl FnOnce(&mut BotStats)) {
        f(&mut self.0.write());
    }
}

/// Sleep for `duration` unless cancelled first.
///
/// Logs the remaining time every `progress_every`. Returns false when
/// cancelled.
pub async fn wait_or_cancel(
    duration: Duration,
    progress_every: Duration,
    cancel: &CancellationToken,
) -> bool {
    let step = if progress_every.is_zero() {
        duration
    } else {
        progress_every
    };
    let mut remaining = duration;

    while !remaining.is_zero() {
        let chunk = remaining.min(step);
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(chunk) => {}
        }
        remaining -= chunk;
        if !remaining.is_zero() {
            info!(remaining_mins = remaining.as_secs() / 60, "waiting for next posting run");
        }
    }
    !cancel.is_cancelled()
}

/// Drives a [`PostingCycle`] on a fixed interval.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
    stats: SharedStats,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            stats: SharedStats::new(),
        }
    }

    /// Mirror counters into `stats`.
    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run until `cancel` fires.
    pub async fn run<C>(&self, cycle: &mut C, cancel: &CancellationToken) -> SchedulerSummary
    where
        C: PostingCycle + ?Sized,
    {
        let mut summary = SchedulerSummary::default();
        let mut consecutive_failures = 0u32;
        self.stats.update(|s| s.running = true);

        info!(
            interval_secs = self.config.interval.as_secs(),
            failure_threshold = self.config.failure_threshold,
            "scheduler started"
        );

        if !cancel.is_cancelled() {
            info!("running first posting cycle");
            let success = cycle.run_cycle(cancel).await;
            self.record(&mut summary, success, None);
        }

        loop {
            let interval = self.config.interval;
            if !wait_or_cancel(interval, self.config.progress_log_interval, cancel).await {
                break;
            }

            info!(run = summary.post_count + 1, "starting posting cycle");
            let success = cycle.run_cycle(cancel).await;
            if success {
                consecutive_failures = 0;
            } else {
                consecutive_failures += 1;
            }
            self.record(&mut summary, success, Some(consecutive_failures));

            if consecutive_failures >= self.config.failure_threshold {
                warn!(
                    consecutive_failures,
                    cooldown_secs = self.config.cooldown.as_secs(),
                    "too many consecutive failures, cooling down"
                );
                let cooldown = self.config.cooldown;
                if !wait_or_cancel(cooldown, self.config.cooldown_log_interval, cancel).await {
                    break;
                }
                consecutive_failures = 0;
                self.stats.update(|s| s.consecutive_failures = 0);
            }
        }

        self.stats.update(|s| s.running = false);
        info!(
            posts = summary.post_count,
            successes = summary.successes,
            failures = summary.failures,
            "scheduler stopped"
        );
        summary
    }

    fn record(&self, summary: &mut SchedulerSummary, success: bool, consecutive: Option<u32>) {
        summary.post_count += 1;
        if success {
            summary.successes += 1;
        } else {
            summary.failures += 1;
        }
        debug!(success, post_count = summary.post_count, "posting cycle finished");

        let now = Utc::now();
        let summary = *summary;
        self.stats.update(|s| {
            s.post_count = summary.post_count;
            s.successes = summary.successes;
            s.failures = summary.failures;
            s.last_run_at = Some(now);
            if success {
                s.last_success_at = Some(now);
            }
            if let Some(consecutive) = consecutive {
                s.consecutive_failures = consecutive;
            }
        });
    }
}

/// Log a heartbeat every `interval` until cancelled.
///
/// Returns the number of heartbeats logged.
pub async fn keep_alive(interval: Duration, cancel: CancellationToken) -> u64 {
    let mut beats = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                beats += 1;
                info!(beats, "keep-alive heartbeat");
            }
        }
    }
    debug!(beats, "keep-alive stopped");
    beats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    /// Plays back scripted outcomes, then cancels.
    struct ScriptedCycle {
        outcomes: VecDeque<bool>,
        runs: Vec<Instant>,
        stop: CancellationToken,
    }

    impl ScriptedCycle {
        fn new(outcomes: impl IntoIterator<Item = bool>, stop: CancellationToken) -> Self {
            Self {
                outcomes: outcomes.into_iter().collect(),
                runs: Vec::new(),
                stop,
            }
        }
    }

    #[async_trait]
    impl PostingCycle for ScriptedCycle {
        async fn run_cycle(&mut self, _cancel: &CancellationToken) -> bool {
            self.runs.push(Instant::now());
            let outcome = self.outcomes.pop_front().unwrap_or(false);
            if self.outcomes.is_empty() {
                self.stop.cancel();
            }
            outcome
        }
    }

    fn gaps(runs: &[Instant]) -> Vec<Duration> {
        runs.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_on_interval() {
        let cancel = CancellationToken::new();
        let mut cycle = ScriptedCycle::new([true, true, false], cancel.clone());

        let summary = Scheduler::new(SchedulerConfig::default()).run(&mut cycle, &cancel).await;

        assert_eq!(
            summary,
            SchedulerSummary {
                post_count: 3,
                successes: 2,
                failures: 1
            }
        );
        assert_eq!(gaps(&cycle.runs), vec![Duration::from_secs(3600); 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_after_threshold() {
        let cancel = CancellationToken::new();
        // First run is not counted; runs 2-6 are the five consecutive failures.
        let mut cycle = ScriptedCycle::new([false; 7], cancel.clone());
        let scheduler = Scheduler::new(SchedulerConfig::default());

        let summary = scheduler.run(&mut cycle, &cancel).await;

        assert_eq!(summary.failures, 7);
        let gaps = gaps(&cycle.runs);
        assert_eq!(gaps[..5], [Duration::from_secs(3600); 5]);
        assert_eq!(gaps[5], Duration::from_secs(3600 + 1800));
        assert_eq!(scheduler.stats().snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let cancel = CancellationToken::new();
        let outcomes = [false, false, false, false, false, true, false, false, false, false];
        let mut cycle = ScriptedCycle::new(outcomes, cancel.clone());

        Scheduler::new(SchedulerConfig::default()).run(&mut cycle, &cancel).await;

        assert!(gaps(&cycle.runs).iter().all(|g| *g == Duration::from_secs(3600)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep_stops_promptly() {
        let cancel = CancellationToken::new();
        let mut cycle = ScriptedCycle::new([true, true, true], CancellationToken::new());
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let stats = scheduler.stats().clone();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let summary = scheduler.run(&mut cycle, &cancel).await;

        assert_eq!(summary.post_count, 1);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.successes, 1);
        assert!(snapshot.last_success_at.is_some());
        assert!(!snapshot.running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut cycle = ScriptedCycle::new([true], CancellationToken::new());

        let summary = Scheduler::default().run(&mut cycle, &cancel).await;

        assert_eq!(summary, SchedulerSummary::default());
        assert!(cycle.runs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_beats_until_cancelled() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(keep_alive(KEEP_ALIVE_INTERVAL, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_or_cancel_completes() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        assert!(wait_or_cancel(Duration::from_secs(100), Duration::from_secs(30), &cancel).await);
        assert_eq!(started.elapsed(), Duration::from_secs(100));
    }
}
