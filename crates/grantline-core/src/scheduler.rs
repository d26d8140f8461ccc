use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::enqueue::ActiveSourceEnqueuer;

const DEFAULT_INTERVAL_MINUTES: u64 = 360;

/// Periodic enqueue settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub run_on_start: bool,
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_on_start: true,
            interval: Duration::from_secs(DEFAULT_INTERVAL_MINUTES * 60),
        }
    }
}

impl SchedulerConfig {
    /// Reads `SCRAPER_SCHEDULE_ENABLED`, `SCRAPER_RUN_ON_START` and
    /// `SCRAPER_INTERVAL_MINUTES` through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let minutes = lookup("SCRAPER_INTERVAL_MINUTES")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_INTERVAL_MINUTES);

        Self {
            enabled: lookup("SCRAPER_SCHEDULE_ENABLED")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.enabled),
            run_on_start: lookup("SCRAPER_RUN_ON_START")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.run_on_start),
            interval: Duration::from_secs(minutes * 60),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous cycle was still running.
    Skipped,
    Queued(usize),
    Failed(String),
}

/// Periodically enqueues every active source.
///
/// The in-progress flag is process-local; run a single scheduler per deployment.
#[derive(Clone)]
pub struct Scheduler<E: ActiveSourceEnqueuer> {
    enqueuer: E,
    config: SchedulerConfig,
    in_progress: Arc<AtomicBool>,
}

/// Clears the in-progress flag even if the cycle panics.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<E: ActiveSourceEnqueuer> Scheduler<E> {
    pub fn new(enqueuer: E, config: SchedulerConfig) -> Self {
        Self {
            enqueuer,
            config,
            in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Runs one enqueue cycle unless another one is in flight.
    pub async fn tick(&self) -> TickOutcome {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Previous scheduled run still in progress, skipping tick");
            return TickOutcome::Skipped;
        }
        let _guard = CycleGuard(&self.in_progress);

        match self.enqueuer.enqueue_active_sources().await {
            Ok(summary) => {
                tracing::info!(queued = summary.queued, "Scheduled enqueue finished");
                TickOutcome::Queued(summary.queued)
            }
            Err(e) => {
                tracing::error!(error = %e, "Scheduled enqueue failed");
                TickOutcome::Failed(e.to_string())
            }
        }
    }

    /// Starts the timer task. Returns `None` when scheduling is disabled.
    ///
    /// Each cycle runs in its own task, so a slow cycle causes later ticks to
    /// be skipped rather than delayed.
    pub fn spawn(self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Scheduled scraping disabled");
            return None;
        }

        let period = self.config.interval;
        let start = if self.config.run_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };
        tracing::info!(
            interval_minutes = period.as_secs() / 60,
            run_on_start = self.config.run_on_start,
            "Scheduler started"
        );

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let scheduler = self.clone();
                        tokio::spawn(async move {
                            scheduler.tick().await;
                        });
                    }
                    () = cancel.cancelled() => break,
                }
            }
            tracing::info!("Scheduler stopped");
        }))
    }
}
