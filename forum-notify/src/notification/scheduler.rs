//! Coalescing notification scheduler.
//!
//! Forum activity calls [`NotificationScheduler::request_notification`] as
//! often as it likes. The first call while idle arms a delayed sweep; every
//! call after that is absorbed until the sweep has finished. The sweep looks
//! for activity newer than the watermark captured when it was armed, and the
//! watermark moves forward to "now" once it completes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, trace};

use super::clock::{Clock, SystemClock};
use super::sweep::{SweepReport, SweepRunner};
use crate::config::env_string;
use crate::{Error, Result};

/// Default delay between the first signal and the sweep.
pub const DEFAULT_COUNTDOWN: Duration = Duration::from_secs(60);

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay before an armed sweep fires. Zero fires on the next tick.
    pub countdown: Duration,
    /// Starting watermark. Construction time when `None`.
    pub initial_watermark: Option<DateTime<Utc>>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            countdown: DEFAULT_COUNTDOWN,
            initial_watermark: None,
        }
    }
}

impl SchedulerConfig {
    /// Load from environment variables.
    ///
    /// - `NOTIFICATION_COUNTDOWN_SECS`: whole seconds (default: 60)
    /// - `NOTIFICATION_INITIAL_WATERMARK`: RFC 3339 timestamp (default: startup time)
    ///
    /// Invalid values are rejected rather than silently replaced.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = env_string("NOTIFICATION_COUNTDOWN_SECS") {
            config.countdown = parse_countdown(&raw)?;
        }
        if let Some(raw) = env_string("NOTIFICATION_INITIAL_WATERMARK") {
            config.initial_watermark = Some(parse_watermark(&raw)?);
        }
        Ok(config)
    }
}

fn parse_countdown(raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| Error::config(format!("invalid NOTIFICATION_COUNTDOWN_SECS '{raw}': {e}")))
}

fn parse_watermark(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            Error::config(format!(
                "invalid NOTIFICATION_INITIAL_WATERMARK '{raw}': {e}"
            ))
        })
}

/// Snapshot of scheduler counters.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub pending: bool,
    pub last_notification: DateTime<Utc>,
    pub countdown_secs: u64,
    pub sweeps_scheduled: u64,
    pub sweeps_completed: u64,
    pub sweeps_failed: u64,
    pub signals_absorbed: u64,
}

struct SchedulerState {
    /// True while a sweep is armed or running.
    scheduled: bool,
    last_notification: DateTime<Utc>,
    countdown: Duration,
    sweeps_scheduled: u64,
    sweeps_completed: u64,
    sweeps_failed: u64,
    signals_absorbed: u64,
    last_report: Option<SweepReport>,
}

struct Inner {
    state: Mutex<SchedulerState>,
    runner: Arc<dyn SweepRunner>,
    clock: Arc<dyn Clock>,
    runtime: Handle,
    idle: Notify,
}

/// Debounces activity signals into at most one in-flight sweep.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct NotificationScheduler {
    inner: Arc<Inner>,
}

impl NotificationScheduler {
    /// Create a scheduler using the system clock.
    ///
    /// Must be called from within a tokio runtime; sweeps are spawned on it.
    pub fn new(config: &SchedulerConfig, runner: Arc<dyn SweepRunner>) -> Result<Self> {
        Self::with_clock(config, runner, Arc::new(SystemClock))
    }

    /// Create a scheduler with an explicit clock.
    pub fn with_clock(
        config: &SchedulerConfig,
        runner: Arc<dyn SweepRunner>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::scheduling(format!("no tokio runtime available: {e}")))?;
        let last_notification = config.initial_watermark.unwrap_or_else(|| clock.now());

        debug!(
            countdown_secs = config.countdown.as_secs(),
            watermark = %last_notification,
            "Notification scheduler created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState {
                    scheduled: false,
                    last_notification,
                    countdown: config.countdown,
                    sweeps_scheduled: 0,
                    sweeps_completed: 0,
                    sweeps_failed: 0,
                    signals_absorbed: 0,
                    last_report: None,
                }),
                runner,
                clock,
                runtime,
                idle: Notify::new(),
            }),
        })
    }

    /// Signal that new forum activity happened.
    ///
    /// Returns `true` if this call armed a new sweep and `false` if one was
    /// already pending. Never waits for the sweep.
    pub fn request_notification(&self) -> bool {
        let (since, countdown) = {
            let mut state = self.inner.state.lock();
            if state.scheduled {
                state.signals_absorbed += 1;
                trace!("Notification already scheduled, signal absorbed");
                return false;
            }
            state.scheduled = true;
            state.sweeps_scheduled += 1;
            (state.last_notification, state.countdown)
        };

        // Created before spawning so completion runs even if the task never starts.
        let guard = CompletionGuard {
            inner: Arc::clone(&self.inner),
            report: None,
            failed: false,
        };

        debug!(
            since = %since,
            countdown_secs = countdown.as_secs(),
            "Notification sweep scheduled"
        );
        self.inner.runtime.spawn(run_sweep(guard, since, countdown));
        true
    }

    /// Whether a sweep is armed or running.
    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().scheduled
    }

    /// Current watermark.
    pub fn last_notification(&self) -> DateTime<Utc> {
        self.inner.state.lock().last_notification
    }

    /// Report of the most recent successful sweep.
    pub fn last_report(&self) -> Option<SweepReport> {
        self.inner.state.lock().last_report.clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        SchedulerStats {
            pending: state.scheduled,
            last_notification: state.last_notification,
            countdown_secs: state.countdown.as_secs(),
            sweeps_scheduled: state.sweeps_scheduled,
            sweeps_completed: state.sweeps_completed,
            sweeps_failed: state.sweeps_failed,
            signals_absorbed: state.signals_absorbed,
        }
    }

    /// Wait until no sweep is pending.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a completion in between is not missed.
            notified.as_mut().enable();
            if !self.is_pending() {
                return;
            }
            notified.await;
        }
    }
}

async fn run_sweep(mut guard: CompletionGuard, since: DateTime<Utc>, countdown: Duration) {
    if !countdown.is_zero() {
        tokio::time::sleep(countdown).await;
    }

    let runner = Arc::clone(&guard.inner.runner);
    match AssertUnwindSafe(runner.run(since)).catch_unwind().await {
        Ok(Ok(report)) => {
            info!(
                since = %since,
                notified = report.notified_count(),
                failed = report.failure_count(),
                "Notification sweep completed"
            );
            guard.report = Some(report);
        }
        Ok(Err(e)) => {
            error!(since = %since, error = %e, "Notification sweep failed");
            guard.failed = true;
        }
        Err(payload) => {
            error!(
                since = %since,
                "Notification sweep panicked: {}",
                panic_message(payload.as_ref())
            );
            guard.failed = true;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Returns the scheduler to idle when dropped.
struct CompletionGuard {
    inner: Arc<Inner>,
    report: Option<SweepReport>,
    failed: bool,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        // Stored activity only has millisecond resolution.
        let now = self.inner.clock.now().trunc_subsecs(3);
        {
            let mut state = self.inner.state.lock();
            state.scheduled = false;
            if now > state.last_notification {
                state.last_notification = now;
            }
            state.sweeps_completed += 1;
            if self.failed {
                state.sweeps_failed += 1;
            }
            if let Some(report) = self.report.take() {
                state.last_report = Some(report);
            }
        }
        self.inner.idle.notify_waiters();
    }
}
