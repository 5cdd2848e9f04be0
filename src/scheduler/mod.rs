//! Recurring and on-demand valuation cycles

pub mod cron;

use crate::core::clock::Clock;
use crate::core::error::Result;
use crate::valuation::{CycleReport, ValuationOrchestrator};
use chrono::{DateTime, FixedOffset, Utc};
use cron::{CronError, CronSchedule};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    /// The timer is active, whether waiting or running a cycle.
    pub running: bool,
    pub state: SchedulerState,
    /// Always reported in UTC.
    pub next_run_time: Option<DateTime<Utc>>,
    pub next_run_local: Option<DateTime<FixedOffset>>,
    pub cron_expression: Option<String>,
    pub timezone: String,
    pub cycles_in_progress: usize,
    pub last_report: Option<CycleReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerInfo {
    pub service: &'static str,
    pub description: &'static str,
    pub cron_expression: Option<String>,
    pub timezone: String,
    pub state: SchedulerState,
    pub next_run_time: Option<DateTime<Utc>>,
}

struct Shared {
    state: SchedulerState,
    schedule: Option<CronSchedule>,
    next_run: Option<DateTime<Utc>>,
    last_report: Option<CycleReport>,
    stop: Option<watch::Sender<bool>>,
    // Bumped on every start/stop so a superseded timer cannot overwrite the state
    generation: u64,
}

struct Inner {
    orchestrator: Arc<ValuationOrchestrator>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    shared: Mutex<Shared>,
    active_cycles: AtomicUsize,
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `update` only if `generation` is still the current timer.
    fn update_if_current(&self, generation: u64, update: impl FnOnce(&mut Shared)) -> bool {
        let mut shared = self.shared();
        if shared.generation != generation {
            return false;
        }
        update(&mut shared);
        true
    }
}

struct ActiveCycle<'a>(&'a AtomicUsize);

impl<'a> ActiveCycle<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveCycle<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn execute(inner: Arc<Inner>) -> Result<CycleReport> {
    let _active = ActiveCycle::enter(&inner.active_cycles);
    let result = inner.orchestrator.run_cycle().await;
    match &result {
        Ok(report) => inner.shared().last_report = Some(report.clone()),
        Err(e) => error!(error = %e, "Valuation cycle failed"),
    }
    result
}

/// Drives valuation cycles from a cron expression, plus out-of-band manual runs.
///
/// Stopping prevents future cycles; a cycle already in progress runs to completion.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<ValuationOrchestrator>,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                clock,
                offset,
                shared: Mutex::new(Shared {
                    state: SchedulerState::Idle,
                    schedule: None,
                    next_run: None,
                    last_report: None,
                    stop: None,
                    generation: 0,
                }),
                active_cycles: AtomicUsize::new(0),
            }),
        }
    }

    /// Starts (or restarts) the timer. Must be called from within a Tokio runtime.
    pub fn start(&self, cron_expression: &str) -> Result<(), CronError> {
        let schedule = CronSchedule::parse(cron_expression)?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let first_run = schedule
            .next_after(&self.inner.clock.now().with_timezone(&self.inner.offset))
            .map(|at| at.with_timezone(&Utc));

        let generation = {
            let mut shared = self.inner.shared();
            if let Some(previous) = shared.stop.take() {
                let _ = previous.send(true);
            }
            shared.generation += 1;
            shared.schedule = Some(schedule.clone());
            shared.stop = Some(stop_tx);
            shared.state = SchedulerState::Scheduled;
            shared.next_run = first_run;
            shared.generation
        };

        info!(
            cron = schedule.expression(),
            timezone = %self.inner.offset,
            "Starting valuation scheduler"
        );
        tokio::spawn(run_timer(
            Arc::clone(&self.inner),
            schedule,
            generation,
            stop_rx,
        ));
        Ok(())
    }

    /// Prevents future cycles from starting. Idempotent.
    pub fn stop(&self) {
        let mut shared = self.inner.shared();
        if let Some(stop) = shared.stop.take() {
            let _ = stop.send(true);
            info!("Stopped valuation scheduler");
        }
        shared.generation += 1;
        shared.state = SchedulerState::Stopped;
        shared.next_run = None;
    }

    /// Spawns a cycle outside the schedule and returns immediately.
    pub fn trigger_now(&self) -> JoinHandle<Result<CycleReport>> {
        info!("Manual valuation cycle requested");
        tokio::spawn(execute(Arc::clone(&self.inner)))
    }

    pub fn status(&self) -> SchedulerStatus {
        let shared = self.inner.shared();
        SchedulerStatus {
            running: matches!(
                shared.state,
                SchedulerState::Scheduled | SchedulerState::Running
            ),
            state: shared.state,
            next_run_time: shared.next_run,
            next_run_local: shared
                .next_run
                .map(|at| at.with_timezone(&self.inner.offset)),
            cron_expression: shared.schedule.as_ref().map(|s| s.expression().to_string()),
            timezone: self.inner.offset.to_string(),
            cycles_in_progress: self.inner.active_cycles.load(Ordering::SeqCst),
            last_report: shared.last_report.clone(),
        }
    }

    pub fn next_run_time(&self) -> Option<DateTime<Utc>> {
        self.inner.shared().next_run
    }

    pub fn info(&self) -> SchedulerInfo {
        let status = self.status();
        SchedulerInfo {
            service: env!("CARGO_PKG_NAME"),
            description: "Periodically revalues every holding, records a price snapshot and updates earnings",
            cron_expression: status.cron_expression,
            timezone: status.timezone,
            state: status.state,
            next_run_time: status.next_run_time,
        }
    }
}

async fn run_timer(
    inner: Arc<Inner>,
    schedule: CronSchedule,
    generation: u64,
    mut stop: watch::Receiver<bool>,
) {
    let mut last_fired: Option<DateTime<Utc>> = None;
    loop {
        // Never fire the same slot twice, even if the clock lags behind the timer
        let now = inner.clock.now();
        let from = last_fired.map_or(now, |fired| fired.max(now));
        let Some(next) = schedule
            .next_after(&from.with_timezone(&inner.offset))
            .map(|at| at.with_timezone(&Utc))
        else {
            warn!(cron = schedule.expression(), "Schedule will never fire again");
            inner.update_if_current(generation, |s| {
                s.state = SchedulerState::Idle;
                s.next_run = None;
            });
            return;
        };

        if !inner.update_if_current(generation, |s| {
            s.state = SchedulerState::Scheduled;
            s.next_run = Some(next);
        }) {
            return;
        }
        info!(next_run = %next, "Next valuation cycle scheduled");

        let wait = (next - inner.clock.now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop.changed() => return,
        }
        last_fired = Some(next);

        if !inner.update_if_current(generation, |s| s.state = SchedulerState::Running) {
            return;
        }
        let cycle = tokio::spawn(execute(Arc::clone(&inner)));
        tokio::select! {
            joined = cycle => {
                if let Err(e) = joined {
                    error!(error = %e, "Valuation cycle task panicked");
                }
            }
            // The cycle keeps running on its own task
            _ = stop.changed() => return,
        }
    }
}
