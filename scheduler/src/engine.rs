//! Background refresh loop.
//!
//! Each cycle:
//!   1. Runs the shared [`RefreshPipeline`] with a cold cache.
//!   2. Records the outcome in [`SchedulerStats`].
//!   3. Sleeps `interval` in `sleep_slice` steps, watching the stop signal.
//!
//! A failing or panicking cycle is logged and counted; the loop carries on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info};

use common::logger::{CycleId, cycle_span};

use crate::errors::SchedulerError;
use crate::pipeline::{CycleOutcome, FetchMode, RefreshPipeline};
use crate::stats::{SchedulerStats, bump};

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Granularity at which the stop signal is observed while sleeping.
    pub sleep_slice: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            sleep_slice: Duration::from_secs(10),
        }
    }
}

pub struct RefreshScheduler {
    pipeline: Arc<RefreshPipeline>,
    cfg: SchedulerConfig,
    running: AtomicBool,
    stats: SchedulerStats,
}

impl RefreshScheduler {
    pub fn new(pipeline: Arc<RefreshPipeline>, cfg: SchedulerConfig) -> Self {
        Self {
            pipeline,
            cfg,
            running: AtomicBool::new(false),
            stats: SchedulerStats::default(),
        }
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the loop. At most one loop per scheduler may run at a time.
    pub fn start(self: &Arc<Self>) -> Result<SchedulerHandle, SchedulerError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let this = Arc::clone(self);

        let task = tokio::spawn(async move {
            this.run_loop(stop_rx).await;
            this.running.store(false, Ordering::SeqCst);
        });

        Ok(SchedulerHandle { stop_tx, task })
    }

    async fn run_loop(&self, mut stop: watch::Receiver<bool>) {
        info!(
            interval_secs = self.cfg.interval.as_secs(),
            sleep_slice_secs = self.cfg.sleep_slice.as_secs(),
            symbols = self.pipeline.config().symbols.len(),
            "refresh scheduler started"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            self.run_cycle().await;

            if !self.sleep_between_cycles(&mut stop).await {
                break;
            }
        }

        info!("refresh scheduler stopped");
    }

    async fn run_cycle(&self) {
        bump(&self.stats.cycles_started);

        let span = cycle_span("scheduler", CycleId::new());
        let pipeline = Arc::clone(&self.pipeline);

        // Spawned so a panic inside the pipeline surfaces as a JoinError here
        // instead of tearing down the loop.
        let cycle = tokio::spawn(
            async move { pipeline.run_once(Utc::now(), FetchMode::Refresh).await }
                .instrument(span.clone()),
        );

        match cycle.await {
            Ok(Ok(CycleOutcome::Empty { warnings })) => {
                bump(&self.stats.cycles_empty);
                info!(failed_symbols = warnings.len(), "cycle produced no rows");
            }
            Ok(Ok(CycleOutcome::Reused { rows, .. })) => {
                span.record("rows", rows);
                info!("cycle served from cache; nothing stored");
            }
            Ok(Ok(CycleOutcome::Stored { rows, unusual, .. })) => {
                span.record("rows", rows);
                bump(&self.stats.cycles_stored);
                if !unusual.is_empty() {
                    bump(&self.stats.alerts_raised);
                }
            }
            Ok(Err(e)) => {
                bump(&self.stats.cycles_failed);
                error!(error = ?e, "refresh cycle failed; retrying next interval");
            }
            Err(e) => {
                bump(&self.stats.cycles_failed);
                error!(error = %e, "refresh cycle aborted; retrying next interval");
            }
        }
    }

    /// Returns `false` once a stop was requested.
    async fn sleep_between_cycles(&self, stop: &mut watch::Receiver<bool>) -> bool {
        let mut remaining = self.cfg.interval;

        while !remaining.is_zero() {
            let step = if self.cfg.sleep_slice.is_zero() {
                remaining
            } else {
                remaining.min(self.cfg.sleep_slice)
            };

            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                changed = stop.changed() => {
                    // A dropped sender counts as a stop request.
                    if changed.is_err() || *stop.borrow() {
                        return false;
                    }
                }
            }

            remaining = remaining.saturating_sub(step);
        }

        !*stop.borrow()
    }
}

/// Controls a running loop. Dropping the handle also stops the loop.
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop and waits for it to exit. An in-flight cycle finishes first.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "refresh scheduler task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
