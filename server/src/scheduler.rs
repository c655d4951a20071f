//! Fixed-rate world ticking with catch-up and a deferred task queue
//!
//! The scheduler drives every world at a fixed rate from a single task. When
//! a pass takes longer than one interval, extra passes run back to back (up to
//! [`MAX_CATCH_UP_TICKS`]) so state broadcasts do not fall behind wall time.
//!
//! Other tasks submit closures through a [`DeferredSender`]; they run on the
//! scheduler task right after each pass, which gives cross-task world
//! mutations one well-defined point to happen at.
//!
//! Any error from a tick or a deferred task is fatal: the scheduler logs it,
//! sets its stop flag and runs nothing else.

use crate::world::{TickSummary, WorldError, WorldRegistry};
use log::{debug, error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Upper bound on extra passes after one slow pass
pub const MAX_CATCH_UP_TICKS: u32 = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is stopped")]
    Stopped,

    #[error("tick failed: {0}")]
    Tick(#[from] WorldError),
}

/// Something the scheduler can tick
pub trait TickTarget: Send + Sync + 'static {
    fn tick_all(&self, now: Instant) -> Result<TickSummary, WorldError>;
}

impl TickTarget for WorldRegistry {
    fn tick_all(&self, now: Instant) -> Result<TickSummary, WorldError> {
        WorldRegistry::tick_all(self, now)
    }
}

pub type DeferredTask<T> = Box<dyn FnOnce(&T) -> Result<(), WorldError> + Send>;

/// Submits work to run on the scheduler task after the next pass
pub struct DeferredSender<T> {
    tx: mpsc::UnboundedSender<DeferredTask<T>>,
}

impl<T> Clone for DeferredSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> DeferredSender<T> {
    /// Never blocks; false once the scheduler is gone
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce(&T) -> Result<(), WorldError> + Send + 'static,
    {
        self.tx.send(Box::new(task)).is_ok()
    }
}

/// Outcome of one [`TickScheduler::step`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepReport {
    /// Wall time of the first pass
    pub cost: Duration,
    /// Extra passes run to catch up
    pub catch_up: u32,
    /// Deferred tasks executed
    pub deferred: usize,
    pub summary: TickSummary,
}

/// Extra passes owed after a pass that took `cost`
///
/// Zero when the pass fit in its interval, otherwise `cost / interval`
/// rounded down and capped at `max`.
pub fn ticks_to_catch_up(cost: Duration, interval: Duration, max: u32) -> u32 {
    if interval.is_zero() || cost <= interval {
        return 0;
    }
    let owed = cost.as_nanos() / interval.as_nanos();
    owed.min(max as u128) as u32
}

pub struct TickScheduler<T: TickTarget> {
    target: Arc<T>,
    interval: Duration,
    max_catch_up: u32,
    stopped: Arc<AtomicBool>,
    deferred_tx: mpsc::UnboundedSender<DeferredTask<T>>,
    deferred_rx: mpsc::UnboundedReceiver<DeferredTask<T>>,
    ticks: u64,
}

impl<T: TickTarget> TickScheduler<T> {
    /// A scheduler ticking `target` once per `interval`
    pub fn new(target: Arc<T>, interval: Duration) -> Self {
        let (deferred_tx, deferred_rx) = mpsc::unbounded_channel();
        Self {
            target,
            interval,
            max_catch_up: MAX_CATCH_UP_TICKS,
            stopped: Arc::new(AtomicBool::new(false)),
            deferred_tx,
            deferred_rx,
            ticks: 0,
        }
    }

    pub fn with_max_catch_up(mut self, max_catch_up: u32) -> Self {
        self.max_catch_up = max_catch_up;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    pub fn deferred(&self) -> DeferredSender<T> {
        DeferredSender {
            tx: self.deferred_tx.clone(),
        }
    }

    /// Shared stop flag; setting it ends [`run`](Self::run) at the next interval
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Passes completed so far, catch-up passes included
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    fn fail(&self, err: WorldError) -> SchedulerError {
        error!("World tick failed, stopping scheduler: {}", err);
        self.stopped.store(true, Ordering::Release);
        SchedulerError::Tick(err)
    }

    fn pass(&mut self, now: Instant) -> Result<TickSummary, SchedulerError> {
        match self.target.tick_all(now) {
            Ok(summary) => {
                self.ticks += 1;
                Ok(summary)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Runs every task submitted so far; returns how many ran
    pub fn drain_deferred(&mut self) -> Result<usize, SchedulerError> {
        let mut ran = 0;
        while let Ok(task) = self.deferred_rx.try_recv() {
            if let Err(err) = task(&self.target) {
                return Err(self.fail(err));
            }
            ran += 1;
        }
        Ok(ran)
    }

    /// One scheduled slot: a pass, any catch-up passes, then the deferred queue
    pub fn step(&mut self) -> Result<StepReport, SchedulerError> {
        if self.is_stopped() {
            return Err(SchedulerError::Stopped);
        }

        let started = Instant::now();
        let mut summary = self.pass(started)?;
        let cost = started.elapsed();

        let catch_up = ticks_to_catch_up(cost, self.interval, self.max_catch_up);
        if catch_up > 0 {
            warn!(
                "Tick took {:?} against a {:?} interval, running {} catch-up ticks",
                cost, self.interval, catch_up
            );
            for _ in 0..catch_up {
                let extra = self.pass(Instant::now())?;
                summary.flushed_bytes += extra.flushed_bytes;
                summary.timed_out += extra.timed_out;
                summary.broadcast += extra.broadcast;
            }
        }

        let deferred = self.drain_deferred()?;
        Ok(StepReport {
            cost,
            catch_up,
            deferred,
            summary,
        })
    }

    /// Ticks at the configured rate until stopped or a tick fails
    pub async fn run(mut self) -> Result<(), SchedulerError> {
        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!("Scheduler running every {:?}", self.interval);
        loop {
            timer.tick().await;
            if self.is_stopped() {
                debug!("Scheduler stopped after {} ticks", self.ticks);
                return Ok(());
            }
            self.step()?;
        }
    }
}
