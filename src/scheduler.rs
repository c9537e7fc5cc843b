//! Periodic background tasks
//!
//! A `PeriodicTask` runs an async job on a fixed interval in a Tokio task.
//! Stopping only ends the wait for the next tick: a job that is already
//! running finishes before the loop exits.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Task '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Task '{0}' is not running")]
    NotRunning(String),

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

/// Handle and stop signal of one started loop
struct LoopHandle {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

pub struct PeriodicTask {
    name: String,
    running: AtomicBool,
    task_handle: StdMutex<Option<LoopHandle>>,
}

impl PeriodicTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: AtomicBool::new(false),
            task_handle: StdMutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start running `job` every `period`, first run one period from now
    pub fn start<F, Fut>(&self, period: Duration, job: F) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(SchedulerError::InvalidInterval(format!(
                "Task '{}' needs a non-zero interval",
                self.name
            )));
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyRunning(self.name.clone()));
        }

        // Each start gets its own signal so a loop left over from an
        // earlier start never picks up a later one
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let name = self.name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            log::info!("Task '{}' started (interval: {:?})", name, period);

            loop {
                tokio::select! {
                    biased;
                    _ = signal.notified() => break,
                    _ = ticker.tick() => {}
                }

                log::debug!("Task '{}' triggered", name);
                job().await;
            }

            log::info!("Task '{}' loop exited", name);
        });

        *self.lock_handle() = Some(LoopHandle { handle, shutdown });
        Ok(())
    }

    /// Stop scheduling new runs; a run in progress completes in the background
    pub fn stop(&self) -> Result<(), SchedulerError> {
        self.signal_stop()?;
        log::info!("Task '{}' stopped", self.name);
        Ok(())
    }

    /// Stop and wait until a run in progress has finished
    pub async fn stop_and_wait(&self) -> Result<(), SchedulerError> {
        if let Some(handle) = self.signal_stop()? {
            if let Err(e) = handle.await {
                log::error!("Task '{}' ended abnormally: {}", self.name, e);
            }
        }
        log::info!("Task '{}' stopped", self.name);
        Ok(())
    }

    fn signal_stop(&self) -> Result<Option<JoinHandle<()>>, SchedulerError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning(self.name.clone()));
        }

        Ok(self.lock_handle().take().map(|running| {
            // notify_one keeps a permit if the loop is busy running the job
            running.shutdown.notify_one();
            running.handle
        }))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, Option<LoopHandle>> {
        // A poisoned lock only means a panic elsewhere; the handle is still valid
        self.task_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(running) = self.lock_handle().take() {
            running.shutdown.notify_one();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
