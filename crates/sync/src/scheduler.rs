//! Periodic background tasks sharing one cancellation token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::SyncError;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// One iteration. Long iterations check `shutdown` at their own loop
    /// boundaries; the scheduler never interrupts a running iteration.
    async fn run_once(&self, shutdown: &CancellationToken) -> Result<(), SyncError>;
}

pub struct Scheduler {
    shutdown: CancellationToken,
    tasks: Vec<Arc<dyn PeriodicTask>>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown, tasks: Vec::new(), handles: Vec::new() }
    }

    pub fn register(&mut self, task: Arc<dyn PeriodicTask>) {
        self.tasks.push(task);
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|task| task.name()).collect()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawns one loop per registered task. Calling it again is a no-op.
    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            return;
        }

        for task in &self.tasks {
            let task = Arc::clone(task);
            let shutdown = self.shutdown.clone();
            info!(
                event_name = "scheduler.task.start",
                task = task.name(),
                interval_ms = task.interval().as_millis() as u64,
                "starting periodic task"
            );
            self.handles.push(tokio::spawn(run_loop(task, shutdown)));
        }
    }

    /// Cancels the shared token and waits for every loop to finish its
    /// current iteration.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(join_error) = handle.await {
                error!(error = %join_error, "periodic task panicked");
            }
        }
        info!(event_name = "scheduler.stopped", "all periodic tasks stopped");
    }
}

async fn run_loop(task: Arc<dyn PeriodicTask>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(task.interval().max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(task_error) = task.run_once(&shutdown).await {
                    warn!(
                        event_name = "scheduler.task.failed",
                        task = task.name(),
                        kind = task_error.kind(),
                        error = %task_error,
                        "periodic task iteration failed"
                    );
                }
            }
        }
    }

    info!(event_name = "scheduler.task.stop", task = task.name(), "periodic task stopped");
}
