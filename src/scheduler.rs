use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerOptions;
use crate::error::{QueueError, Result};
use crate::registry::JobRegistry;
use crate::runner::resolve_queue_names;
use crate::store::{Backend, Connections, QueueHandle};

struct Running {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Runs a scheduler for one or more queues.
///
/// A scheduler promotes delayed and repeating items once they are due and
/// puts stalled items (whose consumer died or hung) back in line. It must run
/// for every queue that receives scheduled or repeated jobs; one scheduler per
/// queue is usually enough.
pub struct SchedulerRunner {
    registry: Arc<JobRegistry>,
    connections: Connections,
    options: SchedulerOptions,
    running: Mutex<Option<Running>>,
}

impl SchedulerRunner {
    pub fn new(registry: Arc<JobRegistry>, backend: Arc<dyn Backend>, options: SchedulerOptions) -> Self {
        Self {
            registry,
            connections: Connections::new(backend),
            options,
            running: Mutex::new(None),
        }
    }

    /// Starts a scheduler for `only_queues`, or for every registered queue when empty.
    pub async fn start(&self, only_queues: &[&str]) -> Result<()> {
        let queue_names = resolve_queue_names(&self.registry, only_queues)?;

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(QueueError::Configuration(
                "scheduler runner is already started".into(),
            ));
        }

        info!(queues = ?queue_names, "Starting scheduler for {} queues", queue_names.len());

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::with_capacity(queue_names.len());
        for queue in &queue_names {
            let handle = match self.connections.get(queue).await {
                Ok(handle) => handle,
                Err(e) => {
                    shutdown.cancel();
                    for task in tasks {
                        let _ = task.await;
                    }
                    self.connections.close_all().await.ok();
                    return Err(e.into());
                }
            };
            tasks.push(tokio::spawn(promote(handle, shutdown.clone(), self.options.clone())));
        }

        *running = Some(Running { shutdown, tasks });
        Ok(())
    }

    /// Stops every per-queue scheduler. Safe to call more than once.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        running.shutdown.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Scheduler task ended abnormally");
            }
        }
        self.connections.close_all().await?;
        info!("Scheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

async fn promote(handle: Arc<dyn QueueHandle>, shutdown: CancellationToken, options: SchedulerOptions) {
    let queue = handle.name().to_string();
    let mut promote_tick = interval(options.promote_interval);
    promote_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stalled_tick = interval(options.stalled_interval);
    stalled_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(queue = %queue, "Scheduler started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = promote_tick.tick() => match handle.promote_due().await {
                Ok(0) => {}
                Ok(promoted) => debug!(queue = %queue, promoted, "Promoted due jobs"),
                Err(e) => error!(queue = %queue, error = %e, "Failed to promote due jobs"),
            },
            _ = stalled_tick.tick() => match handle.recover_stalled(options.stalled_after).await {
                Ok(0) => {}
                Ok(recovered) => warn!(queue = %queue, recovered, "Recovered stalled jobs"),
                Err(e) => error!(queue = %queue, error = %e, "Failed to recover stalled jobs"),
            },
        }
    }
    debug!(queue = %queue, "Scheduler stopped");
}
