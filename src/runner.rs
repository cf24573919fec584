use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::WorkerOptions;
use crate::error::{QueueError, Result};
use crate::registry::JobRegistry;
use crate::resolver::{DefaultResolver, Resolver};
use crate::store::{Backend, Connections, EnqueuedItem, QueueHandle};

/// How one delivery ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(Value),
    Failed { message: String, trace: Vec<String> },
}

/// Timing and outcome of one delivery. Logged, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub queue: String,
    pub name: String,
    pub id: String,
    pub attempt: u32,
    pub duration_ms: u64,
    pub outcome: Outcome,
}

impl ExecutionResult {
    fn log(&self) {
        match &self.outcome {
            Outcome::Succeeded(result) => debug!(
                queue = %self.queue,
                job = %self.name,
                job_id = %self.id,
                attempt = self.attempt,
                duration_ms = self.duration_ms,
                result = %result,
                "[queue: {}] [job: {}] [id: {}] Completed",
                self.queue, self.name, self.id
            ),
            Outcome::Failed { message, trace } => error!(
                queue = %self.queue,
                job = %self.name,
                job_id = %self.id,
                attempt = self.attempt,
                duration_ms = self.duration_ms,
                error = %message,
                trace = ?trace,
                "[queue: {}] [job: {}] [id: {}] Failed",
                self.queue, self.name, self.id
            ),
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self.outcome {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Failed { message, trace } => Err(QueueError::HandlerExecution {
                name: self.name,
                id: self.id,
                message,
                trace,
            }),
        }
    }
}

/// Looks up and runs the handler of a delivered item.
struct Processor {
    registry: Arc<JobRegistry>,
    resolver: Arc<dyn Resolver>,
}

impl Processor {
    async fn process(&self, queue: &str, item: &EnqueuedItem) -> Result<Value> {
        debug!(
            queue,
            job = %item.name,
            job_id = %item.id,
            attempt = item.attempts_made,
            "[queue: {}] [job: {}] [id: {}] Processing",
            queue, item.name, item.id
        );

        let handler = self
            .registry
            .lookup_by_name(&item.name)
            .and_then(|descriptor| self.resolver.resolve(&descriptor));
        let handler = match handler {
            Ok(handler) => handler,
            Err(err) => {
                error!(
                    queue,
                    job = %item.name,
                    job_id = %item.id,
                    attempt = item.attempts_made,
                    error = %err,
                    "[queue: {}] [job: {}] [id: {}] Cannot resolve handler",
                    queue, item.name, item.id
                );
                return Err(err);
            }
        };

        let started = Instant::now();
        let run = AssertUnwindSafe(handler.run(&item.payload)).catch_unwind().await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match run {
            Ok(Ok(value)) => Outcome::Succeeded(value),
            Ok(Err(err)) => Outcome::Failed {
                message: err.to_string(),
                trace: err.chain().map(|cause| cause.to_string()).collect(),
            },
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                Outcome::Failed {
                    trace: vec![format!("panic: {message}")],
                    message,
                }
            }
        };

        let result = ExecutionResult {
            queue: queue.to_string(),
            name: item.name.clone(),
            id: item.id.clone(),
            attempt: item.attempts_made + 1,
            duration_ms,
            outcome,
        };
        result.log();
        result.into_result()
    }

    /// Runs one item and reports the outcome to the store, which decides about retries.
    async fn deliver(&self, handle: &dyn QueueHandle, item: EnqueuedItem) {
        let queue = handle.name();
        match self.process(queue, &item).await {
            Ok(value) => {
                if let Err(e) = handle.complete(&item, &value).await {
                    error!(queue, job_id = %item.id, error = %e, "Failed to mark job completed");
                }
            }
            Err(err) => match handle.fail(&item, &err.to_string()).await {
                Ok(disposition) => {
                    debug!(queue, job_id = %item.id, ?disposition, "Reported job failure");
                }
                Err(e) => {
                    error!(queue, job_id = %item.id, error = %e, "Failed to mark job failed");
                }
            },
        }
    }
}

struct Running {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Runs a pool of consumers for one or more queues.
///
/// Each queue gets its own consumers (as many as its configured concurrency);
/// a consumer pulls one item at a time and executes it to completion.
pub struct WorkerRunner {
    processor: Arc<Processor>,
    connections: Connections,
    options: WorkerOptions,
    running: Mutex<Option<Running>>,
}

impl WorkerRunner {
    pub fn new(registry: Arc<JobRegistry>, backend: Arc<dyn Backend>, options: WorkerOptions) -> Self {
        Self {
            processor: Arc::new(Processor {
                registry,
                resolver: Arc::new(DefaultResolver),
            }),
            connections: Connections::new(backend),
            options,
            running: Mutex::new(None),
        }
    }

    /// Resolves handler instances through `resolver` instead of `Default`.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.processor = Arc::new(Processor {
            registry: Arc::clone(&self.processor.registry),
            resolver,
        });
        self
    }

    /// Starts consumers for `only_queues`, or for every registered queue when empty.
    pub async fn start(&self, only_queues: &[&str]) -> Result<()> {
        let queue_names = resolve_queue_names(&self.processor.registry, only_queues)?;

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(QueueError::Configuration("worker runner is already started".into()));
        }

        info!(queues = ?queue_names, "Starting worker for {} queues", queue_names.len());

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();
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
            let concurrency = self.options.concurrency_for(queue);
            for slot in 0..concurrency {
                tasks.push(tokio::spawn(consume(
                    Arc::clone(&self.processor),
                    Arc::clone(&handle),
                    shutdown.clone(),
                    self.options.poll_interval,
                    slot,
                )));
            }
            info!(queue = %queue, concurrency, "Worker pool started");
        }

        *running = Some(Running { shutdown, tasks });
        Ok(())
    }

    /// Stops pulling new items, waits for in-flight ones, then closes the queue handles.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        running.shutdown.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        self.connections.close_all().await?;
        info!("Worker stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Executes one delivered item: resolve, run, time and log it.
    ///
    /// Errors are returned, never swallowed, so the caller can report them
    /// to the store.
    pub async fn process(&self, queue: &str, item: &EnqueuedItem) -> Result<Value> {
        self.processor.process(queue, item).await
    }
}

async fn consume(
    processor: Arc<Processor>,
    handle: Arc<dyn QueueHandle>,
    shutdown: CancellationToken,
    poll_interval: std::time::Duration,
    slot: usize,
) {
    debug!(queue = handle.name(), slot, "Consumer started");
    while !shutdown.is_cancelled() {
        match handle.next().await {
            Ok(Some(item)) => processor.deliver(handle.as_ref(), item).await,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                error!(queue = handle.name(), error = %e, "Failed to fetch next job");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(poll_interval) => {}
                }
            }
        }
    }
    debug!(queue = handle.name(), slot, "Consumer stopped");
}

/// `only_queues` when given, otherwise every queue known to the registry.
pub(crate) fn resolve_queue_names(registry: &JobRegistry, only_queues: &[&str]) -> Result<BTreeSet<String>> {
    let names: BTreeSet<String> = if only_queues.is_empty() {
        registry.queue_names()
    } else {
        only_queues.iter().map(|q| q.to_string()).collect()
    };

    if names.is_empty() {
        return Err(QueueError::Configuration(
            "could not find any registered queues (or jobs)".into(),
        ));
    }
    Ok(names)
}
