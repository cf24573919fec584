//! Job-queue layer: a registry binding job handler types to named queues and
//! execution policy, a producer that enqueues, schedules and repeats work, and
//! worker and scheduler runners that consume it from a durable store.
//!
//! ```ignore
//! let mut registry = JobRegistry::new();
//! registry.register::<Greet>(JobConfig::new().name("greet"))?;
//! let registry = Arc::new(registry);
//!
//! let backend: Arc<dyn Backend> = Arc::new(RedisBackend::new(ConnectionOptions::from_env()));
//! let queue = MessageQueue::new(registry.clone(), backend.clone());
//! queue.dispatch::<Greet>(payload!["Ann"]).await?;
//!
//! let worker = WorkerRunner::new(registry.clone(), backend.clone(), WorkerOptions::default());
//! worker.start(&[]).await?;
//! let scheduler = SchedulerRunner::new(registry, backend, SchedulerOptions::default());
//! scheduler.start(&[]).await?;
//! ```

pub mod config;
pub mod cron;
pub mod error;
pub mod job;
pub mod job_metadata;
pub mod module;
pub mod queue;
pub mod rdconfig;
pub mod registry;
pub mod resolver;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod utils;

pub use crate::config::{ConnectionOptions, QueueConfig, SchedulerOptions, WorkerOptions};
pub use crate::error::{QueueError, StoreError};
pub use crate::job::{arg, Job, Payload};
pub use crate::job_metadata::{Backoff, JobOptions, RepeatOptions};
pub use crate::module::HasJobs;
pub use crate::queue::MessageQueue;
pub use crate::registry::{IdGenerator, JobConfig, JobDescriptor, JobRegistry};
pub use crate::resolver::{ContainerResolver, DefaultResolver, Resolver};
pub use crate::runner::{ExecutionResult, Outcome, WorkerRunner};
pub use crate::scheduler::SchedulerRunner;
pub use crate::store::{
    Backend, Disposition, EnqueuedItem, ItemState, MemoryBackend, NewItem, QueueHandle, RedisBackend,
};

#[doc(hidden)]
pub use serde_json;

pub use async_trait::async_trait;
