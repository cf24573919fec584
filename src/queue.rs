use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::Result;
use crate::job::{Job, Payload};
use crate::job_metadata::{JobOptions, RepeatOptions};
use crate::registry::{JobDescriptor, JobRegistry};
use crate::store::{Backend, Connections, EnqueuedItem, NewItem};

/// Adds jobs to their configured queues.
///
/// Routing (queue, name) and the deterministic id come from the registry;
/// when an item becomes ready is decided by the store. Delayed and repeating
/// items only become ready while a [`SchedulerRunner`](crate::SchedulerRunner)
/// runs for their queue.
pub struct MessageQueue {
    registry: Arc<JobRegistry>,
    connections: Connections,
}

impl MessageQueue {
    pub fn new(registry: Arc<JobRegistry>, backend: Arc<dyn Backend>) -> Self {
        Self {
            registry,
            connections: Connections::new(backend),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Adds a job to its designated queue.
    ///
    /// `overrides` are layered over the options the job was registered with.
    pub async fn add_job<J: Job>(
        &self,
        payload: Payload,
        overrides: Option<JobOptions>,
    ) -> Result<EnqueuedItem> {
        let descriptor = self.registry.lookup_by_handler::<J>()?;
        self.enqueue(&descriptor, payload, overrides).await
    }

    /// Same as [`add_job`](Self::add_job) for a job known only by name.
    pub async fn add_job_by_name(
        &self,
        name: &str,
        payload: Payload,
        overrides: Option<JobOptions>,
    ) -> Result<EnqueuedItem> {
        let descriptor = self.registry.lookup_by_name(name)?;
        self.enqueue(&descriptor, payload, overrides).await
    }

    async fn enqueue(
        &self,
        descriptor: &JobDescriptor,
        payload: Payload,
        overrides: Option<JobOptions>,
    ) -> Result<EnqueuedItem> {
        let id = descriptor.generate_id(&payload);
        let options = match overrides {
            Some(overrides) => descriptor.options.merge(&overrides),
            None => descriptor.options.clone(),
        };

        let handle = self.connections.get(&descriptor.queue).await?;
        let item = handle
            .add(NewItem {
                queue: descriptor.queue.clone(),
                name: descriptor.name.clone(),
                payload,
                id,
                options,
            })
            .await?;

        debug!(
            queue = %item.queue,
            job = %item.name,
            job_id = %item.id,
            payload = ?item.payload,
            "Added job \"{}\" to the \"{}\" queue with ID: {}",
            item.name,
            item.queue,
            item.id
        );

        Ok(item)
    }

    /// Dispatches a job to be processed as soon as possible.
    pub async fn dispatch<J: Job>(&self, payload: Payload) -> Result<EnqueuedItem> {
        self.add_job::<J>(payload, None).await
    }

    /// Schedules a job to be processed not sooner than `when`.
    ///
    /// A date in the past makes the item ready immediately, exactly like
    /// [`dispatch`](Self::dispatch).
    pub async fn schedule_at<J: Job>(&self, when: DateTime<Utc>, payload: Payload) -> Result<EnqueuedItem> {
        let delay_ms = (when - Utc::now()).num_milliseconds().max(0);
        let overrides = JobOptions {
            delay_ms: Some(delay_ms),
            ..JobOptions::default()
        };
        self.add_job::<J>(payload, Some(overrides)).await
    }

    /// Schedules a job to be processed after `delay`.
    pub async fn schedule_after<J: Job>(&self, delay: Duration, payload: Payload) -> Result<EnqueuedItem> {
        self.add_job::<J>(payload, Some(JobOptions::new().delay(delay)))
            .await
    }

    /// Schedules a job to be repeated on `schedule`, e.g. every hour:
    ///
    /// ```ignore
    /// queue.repeat::<Report>(RepeatOptions::every(Duration::from_secs(3600)), payload!["daily"]).await?;
    /// ```
    pub async fn repeat<J: Job>(&self, schedule: RepeatOptions, payload: Payload) -> Result<EnqueuedItem> {
        self.add_job::<J>(payload, Some(JobOptions::new().repeat(schedule)))
            .await
    }

    /// Closes every queue handle this producer opened.
    pub async fn close(&self) -> Result<()> {
        self.connections.close_all().await?;
        Ok(())
    }
}
