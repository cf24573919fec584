// src/store/mod.rs
//! Seam to the durable backing store.
//!
//! The store owns delivery, delay, repeat and retry bookkeeping. The producer
//! and the runners only talk to it through [`Backend`] and [`QueueHandle`].

pub mod memory;
pub mod redis_backend;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::job::Payload;
use crate::job_metadata::JobOptions;

pub use self::memory::{MemoryBackend, QueueCounts};
pub use self::redis_backend::RedisBackend;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// What the producer hands to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub queue: String,
    pub name: String,
    pub payload: Payload,
    /// Deterministic id; the store assigns one when absent.
    pub id: Option<String>,
    pub options: JobOptions,
}

/// One durable unit of work, as stored and delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueuedItem {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub payload: Payload,
    pub options: JobOptions,
    #[serde(default)]
    pub attempts_made: u32,
    #[serde(default)]
    pub repeat_count: u32,
    pub created_at: DateTime<Utc>,
}

impl EnqueuedItem {
    pub fn from_new(item: NewItem, id: String) -> Self {
        Self {
            id,
            queue: item.queue,
            name: item.name,
            payload: item.payload,
            options: item.options,
            attempts_made: 0,
            repeat_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// Where an item lives inside a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Waiting => "waiting",
            ItemState::Delayed => "delayed",
            ItemState::Active => "active",
            ItemState::Completed => "completed",
            ItemState::Failed => "failed",
        }
    }
}

/// The store's decision after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retrying { delay_ms: u64 },
    Dead,
}

/// Opens per-queue handles on a backing store.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn connect(&self, queue: &str) -> StoreResult<Arc<dyn QueueHandle>>;
}

/// Connection to a single named queue.
#[async_trait]
pub trait QueueHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Stores a new item. When `item.id` already exists the existing item is returned.
    async fn add(&self, item: NewItem) -> StoreResult<EnqueuedItem>;

    /// Pulls the next ready item and marks it active.
    async fn next(&self) -> StoreResult<Option<EnqueuedItem>>;

    async fn complete(&self, item: &EnqueuedItem, result: &Value) -> StoreResult<()>;

    async fn fail(&self, item: &EnqueuedItem, error: &str) -> StoreResult<Disposition>;

    /// Moves delayed items whose due time has passed to the ready list.
    async fn promote_due(&self) -> StoreResult<usize>;

    /// Puts back items that stayed active longer than `stalled_after`.
    async fn recover_stalled(&self, stalled_after: Duration) -> StoreResult<usize>;

    async fn close(&self) -> StoreResult<()>;
}

/// Lazily opened handles, one per queue name.
pub struct Connections {
    backend: Arc<dyn Backend>,
    handles: Mutex<HashMap<String, Arc<dyn QueueHandle>>>,
}

impl Connections {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, queue: &str) -> StoreResult<Arc<dyn QueueHandle>> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(queue) {
            return Ok(Arc::clone(handle));
        }
        let handle = self.backend.connect(queue).await?;
        handles.insert(queue.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Closes and forgets every handle opened so far.
    pub async fn close_all(&self) -> StoreResult<()> {
        let handles: Vec<_> = self.handles.lock().await.drain().map(|(_, h)| h).collect();
        let results = futures::future::join_all(handles.iter().map(|h| h.close())).await;
        results.into_iter().collect()
    }
}

/// Milliseconds since the epoch, the score unit of delayed and active sets.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// `now + delay_ms`, saturating at the end of time.
pub(crate) fn due_at(now: i64, delay_ms: u64) -> i64 {
    now.saturating_add(i64::try_from(delay_ms).unwrap_or(i64::MAX))
}

/// Active items started at or before this instant are stalled.
pub(crate) fn stalled_cutoff(now: i64, stalled_after: Duration) -> i64 {
    now.saturating_sub(i64::try_from(stalled_after.as_millis()).unwrap_or(i64::MAX))
}

/// When a repeating item should run next, `None` once the schedule is exhausted.
pub(crate) fn next_repeat_ms(item: &EnqueuedItem, from_ms: i64) -> StoreResult<Option<i64>> {
    let Some(repeat) = item.options.repeat.as_ref() else {
        return Ok(None);
    };
    if repeat.exhausted(item.repeat_count) {
        return Ok(None);
    }
    let from = DateTime::<Utc>::from_timestamp_millis(from_ms).unwrap_or_else(Utc::now);
    Ok(repeat.next_after(from)?.map(|at| at.timestamp_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_times_saturate() {
        assert_eq!(due_at(1_000, 500), 1_500);
        assert_eq!(due_at(1_000, u64::MAX), i64::MAX);
        assert_eq!(due_at(i64::MAX - 1, 10), i64::MAX);
    }

    #[test]
    fn stalled_cutoff_saturates() {
        assert_eq!(stalled_cutoff(1_000, Duration::from_millis(400)), 600);
        assert_eq!(stalled_cutoff(1_000, Duration::MAX), 1_000 - i64::MAX);
        assert_eq!(stalled_cutoff(i64::MIN + 5, Duration::from_millis(10)), i64::MIN);
    }
}
