// src/store/memory.rs
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use nanoid::nanoid;
use serde_json::Value;

use super::{
    due_at, next_repeat_ms, now_ms, stalled_cutoff, Backend, Disposition, EnqueuedItem, ItemState,
    NewItem, QueueHandle, StoreResult,
};
use crate::error::StoreError;

struct Entry {
    item: EnqueuedItem,
    state: ItemState,
    last_error: Option<String>,
}

#[derive(Default)]
struct QueueState {
    items: HashMap<String, Entry>,
    /// Ready ids, ordered by priority (lower first) then arrival.
    waiting: VecDeque<(u32, String)>,
    /// (due_ms, id)
    delayed: BTreeSet<(i64, String)>,
    /// id -> started_ms
    active: HashMap<String, i64>,
}

impl QueueState {
    fn push_waiting(&mut self, id: String) {
        let priority = self
            .items
            .get(&id)
            .and_then(|e| e.item.options.priority)
            .unwrap_or(0);
        let at = self
            .waiting
            .iter()
            .position(|(p, _)| *p > priority)
            .unwrap_or(self.waiting.len());
        self.waiting.insert(at, (priority, id));
    }

    /// Sends an item to the ready list, or to the delayed set when `due_ms` is in the future.
    fn place(&mut self, id: String, due_ms: Option<i64>, now: i64) {
        let state = match due_ms {
            Some(due) if due > now => {
                self.delayed.insert((due, id.clone()));
                ItemState::Delayed
            }
            _ => {
                self.push_waiting(id.clone());
                ItemState::Waiting
            }
        };
        if let Some(entry) = self.items.get_mut(&id) {
            entry.state = state;
        }
    }

    fn finish(&mut self, id: &str, state: ItemState, remove: bool) {
        if remove {
            self.items.remove(id);
        } else if let Some(entry) = self.items.get_mut(id) {
            entry.state = state;
        }
    }
}

/// Per-state item counts of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// In-process backing store. Clones share the same queues, so a producer and
/// the runners built from clones see each other's items.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn counts(&self, queue: &str) -> QueueCounts {
        let queues = self.lock();
        let mut counts = QueueCounts::default();
        if let Some(state) = queues.get(queue) {
            for entry in state.items.values() {
                match entry.state {
                    ItemState::Waiting => counts.waiting += 1,
                    ItemState::Delayed => counts.delayed += 1,
                    ItemState::Active => counts.active += 1,
                    ItemState::Completed => counts.completed += 1,
                    ItemState::Failed => counts.failed += 1,
                }
            }
        }
        counts
    }

    /// Stored copy of an item with its state and last failure message.
    pub fn inspect(&self, queue: &str, id: &str) -> Option<(EnqueuedItem, ItemState, Option<String>)> {
        let queues = self.lock();
        let entry = queues.get(queue)?.items.get(id)?;
        Some((entry.item.clone(), entry.state, entry.last_error.clone()))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn connect(&self, queue: &str) -> StoreResult<Arc<dyn QueueHandle>> {
        self.lock().entry(queue.to_string()).or_default();
        Ok(Arc::new(MemoryQueue {
            name: queue.to_string(),
            backend: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryQueue {
    name: String,
    backend: MemoryBackend,
    closed: AtomicBool,
}

impl MemoryQueue {
    fn with_state<T>(&self, f: impl FnOnce(&mut QueueState) -> StoreResult<T>) -> StoreResult<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed(self.name.clone()));
        }
        let mut queues = self.backend.lock();
        f(queues.entry(self.name.clone()).or_default())
    }
}

#[async_trait]
impl QueueHandle for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(&self, new: NewItem) -> StoreResult<EnqueuedItem> {
        self.with_state(|state| {
            if let Some(existing) = new.id.as_ref().and_then(|id| state.items.get(id)) {
                return Ok(existing.item.clone());
            }

            let id = new.id.clone().unwrap_or_else(|| nanoid!());
            let item = EnqueuedItem::from_new(new, id.clone());
            let now = now_ms();
            let due = if item.options.repeat.is_some() {
                let next = next_repeat_ms(&item, now)?.ok_or_else(|| {
                    StoreError::InvalidSchedule(format!("job {} has no upcoming run", item.name))
                })?;
                Some(next)
            } else {
                Some(due_at(now, item.options.effective_delay_ms()))
            };

            state.items.insert(
                id.clone(),
                Entry { item: item.clone(), state: ItemState::Waiting, last_error: None },
            );
            state.place(id, due, now);
            Ok(item)
        })
    }

    async fn next(&self) -> StoreResult<Option<EnqueuedItem>> {
        self.with_state(|state| {
            while let Some((_, id)) = state.waiting.pop_front() {
                let Some(entry) = state.items.get_mut(&id) else { continue };
                if entry.state != ItemState::Waiting {
                    continue;
                }
                entry.state = ItemState::Active;
                let item = entry.item.clone();
                state.active.insert(id, now_ms());
                return Ok(Some(item));
            }
            Ok(None)
        })
    }

    async fn complete(&self, item: &EnqueuedItem, _result: &Value) -> StoreResult<()> {
        self.with_state(|state| {
            state.active.remove(&item.id);
            let Some(entry) = state.items.get_mut(&item.id) else { return Ok(()) };
            entry.last_error = None;

            if entry.item.options.repeat.is_some() {
                entry.item.repeat_count += 1;
                entry.item.attempts_made = 0;
                let now = now_ms();
                if let Some(next) = next_repeat_ms(&entry.item, now)? {
                    state.place(item.id.clone(), Some(next), now);
                    return Ok(());
                }
            }

            let remove = entry.item.options.remove_on_complete.unwrap_or(false);
            state.finish(&item.id, ItemState::Completed, remove);
            Ok(())
        })
    }

    async fn fail(&self, item: &EnqueuedItem, error: &str) -> StoreResult<Disposition> {
        self.with_state(|state| {
            state.active.remove(&item.id);
            let Some(entry) = state.items.get_mut(&item.id) else { return Ok(Disposition::Dead) };
            entry.item.attempts_made += 1;
            entry.last_error = Some(error.to_string());

            let options = &entry.item.options;
            let attempts_made = entry.item.attempts_made;
            if attempts_made < options.max_attempts() {
                let delay_ms = options.retry_delay_ms(attempts_made);
                let now = now_ms();
                state.place(item.id.clone(), Some(due_at(now, delay_ms)), now);
                return Ok(Disposition::Retrying { delay_ms });
            }

            let remove = options.remove_on_fail.unwrap_or(false);
            state.finish(&item.id, ItemState::Failed, remove);
            Ok(Disposition::Dead)
        })
    }

    async fn promote_due(&self) -> StoreResult<usize> {
        self.with_state(|state| {
            let now = now_ms();
            let mut promoted = 0;
            while state.delayed.first().is_some_and(|(due, _)| *due <= now) {
                let Some((_, id)) = state.delayed.pop_first() else { break };
                let is_delayed = state
                    .items
                    .get(&id)
                    .is_some_and(|e| e.state == ItemState::Delayed);
                if is_delayed {
                    state.place(id, None, now);
                    promoted += 1;
                }
            }
            Ok(promoted)
        })
    }

    async fn recover_stalled(&self, stalled_after: Duration) -> StoreResult<usize> {
        self.with_state(|state| {
            let now = now_ms();
            let cutoff = stalled_cutoff(now, stalled_after);
            let stalled: Vec<String> = state
                .active
                .iter()
                .filter(|(_, started)| **started <= cutoff)
                .map(|(id, _)| id.clone())
                .collect();

            for id in &stalled {
                state.active.remove(id);
                state.place(id.clone(), None, now);
            }
            Ok(stalled.len())
        })
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
