// src/store/redis_backend.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use nanoid::nanoid;
use serde_json::Value;
use tracing::debug;

use super::{
    due_at, next_repeat_ms, now_ms, stalled_cutoff, Backend, Disposition, EnqueuedItem, ItemState,
    NewItem, QueueHandle, StoreResult,
};
use crate::config::ConnectionOptions;
use crate::error::StoreError;
use crate::rdconfig::get_redis_conn;
use crate::utils::constants::{SUFFIX_ACTIVE, SUFFIX_DELAYED, SUFFIX_JOB, SUFFIX_WAIT};

/// Pops ready ids until one is still `waiting`, then marks it active.
///
/// KEYS: wait list, active zset. ARGV: now (ms), job key prefix.
const TAKE_NEXT: &str = r#"
while true do
    local id = redis.call('LPOP', KEYS[1])
    if not id then
        return false
    end
    local key = ARGV[2] .. id
    if redis.call('HGET', key, 'state') == 'waiting' then
        redis.call('ZADD', KEYS[2], ARGV[1], id)
        redis.call('HSET', key, 'state', 'active')
        return {id, redis.call('HGET', key, 'data')}
    end
end
"#;

/// Moves ids scored at or below ARGV[1] from a zset back to the ready list,
/// skipping those no longer in state ARGV[3].
///
/// KEYS: source zset, wait list. ARGV: max score, job key prefix, expected state.
const REQUEUE: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local moved = 0
for _, id in ipairs(ids) do
    redis.call('ZREM', KEYS[1], id)
    local key = ARGV[2] .. id
    if redis.call('HGET', key, 'state') == ARGV[3] then
        redis.call('HSET', key, 'state', 'waiting')
        redis.call('RPUSH', KEYS[2], id)
        moved = moved + 1
    end
end
return moved
"#;

/// Redis-backed store.
///
/// Per queue it keeps a ready list, a delayed sorted set scored by due time,
/// an active sorted set scored by start time, and one hash per item holding
/// its JSON snapshot and state. Ready-list order is FIFO; `priority` is not
/// honored by this backend.
#[derive(Clone, Debug, Default)]
pub struct RedisBackend {
    options: ConnectionOptions,
}

impl RedisBackend {
    pub fn new(options: ConnectionOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn connect(&self, queue: &str) -> StoreResult<Arc<dyn QueueHandle>> {
        let conn = get_redis_conn(&self.options).await?;
        debug!(queue, url = %self.options.url, "Connected queue");
        Ok(Arc::new(RedisQueue {
            name: queue.to_string(),
            prefix: format!("{}:{}", self.options.prefix, queue),
            conn,
            closed: AtomicBool::new(false),
            take_next: Script::new(TAKE_NEXT),
            requeue: Script::new(REQUEUE),
        }))
    }
}

struct RedisQueue {
    name: String,
    prefix: String,
    conn: MultiplexedConnection,
    closed: AtomicBool,
    take_next: Script,
    requeue: Script,
}

impl RedisQueue {
    fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.prefix)
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}{id}", self.job_key_prefix())
    }

    fn job_key_prefix(&self) -> String {
        format!("{}:{SUFFIX_JOB}:", self.prefix)
    }

    fn conn(&self) -> StoreResult<MultiplexedConnection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed(self.name.clone()));
        }
        Ok(self.conn.clone())
    }

    async fn load(&self, conn: &mut MultiplexedConnection, id: &str) -> StoreResult<Option<EnqueuedItem>> {
        let data: Option<String> = conn.hget(self.job_key(id), "data").await?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, conn: &mut MultiplexedConnection, item: &EnqueuedItem) -> StoreResult<()> {
        let data = serde_json::to_string(item)?;
        conn.hset::<_, _, _, ()>(self.job_key(&item.id), "data", data).await?;
        Ok(())
    }

    async fn set_state(&self, conn: &mut MultiplexedConnection, id: &str, state: ItemState) -> StoreResult<()> {
        conn.hset::<_, _, _, ()>(self.job_key(id), "state", state.as_str()).await?;
        Ok(())
    }

    /// Sets the state before indexing the id, so the scripts never see a stale state.
    async fn place(
        &self,
        conn: &mut MultiplexedConnection,
        id: &str,
        due_ms: Option<i64>,
        now: i64,
    ) -> StoreResult<()> {
        match due_ms {
            Some(due) if due > now => {
                self.set_state(conn, id, ItemState::Delayed).await?;
                conn.zadd::<_, _, _, ()>(self.key(SUFFIX_DELAYED), id, due).await?;
                Ok(())
            }
            _ => {
                self.set_state(conn, id, ItemState::Waiting).await?;
                conn.rpush::<_, _, ()>(self.key(SUFFIX_WAIT), id).await?;
                Ok(())
            }
        }
    }

    async fn finish(
        &self,
        conn: &mut MultiplexedConnection,
        id: &str,
        state: ItemState,
        remove: bool,
    ) -> StoreResult<()> {
        if remove {
            conn.del::<_, ()>(self.job_key(id)).await?;
            Ok(())
        } else {
            self.set_state(conn, id, state).await
        }
    }

    /// Moves members of `set` scored at or below `max_score` back to the ready list.
    async fn requeue_from(&self, set: &str, max_score: i64, expected: ItemState) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let moved: usize = self
            .requeue
            .key(self.key(set))
            .key(self.key(SUFFIX_WAIT))
            .arg(max_score)
            .arg(self.job_key_prefix())
            .arg(expected.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }
}

#[async_trait]
impl QueueHandle for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(&self, new: NewItem) -> StoreResult<EnqueuedItem> {
        let mut conn = self.conn()?;
        let id = new.id.clone().unwrap_or_else(|| nanoid!());
        let item = EnqueuedItem::from_new(new, id.clone());

        let now = now_ms();
        let due = if item.options.repeat.is_some() {
            next_repeat_ms(&item, now)?.ok_or_else(|| {
                StoreError::InvalidSchedule(format!("job {} has no upcoming run", item.name))
            })?
        } else {
            due_at(now, item.options.effective_delay_ms())
        };

        let data = serde_json::to_string(&item)?;
        let created: bool = conn.hset_nx(self.job_key(&id), "data", data).await?;
        if !created {
            if let Some(existing) = self.load(&mut conn, &id).await? {
                return Ok(existing);
            }
        }

        self.place(&mut conn, &id, Some(due), now).await?;
        Ok(item)
    }

    async fn next(&self) -> StoreResult<Option<EnqueuedItem>> {
        let mut conn = self.conn()?;
        let taken: Option<(String, String)> = self
            .take_next
            .key(self.key(SUFFIX_WAIT))
            .key(self.key(SUFFIX_ACTIVE))
            .arg(now_ms())
            .arg(self.job_key_prefix())
            .invoke_async(&mut conn)
            .await?;
        match taken {
            Some((_, data)) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn complete(&self, item: &EnqueuedItem, _result: &Value) -> StoreResult<()> {
        let mut conn = self.conn()?;
        conn.zrem::<_, _, ()>(self.key(SUFFIX_ACTIVE), &item.id).await?;
        let Some(mut stored) = self.load(&mut conn, &item.id).await? else { return Ok(()) };

        if stored.options.repeat.is_some() {
            stored.repeat_count += 1;
            stored.attempts_made = 0;
            let now = now_ms();
            if let Some(next) = next_repeat_ms(&stored, now)? {
                self.save(&mut conn, &stored).await?;
                return self.place(&mut conn, &stored.id, Some(next), now).await;
            }
            self.save(&mut conn, &stored).await?;
        }

        let remove = stored.options.remove_on_complete.unwrap_or(false);
        self.finish(&mut conn, &stored.id, ItemState::Completed, remove).await
    }

    async fn fail(&self, item: &EnqueuedItem, error: &str) -> StoreResult<Disposition> {
        let mut conn = self.conn()?;
        conn.zrem::<_, _, ()>(self.key(SUFFIX_ACTIVE), &item.id).await?;
        let Some(mut stored) = self.load(&mut conn, &item.id).await? else {
            return Ok(Disposition::Dead);
        };
        stored.attempts_made += 1;
        self.save(&mut conn, &stored).await?;
        conn.hset::<_, _, _, ()>(self.job_key(&stored.id), "failed_reason", error).await?;

        if stored.attempts_made < stored.options.max_attempts() {
            let delay_ms = stored.options.retry_delay_ms(stored.attempts_made);
            let now = now_ms();
            self.place(&mut conn, &stored.id, Some(due_at(now, delay_ms)), now).await?;
            return Ok(Disposition::Retrying { delay_ms });
        }

        let remove = stored.options.remove_on_fail.unwrap_or(false);
        self.finish(&mut conn, &stored.id, ItemState::Failed, remove).await?;
        Ok(Disposition::Dead)
    }

    async fn promote_due(&self) -> StoreResult<usize> {
        self.requeue_from(SUFFIX_DELAYED, now_ms(), ItemState::Delayed).await
    }

    async fn recover_stalled(&self, stalled_after: Duration) -> StoreResult<usize> {
        let cutoff = stalled_cutoff(now_ms(), stalled_after);
        self.requeue_from(SUFFIX_ACTIVE, cutoff, ItemState::Active).await
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
