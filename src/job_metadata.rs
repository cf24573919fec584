// src/job_metadata.rs
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cron::CronParser;
use crate::error::StoreError;
use crate::utils::constants::DEFAULT_ATTEMPTS;

/// Execution policy of a job. Every field is optional so that a descriptor's
/// defaults can be overridden key by key at enqueue time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Milliseconds to wait before the item becomes ready. Zero or negative means now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<i64>,
    /// Total number of attempts, the first delivery included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_on_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_on_fail: Option<bool>,
    /// Store-specific options, passed through untouched.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn repeat(mut self, repeat: RepeatOptions) -> Self {
        self.repeat = Some(repeat);
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn remove_on_complete(mut self, remove: bool) -> Self {
        self.remove_on_complete = Some(remove);
        self
    }

    pub fn remove_on_fail(mut self, remove: bool) -> Self {
        self.remove_on_fail = Some(remove);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Layers `overrides` on top of `self`; every key set in `overrides` wins.
    pub fn merge(&self, overrides: &JobOptions) -> JobOptions {
        let mut extra = self.extra.clone();
        for (key, value) in &overrides.extra {
            extra.insert(key.clone(), value.clone());
        }

        JobOptions {
            delay_ms: overrides.delay_ms.or(self.delay_ms),
            attempts: overrides.attempts.or(self.attempts),
            backoff: overrides.backoff.clone().or_else(|| self.backoff.clone()),
            repeat: overrides.repeat.clone().or_else(|| self.repeat.clone()),
            priority: overrides.priority.or(self.priority),
            remove_on_complete: overrides.remove_on_complete.or(self.remove_on_complete),
            remove_on_fail: overrides.remove_on_fail.or(self.remove_on_fail),
            extra,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.attempts.unwrap_or(DEFAULT_ATTEMPTS).max(1)
    }

    /// Delay in milliseconds, negative values clamped to zero.
    pub fn effective_delay_ms(&self) -> u64 {
        self.delay_ms.map(|d| d.max(0) as u64).unwrap_or(0)
    }

    /// Delay before the next attempt once `attempts_made` attempts have failed.
    pub fn retry_delay_ms(&self, attempts_made: u32) -> u64 {
        self.backoff
            .as_ref()
            .map(|b| b.delay_for(attempts_made))
            .unwrap_or(0)
    }
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Delay curve between retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    Exponential { delay_ms: u64 },
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed { delay_ms: millis(delay) }
    }

    pub fn exponential(delay: Duration) -> Self {
        Backoff::Exponential { delay_ms: millis(delay) }
    }

    pub fn delay_for(&self, attempts_made: u32) -> u64 {
        match self {
            Backoff::Fixed { delay_ms } => *delay_ms,
            Backoff::Exponential { delay_ms } => {
                let exp = attempts_made.saturating_sub(1).min(32);
                delay_ms.saturating_mul(1u64 << exp)
            }
        }
    }
}

/// Recurring cadence of a job: a fixed interval or a cron expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// Maximum number of runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl RepeatOptions {
    pub fn every(interval: Duration) -> Self {
        Self {
            every_ms: Some(millis(interval)),
            ..Self::default()
        }
    }

    pub fn cron(expr: impl Into<String>) -> Self {
        Self {
            cron: Some(expr.into()),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn end_date(mut self, end: DateTime<Utc>) -> Self {
        self.end_date = Some(end);
        self
    }

    /// Next occurrence strictly after `from`, or `None` once `end_date` has passed.
    ///
    /// Intervals are aligned to multiples of `every_ms` since the epoch so that
    /// every producer computes the same slots.
    pub fn next_after(&self, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, StoreError> {
        let next = match (self.every_ms, self.cron.as_deref()) {
            (Some(0), _) => {
                return Err(StoreError::InvalidSchedule("`every` must be positive".into()))
            }
            (Some(every), None) => {
                let every = i64::try_from(every).map_err(|_| {
                    StoreError::InvalidSchedule(format!("`every` of {every}ms is too large"))
                })?;
                from.timestamp_millis()
                    .div_euclid(every)
                    .checked_mul(every)
                    .and_then(|start| start.checked_add(every))
                    .and_then(|slot| Utc.timestamp_millis_opt(slot).single())
                    .ok_or_else(|| {
                        StoreError::InvalidSchedule(format!("no slot of {every}ms after {from}"))
                    })?
            }
            (None, Some(expr)) => CronParser::next_execution(expr, from)?,
            (Some(_), Some(_)) => {
                return Err(StoreError::InvalidSchedule(
                    "set either `every` or `cron`, not both".into(),
                ))
            }
            (None, None) => {
                return Err(StoreError::InvalidSchedule(
                    "one of `every` or `cron` is required".into(),
                ))
            }
        };

        Ok(match self.end_date {
            Some(end) if next > end => None,
            _ => Some(next),
        })
    }

    pub fn exhausted(&self, runs: u32) -> bool {
        self.limit.is_some_and(|limit| runs >= limit)
    }
}
