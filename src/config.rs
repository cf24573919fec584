use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::QueueError;
use crate::utils::constants::{
    DEFAULT_CONCURRENCY, DEFAULT_PREFIX, DEFAULT_REDIS_URL, POLL_INTERVAL_MS, PROMOTE_INTERVAL_MS,
    STALLED_AFTER_MS, STALLED_INTERVAL_MS,
};


/// Where the Redis backend connects and how it namespaces its keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub url: String,
    pub prefix: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl ConnectionOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Reads `REDIS_URL` and `QUEUE_PREFIX`, falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env::var("REDIS_URL").unwrap_or(defaults.url),
            prefix: env::var("QUEUE_PREFIX").unwrap_or(defaults.prefix),
        }
    }
}


#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,
    pub concurrency: usize,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            concurrency,
        }
    }

    pub fn from_configs(configs: Vec<(&str, usize)>) -> Vec<Self> {
        configs
            .into_iter()
            .map(|(name, concurrency)| Self::new(name, concurrency))
            .collect()
    }
}


/// Tuning of the worker pools.
#[derive(Clone, Debug)]
pub struct WorkerOptions {
    /// Consumers per queue unless overridden in `queues`.
    pub concurrency: usize,
    pub queues: HashMap<String, QueueConfig>,
    /// Pause between pulls when a queue is empty.
    pub poll_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            queues: HashMap::new(),
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
        }
    }
}

impl WorkerOptions {
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn queue(mut self, config: QueueConfig) -> Self {
        self.queues.insert(config.name.clone(), config);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn concurrency_for(&self, queue: &str) -> usize {
        self.queues
            .get(queue)
            .map(|q| q.concurrency)
            .unwrap_or(self.concurrency)
            .max(1)
    }

    /// Reads `WORKER_CONCURRENCY` and `WORKER_POLL_INTERVAL_MS`.
    pub fn from_env() -> Result<Self, QueueError> {
        let mut options = Self::default();
        if let Some(concurrency) = parse_env::<usize>("WORKER_CONCURRENCY")? {
            options.concurrency = concurrency;
        }
        if let Some(ms) = parse_env::<u64>("WORKER_POLL_INTERVAL_MS")? {
            options.poll_interval = Duration::from_millis(ms);
        }
        Ok(options)
    }
}


/// Tuning of the delayed-item promoter and the stalled-item sweep.
#[derive(Clone, Debug)]
pub struct SchedulerOptions {
    pub promote_interval: Duration,
    pub stalled_interval: Duration,
    /// Active items older than this are considered stalled.
    pub stalled_after: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            promote_interval: Duration::from_millis(PROMOTE_INTERVAL_MS),
            stalled_interval: Duration::from_millis(STALLED_INTERVAL_MS),
            stalled_after: Duration::from_millis(STALLED_AFTER_MS),
        }
    }
}

impl SchedulerOptions {
    pub fn promote_interval(mut self, interval: Duration) -> Self {
        self.promote_interval = interval;
        self
    }

    pub fn stalled_interval(mut self, interval: Duration) -> Self {
        self.stalled_interval = interval;
        self
    }

    pub fn stalled_after(mut self, after: Duration) -> Self {
        self.stalled_after = after;
        self
    }
}


fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, QueueError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| QueueError::Configuration(format!("{key}={raw} is not a valid value"))),
        Err(_) => Ok(None),
    }
}
