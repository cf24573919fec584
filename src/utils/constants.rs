pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_ATTEMPTS: u32 = 1;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_PREFIX: &str = "mq";

pub const POLL_INTERVAL_MS: u64 = 500;
pub const PROMOTE_INTERVAL_MS: u64 = 1_000;
pub const STALLED_INTERVAL_MS: u64 = 30_000;
pub const STALLED_AFTER_MS: u64 = 30_000;

pub const SUFFIX_WAIT: &str = "wait";
pub const SUFFIX_DELAYED: &str = "delayed";
pub const SUFFIX_ACTIVE: &str = "active";
pub const SUFFIX_JOB: &str = "job";
