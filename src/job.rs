// src/job.rs
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Positional arguments handed to [`Job::run`], in the order they were enqueued.
pub type Payload = Vec<Value>;

/// A job handler. One instance executes the business logic of one named job.
///
/// Handlers are registered by type in a [`JobRegistry`](crate::JobRegistry);
/// the worker obtains an instance through a [`Resolver`](crate::Resolver) and
/// calls `run` with the stored payload.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self, args: &[Value]) -> anyhow::Result<Value>;
}

/// Builds a [`Payload`] from anything serializable.
///
/// ```ignore
/// queue.dispatch::<Greet>(payload!["Ann", 3]).await?;
/// ```
#[macro_export]
macro_rules! payload {
    () => { ::std::vec::Vec::<$crate::serde_json::Value>::new() };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::serde_json::json!($arg)),+]
    };
}

/// Deserializes the positional argument at `index`.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> anyhow::Result<T> {
    let value = args
        .get(index)
        .ok_or_else(|| anyhow!("missing argument #{index} (got {})", args.len()))?;
    serde_json::from_value(value.clone()).with_context(|| format!("invalid argument #{index}"))
}
