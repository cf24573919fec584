#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use message_queue::store::StoreResult;
use message_queue::{
    Backend, Disposition, EnqueuedItem, Job, MemoryBackend, NewItem, QueueHandle,
};
use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Memory backend that remembers which queues were opened and what was enqueued.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    pub inner: MemoryBackend,
    pub connected: Arc<Mutex<Vec<String>>>,
    pub added: Arc<Mutex<Vec<NewItem>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(&self) -> Vec<String> {
        self.connected.lock().unwrap().clone()
    }

    pub fn added(&self) -> Vec<NewItem> {
        self.added.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn connect(&self, queue: &str) -> StoreResult<Arc<dyn QueueHandle>> {
        self.connected.lock().unwrap().push(queue.to_string());
        let inner = self.inner.connect(queue).await?;
        Ok(Arc::new(RecordingQueue {
            inner,
            added: Arc::clone(&self.added),
        }))
    }
}

struct RecordingQueue {
    inner: Arc<dyn QueueHandle>,
    added: Arc<Mutex<Vec<NewItem>>>,
}

#[async_trait]
impl QueueHandle for RecordingQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn add(&self, item: NewItem) -> StoreResult<EnqueuedItem> {
        self.added.lock().unwrap().push(item.clone());
        self.inner.add(item).await
    }

    async fn next(&self) -> StoreResult<Option<EnqueuedItem>> {
        self.inner.next().await
    }

    async fn complete(&self, item: &EnqueuedItem, result: &Value) -> StoreResult<()> {
        self.inner.complete(item, result).await
    }

    async fn fail(&self, item: &EnqueuedItem, error: &str) -> StoreResult<Disposition> {
        self.inner.fail(item, error).await
    }

    async fn promote_due(&self) -> StoreResult<usize> {
        self.inner.promote_due().await
    }

    async fn recover_stalled(&self, stalled_after: Duration) -> StoreResult<usize> {
        self.inner.recover_stalled(stalled_after).await
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }
}

/// Greets whoever is named in the first argument and remembers it.
#[derive(Default, Clone)]
pub struct Greet {
    pub seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Job for Greet {
    async fn run(&self, args: &[Value]) -> anyhow::Result<Value> {
        let name: String = message_queue::arg(args, 0)?;
        self.seen.lock().unwrap().push(name.clone());
        Ok(Value::String(format!("Hello, {name}!")))
    }
}

#[derive(Default)]
pub struct Explode;

#[async_trait]
impl Job for Explode {
    async fn run(&self, _args: &[Value]) -> anyhow::Result<Value> {
        Err(anyhow::anyhow!("mailbox unreachable").context("could not deliver greeting"))
    }
}

#[derive(Default)]
pub struct Panics;

#[async_trait]
impl Job for Panics {
    async fn run(&self, _args: &[Value]) -> anyhow::Result<Value> {
        panic!("handler blew up");
    }
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    pub fn message(&self) -> &str {
        self.fields.get("message").map(String::as_str).unwrap_or("")
    }
}

/// `tracing` layer that keeps every event for later assertions.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct FieldVisitor {
    fields: HashMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        self.fields.insert(field.name().to_string(), format!("{value:?}"));
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields: visitor.fields,
        });
    }
}
