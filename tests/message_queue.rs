mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{Greet, RecordingBackend};
use message_queue::{
    payload, Backend, JobConfig, JobOptions, JobRegistry, MessageQueue, QueueError, QueueHandle,
    RepeatOptions, StoreError,
};
use serde_json::json;

fn producer(registry: JobRegistry) -> (MessageQueue, RecordingBackend) {
    let backend = RecordingBackend::new();
    let queue = MessageQueue::new(Arc::new(registry), Arc::new(backend.clone()));
    (queue, backend)
}

#[tokio::test]
async fn dispatch_enqueues_once_without_an_id() {
    let mut registry = JobRegistry::new();
    registry
        .register::<Greet>(JobConfig::new().name("greet").queue("default"))
        .unwrap();
    let (queue, backend) = producer(registry);

    let item = queue.dispatch::<Greet>(payload!["Ann"]).await.unwrap();

    let added = backend.added();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].queue, "default");
    assert_eq!(added[0].name, "greet");
    assert_eq!(added[0].payload, vec![json!("Ann")]);
    assert_eq!(added[0].id, None);
    assert!(!item.id.is_empty());
}

#[tokio::test]
async fn id_generator_makes_enqueue_idempotent() {
    let mut registry = JobRegistry::new();
    registry
        .register::<Greet>(JobConfig::new().name("greet").id_generator(|args| {
            format!("greet_{}", args[0].as_str().unwrap_or_default())
        }))
        .unwrap();
    let (queue, backend) = producer(registry);

    let first = queue.dispatch::<Greet>(payload!["Ann"]).await.unwrap();
    let second = queue.dispatch::<Greet>(payload!["Ann"]).await.unwrap();

    assert_eq!(first.id, "greet_Ann");
    assert_eq!(second.id, "greet_Ann");
    assert_eq!(backend.added().len(), 2);
    assert_eq!(backend.inner.counts("default").waiting, 1);
}

#[tokio::test]
async fn without_id_generator_every_enqueue_is_new() {
    let mut registry = JobRegistry::new();
    registry.register::<Greet>(JobConfig::new()).unwrap();
    let (queue, backend) = producer(registry);

    let first = queue.dispatch::<Greet>(payload!["Ann"]).await.unwrap();
    let second = queue.dispatch::<Greet>(payload!["Ann"]).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(backend.inner.counts("default").waiting, 2);
}

#[tokio::test]
async fn unregistered_handlers_are_not_found() {
    let (queue, backend) = producer(JobRegistry::new());

    let err = queue.dispatch::<Greet>(payload!["Ann"]).await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
    assert!(backend.added().is_empty());

    let err = queue.add_job_by_name("greet", payload![], None).await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
}

#[tokio::test]
async fn schedule_at_in_the_past_behaves_like_dispatch() {
    let mut registry = JobRegistry::new();
    registry.register::<Greet>(JobConfig::new().name("greet")).unwrap();
    let (queue, backend) = producer(registry);

    let past = Utc::now() - chrono::Duration::hours(1);
    let item = queue.schedule_at::<Greet>(past, payload!["Ann"]).await.unwrap();
    assert_eq!(item.options.delay_ms, Some(0));

    let handle = backend.inner.connect("default").await.unwrap();
    let ready = handle.next().await.unwrap().expect("item should be ready without a scheduler");
    assert_eq!(ready.id, item.id);
}

#[tokio::test]
async fn schedule_after_keeps_the_item_delayed() {
    let mut registry = JobRegistry::new();
    registry.register::<Greet>(JobConfig::new()).unwrap();
    let (queue, backend) = producer(registry);

    let item = queue
        .schedule_after::<Greet>(Duration::from_secs(60), payload!["Ann"])
        .await
        .unwrap();

    assert_eq!(item.options.delay_ms, Some(60_000));
    let counts = backend.inner.counts("default");
    assert_eq!((counts.waiting, counts.delayed), (0, 1));
}

#[tokio::test]
async fn schedule_after_an_endless_delay_stays_delayed() {
    let mut registry = JobRegistry::new();
    registry.register::<Greet>(JobConfig::new()).unwrap();
    let (queue, backend) = producer(registry);

    let item = queue
        .schedule_after::<Greet>(Duration::from_secs(u64::MAX), payload!["Ann"])
        .await
        .unwrap();
    assert_eq!(item.options.delay_ms, Some(i64::MAX));

    let handle = backend.inner.connect("default").await.unwrap();
    assert_eq!(handle.promote_due().await.unwrap(), 0);
    assert!(handle.next().await.unwrap().is_none());
    assert_eq!(backend.inner.counts("default").delayed, 1);
}

#[tokio::test]
async fn repeat_rejects_an_interval_without_slots() {
    let mut registry = JobRegistry::new();
    registry.register::<Greet>(JobConfig::new()).unwrap();
    let (queue, backend) = producer(registry);

    let err = queue
        .repeat::<Greet>(RepeatOptions::every(Duration::MAX), payload!["x"])
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Store(StoreError::InvalidSchedule(_))));
    assert_eq!(backend.inner.counts("default"), Default::default());
}

#[tokio::test]
async fn repeat_enqueues_a_single_repeating_item() {
    let mut registry = JobRegistry::new();
    registry.register::<Greet>(JobConfig::new().name("some_job")).unwrap();
    let (queue, backend) = producer(registry);

    let schedule = RepeatOptions::every(Duration::from_millis(3_600_000));
    queue.repeat::<Greet>(schedule.clone(), payload!["x"]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let added = backend.added();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].options.repeat, Some(schedule));
    assert_eq!(added[0].payload, vec![json!("x")]);

    let counts = backend.inner.counts("default");
    assert_eq!((counts.waiting, counts.delayed), (0, 1));
}

#[tokio::test]
async fn overrides_are_layered_on_registered_options() {
    let mut registry = JobRegistry::new();
    registry
        .register::<Greet>(
            JobConfig::new()
                .queue("mail")
                .options(JobOptions::new().attempts(3).priority(5)),
        )
        .unwrap();
    let (queue, backend) = producer(registry);

    let item = queue
        .add_job::<Greet>(payload!["Ann"], Some(JobOptions::new().priority(1)))
        .await
        .unwrap();

    assert_eq!(item.queue, "mail");
    assert_eq!(item.options.attempts, Some(3));
    assert_eq!(item.options.priority, Some(1));
    assert_eq!(backend.connected(), vec!["mail".to_string()]);
}

#[tokio::test]
async fn handles_are_opened_once_per_queue() {
    let mut registry = JobRegistry::new();
    registry.register::<Greet>(JobConfig::new()).unwrap();
    let (queue, backend) = producer(registry);

    for name in ["Ann", "Bob", "Cid"] {
        queue.dispatch::<Greet>(payload![name]).await.unwrap();
    }
    assert_eq!(backend.connected(), vec!["default".to_string()]);

    queue.close().await.unwrap();
}
