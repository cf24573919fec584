// src/registry.rs
use std::any::{type_name, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{QueueError, Result};
use crate::job::Job;
use crate::job_metadata::JobOptions;
use crate::utils::constants::DEFAULT_QUEUE;

/// Derives a deterministic item id from a payload; equal payloads must yield equal ids.
pub type IdGenerator = Arc<dyn Fn(&[Value]) -> String + Send + Sync>;

type Constructor = fn() -> Arc<dyn Job>;

fn construct<J: Job + Default>() -> Arc<dyn Job> {
    Arc::new(J::default())
}

/// Registration-time settings for one handler type.
#[derive(Clone, Default)]
pub struct JobConfig {
    name: Option<String>,
    queue: Option<String>,
    id_generator: Option<IdGenerator>,
    options: JobOptions,
}

impl JobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn id_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&[Value]) -> String + Send + Sync + 'static,
    {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    pub fn options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

/// Routing and execution metadata of a registered handler type.
pub struct JobDescriptor {
    pub handler: TypeId,
    pub handler_type: &'static str,
    pub name: String,
    pub queue: String,
    pub id_generator: Option<IdGenerator>,
    pub options: JobOptions,
    constructor: Option<Constructor>,
}

impl JobDescriptor {
    pub fn generate_id(&self, payload: &[Value]) -> Option<String> {
        self.id_generator.as_ref().map(|generate| generate(payload))
    }

    /// A fresh handler instance, if the type was registered with a default constructor.
    pub fn construct(&self) -> Option<Arc<dyn Job>> {
        self.constructor.map(|constructor| constructor())
    }
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("handler_type", &self.handler_type)
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("id_generator", &self.id_generator.is_some())
            .field("options", &self.options)
            .field("constructor", &self.constructor.is_some())
            .finish()
    }
}

/// Maps handler types to their [`JobDescriptor`].
///
/// Registration takes `&mut self` and happens while the application is wired;
/// afterwards the registry is shared read-only behind an `Arc`.
#[derive(Debug, Default)]
pub struct JobRegistry {
    by_handler: HashMap<TypeId, Arc<JobDescriptor>>,
    by_name: HashMap<String, TypeId>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler the worker can build on its own with `J::default()`.
    pub fn register<J: Job + Default>(&mut self, config: JobConfig) -> Result<Arc<JobDescriptor>> {
        self.insert::<J>(config, Some(construct::<J>))
    }

    /// Registers a handler whose instances come from a container-backed resolver.
    pub fn register_external<J: Job>(&mut self, config: JobConfig) -> Result<Arc<JobDescriptor>> {
        self.insert::<J>(config, None)
    }

    fn insert<J: Job>(
        &mut self,
        config: JobConfig,
        constructor: Option<Constructor>,
    ) -> Result<Arc<JobDescriptor>> {
        let handler = TypeId::of::<J>();
        let handler_type = type_name::<J>();
        let name = config
            .name
            .unwrap_or_else(|| short_type_name(handler_type).to_string());

        if let Some(owner) = self.by_name.get(&name) {
            if *owner != handler {
                let existing = self.by_handler[owner].handler_type;
                return Err(QueueError::Conflict { name, existing });
            }
        }

        if let Some(previous) = self.by_handler.get(&handler) {
            self.by_name.remove(&previous.name);
        }

        let descriptor = Arc::new(JobDescriptor {
            handler,
            handler_type,
            name: name.clone(),
            queue: config.queue.unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
            id_generator: config.id_generator,
            options: config.options,
            constructor,
        });

        debug!(job = %descriptor.name, queue = %descriptor.queue, handler = handler_type, "Registered job");

        self.by_name.insert(name, handler);
        self.by_handler.insert(handler, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn lookup_by_name(&self, name: &str) -> Result<Arc<JobDescriptor>> {
        self.by_name
            .get(name)
            .and_then(|handler| self.by_handler.get(handler))
            .cloned()
            .ok_or_else(|| QueueError::NotFound(name.to_string()))
    }

    pub fn lookup_by_handler<J: Job>(&self) -> Result<Arc<JobDescriptor>> {
        self.lookup_by_type_id(TypeId::of::<J>())
            .map_err(|_| QueueError::NotFound(type_name::<J>().to_string()))
    }

    pub fn lookup_by_type_id(&self, handler: TypeId) -> Result<Arc<JobDescriptor>> {
        self.by_handler
            .get(&handler)
            .cloned()
            .ok_or_else(|| QueueError::NotFound(format!("{handler:?}")))
    }

    /// Distinct queues across all registered jobs.
    pub fn queue_names(&self) -> BTreeSet<String> {
        self.descriptors().map(|d| d.queue.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_handler.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handler.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<JobDescriptor>> {
        self.by_handler.values()
    }
}

/// `app::jobs::SendEmail<u8>` -> `SendEmail`
fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Greet;

    #[async_trait]
    impl Job for Greet {
        async fn run(&self, _args: &[Value]) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[derive(Default)]
    struct Cleanup;

    #[async_trait]
    impl Job for Cleanup {
        async fn run(&self, _args: &[Value]) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn lookups_return_the_registered_descriptor() {
        let mut registry = JobRegistry::new();
        let registered = registry
            .register::<Greet>(JobConfig::new().name("greet"))
            .unwrap();

        let by_name = registry.lookup_by_name("greet").unwrap();
        let by_handler = registry.lookup_by_handler::<Greet>().unwrap();
        assert!(Arc::ptr_eq(&registered, &by_name));
        assert!(Arc::ptr_eq(&registered, &by_handler));
        assert_eq!(registered.queue, "default");
    }

    #[test]
    fn name_defaults_to_type_name() {
        let mut registry = JobRegistry::new();
        let d = registry.register::<Cleanup>(JobConfig::new()).unwrap();
        assert_eq!(d.name, "Cleanup");
        assert!(registry.lookup_by_name("Cleanup").is_ok());
    }

    #[test]
    fn duplicate_name_from_another_handler_conflicts() {
        let mut registry = JobRegistry::new();
        registry.register::<Greet>(JobConfig::new().name("same")).unwrap();
        let err = registry
            .register::<Cleanup>(JobConfig::new().name("same"))
            .unwrap_err();
        assert!(matches!(err, QueueError::Conflict { ref name, .. } if name == "same"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn re_registering_a_handler_replaces_it() {
        let mut registry = JobRegistry::new();
        registry.register::<Greet>(JobConfig::new().name("hello")).unwrap();
        registry
            .register::<Greet>(JobConfig::new().name("greet").queue("mail"))
            .unwrap();

        assert!(matches!(registry.lookup_by_name("hello"), Err(QueueError::NotFound(_))));
        assert_eq!(registry.lookup_by_name("greet").unwrap().queue, "mail");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_lookups_are_not_found() {
        let registry = JobRegistry::new();
        assert!(matches!(registry.lookup_by_name("nope"), Err(QueueError::NotFound(_))));
        assert!(matches!(registry.lookup_by_handler::<Greet>(), Err(QueueError::NotFound(_))));
    }

    #[test]
    fn queue_names_are_distinct() {
        let mut registry = JobRegistry::new();
        registry.register::<Greet>(JobConfig::new().queue("mail")).unwrap();
        registry.register::<Cleanup>(JobConfig::new().queue("mail")).unwrap();
        let names: Vec<_> = registry.queue_names().into_iter().collect();
        assert_eq!(names, vec!["mail".to_string()]);
    }

    #[test]
    fn descriptors_lists_every_registration_once() {
        let mut registry = JobRegistry::new();
        registry.register::<Greet>(JobConfig::new().name("hello")).unwrap();
        registry.register::<Greet>(JobConfig::new().name("greet")).unwrap();
        registry.register::<Cleanup>(JobConfig::new()).unwrap();

        let mut names: Vec<_> = registry.descriptors().map(|d| d.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Cleanup", "greet"]);
    }

    #[test]
    fn external_handlers_have_no_constructor() {
        let mut registry = JobRegistry::new();
        let d = registry.register_external::<Greet>(JobConfig::new()).unwrap();
        assert!(d.construct().is_none());
        let d = registry.register::<Cleanup>(JobConfig::new()).unwrap();
        assert!(d.construct().is_some());
    }

    #[test]
    fn short_names() {
        assert_eq!(short_type_name("app::jobs::SendEmail"), "SendEmail");
        assert_eq!(short_type_name("app::Wrap<app::Inner>"), "Wrap");
        assert_eq!(short_type_name("Plain"), "Plain");
    }
}
