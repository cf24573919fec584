// src/resolver.rs
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::QueueError;
use crate::job::Job;
use crate::registry::JobDescriptor;

/// Produces the handler instance that runs one delivered item.
pub trait Resolver: Send + Sync {
    fn resolve(&self, descriptor: &JobDescriptor) -> Result<Arc<dyn Job>, QueueError>;
}

/// Builds handlers with the `Default` constructor captured at registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve(&self, descriptor: &JobDescriptor) -> Result<Arc<dyn Job>, QueueError> {
        descriptor.construct().ok_or_else(|| {
            QueueError::Configuration(format!(
                "job \"{}\" ({}) has no default constructor; register it with `register` or give the worker a container",
                descriptor.name, descriptor.handler_type
            ))
        })
    }
}

type Factory = Arc<dyn Fn() -> Arc<dyn Job> + Send + Sync>;

/// Type-keyed container of handler factories, for handlers that need dependencies.
///
/// ```ignore
/// let container = ContainerResolver::new()
///     .bind(move || SendInvoice::new(mailer.clone()))
///     .instance(Cleanup::default());
/// let worker = WorkerRunner::new(registry, backend, options).with_resolver(Arc::new(container));
/// ```
#[derive(Clone, Default)]
pub struct ContainerResolver {
    factories: HashMap<TypeId, Factory>,
    fallback_to_default: bool,
}

impl ContainerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new instance per delivery.
    pub fn bind<J, F>(mut self, factory: F) -> Self
    where
        J: Job,
        F: Fn() -> J + Send + Sync + 'static,
    {
        self.factories
            .insert(TypeId::of::<J>(), Arc::new(move || Arc::new(factory()) as Arc<dyn Job>));
        self
    }

    /// One shared instance for every delivery.
    pub fn instance<J: Job>(mut self, job: J) -> Self {
        let shared: Arc<dyn Job> = Arc::new(job);
        self.factories
            .insert(TypeId::of::<J>(), Arc::new(move || Arc::clone(&shared)));
        self
    }

    /// Falls back to the registered default constructor for unbound types.
    pub fn or_default(mut self) -> Self {
        self.fallback_to_default = true;
        self
    }

    pub fn contains<J: Job>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<J>())
    }
}

impl Resolver for ContainerResolver {
    fn resolve(&self, descriptor: &JobDescriptor) -> Result<Arc<dyn Job>, QueueError> {
        if let Some(factory) = self.factories.get(&descriptor.handler) {
            return Ok(factory());
        }
        if self.fallback_to_default {
            return DefaultResolver.resolve(descriptor);
        }
        Err(QueueError::Configuration(format!(
            "container has no binding for {} (job \"{}\")",
            descriptor.handler_type, descriptor.name
        )))
    }
}

impl std::fmt::Debug for ContainerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerResolver")
            .field("bindings", &self.factories.len())
            .field("fallback_to_default", &self.fallback_to_default)
            .finish()
    }
}
