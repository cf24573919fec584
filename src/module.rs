use crate::error::Result;
use crate::registry::JobRegistry;

/// Implemented by application modules that contribute jobs.
pub trait HasJobs {
    /// Registers every job this module provides.
    fn register_jobs(&self, registry: &mut JobRegistry) -> Result<()>;
}

impl JobRegistry {
    /// Collects the jobs of every module, stopping at the first failed registration.
    pub fn load_from(&mut self, modules: &[&dyn HasJobs]) -> Result<()> {
        for module in modules {
            module.register_jobs(self)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use crate::job::Job;
    use crate::registry::JobConfig;
    use async_trait::async_trait;
    use serde_json::Value;

    #[derive(Default)]
    struct SendInvoice;

    #[async_trait]
    impl Job for SendInvoice {
        async fn run(&self, _args: &[Value]) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[derive(Default)]
    struct ChargeCard;

    #[async_trait]
    impl Job for ChargeCard {
        async fn run(&self, _args: &[Value]) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    struct Billing;

    impl HasJobs for Billing {
        fn register_jobs(&self, registry: &mut JobRegistry) -> Result<()> {
            registry.register::<SendInvoice>(JobConfig::new().queue("mail"))?;
            registry.register::<ChargeCard>(JobConfig::new().queue("payments"))?;
            Ok(())
        }
    }

    struct Clashing;

    impl HasJobs for Clashing {
        fn register_jobs(&self, registry: &mut JobRegistry) -> Result<()> {
            registry.register::<ChargeCard>(JobConfig::new().name("SendInvoice"))?;
            Ok(())
        }
    }

    #[test]
    fn modules_fill_the_registry() {
        let mut registry = JobRegistry::new();
        registry.load_from(&[&Billing]).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.queue_names().len(), 2);
    }

    #[test]
    fn conflicts_stop_loading() {
        let mut registry = JobRegistry::new();
        let err = registry.load_from(&[&Billing, &Clashing]).unwrap_err();
        assert!(matches!(err, QueueError::Conflict { .. }));
    }
}
