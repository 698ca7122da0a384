use std::fmt;
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::events::{EventBus, InProcEventBus};
use crate::store::JobStore;
use crate::work::JobWork;

use super::scheduler::JobScheduler;

/// Builder for constructing a [`JobScheduler`] with explicit dependencies.
///
/// The store and the work implementation are required. Without an explicit
/// event bus the scheduler publishes to a fresh [`InProcEventBus`], which
/// drops events nobody subscribed to.
///
/// # Example
///
/// ```ignore
/// use jobsched::*;
///
/// let scheduler = JobSchedulerBuilder::new(SchedulerConfig::default())
///     .with_store(Arc::new(InMemoryJobStore::new()))
///     .with_events(Arc::new(bus.clone()))
///     .with_work(Arc::new(SimulatedWork::new(work_config)))
///     .build()?;
/// ```
pub struct JobSchedulerBuilder {
    config: SchedulerConfig,
    store: Option<Arc<dyn JobStore>>,
    events: Option<Arc<dyn EventBus>>,
    work: Option<Arc<dyn JobWork>>,
}

impl fmt::Debug for JobSchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSchedulerBuilder")
            .field("config", &self.config)
            .field("store_set", &self.store.is_some())
            .field("events_set", &self.events.is_some())
            .field("work_set", &self.work.is_some())
            .finish()
    }
}

impl JobSchedulerBuilder {
    /// Create a new builder with the given scheduler configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            store: None,
            events: None,
            work: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_work(mut self, work: Arc<dyn JobWork>) -> Self {
        self.work = Some(work);
        self
    }

    /// Build the scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or the work dependency is missing.
    pub fn build(self) -> anyhow::Result<JobScheduler> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store dependency missing"))?;
        let work = self
            .work
            .ok_or_else(|| anyhow::anyhow!("work dependency missing"))?;
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(InProcEventBus::default()));

        Ok(JobScheduler::new(self.config, store, events, work))
    }
}

impl JobScheduler {
    pub fn builder(config: SchedulerConfig) -> JobSchedulerBuilder {
        JobSchedulerBuilder::new(config)
    }
}
