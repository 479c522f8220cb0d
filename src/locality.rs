//! The process-local runtime a group of cells shares.

use std::fmt;
use std::sync::Arc;

use crate::error::SchedulerError;
use crate::naming::Registry;
use crate::stencil::port::RemoteFetch;
use crate::threads::{Scheduler, SchedulerConfig};

/// Scheduler, naming registry and remote-fetch capability for one locality.
///
/// Cells hold an `Arc<Locality>` and use it to spawn their driver, resolve
/// their evaluator and fetch neighbor values.
pub struct Locality {
    scheduler: Scheduler,
    registry: Arc<Registry>,
    fetch: Arc<dyn RemoteFetch>,
}

impl Locality {
    /// Starts a locality whose input ports fetch straight from its own registry.
    pub fn new(config: SchedulerConfig) -> Result<Arc<Self>, SchedulerError> {
        let registry = Arc::new(Registry::new());
        let fetch: Arc<dyn RemoteFetch> = Arc::clone(&registry) as Arc<dyn RemoteFetch>;
        Self::with_fetch(config, registry, fetch)
    }

    /// Starts a locality with a custom fetch path, e.g. one that adds latency
    /// or routes through a transport.
    pub fn with_fetch(
        config: SchedulerConfig,
        registry: Arc<Registry>,
        fetch: Arc<dyn RemoteFetch>,
    ) -> Result<Arc<Self>, SchedulerError> {
        Ok(Arc::new(Self {
            scheduler: Scheduler::new(config)?,
            registry,
            fetch,
        }))
    }

    /// The task scheduler.
    #[inline]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The naming registry.
    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The fetch path used by input ports.
    #[inline]
    pub fn fetch(&self) -> &dyn RemoteFetch {
        &*self.fetch
    }

    /// Stops the scheduler. Drivers still running are depleted.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

impl fmt::Debug for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locality")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
