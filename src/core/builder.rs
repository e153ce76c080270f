use std::sync::Arc;

use crate::{
    core::Config,
    error::ConfigError,
    events::Bus,
    limiter::ConcurrencyLimiter,
    subscribers::{Subscribe, SubscriberSet},
};

use super::orchestrator::Orchestrator;

/// Builder for constructing an [`Orchestrator`].
pub struct OrchestratorBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl OrchestratorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (pipeline, stage, task and admission lifecycle)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the orchestrator and starts its subscriber listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// [`ConfigError::ZeroCapacity`] when `max_concurrent == 0`.
    pub fn build(self) -> Result<Arc<Orchestrator>, ConfigError> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let limiter = ConcurrencyLimiter::with_bus(self.cfg.max_concurrent, bus.clone())?;
        let subs = SubscriberSet::new(self.subscribers, bus.clone());

        Ok(Arc::new(Orchestrator::new_internal(self.cfg, bus, limiter, subs)))
    }
}
