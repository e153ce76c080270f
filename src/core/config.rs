//! # Global runtime configuration.
//!
//! Provides [`Config`], the centralized settings for the orchestrator.
//!
//! Config is used in two ways:
//! 1. **Orchestrator creation**: `Orchestrator::builder(config).build()`
//! 2. **Factory defaults**: `Orchestrator::pipeline()` / `Orchestrator::stage()` pick up
//!    timeouts and the timeout policy from here.
//!
//! ## Sentinel values
//! - `stage_timeout = 0s` → tasks have no timeout
//! - `pipeline_timeout = 0s` → runs have no deadline

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::engine::TimeoutPolicy;

/// Global configuration for the orchestrator.
///
/// ## Field semantics
/// - `max_concurrent`: pipeline runs admitted at once (must be > 0)
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `stage_timeout`: default per-task timeout of factory stages (`0s` = none)
/// - `pipeline_timeout`: default deadline of factory pipelines (`0s` = none)
/// - `timeout_policy`: what factory stages do with timed-out execution units
///
/// ## Notes
/// All fields are public for flexibility. Prefer the helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of the [`ConcurrencyLimiter`](crate::ConcurrencyLimiter).
    ///
    /// `0` is rejected by `build()` with [`ConfigError::ZeroCapacity`](crate::ConfigError).
    pub max_concurrent: usize,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow listeners that lag behind more than `bus_capacity` messages
    /// receive `Lagged` and skip older items.
    pub bus_capacity: usize,

    /// Default per-task timeout for stages created by the orchestrator.
    pub stage_timeout: Duration,

    /// Default deadline for pipelines created by the orchestrator.
    pub pipeline_timeout: Duration,

    /// Default timeout policy for stages created by the orchestrator.
    pub timeout_policy: TimeoutPolicy,
}

impl Config {
    /// Returns the default per-task timeout as an `Option` (`None` = no timeout).
    #[inline]
    pub fn default_stage_timeout(&self) -> Option<Duration> {
        Some(self.stage_timeout).filter(|d| !d.is_zero())
    }

    /// Returns the default pipeline deadline as an `Option` (`None` = no deadline).
    #[inline]
    pub fn default_pipeline_timeout(&self) -> Option<Duration> {
        Some(self.pipeline_timeout).filter(|d| !d.is_zero())
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `max_concurrent` = available parallelism (1 if unknown)
    /// - `bus_capacity = 1024`
    /// - `stage_timeout = 0s`, `pipeline_timeout = 0s` (none)
    /// - `timeout_policy = Detach`
    fn default() -> Self {
        Self {
            max_concurrent: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            bus_capacity: 1024,
            stage_timeout: Duration::ZERO,
            pipeline_timeout: Duration::ZERO,
            timeout_policy: TimeoutPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timeouts_mean_none() {
        let mut cfg = Config::default();
        assert!(cfg.max_concurrent >= 1);
        assert_eq!(cfg.default_stage_timeout(), None);
        assert_eq!(cfg.default_pipeline_timeout(), None);

        cfg.stage_timeout = Duration::from_millis(50);
        cfg.bus_capacity = 0;
        assert_eq!(cfg.default_stage_timeout(), Some(Duration::from_millis(50)));
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
