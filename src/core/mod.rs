//! Runtime core: configuration and orchestration.
//!
//! Internal modules:
//! - [`config`]: global settings and factory defaults;
//! - [`builder`]: wires bus, limiter and subscribers into an orchestrator;
//! - [`orchestrator`]: runs pipelines under the limiter and feeds subscribers.

mod builder;
mod config;
mod orchestrator;

pub use builder::OrchestratorBuilder;
pub use config::Config;
pub use orchestrator::{Orchestrator, PipelineRun};
