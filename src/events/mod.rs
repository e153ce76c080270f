//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the task runner, stages, pipelines,
//! the concurrency limiter and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `engine::runner`, `Stage`, `Pipeline`, `ConcurrencyLimiter`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the orchestrator listener (fans out to `SubscriberSet`), or any
//!   receiver obtained from [`Bus::subscribe`].

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
