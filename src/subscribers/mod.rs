//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out, and the
//! built-in [`LogWriter`] for handling events broadcast through the [`Bus`](crate::Bus).
//!
//! ## Architecture
//! ```text
//! runner / Stage / Pipeline / Limiter ── publish(Event) ──► Bus
//!                                                            │
//!                                        Orchestrator listener
//!                                                            ▼
//!                                                     SubscriberSet
//!                                                   ┌──────┼──────┐
//!                                                   ▼      ▼      ▼
//!                                             LogWriter  Metrics  Custom
//! ```

mod log;
mod subscriber;
mod subscriber_set;

pub use log::LogWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;

pub(crate) use subscriber_set::panic_message;
