//! # Event subscriber trait.
//!
//! Provides [`Subscribe`], the extension point for plugging custom event handlers into the engine.
//!
//! Each subscriber gets a dedicated worker task fed by its own bounded queue; panics are caught
//! and reported as `EventKind::SubscriberPanicked`. A slow subscriber only affects its own queue:
//! on overflow the event is dropped for that subscriber and `EventKind::SubscriberOverflow` is
//! published.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use stagevisor::{Event, EventKind, Subscribe};
//!
//! struct Timeouts;
//!
//! #[async_trait]
//! impl Subscribe for Timeouts {
//!     async fn on_event(&self, ev: &Event) {
//!         if matches!(ev.kind, EventKind::TimeoutHit) {
//!             // export a metric, page someone, etc.
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "timeouts" }
//!     fn queue_capacity(&self) -> usize { 256 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for engine observability.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally; do not panic.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event, in FIFO order per subscriber.
    async fn on_event(&self, event: &Event);

    /// Returns the subscriber name used in overflow/panic events.
    ///
    /// The default uses `type_name::<Self>()`, which can be verbose.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the preferred queue capacity for this subscriber (clamped to at least 1).
    ///
    /// Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
