//! # ConcurrencyLimiter: capacity-gated admission with a join primitive.
//!
//! Bounds how many submitted units of work (usually pipeline runs) execute at once.
//!
//! ```text
//! go(ctx, unit)
//!   ├─ ctx cancelled ─────────────────────► Err(Canceled), UnitRejected
//!   ├─ wait for permit ◄── ctx cancelled ─► Err(Canceled), UnitRejected
//!   │                  ◄── closed ────────► Err(Closed),   UnitRejected
//!   ├─ in_flight += 1, UnitAdmitted
//!   └─ tokio::spawn(unit) ──► CompletionGuard::drop   (also on panic)
//!                                ├─ UnitFinished
//!                                ├─ in_flight -= 1, processed += 1
//!                                └─ permit released
//!
//! wait(ctx): watch(in_flight) == 0 ──► Ok
//!            ctx cancelled first   ──► Err(Canceled)
//! ```
//!
//! ## Rules
//! - At most `size` admitted units run concurrently, for any submission order.
//! - The unit reports nothing back (fire-and-forget); capture results in the future itself.
//! - Counters are published through a `watch` channel, so `wait` never misses the last release.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, LimiterError};
use crate::events::{Bus, Event, EventKind};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Counters {
    in_flight: usize,
    processed: u64,
}

struct Inner {
    size: usize,
    gate: Arc<Semaphore>,
    counters: watch::Sender<Counters>,
    bus: Bus,
}

/// Process-wide gate bounding concurrently executing units of work.
///
/// Cloning yields another handle to the same gate.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Inner>,
}

impl ConcurrencyLimiter {
    /// Creates a limiter admitting at most `capacity` units at once.
    ///
    /// # Errors
    /// [`ConfigError::ZeroCapacity`] when `capacity == 0`.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        Self::with_bus(capacity, Bus::default())
    }

    /// Same as [`new`](Self::new), publishing admission events to `bus`.
    pub fn with_bus(capacity: usize, bus: Bus) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let (counters, _rx) = watch::channel(Counters::default());
        Ok(Self {
            inner: Arc::new(Inner {
                size: capacity,
                gate: Arc::new(Semaphore::new(capacity)),
                counters,
                bus,
            }),
        })
    }

    /// Waits for a free slot, then runs `unit` on its own tokio task.
    ///
    /// Returns once the unit is admitted, not when it finishes.
    ///
    /// # Errors
    /// - [`LimiterError::Canceled`] if `ctx` is cancelled before a slot is granted,
    /// - [`LimiterError::Closed`] after [`close`](Self::close).
    ///
    /// In both cases `unit` is dropped without being polled.
    pub async fn go<F>(&self, ctx: &CancellationToken, unit: F) -> Result<(), LimiterError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = match self.admit(ctx).await {
            Ok(permit) => permit,
            Err(err) => {
                self.inner
                    .bus
                    .publish(Event::new(EventKind::UnitRejected).with_reason(err.as_label()));
                return Err(err);
            }
        };

        let mut in_flight = 0;
        self.inner.counters.send_modify(|c| {
            c.in_flight += 1;
            in_flight = c.in_flight;
        });
        self.inner
            .bus
            .publish(Event::new(EventKind::UnitAdmitted).with_in_flight(in_flight));

        let guard = CompletionGuard {
            inner: Arc::clone(&self.inner),
            permit: Some(permit),
        };
        tokio::spawn(async move {
            let _guard = guard;
            unit.await;
        });
        Ok(())
    }

    async fn admit(&self, ctx: &CancellationToken) -> Result<OwnedSemaphorePermit, LimiterError> {
        if ctx.is_cancelled() {
            return Err(LimiterError::Canceled);
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(LimiterError::Canceled),
            res = Arc::clone(&self.inner.gate).acquire_owned() => res.map_err(|_closed| LimiterError::Closed),
        }
    }

    /// Waits until no admitted unit is running.
    ///
    /// # Errors
    /// [`LimiterError::Canceled`] if `ctx` is cancelled while work is still outstanding.
    pub async fn wait(&self, ctx: &CancellationToken) -> Result<(), LimiterError> {
        let mut rx = self.inner.counters.subscribe();
        loop {
            if rx.borrow_and_update().in_flight == 0 {
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(LimiterError::Canceled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Units that finished since construction.
    pub fn processed(&self) -> u64 {
        self.inner.counters.borrow().processed
    }

    /// Capacity passed at construction.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Units admitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.counters.borrow().in_flight
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.inner.gate.available_permits()
    }

    /// Stops admitting new units; running ones are unaffected.
    pub fn close(&self) {
        self.inner.gate.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.gate.is_closed()
    }
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = *self.inner.counters.borrow();
        f.debug_struct("ConcurrencyLimiter")
            .field("size", &self.inner.size)
            .field("in_flight", &c.in_flight)
            .field("processed", &c.processed)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Releases one admitted unit exactly once, on completion or unwind.
struct CompletionGuard {
    inner: Arc<Inner>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        // published before the counters move, so whoever `wait`s has it on the bus already
        let remaining = self.inner.counters.borrow().in_flight.saturating_sub(1);
        self.inner
            .bus
            .publish(Event::new(EventKind::UnitFinished).with_in_flight(remaining));
        self.inner.counters.send_modify(|c| {
            c.in_flight -= 1;
            c.processed += 1;
        });
        // counters before the permit: the next admission must never see a stale in_flight
        drop(self.permit.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert_eq!(ConcurrencyLimiter::new(0).unwrap_err(), ConfigError::ZeroCapacity);
    }

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let limiter = ConcurrencyLimiter::new(3).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let ctx = CancellationToken::new();

        for _ in 0..20 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            limiter
                .go(&ctx, async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            assert!(limiter.in_flight() <= 3);
        }

        limiter.wait(&ctx).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.processed(), 20);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.available(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submitters_never_exceed_capacity() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let submitters: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let ctx = CancellationToken::new();
                    for _ in 0..5 {
                        let running = Arc::clone(&running);
                        let peak = Arc::clone(&peak);
                        limiter
                            .go(&ctx, async move {
                                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(now, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(2)).await;
                                running.fetch_sub(1, Ordering::SeqCst);
                            })
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for s in submitters {
            s.await.unwrap();
        }

        limiter.wait(&CancellationToken::new()).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(limiter.processed(), 40);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_returns_after_all_units_finish() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let ctx = CancellationToken::new();

        for ms in [10u64, 30, 20] {
            let done = Arc::clone(&done);
            limiter
                .go(&ctx, async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }

        limiter.wait(&ctx).await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.processed(), 3);
    }

    #[tokio::test]
    async fn test_wait_with_cancelled_ctx() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let cancelled = CancellationToken::new();
        cancelled.cancel();

        // nothing outstanding: success even with a dead context
        assert_eq!(limiter.wait(&cancelled).await, Ok(()));

        let release = CancellationToken::new();
        let gate = release.clone();
        limiter
            .go(&CancellationToken::new(), async move { gate.cancelled().await })
            .await
            .unwrap();

        assert_eq!(limiter.wait(&cancelled).await, Err(LimiterError::Canceled));
        release.cancel();
        limiter.wait(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_go_cancelled_while_queued_never_runs_unit() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let release = CancellationToken::new();
        let gate = release.clone();
        limiter
            .go(&CancellationToken::new(), async move { gate.cancelled().await })
            .await
            .unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        let ctx = CancellationToken::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let res = limiter
            .go(&ctx, async move {
                flag.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(res, Err(LimiterError::Canceled));

        release.cancel();
        limiter.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(limiter.processed(), 1);
    }

    #[tokio::test]
    async fn test_panicking_unit_still_releases_slot() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let ctx = CancellationToken::new();

        limiter
            .go(&ctx, async {
                panic!("unit exploded");
            })
            .await
            .unwrap();
        limiter.wait(&ctx).await.unwrap();

        assert_eq!(limiter.processed(), 1);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_closed_limiter_rejects() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let handle = limiter.clone();
        handle.close();

        let res = limiter.go(&CancellationToken::new(), async {}).await;
        assert_eq!(res, Err(LimiterError::Closed));
        assert!(limiter.is_closed());
        assert_eq!(limiter.processed(), 0);
    }

    #[tokio::test]
    async fn test_admission_events_are_published() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let limiter = ConcurrencyLimiter::with_bus(1, bus).unwrap();
        let ctx = CancellationToken::new();

        limiter.go(&ctx, async {}).await.unwrap();
        limiter.wait(&ctx).await.unwrap();

        let admitted = rx.recv().await.unwrap();
        assert_eq!(admitted.kind, EventKind::UnitAdmitted);
        assert_eq!(admitted.in_flight, Some(1));
        let finished = rx.recv().await.unwrap();
        assert_eq!(finished.kind, EventKind::UnitFinished);
        assert_eq!(finished.in_flight, Some(0));
    }
}
