// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-timer proactive refresh scheduling.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

/// Default lead time before expiry at which a refresh fires.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// Inspection view of the armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRefresh {
    pub expires_at_ms: u64,
    pub delay: Duration,
}

struct PendingRefresh {
    generation: u64,
    expires_at_ms: u64,
    delay: Duration,
    cancel: CancellationToken,
}

/// Owns at most one pending refresh timer.
///
/// Arming always cancels the previous timer under the same lock that installs
/// the new one, and a timer that wakes up after losing a race with
/// [`disarm`](Self::disarm) or a newer [`arm`](Self::arm) exits without
/// firing.
pub struct RefreshScheduler {
    buffer: Duration,
    clock: Arc<dyn Clock>,
    slot: Arc<Mutex<Option<PendingRefresh>>>,
    generation: AtomicU64,
}

impl RefreshScheduler {
    pub fn new(buffer: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { buffer, clock, slot: Arc::new(Mutex::new(None)), generation: AtomicU64::new(0) }
    }

    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    /// Delay until the refresh for a record expiring at `expires_at_ms`.
    /// Zero means "next tick".
    pub fn plan(&self, expires_at_ms: u64) -> Duration {
        let fire_at = expires_at_ms.saturating_sub(self.buffer.as_millis() as u64);
        Duration::from_millis(fire_at.saturating_sub(self.clock.now_ms()))
    }

    /// Replace any pending timer with one that runs `on_fire` `buffer` before
    /// `expires_at_ms`. Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&self, expires_at_ms: u64, on_fire: F) -> ScheduledRefresh
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.plan(expires_at_ms);
        let cancel = CancellationToken::new();

        let generation = {
            let mut slot = self.slot.lock();
            if let Some(previous) = slot.take() {
                previous.cancel.cancel();
            }
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            *slot = Some(PendingRefresh {
                generation,
                expires_at_ms,
                delay,
                cancel: cancel.clone(),
            });
            generation
        };

        tracing::debug!(delay_secs = delay.as_secs(), generation, "refresh timer armed");

        let slot = Arc::clone(&self.slot);
        tokio::spawn(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            {
                let mut slot = slot.lock();
                match slot.as_ref() {
                    Some(current) if current.generation == generation => *slot = None,
                    _ => return,
                }
            }

            tracing::debug!(generation, "refresh timer fired");
            on_fire().await;
        });

        ScheduledRefresh { expires_at_ms, delay }
    }

    /// Cancel the pending timer. Returns whether one was pending.
    pub fn disarm(&self) -> bool {
        match self.slot.lock().take() {
            Some(previous) => {
                previous.cancel.cancel();
                tracing::debug!(generation = previous.generation, "refresh timer disarmed");
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> Option<ScheduledRefresh> {
        self.slot
            .lock()
            .as_ref()
            .map(|p| ScheduledRefresh { expires_at_ms: p.expires_at_ms, delay: p.delay })
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(previous) = self.slot.lock().take() {
            previous.cancel.cancel();
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
