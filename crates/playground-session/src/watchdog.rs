//! Per-session deadline timers.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use playground_core::SessionId;
use tokio_util::sync::CancellationToken;

struct Timer {
    generation: u64,
    cancel: CancellationToken,
}

/// Schedules one expiry action per session.
///
/// Firing and disarming both race to remove the timer entry; whichever
/// removes it wins, so an expiry action runs at most once and never after a
/// successful disarm.
#[derive(Clone, Default)]
pub struct Watchdog {
    timers: Arc<DashMap<SessionId, Timer>>,
    generation: Arc<AtomicU64>,
}

impl Watchdog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_expire` once after `duration` unless disarmed first.
    ///
    /// Re-arming a session replaces its previous timer.
    pub fn arm<F>(&self, id: SessionId, duration: Duration, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let previous = self.timers.insert(
            id,
            Timer {
                generation,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        let timers = Arc::clone(&self.timers);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(duration) => {
                    let fired = timers
                        .remove_if(&id, |_, timer| timer.generation == generation)
                        .is_some();
                    if fired {
                        tracing::debug!(session_id = %id, "Deadline reached");
                        on_expire();
                    }
                }
            }
        });
    }

    /// Cancel a pending expiry.
    ///
    /// Returns `false` if nothing was armed, including after the timer fired.
    pub fn disarm(&self, id: SessionId) -> bool {
        match self.timers.remove(&id) {
            Some((_, timer)) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_armed(&self, id: SessionId) -> bool {
        self.timers.contains_key(&id)
    }

    /// Disarm every timer. Returns how many were pending.
    pub fn disarm_all(&self) -> usize {
        let ids: Vec<SessionId> = self.timers.iter().map(|t| *t.key()).collect();
        ids.into_iter().filter(|id| self.disarm(*id)).count()
    }
}
