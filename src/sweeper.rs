//! Background eviction of unused cache entries.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::CacheStore;

/// Handle for a running background task.
#[derive(Debug)]
pub struct Handle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl Handle {
    pub const fn new(token: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { token, join }
    }

    /// Cancel the task and wait for it to finish.
    pub async fn cancel(self) {
        self.token.cancel();
        let _ = self.join.await;
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Periodically runs [`CacheStore::evict_unused`].
///
/// Uses `MissedTickBehavior::Skip`; a late sweep is not caught up on.
#[derive(Debug, Clone)]
pub struct Sweeper {
    store: Arc<CacheStore>,
    every: Duration,
}

impl Sweeper {
    #[must_use]
    pub const fn new(store: Arc<CacheStore>, every: Duration) -> Self {
        Self { store, every }
    }

    /// Starts sweeping on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, or if the interval is zero.
    #[must_use]
    pub fn spawn(self) -> Handle {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let join = tokio::spawn(async move {
            let mut timer = interval(self.every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks = IntervalStream::new(timer);

            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    tick = ticks.next() => {
                        if tick.is_none() {
                            break;
                        }
                        let evicted = self.store.evict_unused();
                        if evicted > 0 {
                            debug!(evicted, remaining = self.store.len(), "cache sweep");
                        }
                    }
                }
            }
        });

        Handle::new(token, join)
    }
}
