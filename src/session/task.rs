//! Cancellable periodic tasks.
//!
//! A [`PeriodicTask`] only posts: the tick closure runs on a spawned tokio
//! task and is expected to forward a message to the owner context. All state
//! changes happen when the owner processes that message.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// A recurring tick that stops when cancelled or dropped.
///
/// The first tick fires immediately. Missed ticks are skipped rather than
/// bursted. Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct PeriodicTask {
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawns the task. The loop ends when `on_tick` returns false.
    pub fn spawn<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if !on_tick() {
                    break;
                }
            }
        });

        Self { handle }
    }

    /// Stops the task. No tick starts after this returns.
    pub fn cancel(self) {
        self.handle.abort();
    }

    /// Returns true once the loop has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Tick generation counter shared by the timers of one session.
///
/// Generations are never reused, so a tick still queued for a destroyed
/// source cannot match a later source created under the same id.
#[derive(Debug, Clone, Default)]
pub struct Generations(Arc<AtomicU64>);

impl Generations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a generation not handed out before.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}
