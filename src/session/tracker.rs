//! Background listening progress tracker.
//!
//! Turns a stream of position samples into the set of whole seconds that were
//! actually heard. Jumps larger than [`SKIP_THRESHOLD_MS`] between two samples
//! are treated as seeks and record nothing.
//!
//! The tracker itself is plain bookkeeping. The owning source feeds it
//! positions from its engine whenever a sampling tick is processed.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::debug;

use super::task::{Generations, PeriodicTask};

/// Interval between two position samples.
pub const SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Largest forward movement (ms) still counted as continuous playback.
pub const SKIP_THRESHOLD_MS: u64 = 3000;

/// Result of feeding one position sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Continuous playback; `added` new seconds were recorded
    Recorded {
        /// Number of seconds not seen before
        added: usize,
    },
    /// The position jumped forward past the skip threshold
    Skipped,
    /// The position did not move forward
    Unchanged,
    /// Tracking is not active
    Inactive,
}

/// Played-seconds bookkeeping for one source.
#[derive(Debug, Default)]
pub struct BackgroundTracker {
    active: bool,
    duration_seconds: u32,
    start_position_ms: u64,
    last_recorded_position_ms: u64,
    played_seconds: BTreeSet<u32>,
    generation: u64,
    generations: Generations,
    task: Option<PeriodicTask>,
}

impl BackgroundTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracker drawing its generations from a session-wide counter.
    #[must_use]
    pub fn with_generations(generations: Generations) -> Self {
        Self {
            generations,
            ..Self::default()
        }
    }

    /// Activates tracking from `position_ms`. Returns false if already active.
    ///
    /// Clears previously recorded seconds and bumps the generation.
    pub fn begin(&mut self, duration_seconds: u32, position_ms: u64) -> bool {
        if self.active {
            return false;
        }

        self.played_seconds.clear();
        self.duration_seconds = duration_seconds;
        self.start_position_ms = position_ms;
        self.last_recorded_position_ms = position_ms;
        self.active = true;
        self.generation = self.generations.next();
        true
    }

    /// Activates tracking and schedules the recurring sample.
    ///
    /// `on_tick` receives the generation the tick belongs to; ticks whose
    /// generation no longer matches are ignored by [`is_current`](Self::is_current).
    pub fn start<F>(&mut self, duration_seconds: u32, position_ms: u64, on_tick: F) -> bool
    where
        F: Fn(u64) -> bool + Send + 'static,
    {
        if !self.begin(duration_seconds, position_ms) {
            return false;
        }

        let generation = self.generation;
        self.task = Some(PeriodicTask::spawn(SAMPLE_PERIOD, move || {
            on_tick(generation)
        }));
        true
    }

    /// Deactivates tracking and cancels the recurring sample. Idempotent.
    ///
    /// Returns true if tracking was active.
    pub fn stop(&mut self) -> bool {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
        if !self.active {
            return false;
        }

        self.active = false;
        self.generation = self.generations.next();
        true
    }

    /// Feeds one position sample.
    pub fn sample(&mut self, current_ms: u64) -> SampleOutcome {
        if !self.active {
            return SampleOutcome::Inactive;
        }

        let last = self.last_recorded_position_ms;
        if current_ms <= last {
            return SampleOutcome::Unchanged;
        }

        let diff = current_ms - last;
        if diff > SKIP_THRESHOLD_MS {
            debug!("Skip detected: {}ms -> {}ms", last, current_ms);
            self.last_recorded_position_ms = current_ms;
            return SampleOutcome::Skipped;
        }

        let first = last / 1000;
        let final_second = current_ms / 1000;
        let mut added = 0;
        for second in first..=final_second {
            if second > u64::from(self.duration_seconds) {
                break;
            }
            if second * 1000 < self.start_position_ms {
                continue;
            }
            // Bounded by duration_seconds above, so the cast is lossless.
            if self.played_seconds.insert(second as u32) {
                added += 1;
            }
        }
        self.last_recorded_position_ms = current_ms;

        SampleOutcome::Recorded { added }
    }

    /// Returns the played seconds in ascending order and clears them.
    pub fn fetch(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.played_seconds)
            .into_iter()
            .collect()
    }

    /// Returns true while tracking.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns true if `generation` belongs to the current tracking run.
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.active && self.generation == generation
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    #[must_use]
    pub fn start_position_ms(&self) -> u64 {
        self.start_position_ms
    }

    #[must_use]
    pub fn last_recorded_position_ms(&self) -> u64 {
        self.last_recorded_position_ms
    }

    /// Number of seconds recorded since the last fetch.
    #[must_use]
    pub fn recorded_len(&self) -> usize {
        self.played_seconds.len()
    }
}
