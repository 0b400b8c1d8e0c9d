//! Playback session core.
//!
//! This module owns session state and progress bookkeeping around external
//! playback engines:
//! - [`AudioSource`]: per-source state machine and engine driver
//! - [`AudioMetadata`]: display metadata with a periodic updater
//! - [`BackgroundTracker`]: played-seconds bookkeeping with skip rejection
//! - [`SourceRegistry`]: every live source keyed by id
//!
//! Nothing here blocks. Timers and engines only post [`SessionEvent`]s; the
//! owner of the registry applies them in arrival order.

pub mod artwork;
mod error;
pub mod metadata;
pub mod registry;
pub mod source;
pub mod task;
pub mod tracker;

use std::time::Duration;

use tokio::sync::mpsc;

use crate::engine::EngineEvent;
use crate::types::CallbackInvocation;

pub use artwork::{ArtworkLoader, CachedArtwork};
pub use error::SessionError;
pub use metadata::AudioMetadata;
pub use registry::SourceRegistry;
pub use source::AudioSource;
pub use task::{Generations, PeriodicTask};
pub use tracker::{BackgroundTracker, SampleOutcome};

/// Default interval of the metadata updater.
pub const DEFAULT_METADATA_INTERVAL: Duration = Duration::from_millis(1000);

// ============================================================================
// SessionEvent
// ============================================================================

/// Asynchronous input for the session owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An engine reported an event
    Engine {
        /// Source the engine belongs to
        source_id: String,
        /// Engine event
        event: EngineEvent,
    },
    /// Background tracker sampling tick
    TrackerTick {
        /// Source being tracked
        source_id: String,
        /// Tracking run the tick belongs to
        generation: u64,
    },
    /// Metadata updater tick
    MetadataTick {
        /// Source being refreshed
        source_id: String,
        /// Updater run the tick belongs to
        generation: u64,
    },
}

impl SessionEvent {
    /// Returns the id of the source the event is addressed to.
    pub fn source_id(&self) -> &str {
        match self {
            Self::Engine { source_id, .. }
            | Self::TrackerTick { source_id, .. }
            | Self::MetadataTick { source_id, .. } => source_id,
        }
    }
}

// ============================================================================
// SourceContext
// ============================================================================

/// Channels and settings shared by every source of a session.
#[derive(Debug, Clone)]
pub struct SourceContext {
    /// Sender for engine events and timer ticks
    pub events: mpsc::UnboundedSender<SessionEvent>,
    /// Sender for outward callback invocations
    pub callbacks: mpsc::UnboundedSender<CallbackInvocation>,
    /// Artwork resolution for the foreground surface
    pub artwork: ArtworkLoader,
    /// Metadata updater period
    pub metadata_interval: Duration,
    /// Tick generations of every timer in the session
    pub generations: Generations,
}

impl SourceContext {
    pub fn new(
        events: mpsc::UnboundedSender<SessionEvent>,
        callbacks: mpsc::UnboundedSender<CallbackInvocation>,
    ) -> Self {
        Self {
            events,
            callbacks,
            artwork: ArtworkLoader::default(),
            metadata_interval: DEFAULT_METADATA_INTERVAL,
            generations: Generations::new(),
        }
    }

    /// Sets the artwork loader.
    pub fn with_artwork(mut self, artwork: ArtworkLoader) -> Self {
        self.artwork = artwork;
        self
    }

    /// Sets the metadata updater period.
    pub fn with_metadata_interval(mut self, interval: Duration) -> Self {
        self.metadata_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_source_id() {
        let event = SessionEvent::Engine {
            source_id: "a".to_string(),
            event: EngineEvent::Ready,
        };
        assert_eq!(event.source_id(), "a");

        let event = SessionEvent::TrackerTick {
            source_id: "b".to_string(),
            generation: 1,
        };
        assert_eq!(event.source_id(), "b");

        let event = SessionEvent::MetadataTick {
            source_id: "c".to_string(),
            generation: 1,
        };
        assert_eq!(event.source_id(), "c");
    }

    #[test]
    fn test_context_builders() {
        let (events, _events_rx) = mpsc::unbounded_channel();
        let (callbacks, _callbacks_rx) = mpsc::unbounded_channel();
        let context = SourceContext::new(events, callbacks)
            .with_artwork(ArtworkLoader::new("/assets"))
            .with_metadata_interval(Duration::from_millis(250));

        assert_eq!(context.artwork.asset_root(), std::path::Path::new("/assets"));
        assert_eq!(context.metadata_interval, Duration::from_millis(250));
    }
}
