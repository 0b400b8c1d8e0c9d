//! Registry of live audio sources.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::error::SessionError;
use super::source::AudioSource;
use super::{SessionEvent, SourceContext};
use crate::engine::{EngineFactory, PlaybackEngine};
use crate::types::{SourceOptions, SourceStatus};

/// Every active [`AudioSource`] keyed by its caller-supplied id.
///
/// At most one source is notification-bound; it is reachable through
/// [`notification_source`](Self::notification_source).
pub struct SourceRegistry {
    sources: HashMap<String, AudioSource>,
    context: SourceContext,
    factory: Arc<dyn EngineFactory>,
}

impl SourceRegistry {
    pub fn new(context: SourceContext, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            sources: HashMap::new(),
            context,
            factory,
        }
    }

    /// Creates and registers a source. Non-notification sources are
    /// initialized immediately.
    ///
    /// # Errors
    ///
    /// - `SessionError::AlreadyExists` for a duplicate id or a second
    ///   notification-bound source
    /// - `SessionError::EngineFailure` if the dedicated engine cannot be created
    pub fn create(&mut self, options: SourceOptions) -> Result<&mut AudioSource, SessionError> {
        if self.sources.contains_key(&options.audio_id) {
            return Err(SessionError::AlreadyExists(options.audio_id));
        }
        if options.use_for_notification {
            if let Some(existing) = self.notification_source() {
                return Err(SessionError::AlreadyExists(format!(
                    "通知用ソース {}",
                    existing.id()
                )));
            }
        }

        let id = options.audio_id.clone();
        let mut source = AudioSource::new(options, self.context.clone());
        if !source.use_for_notification() {
            source.initialize(self.factory.as_ref())?;
        }

        info!("Audio source created: {}", id);
        Ok(self.sources.entry(id).or_insert(source))
    }

    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for an unknown id.
    pub fn get(&self, id: &str) -> Result<&AudioSource, SessionError> {
        self.sources
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for an unknown id.
    pub fn get_mut(&mut self, id: &str) -> Result<&mut AudioSource, SessionError> {
        self.sources
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    /// Initializes a source: a dedicated engine from the factory for a plain
    /// source (no-op if present), the shared engine for the notification one.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for an unknown id, or the error of
    /// the initialization itself.
    pub fn initialize(
        &mut self,
        id: &str,
        shared: Option<Arc<dyn PlaybackEngine>>,
    ) -> Result<(), SessionError> {
        let factory = self.factory.clone();
        let source = self.get_mut(id)?;
        if source.use_for_notification() {
            let engine = shared.ok_or_else(|| {
                SessionError::InvalidState("共有エンジンがありません".to_string())
            })?;
            source.attach_shared_engine(engine)
        } else {
            source.initialize(factory.as_ref())
        }
    }

    /// Destroys and removes one source.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for an unknown id.
    pub fn destroy(&mut self, id: &str) -> Result<(), SessionError> {
        let mut source = self
            .sources
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        source.destroy();
        Ok(())
    }

    /// Destroys and removes every source that is not notification-bound.
    ///
    /// Returns the number of sources removed.
    pub fn destroy_all_non_notification_sources(&mut self) -> usize {
        let ids: Vec<String> = self
            .sources
            .values()
            .filter(|s| !s.use_for_notification())
            .map(|s| s.id().to_string())
            .collect();

        for id in &ids {
            if let Some(mut source) = self.sources.remove(id) {
                source.destroy();
            }
        }

        if !ids.is_empty() {
            info!("Destroyed {} non-notification source(s)", ids.len());
        }
        ids.len()
    }

    /// The notification-bound source, if registered.
    pub fn notification_source(&self) -> Option<&AudioSource> {
        self.sources.values().find(|s| s.use_for_notification())
    }

    pub fn notification_source_mut(&mut self) -> Option<&mut AudioSource> {
        self.sources.values_mut().find(|s| s.use_for_notification())
    }

    /// Destroys and removes every source.
    pub fn clear(&mut self) {
        for (_, mut source) in self.sources.drain() {
            source.destroy();
        }
    }

    /// Routes an event to its source. Events for unknown ids are dropped.
    pub fn dispatch(&mut self, event: SessionEvent) {
        let Some(source) = self.sources.get_mut(event.source_id()) else {
            debug!("Dropping event for unknown source: {:?}", event);
            return;
        };

        match event {
            SessionEvent::Engine { event, .. } => source.handle_engine_event(event),
            SessionEvent::TrackerTick { generation, .. } => source.handle_tracker_tick(generation),
            SessionEvent::MetadataTick { generation, .. } => {
                source.handle_metadata_tick(generation)
            }
        }
    }

    /// Status snapshots ordered by id.
    pub fn statuses(&self) -> Vec<SourceStatus> {
        let mut statuses: Vec<SourceStatus> = self.sources.values().map(AudioSource::status).collect();
        statuses.sort_by(|a, b| a.audio_id.cmp(&b.audio_id));
        statuses
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.sources.len())
            .finish_non_exhaustive()
    }
}
