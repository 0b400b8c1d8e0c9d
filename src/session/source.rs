//! Audio source: one playable item and its engine.
//!
//! A source owns its state machine, metadata and background tracker. A
//! notification-bound source borrows the coordinator's shared engine; every
//! other source creates a dedicated engine on `initialize` and releases it
//! on `destroy`.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::artwork::CachedArtwork;
use super::error::SessionError;
use super::metadata::AudioMetadata;
use super::tracker::{BackgroundTracker, SampleOutcome};
use super::{SessionEvent, SourceContext};
use crate::engine::{
    Artwork, AudioRouting, EngineEvent, EngineFactory, EngineListener, EngineState,
    MediaDescriptor, PlaybackEngine,
};
use crate::types::{
    CallbackInvocation, CallbackPayload, MetadataFields, PlaybackState, SourceOptions,
    SourceStatus,
};

/// Accepted volume range.
pub const VOLUME_RANGE: std::ops::RangeInclusive<f32> = 0.0..=1.0;

/// Largest accepted playback rate. Rates must also be positive.
pub const MAX_RATE: f32 = 4.0;

// ============================================================================
// EngineSlot
// ============================================================================

/// Engine handle shared between a source and its metadata callback.
#[derive(Clone, Default)]
struct EngineSlot(Arc<RwLock<Option<Arc<dyn PlaybackEngine>>>>);

impl EngineSlot {
    fn get(&self) -> Option<Arc<dyn PlaybackEngine>> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, engine: Arc<dyn PlaybackEngine>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(engine);
    }

    fn take(&self) -> Option<Arc<dyn PlaybackEngine>> {
        self.0.write().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn is_set(&self) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Callback ids registered by the embedding application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SourceCallbacks {
    on_ready: Option<String>,
    on_end: Option<String>,
    on_playback_status_change: Option<String>,
    on_metadata_update: Option<String>,
}

// ============================================================================
// AudioSource
// ============================================================================

/// One independently controllable playback session.
pub struct AudioSource {
    id: String,
    source: String,
    metadata: AudioMetadata,
    use_for_notification: bool,
    is_background_music: bool,
    loop_audio: bool,
    state: PlaybackState,
    engine: EngineSlot,
    tracker: BackgroundTracker,
    callbacks: SourceCallbacks,
    context: SourceContext,
    destroyed: bool,
}

impl AudioSource {
    /// Creates a source without an engine.
    pub fn new(options: SourceOptions, context: SourceContext) -> Self {
        let engine = EngineSlot::default();
        let mut metadata =
            AudioMetadata::new(&options.metadata).with_generations(context.generations.clone());

        let slot = engine.clone();
        let mut artwork = options
            .use_for_notification
            .then(|| CachedArtwork::new(context.artwork.clone()));
        metadata.set_update_callback(Box::new(move |m| {
            if let Some(engine) = slot.get() {
                let art = artwork
                    .as_mut()
                    .and_then(|cache| cache.resolve(m.artwork_source()));
                engine.replace_media_metadata(m.to_media_metadata(art));
            }
        }));

        Self {
            id: options.audio_id,
            source: options.audio_source,
            metadata,
            use_for_notification: options.use_for_notification,
            is_background_music: options.is_background_music,
            loop_audio: options.loop_audio,
            state: PlaybackState::Stopped,
            engine,
            tracker: BackgroundTracker::with_generations(context.generations.clone()),
            callbacks: SourceCallbacks::default(),
            context,
            destroyed: false,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Media locator.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn metadata(&self) -> &AudioMetadata {
        &self.metadata
    }

    pub fn use_for_notification(&self) -> bool {
        self.use_for_notification
    }

    pub fn loop_audio(&self) -> bool {
        self.loop_audio
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    /// Returns true once an engine is attached.
    pub fn is_initialized(&self) -> bool {
        self.engine.is_set()
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_active()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Status snapshot.
    pub fn status(&self) -> SourceStatus {
        SourceStatus {
            audio_id: self.id.clone(),
            audio_source: self.source.clone(),
            state: self.state,
            use_for_notification: self.use_for_notification,
            background_music: self.is_background_music,
            initialized: self.is_initialized(),
            tracking: self.is_tracking(),
        }
    }

    fn engine(&self) -> Result<Arc<dyn PlaybackEngine>, SessionError> {
        self.engine
            .get()
            .ok_or_else(|| SessionError::InvalidState(format!("{} は初期化されていません", self.id)))
    }

    fn resolve_artwork(&self) -> Option<Artwork> {
        if !self.use_for_notification {
            return None;
        }
        self.context
            .artwork
            .resolve_or_skip(self.metadata.artwork_source())
    }

    fn media_descriptor(&self) -> MediaDescriptor {
        MediaDescriptor {
            uri: self.source.clone(),
            metadata: self.metadata.to_media_metadata(self.resolve_artwork()),
        }
    }

    fn listener(&self) -> EngineListener {
        let events = self.context.events.clone();
        let source_id = self.id.clone();
        Arc::new(move |event| {
            let _ = events.send(SessionEvent::Engine {
                source_id: source_id.clone(),
                event,
            });
        })
    }

    fn emit(&self, callback_id: Option<&String>, payload: CallbackPayload) {
        if let Some(callback_id) = callback_id {
            let _ = self
                .context
                .callbacks
                .send(CallbackInvocation::new(callback_id.clone(), payload));
        }
    }

    fn emit_status(&self, error: Option<String>) {
        self.emit(
            self.callbacks.on_playback_status_change.as_ref(),
            CallbackPayload::PlaybackStatusChange {
                audio_id: self.id.clone(),
                status: self.state,
                error,
            },
        );
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Applies routing, media item, repeat mode and listener, then prepares.
    fn configure(&mut self, engine: Arc<dyn PlaybackEngine>) {
        self.state = PlaybackState::Stopped;

        engine.set_audio_routing(AudioRouting::for_source(self.use_for_notification));
        engine.set_media_item(self.media_descriptor());
        engine.set_repeat(self.loop_audio);
        engine.set_play_when_ready(false);
        engine.set_listener(Some(self.listener()));
        self.engine.set(engine.clone());

        engine.prepare();
    }

    /// Creates and configures a dedicated engine.
    ///
    /// No-op for a notification-bound source or one that already has an
    /// engine.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::EngineFailure` if the factory fails, or
    /// `SessionError::InvalidState` if the source was destroyed.
    pub fn initialize(&mut self, factory: &dyn EngineFactory) -> Result<(), SessionError> {
        if self.destroyed {
            return Err(SessionError::InvalidState(format!(
                "{} は破棄されています",
                self.id
            )));
        }
        if self.use_for_notification || self.is_initialized() {
            return Ok(());
        }

        let engine = factory.create()?;
        self.configure(engine);
        info!("Audio source initialized: {}", self.id);
        Ok(())
    }

    /// Binds the coordinator's shared engine to a notification-bound source.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` for any other source.
    pub fn attach_shared_engine(
        &mut self,
        engine: Arc<dyn PlaybackEngine>,
    ) -> Result<(), SessionError> {
        if !self.use_for_notification || self.destroyed {
            return Err(SessionError::InvalidState(format!(
                "{} は通知用ソースではありません",
                self.id
            )));
        }
        if self.is_initialized() {
            return Ok(());
        }

        self.configure(engine);
        info!("Notification source initialized: {}", self.id);
        Ok(())
    }

    /// Stops timers and releases the owned engine. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }

        self.metadata.stop_updater();
        self.tracker.stop();
        self.metadata.clear_update_callback();

        if let Some(engine) = self.engine.take() {
            engine.set_listener(None);
            if !self.use_for_notification {
                engine.release();
            }
        }

        self.destroyed = true;
        info!("Audio source destroyed: {}", self.id);
    }

    // ------------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------------

    /// Starts or resumes playback, re-preparing an idle engine first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` without an engine.
    pub fn play(&mut self) -> Result<(), SessionError> {
        let engine = self.engine()?;
        self.state = PlaybackState::Playing;

        if engine.playback_state() == EngineState::Idle {
            engine.prepare();
        }
        engine.play();

        if self.use_for_notification {
            let events = self.context.events.clone();
            let source_id = self.id.clone();
            self.metadata
                .start_updater(self.context.metadata_interval, move |generation| {
                    events
                        .send(SessionEvent::MetadataTick {
                            source_id: source_id.clone(),
                            generation,
                        })
                        .is_ok()
                });
        }

        debug!("Play: {}", self.id);
        Ok(())
    }

    /// Pauses playback.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` without an engine.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        let engine = self.engine()?;
        self.state = PlaybackState::Paused;
        engine.pause();
        self.metadata.stop_updater();
        debug!("Pause: {}", self.id);
        Ok(())
    }

    /// Pauses playback and rewinds to the start.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` without an engine.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let engine = self.engine()?;
        self.state = PlaybackState::Stopped;
        engine.pause();
        engine.seek_to(0);
        self.metadata.stop_updater();
        debug!("Stop: {}", self.id);
        Ok(())
    }

    /// Moves the position. The transport state is unchanged.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` without an engine.
    pub fn seek(&mut self, time_in_seconds: u64) -> Result<(), SessionError> {
        let engine = self.engine()?;
        engine.seek_to(time_in_seconds.saturating_mul(1000));
        Ok(())
    }

    /// Swaps the media locator and re-prepares without auto-play.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` without an engine.
    pub fn change_audio_source(&mut self, source: impl Into<String>) -> Result<(), SessionError> {
        let engine = self.engine()?;
        self.source = source.into();

        engine.set_media_item(self.media_descriptor());
        engine.set_play_when_ready(false);
        engine.prepare();

        info!("Audio source changed: {} -> {}", self.id, self.source);
        Ok(())
    }

    /// Merges metadata fields and refreshes the engine's media description.
    ///
    /// Fields are merged even before an engine is attached; the refresh then
    /// happens on initialization.
    pub fn change_metadata(&mut self, fields: &MetadataFields) {
        self.metadata.update(fields);
    }

    /// Re-pushes the current media description.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` without an engine.
    pub fn refresh_metadata(&mut self) -> Result<(), SessionError> {
        self.engine()?;
        self.metadata.push();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidArgument` outside 0.0 - 1.0, or
    /// `SessionError::InvalidState` without an engine.
    pub fn set_volume(&mut self, volume: f32) -> Result<(), SessionError> {
        if !VOLUME_RANGE.contains(&volume) {
            return Err(SessionError::InvalidArgument(format!("volume {}", volume)));
        }
        self.engine()?.set_volume(volume);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidArgument` unless `0.0 < rate <= 4.0`, or
    /// `SessionError::InvalidState` without an engine.
    pub fn set_rate(&mut self, rate: f32) -> Result<(), SessionError> {
        if !(rate > 0.0 && rate <= MAX_RATE) {
            return Err(SessionError::InvalidArgument(format!("rate {}", rate)));
        }
        self.engine()?.set_playback_speed(rate);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// False without an engine.
    pub fn is_playing(&self) -> bool {
        self.is_initialized() && self.state.is_playing()
    }

    /// Duration in seconds, `-1.0` when unknown or without an engine.
    pub fn duration_seconds(&self) -> f64 {
        match self.engine.get().and_then(|e| e.duration_ms()) {
            Some(ms) => ms as f64 / 1000.0,
            None => -1.0,
        }
    }

    /// Position in seconds, `0.0` without an engine.
    pub fn current_time_seconds(&self) -> f64 {
        self.position_ms() as f64 / 1000.0
    }

    fn position_ms(&self) -> u64 {
        self.engine
            .get()
            .map_or(0, |engine| engine.current_position_ms())
    }

    // ------------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------------

    pub fn set_on_ready(&mut self, callback_id: impl Into<String>) {
        self.callbacks.on_ready = Some(callback_id.into());
    }

    pub fn set_on_end(&mut self, callback_id: impl Into<String>) {
        self.callbacks.on_end = Some(callback_id.into());
    }

    pub fn set_on_playback_status_change(&mut self, callback_id: impl Into<String>) {
        self.callbacks.on_playback_status_change = Some(callback_id.into());
    }

    pub fn set_on_metadata_update(&mut self, callback_id: impl Into<String>) {
        self.callbacks.on_metadata_update = Some(callback_id.into());
    }

    // ------------------------------------------------------------------------
    // Background tracking
    // ------------------------------------------------------------------------

    /// Starts recording played seconds from the current position.
    ///
    /// Returns false (and does nothing) for looping sources or while
    /// tracking is already active.
    pub fn start_background_tracking(&mut self, duration_seconds: u32) -> bool {
        if self.loop_audio {
            debug!("Looping source never tracks: {}", self.id);
            return false;
        }

        let position_ms = self.position_ms();
        let events = self.context.events.clone();
        let source_id = self.id.clone();
        let started = self
            .tracker
            .start(duration_seconds, position_ms, move |generation| {
                events
                    .send(SessionEvent::TrackerTick {
                        source_id: source_id.clone(),
                        generation,
                    })
                    .is_ok()
            });

        if started {
            info!(
                "Background tracking started: {} (duration {}s, from {}ms)",
                self.id, duration_seconds, position_ms
            );
        } else {
            debug!("Background tracking already active: {}", self.id);
        }
        started
    }

    /// Stops recording. Idempotent.
    pub fn stop_background_tracking(&mut self) {
        if self.tracker.stop() {
            info!("Background tracking stopped: {}", self.id);
        }
    }

    /// Played seconds in ascending order; clears them.
    pub fn fetch_background_played_seconds(&mut self) -> Vec<u32> {
        self.tracker.fetch()
    }

    /// Takes one position sample if tracking and playing.
    pub fn sample_background_progress(&mut self) -> SampleOutcome {
        if !self.tracker.is_active() {
            return SampleOutcome::Inactive;
        }
        if !self.state.is_playing() {
            return SampleOutcome::Unchanged;
        }

        let outcome = self.tracker.sample(self.position_ms());
        debug!("Tracker sample for {}: {:?}", self.id, outcome);
        outcome
    }

    // ------------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------------

    /// Applies an engine event.
    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Ready => {
                debug!("Engine ready: {}", self.id);
                self.emit(
                    self.callbacks.on_ready.as_ref(),
                    CallbackPayload::AudioReady {
                        audio_id: self.id.clone(),
                    },
                );
            }
            EngineEvent::PlayingChanged { playing } => {
                // The transport state follows commands only; an echo that
                // disagrees with the last command is outdated.
                if playing != self.state.is_playing() {
                    debug!("Outdated playing echo for {}: {}", self.id, playing);
                    return;
                }
                self.emit_status(None);
            }
            EngineEvent::Ended => {
                self.state = PlaybackState::Stopped;
                self.metadata.stop_updater();
                info!("Playback ended: {}", self.id);
                self.emit(
                    self.callbacks.on_end.as_ref(),
                    CallbackPayload::AudioEnd {
                        audio_id: self.id.clone(),
                    },
                );
                self.emit_status(None);
            }
            EngineEvent::Error { message } => {
                warn!("Engine error on {}: {}", self.id, message);
                self.state = PlaybackState::Stopped;
                self.metadata.stop_updater();
                self.emit_status(Some(message));
            }
        }
    }

    /// Applies a tracker tick. Stale generations are ignored.
    pub fn handle_tracker_tick(&mut self, generation: u64) {
        if !self.tracker.is_current(generation) {
            debug!("Stale tracker tick for {}", self.id);
            return;
        }
        self.sample_background_progress();
    }

    /// Applies a metadata updater tick. Stale generations are ignored.
    pub fn handle_metadata_tick(&mut self, generation: u64) {
        if !self.metadata.is_current_updater(generation) {
            debug!("Stale metadata tick for {}", self.id);
            return;
        }

        self.metadata.push();
        self.emit(
            self.callbacks.on_metadata_update.as_ref(),
            CallbackPayload::MetadataUpdate {
                audio_id: self.id.clone(),
                metadata: self.metadata.to_fields(),
                current_time: self.current_time_seconds(),
                duration: self.duration_seconds(),
            },
        );
    }
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSource")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("state", &self.state)
            .field("use_for_notification", &self.use_for_notification)
            .field("initialized", &self.is_initialized())
            .field("tracking", &self.is_tracking())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineCall, MockEngineFactory, MockPlaybackEngine};
    use std::time::Duration;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Harness {
        source: AudioSource,
        engine: Arc<MockPlaybackEngine>,
        events: UnboundedReceiver<SessionEvent>,
        callbacks: UnboundedReceiver<CallbackInvocation>,
    }

    impl Harness {
        fn drain_events(&mut self) -> Vec<SessionEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        /// Feeds queued engine events back into the source.
        fn pump(&mut self) {
            for event in self.drain_events() {
                if let SessionEvent::Engine { event, .. } = event {
                    self.source.handle_engine_event(event);
                }
            }
        }

        fn drain_callbacks(&mut self) -> Vec<CallbackInvocation> {
            let mut out = Vec::new();
            while let Ok(callback) = self.callbacks.try_recv() {
                out.push(callback);
            }
            out
        }
    }

    fn context() -> (
        SourceContext,
        UnboundedReceiver<SessionEvent>,
        UnboundedReceiver<CallbackInvocation>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (callbacks_tx, callbacks_rx) = mpsc::unbounded_channel();
        let context = SourceContext::new(events_tx, callbacks_tx)
            .with_metadata_interval(Duration::from_millis(20));
        (context, events_rx, callbacks_rx)
    }

    fn harness(options: SourceOptions) -> Harness {
        let (context, events, callbacks) = context();
        let mut source = AudioSource::new(options, context);
        let engine = if source.use_for_notification() {
            let engine = Arc::new(MockPlaybackEngine::new());
            source.attach_shared_engine(engine.clone()).unwrap();
            engine
        } else {
            let factory = MockEngineFactory::new();
            source.initialize(&factory).unwrap();
            factory.last().unwrap()
        };
        let mut harness = Harness {
            source,
            engine,
            events,
            callbacks,
        };
        harness.drain_events();
        harness.engine.clear_calls();
        harness
    }

    fn plain() -> Harness {
        harness(SourceOptions::new("track", "/music/track.mp3"))
    }

    mod lifecycle_tests {
        use super::*;

        #[test]
        fn test_initialize_configures_engine() {
            let (context, _events, _callbacks) = context();
            let mut source = AudioSource::new(
                SourceOptions::new("a", "/a.mp3").looping(),
                context,
            );
            let factory = MockEngineFactory::new();

            source.initialize(&factory).unwrap();

            let engine = factory.last().unwrap();
            assert_eq!(
                engine.calls(),
                vec![
                    EngineCall::SetAudioRouting(AudioRouting::for_source(false)),
                    EngineCall::SetMediaItem("/a.mp3".to_string()),
                    EngineCall::SetRepeat(true),
                    EngineCall::SetPlayWhenReady(false),
                    EngineCall::Prepare,
                ]
            );
            assert!(engine.has_listener());
            assert!(source.is_initialized());
            assert!(source.is_stopped());
        }

        #[test]
        fn test_status_reports_flags() {
            let h = harness(SourceOptions::new("bgm", "/bgm.mp3").background_music());

            let status = h.source.status();

            assert!(status.background_music);
            assert!(!status.use_for_notification);
            assert!(status.initialized);
            assert_eq!(status.state, PlaybackState::Stopped);
        }

        #[test]
        fn test_initialize_twice_is_noop() {
            let (context, _events, _callbacks) = context();
            let mut source = AudioSource::new(SourceOptions::new("a", "/a.mp3"), context);
            let factory = MockEngineFactory::new();

            source.initialize(&factory).unwrap();
            source.initialize(&factory).unwrap();

            assert_eq!(factory.created_count(), 1);
        }

        #[test]
        fn test_initialize_notification_source_is_noop() {
            let (context, _events, _callbacks) = context();
            let mut source = AudioSource::new(
                SourceOptions::new("n", "/n.mp3").for_notification(),
                context,
            );
            let factory = MockEngineFactory::new();

            source.initialize(&factory).unwrap();

            assert_eq!(factory.created_count(), 0);
            assert!(!source.is_initialized());
        }

        #[test]
        fn test_initialize_factory_failure() {
            let (context, _events, _callbacks) = context();
            let mut source = AudioSource::new(SourceOptions::new("a", "/a.mp3"), context);
            let factory = MockEngineFactory::new();
            factory.set_should_fail(true);

            let result = source.initialize(&factory);

            assert!(matches!(result, Err(SessionError::EngineFailure(_))));
            assert!(!source.is_initialized());
        }

        #[test]
        fn test_attach_shared_engine_rejects_plain_source() {
            let (context, _events, _callbacks) = context();
            let mut source = AudioSource::new(SourceOptions::new("a", "/a.mp3"), context);

            let result = source.attach_shared_engine(Arc::new(MockPlaybackEngine::new()));

            assert!(matches!(result, Err(SessionError::InvalidState(_))));
        }

        #[test]
        fn test_attach_shared_engine_uses_speech_routing() {
            let h = harness(SourceOptions::new("n", "/n.mp3").for_notification());
            assert_eq!(h.engine.routing(), Some(AudioRouting::for_source(true)));
            assert!(h.source.is_initialized());
        }

        #[test]
        fn test_destroy_releases_owned_engine() {
            let mut h = plain();

            h.source.destroy();
            h.source.destroy();

            assert!(h.engine.is_released());
            assert_eq!(h.engine.call_count(&EngineCall::Release), 1);
            assert!(!h.source.is_initialized());
            assert!(h.source.is_destroyed());
        }

        #[test]
        fn test_destroy_keeps_shared_engine() {
            let mut h = harness(SourceOptions::new("n", "/n.mp3").for_notification());

            h.source.destroy();

            assert!(!h.engine.is_released());
            assert!(!h.engine.has_listener());
        }

        #[test]
        fn test_initialize_after_destroy_fails() {
            let mut h = plain();
            h.source.destroy();

            let result = h.source.initialize(&MockEngineFactory::new());

            assert!(matches!(result, Err(SessionError::InvalidState(_))));
        }
    }

    mod transport_tests {
        use super::*;

        #[test]
        fn test_exactly_one_state_holds() {
            let mut h = plain();
            let check = |s: &AudioSource, expected: PlaybackState| {
                assert_eq!(s.state(), expected);
                let flags = [s.state().is_playing(), s.is_paused(), s.is_stopped()];
                assert_eq!(flags.iter().filter(|f| **f).count(), 1);
            };

            check(&h.source, PlaybackState::Stopped);
            h.source.play().unwrap();
            check(&h.source, PlaybackState::Playing);
            h.source.pause().unwrap();
            check(&h.source, PlaybackState::Paused);
            h.source.play().unwrap();
            h.source.stop().unwrap();
            check(&h.source, PlaybackState::Stopped);
            h.source.pause().unwrap();
            check(&h.source, PlaybackState::Paused);
        }

        #[test]
        fn test_play_reprepares_idle_engine() {
            let mut h = plain();
            h.engine.set_state(EngineState::Idle);

            h.source.play().unwrap();

            assert_eq!(h.engine.calls(), vec![EngineCall::Prepare, EngineCall::Play]);
        }

        #[test]
        fn test_play_ready_engine_does_not_prepare() {
            let mut h = plain();

            h.source.play().unwrap();

            assert_eq!(h.engine.calls(), vec![EngineCall::Play]);
            assert!(!h.source.metadata().is_updater_running());
        }

        #[test]
        fn test_stop_rewinds() {
            let mut h = plain();
            h.source.play().unwrap();
            h.engine.set_position_ms(42_000);

            h.source.stop().unwrap();

            assert_eq!(h.engine.current_position_ms(), 0);
            assert!(h.engine.calls().ends_with(&[EngineCall::Pause, EngineCall::SeekTo(0)]));
        }

        #[test]
        fn test_seek_keeps_state() {
            let mut h = plain();
            h.source.pause().unwrap();

            h.source.seek(12).unwrap();

            assert_eq!(h.engine.current_position_ms(), 12_000);
            assert!(h.source.is_paused());
        }

        #[test]
        fn test_change_audio_source_keeps_state() {
            let mut h = plain();
            h.source.play().unwrap();

            h.source.change_audio_source("/music/next.mp3").unwrap();

            assert_eq!(h.source.state(), PlaybackState::Playing);
            assert_eq!(h.source.source(), "/music/next.mp3");
            assert!(h.engine.calls().ends_with(&[
                EngineCall::SetMediaItem("/music/next.mp3".to_string()),
                EngineCall::SetPlayWhenReady(false),
                EngineCall::Prepare,
            ]));
        }

        #[test]
        fn test_commands_without_engine_are_invalid_state() {
            let (context, _events, _callbacks) = context();
            let mut source = AudioSource::new(SourceOptions::new("a", "/a.mp3"), context);

            assert!(matches!(source.play(), Err(SessionError::InvalidState(_))));
            assert!(matches!(source.pause(), Err(SessionError::InvalidState(_))));
            assert!(matches!(source.stop(), Err(SessionError::InvalidState(_))));
            assert!(matches!(source.seek(1), Err(SessionError::InvalidState(_))));
            assert!(matches!(
                source.change_audio_source("/b.mp3"),
                Err(SessionError::InvalidState(_))
            ));
            assert!(matches!(
                source.refresh_metadata(),
                Err(SessionError::InvalidState(_))
            ));
        }

        #[test]
        fn test_guarded_queries_without_engine() {
            let (context, _events, _callbacks) = context();
            let source = AudioSource::new(SourceOptions::new("a", "/a.mp3"), context);

            assert!(!source.is_playing());
            assert_eq!(source.duration_seconds(), -1.0);
            assert_eq!(source.current_time_seconds(), 0.0);
        }

        #[test]
        fn test_duration_and_position() {
            let h = plain();
            assert_eq!(h.source.duration_seconds(), -1.0);

            h.engine.set_duration_ms(Some(90_500));
            h.engine.set_position_ms(1_250);

            assert_eq!(h.source.duration_seconds(), 90.5);
            assert_eq!(h.source.current_time_seconds(), 1.25);
        }

        #[test]
        fn test_volume_range() {
            let mut h = plain();

            h.source.set_volume(0.0).unwrap();
            h.source.set_volume(1.0).unwrap();
            assert!(matches!(
                h.source.set_volume(1.5),
                Err(SessionError::InvalidArgument(_))
            ));
            assert!(matches!(
                h.source.set_volume(-0.1),
                Err(SessionError::InvalidArgument(_))
            ));
            assert_eq!(h.engine.volume(), Some(1.0));
        }

        #[test]
        fn test_rate_range() {
            let mut h = plain();

            h.source.set_rate(4.0).unwrap();
            assert!(matches!(
                h.source.set_rate(0.0),
                Err(SessionError::InvalidArgument(_))
            ));
            assert!(matches!(
                h.source.set_rate(f32::NAN),
                Err(SessionError::InvalidArgument(_))
            ));
            assert!(matches!(
                h.source.set_rate(4.5),
                Err(SessionError::InvalidArgument(_))
            ));
            assert_eq!(h.engine.speed(), Some(4.0));
        }

        #[test]
        fn test_invalid_argument_checked_before_engine() {
            let (context, _events, _callbacks) = context();
            let mut source = AudioSource::new(SourceOptions::new("a", "/a.mp3"), context);

            assert!(matches!(
                source.set_volume(2.0),
                Err(SessionError::InvalidArgument(_))
            ));
            assert!(matches!(
                source.set_volume(0.5),
                Err(SessionError::InvalidState(_))
            ));
        }
    }

    mod metadata_tests {
        use super::*;

        #[test]
        fn test_change_metadata_refreshes_engine_once() {
            let mut h = plain();
            h.source.play().unwrap();
            h.engine.set_position_ms(7000);
            h.engine.clear_calls();

            h.source.change_metadata(
                &MetadataFields::default()
                    .with_song_title("New title")
                    .with_artist_name("New artist"),
            );

            assert_eq!(h.engine.calls(), vec![EngineCall::ReplaceMediaMetadata]);
            let media = h.engine.media_item().unwrap();
            assert_eq!(media.metadata.title, "New title");
            assert_eq!(media.metadata.artist, "New artist");
            assert_eq!(h.engine.current_position_ms(), 7000);
            assert_eq!(h.source.state(), PlaybackState::Playing);
        }

        #[test]
        fn test_change_metadata_before_initialize() {
            let (context, _events, _callbacks) = context();
            let mut source = AudioSource::new(SourceOptions::new("a", "/a.mp3"), context);
            source.change_metadata(&MetadataFields::default().with_song_title("Early"));

            let factory = MockEngineFactory::new();
            source.initialize(&factory).unwrap();

            let media = factory.last().unwrap().media_item().unwrap();
            assert_eq!(media.metadata.title, "Early");
        }

        #[test]
        fn test_plain_source_never_resolves_artwork() {
            let h = harness(
                SourceOptions::new("a", "/a.mp3").with_metadata(
                    MetadataFields::default().with_artwork_source("https://example.com/a.png"),
                ),
            );
            assert_eq!(h.engine.media_item().unwrap().metadata.artwork, None);
        }

        #[test]
        fn test_notification_source_resolves_uri_artwork() {
            let h = harness(
                SourceOptions::new("n", "/n.mp3")
                    .for_notification()
                    .with_metadata(
                        MetadataFields::default().with_artwork_source("https://example.com/a.png"),
                    ),
            );
            assert_eq!(
                h.engine.media_item().unwrap().metadata.artwork,
                Some(Artwork::Uri("https://example.com/a.png".to_string()))
            );
        }

        #[test]
        fn test_missing_asset_artwork_is_swallowed() {
            let h = harness(
                SourceOptions::new("n", "/n.mp3")
                    .for_notification()
                    .with_metadata(
                        MetadataFields::default()
                            .with_song_title("Still here")
                            .with_artwork_source("no/such/asset.png"),
                    ),
            );
            let media = h.engine.media_item().unwrap();
            assert_eq!(media.metadata.artwork, None);
            assert_eq!(media.metadata.title, "Still here");
        }

        #[test]
        fn test_refresh_reuses_resolved_asset_artwork() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("cover.png"), [1u8, 2]).unwrap();
            let (context, _events, _callbacks) = context();
            let context = context.with_artwork(crate::session::ArtworkLoader::new(dir.path()));
            let mut source = AudioSource::new(
                SourceOptions::new("n", "/n.mp3")
                    .for_notification()
                    .with_metadata(MetadataFields::default().with_artwork_source("cover.png")),
                context,
            );
            let engine = Arc::new(MockPlaybackEngine::new());
            source.attach_shared_engine(engine.clone()).unwrap();
            source.refresh_metadata().unwrap();

            std::fs::remove_file(dir.path().join("cover.png")).unwrap();
            source.refresh_metadata().unwrap();

            assert_eq!(
                engine.media_item().unwrap().metadata.artwork,
                Some(Artwork::Data(vec![1, 2]))
            );
        }

        #[tokio::test]
        async fn test_notification_play_starts_updater() {
            let mut h = harness(SourceOptions::new("n", "/n.mp3").for_notification());

            h.source.play().unwrap();
            assert!(h.source.metadata().is_updater_running());

            h.source.pause().unwrap();
            assert!(!h.source.metadata().is_updater_running());

            h.source.play().unwrap();
            h.source.stop().unwrap();
            assert!(!h.source.metadata().is_updater_running());
        }

        #[tokio::test]
        async fn test_metadata_tick_emits_update() {
            let mut h = harness(SourceOptions::new("n", "/n.mp3").for_notification());
            h.source.set_on_metadata_update("cb-meta");
            h.engine.set_duration_ms(Some(60_000));
            h.engine.set_position_ms(3_000);

            h.source.play().unwrap();
            let tick = tokio::time::timeout(Duration::from_millis(500), async {
                loop {
                    if let Some(SessionEvent::MetadataTick { generation, .. }) =
                        h.events.recv().await
                    {
                        return generation;
                    }
                }
            })
            .await
            .unwrap();
            h.engine.clear_calls();
            h.source.handle_metadata_tick(tick);

            assert_eq!(h.engine.calls(), vec![EngineCall::ReplaceMediaMetadata]);
            let callbacks = h.drain_callbacks();
            assert_eq!(callbacks.len(), 1);
            assert_eq!(callbacks[0].callback_id, "cb-meta");
            match &callbacks[0].payload {
                CallbackPayload::MetadataUpdate {
                    current_time,
                    duration,
                    ..
                } => {
                    assert_eq!(*current_time, 3.0);
                    assert_eq!(*duration, 60.0);
                }
                other => panic!("unexpected payload: {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_stale_metadata_tick_is_ignored() {
            let mut h = harness(SourceOptions::new("n", "/n.mp3").for_notification());
            h.source.set_on_metadata_update("cb-meta");
            h.source.play().unwrap();
            // Let the first tick be posted before the updater is stopped.
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.source.pause().unwrap();
            h.engine.clear_calls();

            let mut stale = 0;
            for event in h.drain_events() {
                if let SessionEvent::MetadataTick { generation, .. } = event {
                    stale += 1;
                    h.source.handle_metadata_tick(generation);
                }
            }

            assert!(stale >= 1);
            assert!(h.engine.calls().is_empty());
            assert!(h
                .drain_callbacks()
                .iter()
                .all(|c| c.callback_id != "cb-meta"));
        }
    }

    mod event_tests {
        use super::*;

        #[test]
        fn test_ready_invokes_on_ready() {
            let mut h = plain();
            h.source.set_on_ready("cb-ready");

            h.source.handle_engine_event(EngineEvent::Ready);

            let callbacks = h.drain_callbacks();
            assert_eq!(
                callbacks,
                vec![CallbackInvocation::new(
                    "cb-ready",
                    CallbackPayload::AudioReady {
                        audio_id: "track".to_string()
                    }
                )]
            );
        }

        #[test]
        fn test_callbacks_without_registration_are_dropped() {
            let mut h = plain();
            h.source.handle_engine_event(EngineEvent::Ready);
            h.source.handle_engine_event(EngineEvent::Ended);
            assert!(h.drain_callbacks().is_empty());
        }

        #[test]
        fn test_initialize_listener_posts_ready() {
            let (context, mut events, _callbacks) = context();
            let mut source = AudioSource::new(SourceOptions::new("a", "/a.mp3"), context);
            source.initialize(&MockEngineFactory::new()).unwrap();

            assert_eq!(
                events.try_recv().unwrap(),
                SessionEvent::Engine {
                    source_id: "a".to_string(),
                    event: EngineEvent::Ready,
                }
            );
        }

        #[test]
        fn test_playing_changed_round_trip() {
            let mut h = plain();
            h.source.set_on_playback_status_change("cb-status");

            h.source.play().unwrap();
            h.pump();
            h.source.pause().unwrap();
            h.pump();

            let statuses: Vec<_> = h
                .drain_callbacks()
                .into_iter()
                .map(|c| match c.payload {
                    CallbackPayload::PlaybackStatusChange { status, .. } => status,
                    other => panic!("unexpected payload: {:?}", other),
                })
                .collect();
            assert_eq!(statuses, vec![PlaybackState::Playing, PlaybackState::Paused]);
        }

        #[test]
        fn test_not_playing_keeps_stopped() {
            let mut h = plain();
            h.source.play().unwrap();
            h.pump();

            h.source.stop().unwrap();
            h.pump();

            assert!(h.source.is_stopped());
        }

        #[test]
        fn test_queued_echoes_do_not_override_last_command() {
            let mut h = plain();
            h.source.set_on_playback_status_change("cb-status");

            h.source.play().unwrap();
            h.source.stop().unwrap();
            h.pump();

            assert_eq!(h.source.state(), PlaybackState::Stopped);
            let statuses: Vec<_> = h
                .drain_callbacks()
                .into_iter()
                .map(|c| match c.payload {
                    CallbackPayload::PlaybackStatusChange { status, .. } => status,
                    other => panic!("unexpected payload: {:?}", other),
                })
                .collect();
            assert_eq!(statuses, vec![PlaybackState::Stopped]);
        }

        #[test]
        fn test_queued_echoes_after_pause_then_play() {
            let mut h = plain();
            h.source.play().unwrap();
            h.pump();

            h.source.pause().unwrap();
            h.source.play().unwrap();
            h.pump();

            assert_eq!(h.source.state(), PlaybackState::Playing);
        }

        #[test]
        fn test_change_audio_source_while_playing_survives_engine_echo() {
            let mut h = plain();
            h.source.play().unwrap();
            h.pump();

            h.source.change_audio_source("/music/next.mp3").unwrap();
            h.pump();

            assert_eq!(h.source.state(), PlaybackState::Playing);
            assert!(h.source.is_playing());
        }

        #[test]
        fn test_ended_invokes_end_then_status() {
            let mut h = plain();
            h.source.set_on_end("cb-end");
            h.source.set_on_playback_status_change("cb-status");
            h.source.play().unwrap();
            h.pump();
            h.drain_callbacks();

            h.source.handle_engine_event(EngineEvent::Ended);

            assert!(h.source.is_stopped());
            let ids: Vec<_> = h
                .drain_callbacks()
                .into_iter()
                .map(|c| c.callback_id)
                .collect();
            assert_eq!(ids, vec!["cb-end".to_string(), "cb-status".to_string()]);
        }

        #[test]
        fn test_error_stops_and_forwards_message() {
            let mut h = plain();
            h.source.set_on_playback_status_change("cb-status");
            h.source.play().unwrap();
            h.pump();
            h.drain_callbacks();

            h.source.handle_engine_event(EngineEvent::Error {
                message: "decode failed".to_string(),
            });

            assert!(h.source.is_stopped());
            let callbacks = h.drain_callbacks();
            assert_eq!(
                callbacks[0].payload,
                CallbackPayload::PlaybackStatusChange {
                    audio_id: "track".to_string(),
                    status: PlaybackState::Stopped,
                    error: Some("decode failed".to_string()),
                }
            );
        }
    }

    mod tracking_tests {
        use super::*;

        fn positions(h: &mut Harness, positions: &[u64]) {
            for &position in positions {
                h.engine.set_position_ms(position);
                h.source.sample_background_progress();
            }
        }

        #[tokio::test]
        async fn test_tracks_while_playing() {
            let mut h = plain();
            h.source.play().unwrap();
            assert!(h.source.start_background_tracking(10));

            positions(&mut h, &[0, 1000, 2000, 3000]);
            h.source.stop_background_tracking();

            assert_eq!(h.source.fetch_background_played_seconds(), vec![0, 1, 2, 3]);
            assert!(h.source.fetch_background_played_seconds().is_empty());
        }

        #[tokio::test]
        async fn test_skip_is_not_recorded() {
            let mut h = plain();
            h.source.play().unwrap();
            h.source.start_background_tracking(30);

            positions(&mut h, &[0, 1000, 9000]);

            assert_eq!(h.source.fetch_background_played_seconds(), vec![0, 1]);
        }

        #[tokio::test]
        async fn test_paused_source_is_not_sampled() {
            let mut h = plain();
            h.source.start_background_tracking(10);

            positions(&mut h, &[1000, 2000]);

            assert!(h.source.fetch_background_played_seconds().is_empty());
        }

        #[tokio::test]
        async fn test_tracking_starts_from_current_position() {
            let mut h = plain();
            h.engine.set_position_ms(5000);
            h.source.play().unwrap();
            h.source.start_background_tracking(60);

            positions(&mut h, &[6000, 7000]);

            assert_eq!(h.source.fetch_background_played_seconds(), vec![5, 6, 7]);
        }

        #[tokio::test]
        async fn test_looping_source_never_tracks() {
            let mut h = harness(SourceOptions::new("bgm", "/bgm.mp3").looping());
            h.source.play().unwrap();

            assert!(!h.source.start_background_tracking(10));
            positions(&mut h, &[0, 1000]);

            assert!(!h.source.is_tracking());
            assert!(h.source.fetch_background_played_seconds().is_empty());
        }

        #[tokio::test]
        async fn test_tracking_without_engine_starts_at_zero() {
            let (context, _events, _callbacks) = context();
            let mut source = AudioSource::new(SourceOptions::new("a", "/a.mp3"), context);

            assert!(source.start_background_tracking(10));
            assert!(source.is_tracking());
            source.stop_background_tracking();
        }

        #[tokio::test]
        async fn test_tick_samples_until_stopped() {
            let mut h = plain();
            h.source.play().unwrap();
            h.source.start_background_tracking(10);
            h.engine.set_position_ms(1000);

            let generation = tokio::time::timeout(Duration::from_millis(500), async {
                loop {
                    if let Some(SessionEvent::TrackerTick { generation, .. }) =
                        h.events.recv().await
                    {
                        return generation;
                    }
                }
            })
            .await
            .unwrap();

            h.source.handle_tracker_tick(generation);
            h.source.stop_background_tracking();
            h.engine.set_position_ms(2000);
            h.source.handle_tracker_tick(generation);

            assert_eq!(h.source.fetch_background_played_seconds(), vec![0, 1]);
        }

        #[tokio::test]
        async fn test_destroy_stops_tracking() {
            let mut h = plain();
            h.source.start_background_tracking(10);

            h.source.destroy();

            assert!(!h.source.is_tracking());
        }
    }
}
