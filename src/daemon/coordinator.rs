//! Session coordinator.
//!
//! Owns the shared notification engine and the source registry, and drives
//! the session lifecycle:
//! - startup: foreground promotion within the deadline, shared engine setup
//! - task removal: drop every non-notification source, pause the shared engine
//! - teardown: release everything and leave the foreground
//!
//! Every method runs on the single owner context (the daemon keeps the
//! coordinator behind one `tokio::sync::Mutex`).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::config::DaemonConfig;
use super::foreground::{ForegroundNotice, ForegroundSurface};
use crate::engine::{AudioRouting, EngineFactory, PlaybackEngine};
use crate::session::{
    ArtworkLoader, AudioSource, SessionError, SessionEvent, SourceContext, SourceRegistry,
};
use crate::types::{
    CallbackInvocation, CallbackPayload, MetadataFields, PlaybackState, SourceOptions,
    SourceStatus,
};

/// Most callback invocations kept for polling; the oldest are dropped beyond this.
pub const MAX_PENDING_CALLBACKS: usize = 1024;

/// Outcome of [`SessionCoordinator::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupReport {
    /// The foreground surface accepted the promotion
    pub promoted: bool,
    /// Time the promotion took
    pub elapsed: Duration,
    /// The promotion finished before the configured deadline
    pub within_deadline: bool,
    /// The shared notification engine is available
    pub shared_engine: bool,
}

/// Host callbacks for application focus changes.
#[derive(Debug, Clone, Default)]
struct AppFocusCallbacks {
    gains: Option<String>,
    loses: Option<String>,
}

/// Coordinates the audio sources of one session.
pub struct SessionCoordinator {
    config: DaemonConfig,
    registry: SourceRegistry,
    factory: Arc<dyn EngineFactory>,
    foreground: Arc<dyn ForegroundSurface>,
    shared_engine: Option<Arc<dyn PlaybackEngine>>,
    callbacks_tx: mpsc::UnboundedSender<CallbackInvocation>,
    callbacks_rx: mpsc::UnboundedReceiver<CallbackInvocation>,
    pending_callbacks: VecDeque<CallbackInvocation>,
    app_focus: AppFocusCallbacks,
    torn_down: bool,
}

impl SessionCoordinator {
    /// Creates a coordinator. Engine events and timer ticks of every source
    /// are posted to `events`.
    pub fn new(
        config: DaemonConfig,
        factory: Arc<dyn EngineFactory>,
        foreground: Arc<dyn ForegroundSurface>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (callbacks_tx, callbacks_rx) = mpsc::unbounded_channel();
        let context = SourceContext::new(events, callbacks_tx.clone())
            .with_artwork(ArtworkLoader::new(config.asset_root.clone()))
            .with_metadata_interval(config.metadata_interval());

        Self {
            registry: SourceRegistry::new(context, factory.clone()),
            config,
            factory,
            foreground,
            shared_engine: None,
            callbacks_tx,
            callbacks_rx,
            pending_callbacks: VecDeque::new(),
            app_focus: AppFocusCallbacks::default(),
            torn_down: false,
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Promotes the session to the foreground, then creates the shared
    /// notification engine. Neither failure is fatal.
    pub fn start(&mut self) -> StartupReport {
        let began = Instant::now();
        let promotion = self.foreground.promote(&ForegroundNotice::default());
        let elapsed = began.elapsed();
        let deadline = self.config.foreground_deadline();
        let within_deadline = elapsed <= deadline;

        if let Err(e) = &promotion {
            warn!("Foreground promotion failed: {} ({})", e, e.suggestion());
        }
        if !within_deadline {
            warn!(
                "Foreground promotion took {}ms (deadline {}ms)",
                elapsed.as_millis(),
                deadline.as_millis()
            );
        }

        if self.shared_engine.is_none() {
            match self.factory.create() {
                Ok(engine) => {
                    engine.set_audio_routing(AudioRouting::for_source(true));
                    engine.set_play_when_ready(false);
                    self.shared_engine = Some(engine);
                }
                Err(e) => warn!("Shared engine unavailable: {}", e),
            }
        }

        info!("Session started");
        StartupReport {
            promoted: promotion.is_ok(),
            elapsed,
            within_deadline,
            shared_engine: self.shared_engine.is_some(),
        }
    }

    /// Pauses the shared engine if it is set to play.
    fn pause_shared_engine(&self) {
        if let Some(engine) = &self.shared_engine {
            if engine.play_when_ready() {
                engine.pause();
            }
        }
    }

    /// The embedding application's task was removed.
    ///
    /// Destroys every non-notification source and pauses the shared engine.
    /// The caller shuts the session down afterwards.
    pub fn task_removed(&mut self) {
        let removed = self.registry.destroy_all_non_notification_sources();
        self.pause_shared_engine();
        info!("Task removed ({} source(s) destroyed)", removed);
    }

    /// Releases every engine and clears the registry. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }

        self.registry.destroy_all_non_notification_sources();
        self.pause_shared_engine();
        if let Some(engine) = self.shared_engine.take() {
            engine.set_listener(None);
            engine.release();
        }
        self.registry.clear();

        if let Err(e) = self.foreground.demote() {
            warn!("Foreground demotion failed: {}", e);
        }

        self.torn_down = true;
        info!("Session torn down");
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    #[must_use]
    pub fn is_foreground(&self) -> bool {
        self.foreground.is_foreground()
    }

    #[must_use]
    pub fn shared_engine(&self) -> Option<&Arc<dyn PlaybackEngine>> {
        self.shared_engine.as_ref()
    }

    #[must_use]
    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Source management
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// See [`SourceRegistry::create`].
    pub fn create(&mut self, options: SourceOptions) -> Result<SourceStatus, SessionError> {
        self.registry.create(options).map(|source| source.status())
    }

    /// Initializes a source; binds the shared engine for the notification
    /// source.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidState` when the shared engine
    /// is missing, `EngineFailure` if a dedicated engine cannot be created.
    pub fn initialize(&mut self, audio_id: &str) -> Result<(), SessionError> {
        let shared = self.shared_engine.clone();
        self.registry.initialize(audio_id, shared)
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn destroy(&mut self, audio_id: &str) -> Result<(), SessionError> {
        self.registry.destroy(audio_id)
    }

    fn source(&self, audio_id: &str) -> Result<&AudioSource, SessionError> {
        self.registry.get(audio_id)
    }

    fn source_mut(&mut self, audio_id: &str) -> Result<&mut AudioSource, SessionError> {
        self.registry.get_mut(audio_id)
    }

    // ------------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidState` without an engine.
    pub fn play(&mut self, audio_id: &str) -> Result<PlaybackState, SessionError> {
        let source = self.source_mut(audio_id)?;
        source.play()?;
        Ok(source.state())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidState` without an engine.
    pub fn pause(&mut self, audio_id: &str) -> Result<PlaybackState, SessionError> {
        let source = self.source_mut(audio_id)?;
        source.pause()?;
        Ok(source.state())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidState` without an engine.
    pub fn stop(&mut self, audio_id: &str) -> Result<PlaybackState, SessionError> {
        let source = self.source_mut(audio_id)?;
        source.stop()?;
        Ok(source.state())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidState` without an engine.
    pub fn seek(&mut self, audio_id: &str, time_in_seconds: u64) -> Result<(), SessionError> {
        self.source_mut(audio_id)?.seek(time_in_seconds)
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidState` without an engine.
    pub fn change_audio_source(&mut self, audio_id: &str, source: &str) -> Result<(), SessionError> {
        self.source_mut(audio_id)?.change_audio_source(source)
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn change_metadata(
        &mut self,
        audio_id: &str,
        fields: &MetadataFields,
    ) -> Result<(), SessionError> {
        self.source_mut(audio_id)?.change_metadata(fields);
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidState` without an engine.
    pub fn update_metadata(&mut self, audio_id: &str) -> Result<(), SessionError> {
        self.source_mut(audio_id)?.refresh_metadata()
    }

    /// # Errors
    ///
    /// `NotFound`, `InvalidArgument` or `InvalidState`.
    pub fn set_volume(&mut self, audio_id: &str, volume: f32) -> Result<(), SessionError> {
        self.source_mut(audio_id)?.set_volume(volume)
    }

    /// # Errors
    ///
    /// `NotFound`, `InvalidArgument` or `InvalidState`.
    pub fn set_rate(&mut self, audio_id: &str, rate: f32) -> Result<(), SessionError> {
        self.source_mut(audio_id)?.set_rate(rate)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Duration in seconds, `-1.0` when unknown.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn duration(&self, audio_id: &str) -> Result<f64, SessionError> {
        Ok(self.source(audio_id)?.duration_seconds())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn current_time(&self, audio_id: &str) -> Result<f64, SessionError> {
        Ok(self.source(audio_id)?.current_time_seconds())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn is_playing(&self, audio_id: &str) -> Result<bool, SessionError> {
        Ok(self.source(audio_id)?.is_playing())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn state(&self, audio_id: &str) -> Result<PlaybackState, SessionError> {
        Ok(self.source(audio_id)?.state())
    }

    /// Snapshot of every source.
    #[must_use]
    pub fn status(&self) -> Vec<SourceStatus> {
        self.registry.statuses()
    }

    // ------------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn on_audio_ready(&mut self, audio_id: &str, callback_id: &str) -> Result<(), SessionError> {
        self.source_mut(audio_id)?.set_on_ready(callback_id);
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn on_audio_end(&mut self, audio_id: &str, callback_id: &str) -> Result<(), SessionError> {
        self.source_mut(audio_id)?.set_on_end(callback_id);
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn on_playback_status_change(
        &mut self,
        audio_id: &str,
        callback_id: &str,
    ) -> Result<(), SessionError> {
        self.source_mut(audio_id)?.set_on_playback_status_change(callback_id);
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn on_metadata_update(
        &mut self,
        audio_id: &str,
        callback_id: &str,
    ) -> Result<(), SessionError> {
        self.source_mut(audio_id)?.set_on_metadata_update(callback_id);
        Ok(())
    }

    pub fn on_app_gains_focus(&mut self, callback_id: &str) {
        self.app_focus.gains = Some(callback_id.to_string());
    }

    pub fn on_app_loses_focus(&mut self, callback_id: &str) {
        self.app_focus.loses = Some(callback_id.to_string());
    }

    /// Reports a focus change of the embedding application.
    pub fn set_app_focus(&mut self, focused: bool) {
        let (callback_id, payload) = if focused {
            (&self.app_focus.gains, CallbackPayload::AppGainsFocus)
        } else {
            (&self.app_focus.loses, CallbackPayload::AppLosesFocus)
        };
        if let Some(callback_id) = callback_id {
            let _ = self
                .callbacks_tx
                .send(CallbackInvocation::new(callback_id.clone(), payload));
        }
    }

    /// Moves emitted invocations into the pending queue.
    ///
    /// A metadata update replaces the pending one of the same callback and
    /// source, so a periodic updater keeps one entry per source. Beyond
    /// [`MAX_PENDING_CALLBACKS`] the oldest invocations are dropped.
    fn collect_callbacks(&mut self) {
        while let Ok(invocation) = self.callbacks_rx.try_recv() {
            if let CallbackPayload::MetadataUpdate { audio_id, .. } = &invocation.payload {
                self.pending_callbacks.retain(|pending| {
                    !(pending.callback_id == invocation.callback_id
                        && matches!(
                            &pending.payload,
                            CallbackPayload::MetadataUpdate { audio_id: other, .. } if other == audio_id
                        ))
                });
            }
            self.pending_callbacks.push_back(invocation);
        }

        let overflow = self
            .pending_callbacks
            .len()
            .saturating_sub(MAX_PENDING_CALLBACKS);
        if overflow > 0 {
            warn!("Dropping {} unpolled callback invocations", overflow);
            self.pending_callbacks.drain(..overflow);
        }
    }

    /// Number of invocations waiting to be polled.
    pub fn pending_callback_count(&mut self) -> usize {
        self.collect_callbacks();
        self.pending_callbacks.len()
    }

    /// Takes every queued callback invocation in emission order.
    pub fn drain_callbacks(&mut self) -> Vec<CallbackInvocation> {
        self.collect_callbacks();
        self.pending_callbacks.drain(..).collect()
    }

    /// Takes queued invocations in emission order until their JSON encoding
    /// would exceed `max_bytes`. At least one invocation is taken when any is
    /// queued; the rest stay queued for the next poll.
    pub fn take_callbacks(&mut self, max_bytes: usize) -> Vec<CallbackInvocation> {
        self.collect_callbacks();

        let mut taken = Vec::new();
        let mut used = 0;
        while let Some(next) = self.pending_callbacks.front() {
            let size = serde_json::to_vec(next).map_or(0, |bytes| bytes.len() + 1);
            if !taken.is_empty() && used + size > max_bytes {
                break;
            }
            used += size;
            if let Some(invocation) = self.pending_callbacks.pop_front() {
                taken.push(invocation);
            }
        }
        taken
    }

    // ------------------------------------------------------------------------
    // Background tracking
    // ------------------------------------------------------------------------

    /// Returns false when tracking was not started (looping or already active).
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn start_background_tracking(
        &mut self,
        audio_id: &str,
        duration_seconds: u32,
    ) -> Result<bool, SessionError> {
        Ok(self
            .source_mut(audio_id)?
            .start_background_tracking(duration_seconds))
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn stop_background_tracking(&mut self, audio_id: &str) -> Result<(), SessionError> {
        self.source_mut(audio_id)?.stop_background_tracking();
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn fetch_background_played_seconds(
        &mut self,
        audio_id: &str,
    ) -> Result<Vec<u32>, SessionError> {
        Ok(self.source_mut(audio_id)?.fetch_background_played_seconds())
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Applies one engine event or timer tick.
    pub fn handle_event(&mut self, event: SessionEvent) {
        self.registry.dispatch(event);
        self.collect_callbacks();
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("registry", &self.registry)
            .field("shared_engine", &self.shared_engine.is_some())
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}
