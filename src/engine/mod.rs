//! Playback engine abstraction.
//!
//! The session core never decodes audio. It drives an external engine
//! through the [`PlaybackEngine`] trait and receives engine events through a
//! single listener function per engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   commands    ┌──────────────────┐
//! │   AudioSource    │──────────────▶│  PlaybackEngine  │ ← RodioEngine / Mock
//! └────────▲─────────┘               └────────┬─────────┘
//!          │        EngineEvent (listener)    │
//!          └──────────────────────────────────┘
//! ```
//!
//! Commands are fire-and-forget: failures are reported asynchronously as
//! [`EngineEvent::Error`] rather than returned to the caller.

mod error;
mod rodio_engine;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub use error::EngineError;
pub use rodio_engine::{AudioOutput, RodioEngine, RodioEngineFactory};

// ============================================================================
// Engine Types
// ============================================================================

/// Coarse engine playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Nothing prepared (initial, after a media swap or a failure)
    #[default]
    Idle,
    /// Preparing the media
    Buffering,
    /// Media prepared and playable
    Ready,
    /// Playback reached the end of the media
    Ended,
}

/// Events emitted by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The media finished preparing
    Ready,
    /// Playback reached the end of the media
    Ended,
    /// The engine started or stopped producing sound
    PlayingChanged {
        /// Whether the engine is now playing
        playing: bool,
    },
    /// The engine hit an error and can no longer play the current media
    Error {
        /// Error description
        message: String,
    },
}

/// Event handler attached to an engine.
pub type EngineListener = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Kind of content routed to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Spoken content (podcasts, audio books)
    Speech,
    /// Music
    Music,
}

/// Audio routing attributes applied when an engine is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioRouting {
    /// Content type
    pub content_type: ContentType,
    /// Whether the engine participates in system audio focus
    pub handle_audio_focus: bool,
}

impl AudioRouting {
    /// Routing for a source bound to the foreground surface (speech, focus
    /// handled) or for any other source (music, focus ignored).
    pub fn for_source(use_for_notification: bool) -> Self {
        if use_for_notification {
            Self {
                content_type: ContentType::Speech,
                handle_audio_focus: true,
            }
        } else {
            Self {
                content_type: ContentType::Music,
                handle_audio_focus: false,
            }
        }
    }
}

/// Artwork attached to a media description.
#[derive(Clone, PartialEq, Eq)]
pub enum Artwork {
    /// Remote artwork, loaded lazily by the engine
    Uri(String),
    /// Artwork bytes read from a bundled asset
    Data(Vec<u8>),
}

impl std::fmt::Debug for Artwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uri(uri) => f.debug_tuple("Uri").field(uri).finish(),
            Self::Data(bytes) => write!(f, "Data({} bytes)", bytes.len()),
        }
    }
}

/// Display metadata pushed to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaMetadata {
    /// Song title
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Album title
    pub album_title: String,
    /// Artwork, if resolved
    pub artwork: Option<Artwork>,
}

/// A playable media item: locator plus display metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    /// Media locator (path or URI)
    pub uri: String,
    /// Display metadata
    pub metadata: MediaMetadata,
}

// ============================================================================
// Traits
// ============================================================================

/// External playback engine driven by an audio source.
///
/// All methods take `&self`; implementations use interior mutability so one
/// engine can be shared between the coordinator and the notification source.
pub trait PlaybackEngine: Send + Sync {
    /// Prepares the current media item. Emits `Ready` or `Error`.
    fn prepare(&self);

    /// Starts or resumes playback.
    fn play(&self);

    /// Pauses playback.
    fn pause(&self);

    /// Moves the playback position.
    fn seek_to(&self, position_ms: u64);

    /// Sets the output volume (0.0 - 1.0).
    fn set_volume(&self, volume: f32);

    /// Sets the playback speed (1.0 = normal).
    fn set_playback_speed(&self, speed: f32);

    /// Replaces the media item. Resets the position and leaves the engine idle.
    fn set_media_item(&self, item: MediaDescriptor);

    /// Replaces the display metadata of the current media item in place.
    fn replace_media_metadata(&self, metadata: MediaMetadata);

    /// Whether playback starts as soon as the media is ready.
    fn set_play_when_ready(&self, play_when_ready: bool);

    /// Returns the play-when-ready flag.
    fn play_when_ready(&self) -> bool;

    /// Repeat the current media item forever.
    fn set_repeat(&self, repeat: bool);

    /// Applies routing attributes.
    fn set_audio_routing(&self, routing: AudioRouting);

    /// Current position in milliseconds.
    fn current_position_ms(&self) -> u64;

    /// Duration in milliseconds, `None` while unknown.
    fn duration_ms(&self) -> Option<u64>;

    /// Coarse playback state.
    fn playback_state(&self) -> EngineState;

    /// Attaches (or detaches with `None`) the event listener.
    fn set_listener(&self, listener: Option<EngineListener>);

    /// Releases every resource held by the engine.
    fn release(&self);
}

/// Creates dedicated engines for audio sources.
pub trait EngineFactory: Send + Sync {
    /// Creates a new engine instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created.
    fn create(&self) -> Result<Arc<dyn PlaybackEngine>, EngineError>;
}

// ============================================================================
// Mock Engine
// ============================================================================

/// A call recorded by [`MockPlaybackEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Prepare,
    Play,
    Pause,
    SeekTo(u64),
    SetVolume(f32),
    SetPlaybackSpeed(f32),
    SetMediaItem(String),
    ReplaceMediaMetadata,
    SetPlayWhenReady(bool),
    SetRepeat(bool),
    SetAudioRouting(AudioRouting),
    Release,
}

#[derive(Default)]
struct MockState {
    calls: Vec<EngineCall>,
    position_ms: u64,
    duration_ms: Option<u64>,
    state: EngineState,
    playing: bool,
    play_when_ready: bool,
    repeat: bool,
    volume: Option<f32>,
    speed: Option<f32>,
    routing: Option<AudioRouting>,
    media: Option<MediaDescriptor>,
    listener: Option<EngineListener>,
    released: bool,
}

/// Mock playback engine for testing.
///
/// Records every command, keeps a settable position, and forwards events to
/// the attached listener the way a real engine would (`Ready` after prepare,
/// `PlayingChanged` when play, pause or a media swap flips the playing flag).
#[derive(Default)]
pub struct MockPlaybackEngine {
    inner: Mutex<MockState>,
}

impl MockPlaybackEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.inner.lock().unwrap();
        f(&mut state)
    }

    fn notify(&self, event: EngineEvent) {
        let listener = self.with_state(|s| s.listener.clone());
        if let Some(listener) = listener {
            listener(event);
        }
    }

    /// Simulates an engine-originated event.
    pub fn emit(&self, event: EngineEvent) {
        match &event {
            EngineEvent::Ended => self.with_state(|s| {
                s.state = EngineState::Ended;
                s.playing = false;
            }),
            EngineEvent::Error { .. } => self.with_state(|s| {
                s.state = EngineState::Idle;
                s.playing = false;
            }),
            EngineEvent::PlayingChanged { playing } => self.with_state(|s| s.playing = *playing),
            EngineEvent::Ready => self.with_state(|s| s.state = EngineState::Ready),
        }
        self.notify(event);
    }

    pub fn set_position_ms(&self, position_ms: u64) {
        self.with_state(|s| s.position_ms = position_ms);
    }

    pub fn set_duration_ms(&self, duration_ms: Option<u64>) {
        self.with_state(|s| s.duration_ms = duration_ms);
    }

    pub fn set_state(&self, state: EngineState) {
        self.with_state(|s| s.state = state);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.with_state(|s| s.calls.clone())
    }

    #[must_use]
    pub fn call_count(&self, call: &EngineCall) -> usize {
        self.with_state(|s| s.calls.iter().filter(|c| *c == call).count())
    }

    pub fn clear_calls(&self) {
        self.with_state(|s| s.calls.clear());
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.with_state(|s| s.playing)
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.with_state(|s| s.released)
    }

    #[must_use]
    pub fn has_listener(&self) -> bool {
        self.with_state(|s| s.listener.is_some())
    }

    #[must_use]
    pub fn media_item(&self) -> Option<MediaDescriptor> {
        self.with_state(|s| s.media.clone())
    }

    #[must_use]
    pub fn volume(&self) -> Option<f32> {
        self.with_state(|s| s.volume)
    }

    #[must_use]
    pub fn speed(&self) -> Option<f32> {
        self.with_state(|s| s.speed)
    }

    #[must_use]
    pub fn routing(&self) -> Option<AudioRouting> {
        self.with_state(|s| s.routing)
    }

    #[must_use]
    pub fn repeat(&self) -> bool {
        self.with_state(|s| s.repeat)
    }
}

impl std::fmt::Debug for MockPlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPlaybackEngine")
            .field("calls", &self.calls().len())
            .finish_non_exhaustive()
    }
}

impl PlaybackEngine for MockPlaybackEngine {
    fn prepare(&self) {
        self.with_state(|s| {
            s.calls.push(EngineCall::Prepare);
            s.state = EngineState::Ready;
        });
        self.notify(EngineEvent::Ready);
    }

    fn play(&self) {
        let started = self.with_state(|s| {
            s.calls.push(EngineCall::Play);
            s.play_when_ready = true;
            let started = !s.playing;
            s.playing = true;
            started
        });
        if started {
            self.notify(EngineEvent::PlayingChanged { playing: true });
        }
    }

    fn pause(&self) {
        let stopped = self.with_state(|s| {
            s.calls.push(EngineCall::Pause);
            s.play_when_ready = false;
            let stopped = s.playing;
            s.playing = false;
            stopped
        });
        if stopped {
            self.notify(EngineEvent::PlayingChanged { playing: false });
        }
    }

    fn seek_to(&self, position_ms: u64) {
        self.with_state(|s| {
            s.calls.push(EngineCall::SeekTo(position_ms));
            s.position_ms = position_ms;
        });
    }

    fn set_volume(&self, volume: f32) {
        self.with_state(|s| {
            s.calls.push(EngineCall::SetVolume(volume));
            s.volume = Some(volume);
        });
    }

    fn set_playback_speed(&self, speed: f32) {
        self.with_state(|s| {
            s.calls.push(EngineCall::SetPlaybackSpeed(speed));
            s.speed = Some(speed);
        });
    }

    fn set_media_item(&self, item: MediaDescriptor) {
        let was_playing = self.with_state(|s| {
            s.calls.push(EngineCall::SetMediaItem(item.uri.clone()));
            s.media = Some(item);
            s.position_ms = 0;
            s.state = EngineState::Idle;
            std::mem::replace(&mut s.playing, false)
        });
        if was_playing {
            self.notify(EngineEvent::PlayingChanged { playing: false });
        }
    }

    fn replace_media_metadata(&self, metadata: MediaMetadata) {
        self.with_state(|s| {
            s.calls.push(EngineCall::ReplaceMediaMetadata);
            if let Some(media) = s.media.as_mut() {
                media.metadata = metadata;
            }
        });
    }

    fn set_play_when_ready(&self, play_when_ready: bool) {
        self.with_state(|s| {
            s.calls.push(EngineCall::SetPlayWhenReady(play_when_ready));
            s.play_when_ready = play_when_ready;
        });
    }

    fn play_when_ready(&self) -> bool {
        self.with_state(|s| s.play_when_ready)
    }

    fn set_repeat(&self, repeat: bool) {
        self.with_state(|s| {
            s.calls.push(EngineCall::SetRepeat(repeat));
            s.repeat = repeat;
        });
    }

    fn set_audio_routing(&self, routing: AudioRouting) {
        self.with_state(|s| {
            s.calls.push(EngineCall::SetAudioRouting(routing));
            s.routing = Some(routing);
        });
    }

    fn current_position_ms(&self) -> u64 {
        self.with_state(|s| s.position_ms)
    }

    fn duration_ms(&self) -> Option<u64> {
        self.with_state(|s| s.duration_ms)
    }

    fn playback_state(&self) -> EngineState {
        self.with_state(|s| s.state)
    }

    fn set_listener(&self, listener: Option<EngineListener>) {
        self.with_state(|s| s.listener = listener);
    }

    fn release(&self) {
        self.with_state(|s| {
            s.calls.push(EngineCall::Release);
            s.released = true;
            s.playing = false;
            s.listener = None;
        });
    }
}

/// Mock engine factory for testing.
///
/// Keeps every created engine so tests can inspect them.
#[derive(Debug, Default)]
pub struct MockEngineFactory {
    engines: Mutex<Vec<Arc<MockPlaybackEngine>>>,
    should_fail: AtomicBool,
}

impl MockEngineFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn created(&self) -> Vec<Arc<MockPlaybackEngine>> {
        self.engines.lock().unwrap().clone()
    }

    #[must_use]
    pub fn created_count(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    #[must_use]
    pub fn last(&self) -> Option<Arc<MockPlaybackEngine>> {
        self.engines.lock().unwrap().last().cloned()
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(&self) -> Result<Arc<dyn PlaybackEngine>, EngineError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(EngineError::CreationFailed("Mock failure".to_string()));
        }
        let engine = Arc::new(MockPlaybackEngine::new());
        self.engines.lock().unwrap().push(engine.clone());
        Ok(engine)
    }
}
