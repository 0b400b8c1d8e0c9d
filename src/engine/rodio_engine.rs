//! Playback engine implementation using rodio.
//!
//! One [`AudioOutput`] owns the output stream on a dedicated thread; every
//! [`RodioEngine`] plays through its own `Sink` attached to that stream.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use rodio::source::EmptyCallback;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{debug, warn};

use super::{
    AudioRouting, EngineError, EngineEvent, EngineFactory, EngineListener, EngineState,
    MediaDescriptor, MediaMetadata, PlaybackEngine,
};

// ============================================================================
// Audio Output
// ============================================================================

/// The process-wide audio output stream.
///
/// `OutputStream` cannot leave the thread that created it, so it lives on a
/// dedicated thread until this value is dropped. Only the cloneable handle
/// is shared with engines.
pub struct AudioOutput {
    handle: OutputStreamHandle,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioOutput {
    /// Opens the default output device.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DeviceNotAvailable` if no audio output device
    /// is available.
    pub fn open() -> Result<Self, EngineError> {
        let (ready_tx, ready_rx) = bounded::<Result<OutputStreamHandle, EngineError>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    if ready_tx.send(Ok(handle)).is_err() {
                        return;
                    }
                    // Blocks until the sender is dropped or signalled.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(EngineError::DeviceNotAvailable(e.to_string())));
                }
            })
            .map_err(|e| EngineError::DeviceNotAvailable(e.to_string()))?;

        let handle = ready_rx
            .recv()
            .map_err(|e| EngineError::DeviceNotAvailable(e.to_string()))??;

        debug!("Audio output stream initialized");

        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Returns a handle for creating sinks.
    #[must_use]
    pub fn handle(&self) -> OutputStreamHandle {
        self.handle.clone()
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("Audio output stream closed");
    }
}

impl std::fmt::Debug for AudioOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioOutput").finish_non_exhaustive()
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Default)]
struct RodioState {
    media: Option<MediaDescriptor>,
    state: EngineState,
    duration: Option<Duration>,
    playing: bool,
    play_when_ready: bool,
    repeat: bool,
    routing: Option<AudioRouting>,
    listener: Option<EngineListener>,
    released: bool,
}

/// A playback engine backed by a rodio `Sink`.
///
/// Supports local paths and `file://` URIs. Any other scheme fails to
/// prepare and is reported as an `Error` event.
pub struct RodioEngine {
    sink: Sink,
    shared: Arc<Mutex<RodioState>>,
}

impl RodioEngine {
    /// Creates an engine attached to the given output.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::CreationFailed` if a sink cannot be created.
    pub fn new(handle: &OutputStreamHandle) -> Result<Self, EngineError> {
        let sink = Sink::try_new(handle).map_err(|e| EngineError::CreationFailed(e.to_string()))?;
        sink.pause();

        Ok(Self {
            sink,
            shared: Arc::new(Mutex::new(RodioState::default())),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RodioState> {
        lock_state(&self.shared)
    }

    fn notify(&self, event: EngineEvent) {
        let listener = self.lock().listener.clone();
        if let Some(listener) = listener {
            listener(event);
        }
    }

    /// Flips the playing flag, returning true if it changed.
    fn set_playing(&self, playing: bool) -> bool {
        let mut state = self.lock();
        let changed = state.playing != playing;
        state.playing = playing;
        changed
    }

    fn load(&self, uri: &str, repeat: bool) -> Result<Option<Duration>, EngineError> {
        let decoder = open_decoder(uri)?;
        let duration = decoder.total_duration();

        self.sink.clear();
        if repeat {
            self.sink.append(decoder.repeat_infinite());
        } else {
            self.sink.append(decoder);
            let shared = self.shared.clone();
            self.sink
                .append(EmptyCallback::<f32>::new(Box::new(move || on_end(&shared))));
        }

        Ok(duration)
    }
}

fn lock_state(shared: &Mutex<RodioState>) -> MutexGuard<'_, RodioState> {
    shared
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Runs on the audio thread when the end marker is reached.
fn on_end(shared: &Mutex<RodioState>) {
    let (listener, was_playing) = {
        let mut state = lock_state(shared);
        let was_playing = state.playing;
        state.state = EngineState::Ended;
        state.playing = false;
        (state.listener.clone(), was_playing)
    };

    if let Some(listener) = listener {
        if was_playing {
            listener(EngineEvent::PlayingChanged { playing: false });
        }
        listener(EngineEvent::Ended);
    }
}

/// Maps a media locator to a local file path.
fn resolve_path(uri: &str) -> Result<PathBuf, EngineError> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if uri.contains("://") {
        return Err(EngineError::UnsupportedSource(uri.to_string()));
    }
    Ok(PathBuf::from(uri))
}

fn open_decoder(uri: &str) -> Result<Decoder<BufReader<File>>, EngineError> {
    let path = resolve_path(uri)?;
    let file = File::open(&path)
        .map_err(|e| EngineError::OpenFailed(format!("{}: {}", path.display(), e)))?;
    Decoder::new(BufReader::new(file)).map_err(|e| EngineError::DecodeFailed(e.to_string()))
}

impl PlaybackEngine for RodioEngine {
    fn prepare(&self) {
        let (uri, repeat) = {
            let mut state = self.lock();
            let Some(media) = state.media.as_ref() else {
                drop(state);
                self.notify(EngineEvent::Error {
                    message: EngineError::NoMedia.to_string(),
                });
                return;
            };
            let uri = media.uri.clone();
            state.state = EngineState::Buffering;
            (uri, state.repeat)
        };

        match self.load(&uri, repeat) {
            Ok(duration) => {
                let play_when_ready = {
                    let mut state = self.lock();
                    state.state = EngineState::Ready;
                    state.duration = duration;
                    state.play_when_ready
                };
                debug!("Media prepared: {}", uri);
                self.notify(EngineEvent::Ready);
                if play_when_ready {
                    self.play();
                }
            }
            Err(e) => {
                warn!("Failed to prepare media '{}': {}", uri, e);
                self.lock().state = EngineState::Idle;
                self.notify(EngineEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    fn play(&self) {
        let ready = {
            let mut state = self.lock();
            state.play_when_ready = true;
            state.state == EngineState::Ready
        };
        if !ready {
            return;
        }

        self.sink.play();
        if self.set_playing(true) {
            self.notify(EngineEvent::PlayingChanged { playing: true });
        }
    }

    fn pause(&self) {
        self.lock().play_when_ready = false;
        self.sink.pause();
        if self.set_playing(false) {
            self.notify(EngineEvent::PlayingChanged { playing: false });
        }
    }

    fn seek_to(&self, position_ms: u64) {
        {
            let mut state = self.lock();
            if state.state == EngineState::Ended {
                // The sink is drained; the next play has to prepare again.
                state.state = EngineState::Idle;
                return;
            }
        }
        if let Err(e) = self.sink.try_seek(Duration::from_millis(position_ms)) {
            warn!("Seek to {}ms failed: {}", position_ms, e);
        }
    }

    fn set_volume(&self, volume: f32) {
        self.sink.set_volume(volume);
    }

    fn set_playback_speed(&self, speed: f32) {
        self.sink.set_speed(speed);
    }

    fn set_media_item(&self, item: MediaDescriptor) {
        self.sink.clear();
        let was_playing = {
            let mut state = self.lock();
            let was_playing = state.playing;
            state.media = Some(item);
            state.state = EngineState::Idle;
            state.duration = None;
            state.playing = false;
            was_playing
        };
        if was_playing {
            self.notify(EngineEvent::PlayingChanged { playing: false });
        }
    }

    fn replace_media_metadata(&self, metadata: MediaMetadata) {
        let mut state = self.lock();
        if let Some(media) = state.media.as_mut() {
            debug!("Media metadata replaced: {}", metadata.title);
            media.metadata = metadata;
        }
    }

    fn set_play_when_ready(&self, play_when_ready: bool) {
        self.lock().play_when_ready = play_when_ready;
    }

    fn play_when_ready(&self) -> bool {
        self.lock().play_when_ready
    }

    fn set_repeat(&self, repeat: bool) {
        self.lock().repeat = repeat;
    }

    fn set_audio_routing(&self, routing: AudioRouting) {
        // rodio has a single mixer; routing is recorded for status only.
        self.lock().routing = Some(routing);
    }

    fn current_position_ms(&self) -> u64 {
        if self.lock().state == EngineState::Idle {
            return 0;
        }
        u64::try_from(self.sink.get_pos().as_millis()).unwrap_or(u64::MAX)
    }

    fn duration_ms(&self) -> Option<u64> {
        self.lock()
            .duration
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    fn playback_state(&self) -> EngineState {
        self.lock().state
    }

    fn set_listener(&self, listener: Option<EngineListener>) {
        self.lock().listener = listener;
    }

    fn release(&self) {
        {
            let mut state = self.lock();
            if state.released {
                return;
            }
            state.released = true;
            state.listener = None;
            state.playing = false;
            state.state = EngineState::Idle;
        }
        self.sink.stop();
        debug!("Engine released");
    }
}

impl std::fmt::Debug for RodioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("RodioEngine")
            .field("state", &state.state)
            .field("playing", &state.playing)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Creates [`RodioEngine`]s sharing one [`AudioOutput`].
#[derive(Debug, Clone)]
pub struct RodioEngineFactory {
    output: Arc<AudioOutput>,
}

impl RodioEngineFactory {
    #[must_use]
    pub fn new(output: Arc<AudioOutput>) -> Self {
        Self { output }
    }

    /// Opens the default output device and wraps it in a factory.
    ///
    /// # Errors
    ///
    /// Returns an error if no audio output device is available.
    pub fn open_default() -> Result<Self, EngineError> {
        Ok(Self::new(Arc::new(AudioOutput::open()?)))
    }
}

impl EngineFactory for RodioEngineFactory {
    fn create(&self) -> Result<Arc<dyn PlaybackEngine>, EngineError> {
        let engine = RodioEngine::new(&self.output.handle())?;
        Ok(Arc::new(engine))
    }
}
