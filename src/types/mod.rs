//! Core data types for the audio session daemon.
//!
//! This module defines the data structures used for:
//! - Playback state of a single audio source
//! - Source creation options and display metadata
//! - Callback invocations delivered back to the embedding application
//! - IPC request/response serialization

use serde::{Deserialize, Serialize};

// ============================================================================
// PlaybackState
// ============================================================================

/// Transport state of an audio source.
///
/// Exactly one state holds at any time; `Stopped` is the initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Not playing, position reset to the start
    #[default]
    Stopped,
    /// Playing
    Playing,
    /// Paused at the current position
    Paused,
}

impl PlaybackState {
    /// Returns the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }

    /// Returns true if the source is playing.
    pub fn is_playing(&self) -> bool {
        *self == PlaybackState::Playing
    }

    /// Returns true if the source is paused.
    pub fn is_paused(&self) -> bool {
        *self == PlaybackState::Paused
    }

    /// Returns true if the source is stopped.
    pub fn is_stopped(&self) -> bool {
        *self == PlaybackState::Stopped
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MetadataFields
// ============================================================================

/// Display metadata supplied by the embedding application.
///
/// Every field is optional so the same type serves full replacement at
/// creation time and targeted updates afterwards: `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataFields {
    /// Album title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_title: Option<String>,
    /// Artist name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_name: Option<String>,
    /// Song title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_title: Option<String>,
    /// Artwork reference: a URI (`https://...`) or a bundled asset path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_source: Option<String>,
}

impl MetadataFields {
    /// Sets the album title.
    pub fn with_album_title(mut self, title: impl Into<String>) -> Self {
        self.album_title = Some(title.into());
        self
    }

    /// Sets the artist name.
    pub fn with_artist_name(mut self, name: impl Into<String>) -> Self {
        self.artist_name = Some(name.into());
        self
    }

    /// Sets the song title.
    pub fn with_song_title(mut self, title: impl Into<String>) -> Self {
        self.song_title = Some(title.into());
        self
    }

    /// Sets the artwork reference.
    pub fn with_artwork_source(mut self, source: impl Into<String>) -> Self {
        self.artwork_source = Some(source.into());
        self
    }

    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self.album_title.is_none()
            && self.artist_name.is_none()
            && self.song_title.is_none()
            && self.artwork_source.is_none()
    }
}

// ============================================================================
// SourceOptions
// ============================================================================

/// Options for creating an audio source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOptions {
    /// Caller-supplied unique identifier
    pub audio_id: String,
    /// Locator of the media to play (path or URI)
    pub audio_source: String,
    /// Initial display metadata
    #[serde(flatten)]
    pub metadata: MetadataFields,
    /// Bind this source to the persistent foreground surface
    #[serde(default)]
    pub use_for_notification: bool,
    /// Background music flag
    #[serde(default)]
    pub is_background_music: bool,
    /// Loop the media forever
    #[serde(default, rename = "loop")]
    pub loop_audio: bool,
}

impl SourceOptions {
    /// Creates options for a plain (non-notification) source.
    pub fn new(audio_id: impl Into<String>, audio_source: impl Into<String>) -> Self {
        Self {
            audio_id: audio_id.into(),
            audio_source: audio_source.into(),
            ..Self::default()
        }
    }

    /// Sets the initial metadata.
    pub fn with_metadata(mut self, metadata: MetadataFields) -> Self {
        self.metadata = metadata;
        self
    }

    /// Binds the source to the foreground surface.
    pub fn for_notification(mut self) -> Self {
        self.use_for_notification = true;
        self
    }

    /// Marks the source as background music.
    pub fn background_music(mut self) -> Self {
        self.is_background_music = true;
        self
    }

    /// Enables looping.
    pub fn looping(mut self) -> Self {
        self.loop_audio = true;
        self
    }
}

// ============================================================================
// Callbacks
// ============================================================================

/// Payload of a callback delivered to the embedding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CallbackPayload {
    /// The engine finished preparing the media
    AudioReady {
        /// Source identifier
        audio_id: String,
    },
    /// The media played to its end
    AudioEnd {
        /// Source identifier
        audio_id: String,
    },
    /// The transport state changed
    PlaybackStatusChange {
        /// Source identifier
        audio_id: String,
        /// New state
        status: PlaybackState,
        /// Engine error that forced the change, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Periodic metadata refresh for the foreground surface
    MetadataUpdate {
        /// Source identifier
        audio_id: String,
        /// Current metadata
        #[serde(flatten)]
        metadata: MetadataFields,
        /// Current position in seconds
        current_time: f64,
        /// Duration in seconds (-1 when unknown)
        duration: f64,
    },
    /// The embedding application came to the foreground
    AppGainsFocus,
    /// The embedding application went to the background
    AppLosesFocus,
}

/// A callback invocation addressed by an opaque callback id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackInvocation {
    /// Callback id registered by the embedding application
    pub callback_id: String,
    /// Event payload
    #[serde(flatten)]
    pub payload: CallbackPayload,
}

impl CallbackInvocation {
    /// Creates a new invocation.
    pub fn new(callback_id: impl Into<String>, payload: CallbackPayload) -> Self {
        Self {
            callback_id: callback_id.into(),
            payload,
        }
    }
}

// ============================================================================
// IPC Types
// ============================================================================

/// IPC request from the bridge client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum IpcRequest {
    /// Create a new audio source
    Create {
        /// Creation options
        #[serde(flatten)]
        options: SourceOptions,
    },
    /// Initialize a source (binds the shared engine for a notification source)
    Initialize { audio_id: String },
    /// Destroy a source
    Destroy { audio_id: String },
    /// Replace the media locator
    ChangeAudioSource { audio_id: String, source: String },
    /// Merge new metadata fields
    ChangeMetadata {
        audio_id: String,
        /// Fields to replace
        #[serde(flatten)]
        metadata: MetadataFields,
    },
    /// Re-push the current metadata to the engine
    UpdateMetadata { audio_id: String },
    /// Query the duration in seconds
    GetDuration { audio_id: String },
    /// Query the current position in seconds
    GetCurrentTime { audio_id: String },
    /// Start playback
    Play { audio_id: String },
    /// Pause playback
    Pause { audio_id: String },
    /// Seek to a position
    Seek { audio_id: String, time_in_seconds: u64 },
    /// Stop playback and rewind
    Stop { audio_id: String },
    /// Set the volume (0.0 - 1.0)
    SetVolume { audio_id: String, volume: f32 },
    /// Set the playback rate
    SetRate { audio_id: String, rate: f32 },
    /// Query whether the source is playing
    IsPlaying { audio_id: String },
    /// Register the ready callback
    OnAudioReady { audio_id: String, callback_id: String },
    /// Register the end callback
    OnAudioEnd { audio_id: String, callback_id: String },
    /// Register the status change callback
    OnPlaybackStatusChange { audio_id: String, callback_id: String },
    /// Register the metadata update callback
    OnMetadataUpdate { audio_id: String, callback_id: String },
    /// Register the app-gains-focus callback
    OnAppGainsFocus { callback_id: String },
    /// Register the app-loses-focus callback
    OnAppLosesFocus { callback_id: String },
    /// Report a focus change of the embedding application
    SetAppFocus { focused: bool },
    /// Start background progress tracking
    StartBackgroundTracking { audio_id: String, duration: u32 },
    /// Stop background progress tracking
    StopBackgroundTracking { audio_id: String },
    /// Fetch and clear the played seconds
    FetchBackgroundPlayedSeconds { audio_id: String },
    /// Drain pending callback invocations
    PollCallbacks,
    /// Query every source
    Status,
    /// The embedding application's task was removed
    TaskRemoved,
    /// Tear the session down
    Shutdown,
}

impl IpcRequest {
    /// Returns true if the daemon should exit after answering this request.
    pub fn ends_session(&self) -> bool {
        matches!(self, IpcRequest::TaskRemoved | IpcRequest::Shutdown)
    }

    /// Returns the source id this request targets, if any.
    pub fn audio_id(&self) -> Option<&str> {
        match self {
            IpcRequest::Create { options } => Some(&options.audio_id),
            IpcRequest::Initialize { audio_id }
            | IpcRequest::Destroy { audio_id }
            | IpcRequest::ChangeAudioSource { audio_id, .. }
            | IpcRequest::ChangeMetadata { audio_id, .. }
            | IpcRequest::UpdateMetadata { audio_id }
            | IpcRequest::GetDuration { audio_id }
            | IpcRequest::GetCurrentTime { audio_id }
            | IpcRequest::Play { audio_id }
            | IpcRequest::Pause { audio_id }
            | IpcRequest::Seek { audio_id, .. }
            | IpcRequest::Stop { audio_id }
            | IpcRequest::SetVolume { audio_id, .. }
            | IpcRequest::SetRate { audio_id, .. }
            | IpcRequest::IsPlaying { audio_id }
            | IpcRequest::OnAudioReady { audio_id, .. }
            | IpcRequest::OnAudioEnd { audio_id, .. }
            | IpcRequest::OnPlaybackStatusChange { audio_id, .. }
            | IpcRequest::OnMetadataUpdate { audio_id, .. }
            | IpcRequest::StartBackgroundTracking { audio_id, .. }
            | IpcRequest::StopBackgroundTracking { audio_id }
            | IpcRequest::FetchBackgroundPlayedSeconds { audio_id } => Some(audio_id),
            IpcRequest::OnAppGainsFocus { .. }
            | IpcRequest::OnAppLosesFocus { .. }
            | IpcRequest::SetAppFocus { .. }
            | IpcRequest::PollCallbacks
            | IpcRequest::Status
            | IpcRequest::TaskRemoved
            | IpcRequest::Shutdown => None,
        }
    }
}

/// Machine-readable error code carried by error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unknown source id
    NotFound,
    /// Duplicate source id or second notification source
    AlreadyExists,
    /// Operation needs an engine the source does not have
    InvalidState,
    /// Argument out of range
    InvalidArgument,
    /// The engine could not be created or failed
    EngineFailure,
    /// Artwork or other resource could not be loaded
    ResourceLoadFailure,
    /// Malformed request or transport failure
    BadRequest,
}

/// Snapshot of one source for the status command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    /// Source identifier
    pub audio_id: String,
    /// Media locator
    pub audio_source: String,
    /// Transport state
    pub state: PlaybackState,
    /// Bound to the foreground surface
    pub use_for_notification: bool,
    /// Flagged as background music
    #[serde(default)]
    pub background_music: bool,
    /// Engine attached
    pub initialized: bool,
    /// Background tracking active
    pub tracking: bool,
}

/// Response data for IPC responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    /// Source identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_id: Option<String>,
    /// Transport state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PlaybackState>,
    /// Duration in seconds (-1 when unknown)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Current position in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    /// Whether the source is playing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    /// Played seconds (sorted ascending)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<Vec<u32>>,
    /// Source snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceStatus>>,
    /// Drained callback invocations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callbacks: Option<Vec<CallbackInvocation>>,
    /// Invocations still queued after this poll
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_callbacks: Option<usize>,
}

impl ResponseData {
    /// Creates response data carrying a source id and its state.
    pub fn for_source(audio_id: impl Into<String>, state: PlaybackState) -> Self {
        Self {
            audio_id: Some(audio_id.into()),
            state: Some(state),
            ..Self::default()
        }
    }
}

/// IPC response from daemon to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Response status ("success" or "error")
    pub status: String,
    /// Human-readable message
    pub message: String,
    /// Error code for error responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Optional response data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl IpcResponse {
    /// Creates a success response.
    pub fn success(message: impl Into<String>, data: Option<ResponseData>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            code: None,
            data,
        }
    }

    /// Creates an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            code: None,
            data: None,
        }
    }

    /// Creates an error response with a machine-readable code.
    pub fn error_with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            ..Self::error(message)
        }
    }

    /// Returns true for success responses.
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

// ============================================================================
// Tests
// ============================================================================
