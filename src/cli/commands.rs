//! Command definitions for the audio session CLI.
//!
//! Uses clap derive macro for argument parsing. Every command except
//! `daemon` and `completions` maps to exactly one bridge request.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::{IpcRequest, MetadataFields, SourceOptions};

// ============================================================================
// CLI Structure
// ============================================================================

/// Audio session CLI - playback session daemon and bridge client
#[derive(Parser, Debug)]
#[command(
    name = "audiosession",
    version,
    about = "音声再生セッションの管理CLI",
    long_about = "複数の音声ソースの再生を管理するデーモンと、そのブリッジクライアント。\n\
                  通知に紐づく共有プレイヤーとバックグラウンド再生位置の記録に対応しています。",
    propagate_version = true
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Socket path of the daemon (defaults to ~/.audiosession/audiosession.sock)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,
}

// ============================================================================
// Subcommands
// ============================================================================

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the session daemon
    Daemon(DaemonArgs),

    /// Create an audio source
    Create(CreateArgs),

    /// Initialize a source (binds the shared player for a notification source)
    Initialize(SourceArg),

    /// Destroy a source and release its player
    Destroy(SourceArg),

    /// Replace the media of a source
    ChangeAudioSource {
        /// Source identifier
        #[arg(value_parser = validate_audio_id)]
        audio_id: String,
        /// New media path or URI
        source: String,
    },

    /// Merge new metadata fields into a source
    ChangeMetadata {
        /// Source identifier
        #[arg(value_parser = validate_audio_id)]
        audio_id: String,
        #[command(flatten)]
        metadata: MetadataArgs,
    },

    /// Push the current metadata of a source to its player again
    UpdateMetadata(SourceArg),

    /// Show the duration of a source in seconds
    GetDuration(SourceArg),

    /// Show the current position of a source in seconds
    GetCurrentTime(SourceArg),

    /// Start playback
    Play(SourceArg),

    /// Pause playback
    Pause(SourceArg),

    /// Seek to a position
    Seek {
        /// Source identifier
        #[arg(value_parser = validate_audio_id)]
        audio_id: String,
        /// Target position in seconds
        seconds: u64,
    },

    /// Stop playback and rewind to the start
    Stop(SourceArg),

    /// Set the volume (0.0-1.0)
    SetVolume {
        /// Source identifier
        #[arg(value_parser = validate_audio_id)]
        audio_id: String,
        /// Volume level
        #[arg(value_parser = parse_volume)]
        volume: f32,
    },

    /// Set the playback rate
    SetRate {
        /// Source identifier
        #[arg(value_parser = validate_audio_id)]
        audio_id: String,
        /// Rate multiplier (1.0 = normal speed)
        rate: f32,
    },

    /// Show whether a source is playing
    IsPlaying(SourceArg),

    /// Register the ready callback of a source
    OnAudioReady(CallbackArgs),

    /// Register the end callback of a source
    OnAudioEnd(CallbackArgs),

    /// Register the status change callback of a source
    OnPlaybackStatusChange(CallbackArgs),

    /// Register the metadata update callback of a source
    OnMetadataUpdate(CallbackArgs),

    /// Register the callback for the application gaining focus
    OnAppGainsFocus {
        /// Callback identifier
        callback_id: String,
    },

    /// Register the callback for the application losing focus
    OnAppLosesFocus {
        /// Callback identifier
        callback_id: String,
    },

    /// Report a focus change of the embedding application
    SetAppFocus {
        /// New focus state
        #[arg(value_enum)]
        focus: Focus,
    },

    /// Start recording the seconds played in the background
    StartBackgroundTracking {
        /// Source identifier
        #[arg(value_parser = validate_audio_id)]
        audio_id: String,
        /// Media duration in seconds
        duration: u32,
    },

    /// Stop recording background progress
    StopBackgroundTracking(SourceArg),

    /// Show and clear the recorded background seconds
    FetchBackgroundPlayedSeconds(SourceArg),

    /// Show and clear pending callback invocations
    PollCallbacks,

    /// Show every source
    Status,

    /// Report that the application's task was removed (ends the session)
    TaskRemoved,

    /// End the session
    Shutdown,

    /// Generate shell completion scripts
    Completions {
        /// Shell type for completion script
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Commands {
    /// Converts the command into its bridge request.
    ///
    /// Returns `None` for commands handled locally (`daemon`, `completions`).
    pub fn into_request(self) -> Option<IpcRequest> {
        let request = match self {
            Commands::Daemon(_) | Commands::Completions { .. } => return None,
            Commands::Create(args) => IpcRequest::Create {
                options: args.into_options(),
            },
            Commands::Initialize(SourceArg { audio_id }) => IpcRequest::Initialize { audio_id },
            Commands::Destroy(SourceArg { audio_id }) => IpcRequest::Destroy { audio_id },
            Commands::ChangeAudioSource { audio_id, source } => {
                IpcRequest::ChangeAudioSource { audio_id, source }
            }
            Commands::ChangeMetadata { audio_id, metadata } => IpcRequest::ChangeMetadata {
                audio_id,
                metadata: metadata.into_fields(),
            },
            Commands::UpdateMetadata(SourceArg { audio_id }) => {
                IpcRequest::UpdateMetadata { audio_id }
            }
            Commands::GetDuration(SourceArg { audio_id }) => IpcRequest::GetDuration { audio_id },
            Commands::GetCurrentTime(SourceArg { audio_id }) => {
                IpcRequest::GetCurrentTime { audio_id }
            }
            Commands::Play(SourceArg { audio_id }) => IpcRequest::Play { audio_id },
            Commands::Pause(SourceArg { audio_id }) => IpcRequest::Pause { audio_id },
            Commands::Seek { audio_id, seconds } => IpcRequest::Seek {
                audio_id,
                time_in_seconds: seconds,
            },
            Commands::Stop(SourceArg { audio_id }) => IpcRequest::Stop { audio_id },
            Commands::SetVolume { audio_id, volume } => IpcRequest::SetVolume { audio_id, volume },
            Commands::SetRate { audio_id, rate } => IpcRequest::SetRate { audio_id, rate },
            Commands::IsPlaying(SourceArg { audio_id }) => IpcRequest::IsPlaying { audio_id },
            Commands::OnAudioReady(CallbackArgs {
                audio_id,
                callback_id,
            }) => IpcRequest::OnAudioReady {
                audio_id,
                callback_id,
            },
            Commands::OnAudioEnd(CallbackArgs {
                audio_id,
                callback_id,
            }) => IpcRequest::OnAudioEnd {
                audio_id,
                callback_id,
            },
            Commands::OnPlaybackStatusChange(CallbackArgs {
                audio_id,
                callback_id,
            }) => IpcRequest::OnPlaybackStatusChange {
                audio_id,
                callback_id,
            },
            Commands::OnMetadataUpdate(CallbackArgs {
                audio_id,
                callback_id,
            }) => IpcRequest::OnMetadataUpdate {
                audio_id,
                callback_id,
            },
            Commands::OnAppGainsFocus { callback_id } => IpcRequest::OnAppGainsFocus { callback_id },
            Commands::OnAppLosesFocus { callback_id } => IpcRequest::OnAppLosesFocus { callback_id },
            Commands::SetAppFocus { focus } => IpcRequest::SetAppFocus {
                focused: focus == Focus::Gained,
            },
            Commands::StartBackgroundTracking { audio_id, duration } => {
                IpcRequest::StartBackgroundTracking { audio_id, duration }
            }
            Commands::StopBackgroundTracking(SourceArg { audio_id }) => {
                IpcRequest::StopBackgroundTracking { audio_id }
            }
            Commands::FetchBackgroundPlayedSeconds(SourceArg { audio_id }) => {
                IpcRequest::FetchBackgroundPlayedSeconds { audio_id }
            }
            Commands::PollCallbacks => IpcRequest::PollCallbacks,
            Commands::Status => IpcRequest::Status,
            Commands::TaskRemoved => IpcRequest::TaskRemoved,
            Commands::Shutdown => IpcRequest::Shutdown,
        };
        Some(request)
    }
}

// ============================================================================
// Command Arguments
// ============================================================================

/// Arguments for the daemon command
#[derive(Args, Debug, Clone, Default)]
pub struct DaemonArgs {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// A single source identifier
#[derive(Args, Debug, Clone)]
pub struct SourceArg {
    /// Source identifier
    #[arg(value_parser = validate_audio_id)]
    pub audio_id: String,
}

/// A source identifier and a callback identifier
#[derive(Args, Debug, Clone)]
pub struct CallbackArgs {
    /// Source identifier
    #[arg(value_parser = validate_audio_id)]
    pub audio_id: String,
    /// Callback identifier
    pub callback_id: String,
}

/// Display metadata options
#[derive(Args, Debug, Clone, Default)]
pub struct MetadataArgs {
    /// Album title
    #[arg(long)]
    pub album_title: Option<String>,

    /// Artist name
    #[arg(long)]
    pub artist_name: Option<String>,

    /// Song title
    #[arg(long)]
    pub song_title: Option<String>,

    /// Artwork URI or path relative to the asset root
    #[arg(long)]
    pub artwork_source: Option<String>,
}

impl MetadataArgs {
    fn into_fields(self) -> MetadataFields {
        MetadataFields {
            album_title: self.album_title,
            artist_name: self.artist_name,
            song_title: self.song_title,
            artwork_source: self.artwork_source,
        }
    }
}

/// Arguments for the create command
#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Media path or URI
    pub audio_source: String,

    /// Source identifier (a random UUID when omitted)
    #[arg(long = "id", value_parser = validate_audio_id)]
    pub audio_id: Option<String>,

    #[command(flatten)]
    pub metadata: MetadataArgs,

    /// Bind the source to the persistent notification
    #[arg(short, long)]
    pub notification: bool,

    /// Mark the source as background music
    #[arg(short, long)]
    pub background_music: bool,

    /// Loop the media forever
    #[arg(short, long = "loop")]
    pub loop_audio: bool,
}

impl CreateArgs {
    fn into_options(self) -> SourceOptions {
        SourceOptions {
            audio_id: self
                .audio_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            audio_source: self.audio_source,
            metadata: self.metadata.into_fields(),
            use_for_notification: self.notification,
            is_background_music: self.background_music,
            loop_audio: self.loop_audio,
        }
    }
}

/// Focus state of the embedding application
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    /// The application came to the foreground
    Gained,
    /// The application went to the background
    Lost,
}

// ============================================================================
// Validation Functions
// ============================================================================

/// Validates a source identifier.
///
/// - Must not be empty
/// - Must not exceed 100 characters
fn validate_audio_id(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        return Err("ソースIDは空にできません".to_string());
    }
    if s.chars().count() > 100 {
        return Err("ソースIDは100文字以内にしてください".to_string());
    }
    Ok(s.to_string())
}

/// Parses a volume level in the range 0.0-1.0.
fn parse_volume(s: &str) -> Result<f32, String> {
    let volume: f32 = s
        .parse()
        .map_err(|_| format!("音量は数値で指定してください: {}", s))?;
    if !(0.0..=1.0).contains(&volume) {
        return Err("音量は0.0から1.0の範囲で指定してください".to_string());
    }
    Ok(volume)
}

// ============================================================================
// Tests
// ============================================================================
