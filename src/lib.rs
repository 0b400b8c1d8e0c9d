//! Audio Session Library
//!
//! This library provides the core functionality of the audio session daemon.
//! It includes:
//! - Audio sources with playback state, metadata and background progress tracking
//! - A source registry with one optional notification-bound source
//! - The playback engine abstraction with a rodio-backed implementation
//! - The session coordinator, foreground surface and daemon loop
//! - IPC server/client for daemon-CLI communication
//! - CLI command parsing and display utilities
//! - Wire types shared by the daemon and the CLI

pub mod cli;
pub mod daemon;
pub mod engine;
pub mod session;
pub mod types;

// Re-export commonly used types for convenience
pub use types::{
    CallbackInvocation, CallbackPayload, ErrorCode, IpcRequest, IpcResponse, MetadataFields,
    PlaybackState, ResponseData, SourceOptions, SourceStatus,
};

// Re-export the session core
pub use session::{
    AudioMetadata, AudioSource, BackgroundTracker, SessionError, SessionEvent, SourceContext,
    SourceRegistry,
};

// Re-export engine types
pub use engine::{
    EngineError, EngineEvent, EngineFactory, EngineListener, EngineState, MockEngineFactory,
    MockPlaybackEngine, PlaybackEngine, RodioEngine, RodioEngineFactory,
};

// Re-export daemon types
pub use daemon::{
    DaemonConfig, ForegroundSurface, LogForegroundSurface, MockForegroundSurface,
    SessionCoordinator,
};
