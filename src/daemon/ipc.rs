//! IPC server for the audio session daemon.
//!
//! This module provides Unix Domain Socket IPC functionality:
//! - Server that listens on a Unix socket
//! - One JSON request per connection, terminated by the client closing its
//!   write half, answered with one JSON response
//! - Request dispatch to the [`SessionCoordinator`]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::session::SessionError;
use crate::types::{
    IpcRequest, IpcResponse, MetadataFields, PlaybackState, ResponseData, SourceOptions,
};

use super::coordinator::SessionCoordinator;

// ============================================================================
// Constants
// ============================================================================

/// Maximum request size in bytes (16KB)
const MAX_REQUEST_SIZE: u64 = 16 * 1024;

/// Read timeout in seconds
const READ_TIMEOUT_SECS: u64 = 5;

/// Encoded size budget for the invocations of one poll (32KB), well under
/// the client's response limit
const MAX_CALLBACK_BATCH_BYTES: usize = 32 * 1024;

// ============================================================================
// IpcError
// ============================================================================

/// IPC-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Read error
    #[error("Failed to read request: {0}")]
    ReadError(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Request too large
    #[error("Request too large (max {MAX_REQUEST_SIZE} bytes)")]
    RequestTooLarge,

    /// The client closed the connection without sending anything
    #[error("Connection closed by client")]
    EmptyRequest,
}

// ============================================================================
// IpcServer
// ============================================================================

/// Unix Domain Socket IPC server.
pub struct IpcServer {
    /// Unix socket listener
    listener: UnixListener,
    /// Socket path (for cleanup)
    socket_path: PathBuf,
}

impl IpcServer {
    /// Creates a new IPC server bound to the specified socket path.
    ///
    /// If the socket file already exists, it will be removed before binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn new(socket_path: &Path) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove existing socket: {:?}", socket_path))?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {:?}", parent))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind Unix socket: {:?}", socket_path))?;

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Accepts an incoming client connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be accepted.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept connection")?;
        Ok(stream)
    }

    /// Reads the request until the client shuts down its write half and
    /// deserializes it.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, oversize, empty input or invalid JSON.
    pub async fn receive_request(stream: &mut UnixStream) -> Result<IpcRequest> {
        let mut buffer = Vec::new();
        // One byte past the limit tells an oversize request apart.
        let mut limited = (&mut *stream).take(MAX_REQUEST_SIZE + 1);

        let read_result = timeout(
            Duration::from_secs(READ_TIMEOUT_SECS),
            limited.read_to_end(&mut buffer),
        )
        .await;

        match read_result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(IpcError::ReadError(e.to_string()).into()),
            Err(_) => return Err(IpcError::Timeout.into()),
        }

        if buffer.is_empty() {
            return Err(IpcError::EmptyRequest.into());
        }
        if buffer.len() as u64 > MAX_REQUEST_SIZE {
            return Err(IpcError::RequestTooLarge.into());
        }

        let request: IpcRequest = serde_json::from_slice(&buffer)
            .with_context(|| "Failed to deserialize IPC request")?;

        Ok(request)
    }

    /// Serializes and sends an IPC response to the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub async fn send_response(stream: &mut UnixStream, response: &IpcResponse) -> Result<()> {
        let json = serde_json::to_vec(response).context("Failed to serialize IPC response")?;

        stream
            .write_all(&json)
            .await
            .context("Failed to write response")?;
        stream.flush().await.context("Failed to flush response")?;
        stream
            .shutdown()
            .await
            .context("Failed to close response stream")?;

        Ok(())
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

// ============================================================================
// RequestHandler
// ============================================================================

/// Converts a session error into an error response.
fn error_response(error: &SessionError) -> IpcResponse {
    IpcResponse::error_with_code(error.code(), error.to_string())
}

/// Builds a success response carrying the source id and its state.
fn state_response(message: &str, audio_id: &str, state: PlaybackState) -> IpcResponse {
    IpcResponse::success(message, Some(ResponseData::for_source(audio_id, state)))
}

/// Handles IPC requests by dispatching to the session coordinator.
pub struct RequestHandler {
    /// Shared reference to the coordinator
    coordinator: Arc<Mutex<SessionCoordinator>>,
}

impl RequestHandler {
    /// Creates a new request handler for the given coordinator.
    pub fn new(coordinator: Arc<Mutex<SessionCoordinator>>) -> Self {
        Self { coordinator }
    }

    /// Handles an IPC request and returns the appropriate response.
    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request.audio_id() {
            Some(audio_id) => debug!("Request for {}", audio_id),
            None => debug!("Session request"),
        }
        let mut coordinator = self.coordinator.lock().await;
        let c = &mut *coordinator;

        match request {
            IpcRequest::Create { options } => Self::handle_create(c, options),
            IpcRequest::Initialize { audio_id } => Self::handle_initialize(c, &audio_id),
            IpcRequest::Destroy { audio_id } => Self::handle_destroy(c, &audio_id),
            IpcRequest::ChangeAudioSource { audio_id, source } => {
                Self::handle_change_audio_source(c, &audio_id, &source)
            }
            IpcRequest::ChangeMetadata { audio_id, metadata } => {
                Self::handle_change_metadata(c, &audio_id, &metadata)
            }
            IpcRequest::UpdateMetadata { audio_id } => Self::handle_update_metadata(c, &audio_id),
            IpcRequest::GetDuration { audio_id } => Self::handle_get_duration(c, &audio_id),
            IpcRequest::GetCurrentTime { audio_id } => Self::handle_get_current_time(c, &audio_id),
            IpcRequest::Play { audio_id } => Self::handle_play(c, &audio_id),
            IpcRequest::Pause { audio_id } => Self::handle_pause(c, &audio_id),
            IpcRequest::Seek {
                audio_id,
                time_in_seconds,
            } => Self::handle_seek(c, &audio_id, time_in_seconds),
            IpcRequest::Stop { audio_id } => Self::handle_stop(c, &audio_id),
            IpcRequest::SetVolume { audio_id, volume } => {
                Self::handle_set_volume(c, &audio_id, volume)
            }
            IpcRequest::SetRate { audio_id, rate } => Self::handle_set_rate(c, &audio_id, rate),
            IpcRequest::IsPlaying { audio_id } => Self::handle_is_playing(c, &audio_id),
            IpcRequest::OnAudioReady {
                audio_id,
                callback_id,
            } => Self::registered(c.on_audio_ready(&audio_id, &callback_id)),
            IpcRequest::OnAudioEnd {
                audio_id,
                callback_id,
            } => Self::registered(c.on_audio_end(&audio_id, &callback_id)),
            IpcRequest::OnPlaybackStatusChange {
                audio_id,
                callback_id,
            } => Self::registered(c.on_playback_status_change(&audio_id, &callback_id)),
            IpcRequest::OnMetadataUpdate {
                audio_id,
                callback_id,
            } => Self::registered(c.on_metadata_update(&audio_id, &callback_id)),
            IpcRequest::OnAppGainsFocus { callback_id } => {
                c.on_app_gains_focus(&callback_id);
                IpcResponse::success("コールバックを登録しました", None)
            }
            IpcRequest::OnAppLosesFocus { callback_id } => {
                c.on_app_loses_focus(&callback_id);
                IpcResponse::success("コールバックを登録しました", None)
            }
            IpcRequest::SetAppFocus { focused } => {
                c.set_app_focus(focused);
                IpcResponse::success("フォーカス状態を通知しました", None)
            }
            IpcRequest::StartBackgroundTracking { audio_id, duration } => {
                Self::handle_start_tracking(c, &audio_id, duration)
            }
            IpcRequest::StopBackgroundTracking { audio_id } => {
                match c.stop_background_tracking(&audio_id) {
                    Ok(()) => IpcResponse::success("再生位置の記録を停止しました", None),
                    Err(e) => error_response(&e),
                }
            }
            IpcRequest::FetchBackgroundPlayedSeconds { audio_id } => {
                Self::handle_fetch_played_seconds(c, &audio_id)
            }
            IpcRequest::PollCallbacks => Self::handle_poll_callbacks(c),
            IpcRequest::Status => Self::handle_status(c),
            IpcRequest::TaskRemoved => {
                c.task_removed();
                IpcResponse::success("タスク終了を処理しました", None)
            }
            IpcRequest::Shutdown => IpcResponse::success("セッションを終了します", None),
        }
    }

    fn registered(result: Result<(), SessionError>) -> IpcResponse {
        match result {
            Ok(()) => IpcResponse::success("コールバックを登録しました", None),
            Err(e) => error_response(&e),
        }
    }

    fn handle_create(c: &mut SessionCoordinator, options: SourceOptions) -> IpcResponse {
        match c.create(options) {
            Ok(status) => IpcResponse::success(
                "音声ソースを作成しました",
                Some(ResponseData {
                    sources: Some(vec![status.clone()]),
                    ..ResponseData::for_source(status.audio_id, status.state)
                }),
            ),
            Err(e) => error_response(&e),
        }
    }

    fn handle_initialize(c: &mut SessionCoordinator, audio_id: &str) -> IpcResponse {
        match c.initialize(audio_id).and_then(|()| c.state(audio_id)) {
            Ok(state) => state_response("音声ソースを初期化しました", audio_id, state),
            Err(e) => error_response(&e),
        }
    }

    fn handle_destroy(c: &mut SessionCoordinator, audio_id: &str) -> IpcResponse {
        match c.destroy(audio_id) {
            Ok(()) => IpcResponse::success(
                "音声ソースを破棄しました",
                Some(ResponseData {
                    audio_id: Some(audio_id.to_string()),
                    ..ResponseData::default()
                }),
            ),
            Err(e) => error_response(&e),
        }
    }

    fn handle_change_audio_source(
        c: &mut SessionCoordinator,
        audio_id: &str,
        source: &str,
    ) -> IpcResponse {
        match c
            .change_audio_source(audio_id, source)
            .and_then(|()| c.state(audio_id))
        {
            Ok(state) => state_response("音源を変更しました", audio_id, state),
            Err(e) => error_response(&e),
        }
    }

    fn handle_change_metadata(
        c: &mut SessionCoordinator,
        audio_id: &str,
        metadata: &MetadataFields,
    ) -> IpcResponse {
        match c.change_metadata(audio_id, metadata) {
            Ok(()) => IpcResponse::success("メタデータを変更しました", None),
            Err(e) => error_response(&e),
        }
    }

    fn handle_update_metadata(c: &mut SessionCoordinator, audio_id: &str) -> IpcResponse {
        match c.update_metadata(audio_id) {
            Ok(()) => IpcResponse::success("メタデータを更新しました", None),
            Err(e) => error_response(&e),
        }
    }

    fn handle_get_duration(c: &mut SessionCoordinator, audio_id: &str) -> IpcResponse {
        match c.duration(audio_id) {
            Ok(duration) => IpcResponse::success(
                "",
                Some(ResponseData {
                    audio_id: Some(audio_id.to_string()),
                    duration: Some(duration),
                    ..ResponseData::default()
                }),
            ),
            Err(e) => error_response(&e),
        }
    }

    fn handle_get_current_time(c: &mut SessionCoordinator, audio_id: &str) -> IpcResponse {
        match c.current_time(audio_id) {
            Ok(current_time) => IpcResponse::success(
                "",
                Some(ResponseData {
                    audio_id: Some(audio_id.to_string()),
                    current_time: Some(current_time),
                    ..ResponseData::default()
                }),
            ),
            Err(e) => error_response(&e),
        }
    }

    fn handle_play(c: &mut SessionCoordinator, audio_id: &str) -> IpcResponse {
        match c.play(audio_id) {
            Ok(state) => state_response("再生を開始しました", audio_id, state),
            Err(e) => error_response(&e),
        }
    }

    fn handle_pause(c: &mut SessionCoordinator, audio_id: &str) -> IpcResponse {
        match c.pause(audio_id) {
            Ok(state) => state_response("再生を一時停止しました", audio_id, state),
            Err(e) => error_response(&e),
        }
    }

    fn handle_stop(c: &mut SessionCoordinator, audio_id: &str) -> IpcResponse {
        match c.stop(audio_id) {
            Ok(state) => state_response("再生を停止しました", audio_id, state),
            Err(e) => error_response(&e),
        }
    }

    fn handle_seek(c: &mut SessionCoordinator, audio_id: &str, seconds: u64) -> IpcResponse {
        match c.seek(audio_id, seconds).and_then(|()| c.current_time(audio_id)) {
            Ok(current_time) => IpcResponse::success(
                format!("{}秒へ移動しました", seconds),
                Some(ResponseData {
                    audio_id: Some(audio_id.to_string()),
                    current_time: Some(current_time),
                    ..ResponseData::default()
                }),
            ),
            Err(e) => error_response(&e),
        }
    }

    fn handle_set_volume(c: &mut SessionCoordinator, audio_id: &str, volume: f32) -> IpcResponse {
        match c.set_volume(audio_id, volume) {
            Ok(()) => IpcResponse::success("音量を変更しました", None),
            Err(e) => error_response(&e),
        }
    }

    fn handle_set_rate(c: &mut SessionCoordinator, audio_id: &str, rate: f32) -> IpcResponse {
        match c.set_rate(audio_id, rate) {
            Ok(()) => IpcResponse::success("再生速度を変更しました", None),
            Err(e) => error_response(&e),
        }
    }

    fn handle_is_playing(c: &mut SessionCoordinator, audio_id: &str) -> IpcResponse {
        match c.is_playing(audio_id) {
            Ok(is_playing) => IpcResponse::success(
                "",
                Some(ResponseData {
                    audio_id: Some(audio_id.to_string()),
                    is_playing: Some(is_playing),
                    ..ResponseData::default()
                }),
            ),
            Err(e) => error_response(&e),
        }
    }

    fn handle_start_tracking(
        c: &mut SessionCoordinator,
        audio_id: &str,
        duration: u32,
    ) -> IpcResponse {
        match c.start_background_tracking(audio_id, duration) {
            Ok(true) => IpcResponse::success("再生位置の記録を開始しました", None),
            Ok(false) => IpcResponse::success("再生位置の記録は開始されませんでした", None),
            Err(e) => error_response(&e),
        }
    }

    fn handle_fetch_played_seconds(c: &mut SessionCoordinator, audio_id: &str) -> IpcResponse {
        match c.fetch_background_played_seconds(audio_id) {
            Ok(seconds) => IpcResponse::success(
                "",
                Some(ResponseData {
                    audio_id: Some(audio_id.to_string()),
                    seconds: Some(seconds),
                    ..ResponseData::default()
                }),
            ),
            Err(e) => error_response(&e),
        }
    }

    fn handle_poll_callbacks(c: &mut SessionCoordinator) -> IpcResponse {
        let callbacks = c.take_callbacks(MAX_CALLBACK_BATCH_BYTES);
        let pending = c.pending_callback_count();
        if pending > 0 {
            debug!("{} callback invocations left for the next poll", pending);
        }
        IpcResponse::success(
            "",
            Some(ResponseData {
                callbacks: Some(callbacks),
                pending_callbacks: Some(pending),
                ..ResponseData::default()
            }),
        )
    }

    fn handle_status(c: &mut SessionCoordinator) -> IpcResponse {
        IpcResponse::success(
            "",
            Some(ResponseData {
                sources: Some(c.status()),
                ..ResponseData::default()
            }),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
