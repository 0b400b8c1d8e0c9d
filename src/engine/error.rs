//! Playback engine error types.
//!
//! These errors describe failures of the external playback engine. Transport
//! commands are fire-and-forget, so most of these surface either from engine
//! creation or as the message of an `EngineEvent::Error`.

use thiserror::Error;

/// Errors that can occur in a playback engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Audio output device is not available.
    #[error("オーディオデバイスが利用できません: {0}")]
    DeviceNotAvailable(String),

    /// The engine instance could not be created.
    #[error("再生エンジンの作成に失敗しました: {0}")]
    CreationFailed(String),

    /// The media locator uses a scheme the engine cannot open.
    #[error("サポートされていない音声ソースです: {0}")]
    UnsupportedSource(String),

    /// The media could not be opened.
    #[error("音声ソースを開けません: {0}")]
    OpenFailed(String),

    /// The media could not be decoded.
    #[error("音声のデコードに失敗しました: {0}")]
    DecodeFailed(String),

    /// No media item has been set before preparing.
    #[error("メディアが設定されていません")]
    NoMedia,
}

impl EngineError {
    /// Returns true if this error is related to device availability.
    #[must_use]
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::DeviceNotAvailable(_) | Self::CreationFailed(_))
    }

    /// Returns true if this error is related to the media itself.
    #[must_use]
    pub fn is_media_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedSource(_) | Self::OpenFailed(_) | Self::DecodeFailed(_) | Self::NoMedia
        )
    }

    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::DeviceNotAvailable(_) => "オーディオデバイスを接続してください",
            Self::CreationFailed(_) => "デーモンを再起動してください",
            Self::UnsupportedSource(_) => "ローカルファイルのパスを指定してください",
            Self::OpenFailed(_) => "ファイルのパスを確認してください",
            Self::DecodeFailed(_) => "音声ファイルが破損している可能性があります",
            Self::NoMedia => "音声ソースを設定してください",
        }
    }
}
