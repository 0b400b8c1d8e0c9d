//! Session error types.

use thiserror::Error;

use crate::engine::EngineError;
use crate::types::ErrorCode;

/// Errors surfaced by audio sources and the source registry.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No source is registered under the id.
    #[error("音声ソースが見つかりません: {0}")]
    NotFound(String),

    /// The id (or the notification slot) is already taken.
    #[error("既に存在します: {0}")]
    AlreadyExists(String),

    /// The operation needs an engine the source does not have.
    #[error("無効な状態です: {0}")]
    InvalidState(String),

    /// An argument is outside its accepted range.
    #[error("無効な引数です: {0}")]
    InvalidArgument(String),

    /// An asset could not be loaded.
    #[error("リソースの読み込みに失敗しました: {0}")]
    ResourceLoadFailure(String),

    /// The engine could not be created.
    #[error(transparent)]
    EngineFailure(#[from] EngineError),
}

impl SessionError {
    /// Returns the wire error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::ResourceLoadFailure(_) => ErrorCode::ResourceLoadFailure,
            Self::EngineFailure(_) => ErrorCode::EngineFailure,
        }
    }

    /// Returns true if the error means the source id is unknown.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true for errors caused by the caller's input.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::AlreadyExists(_) | Self::InvalidArgument(_)
        )
    }

    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "'audiosession status' で登録済みのIDを確認してください",
            Self::AlreadyExists(_) => "別のIDを指定するか、既存のソースを破棄してください",
            Self::InvalidState(_) => "先に 'audiosession initialize' を実行してください",
            Self::InvalidArgument(_) => "音量は0.0〜1.0、速度は0.0より大きく4.0以下で指定してください",
            Self::ResourceLoadFailure(_) => "アセットのパスを確認してください",
            Self::EngineFailure(e) => e.suggestion(),
        }
    }
}
