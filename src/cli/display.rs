//! Display utilities for the audio session CLI.
//!
//! This module provides formatted output for:
//! - Success messages and per-request data
//! - Error messages
//! - Source status tables
//! - Drained callback invocations

use crate::types::{CallbackInvocation, CallbackPayload, IpcResponse, PlaybackState, SourceStatus};

// ============================================================================
// Display
// ============================================================================

/// Display utilities for CLI output.
pub struct Display;

impl Display {
    /// Shows a response: the message first, then any data it carries.
    pub fn show_response(response: &IpcResponse) {
        for line in Self::render_response(response) {
            println!("{}", line);
        }
    }

    /// Shows an error message.
    pub fn show_error(message: &str) {
        eprintln!("エラー: {}", message);
    }

    /// Renders a response as output lines.
    pub fn render_response(response: &IpcResponse) -> Vec<String> {
        let mut lines = Vec::new();
        if !response.message.is_empty() {
            lines.push(format!("* {}", response.message));
        }

        let Some(data) = &response.data else {
            return lines;
        };

        if let Some(sources) = &data.sources {
            lines.extend(Self::render_status(sources));
            return lines;
        }
        if let Some(callbacks) = &data.callbacks {
            lines.extend(Self::render_callbacks(callbacks));
            if let Some(pending) = data.pending_callbacks.filter(|n| *n > 0) {
                lines.push(format!("  (残り {} 件は次回の poll-callbacks で取得できます)", pending));
            }
            return lines;
        }

        if let Some(state) = data.state {
            lines.push(format!("  状態: {}", Self::state_label(state)));
        }
        if let Some(duration) = data.duration {
            lines.push(format!("  長さ: {}", Self::format_seconds(duration)));
        }
        if let Some(current_time) = data.current_time {
            lines.push(format!("  再生位置: {}", Self::format_seconds(current_time)));
        }
        if let Some(is_playing) = data.is_playing {
            lines.push(format!(
                "  再生中: {}",
                if is_playing { "はい" } else { "いいえ" }
            ));
        }
        if let Some(seconds) = &data.seconds {
            if seconds.is_empty() {
                lines.push("  記録された秒はありません".to_string());
            } else {
                let joined: Vec<String> = seconds.iter().map(u32::to_string).collect();
                lines.push(format!("  再生済みの秒 ({}): {}", seconds.len(), joined.join(", ")));
            }
        }
        lines
    }

    /// Renders the source table of the status command.
    pub fn render_status(sources: &[SourceStatus]) -> Vec<String> {
        let mut lines = vec![
            "音声セッション ステータス".to_string(),
            "─────────────────────────────".to_string(),
        ];

        if sources.is_empty() {
            lines.push("音声ソースはありません".to_string());
            return lines;
        }

        for source in sources {
            let mut flags = Vec::new();
            if source.use_for_notification {
                flags.push("通知");
            }
            if source.background_music {
                flags.push("BGM");
            }
            if !source.initialized {
                flags.push("未初期化");
            }
            if source.tracking {
                flags.push("記録中");
            }

            let suffix = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            lines.push(format!(
                "{}: {}{}",
                source.audio_id,
                Self::state_label(source.state),
                suffix
            ));
            lines.push(format!("  {}", source.audio_source));
        }
        lines
    }

    /// Renders drained callback invocations, one per line.
    pub fn render_callbacks(callbacks: &[CallbackInvocation]) -> Vec<String> {
        if callbacks.is_empty() {
            return vec!["保留中のコールバックはありません".to_string()];
        }

        callbacks
            .iter()
            .map(|c| format!("{} <- {}", c.callback_id, Self::describe_payload(&c.payload)))
            .collect()
    }

    fn describe_payload(payload: &CallbackPayload) -> String {
        match payload {
            CallbackPayload::AudioReady { audio_id } => format!("{}: 準備完了", audio_id),
            CallbackPayload::AudioEnd { audio_id } => format!("{}: 再生終了", audio_id),
            CallbackPayload::PlaybackStatusChange {
                audio_id,
                status,
                error,
            } => match error {
                Some(error) => format!(
                    "{}: {} (エラー: {})",
                    audio_id,
                    Self::state_label(*status),
                    error
                ),
                None => format!("{}: {}", audio_id, Self::state_label(*status)),
            },
            CallbackPayload::MetadataUpdate {
                audio_id,
                metadata,
                current_time,
                ..
            } => format!(
                "{}: メタデータ更新 {} ({})",
                audio_id,
                metadata.song_title.as_deref().unwrap_or("-"),
                Self::format_seconds(*current_time)
            ),
            CallbackPayload::AppGainsFocus => "アプリがフォーカスを得ました".to_string(),
            CallbackPayload::AppLosesFocus => "アプリがフォーカスを失いました".to_string(),
        }
    }

    /// Returns the Japanese label of a playback state.
    pub fn state_label(state: PlaybackState) -> &'static str {
        match state {
            PlaybackState::Playing => "再生中",
            PlaybackState::Paused => "一時停止中",
            PlaybackState::Stopped => "停止中",
        }
    }

    /// Formats seconds as `m:ss`; negative values mean unknown.
    fn format_seconds(seconds: f64) -> String {
        if seconds < 0.0 || !seconds.is_finite() {
            return "不明".to_string();
        }
        let total = seconds.floor() as u64;
        format!("{}:{:02}", total / 60, total % 60)
    }
}

// ============================================================================
// Tests
// ============================================================================
