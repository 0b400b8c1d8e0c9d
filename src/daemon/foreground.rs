//! Persistent foreground surface.
//!
//! The session promotes itself to the foreground at startup so the host
//! keeps it alive while audio plays in the background. The OS machinery
//! behind that surface is external; the coordinator only needs the
//! [`ForegroundSurface`] trait.
//!
//! # Error Handling
//!
//! Every error in this module is recoverable. A failed promotion is logged
//! and the session keeps running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

// ============================================================================
// ForegroundNotice
// ============================================================================

/// The ongoing notice shown while the session is in the foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundNotice {
    /// Notice channel identifier
    pub channel_id: String,
    /// Notice identifier within the channel
    pub notice_id: u32,
    /// Title text
    pub title: String,
    /// Body text
    pub body: String,
    /// The notice cannot be dismissed while promoted
    pub ongoing: bool,
    /// Shown with low priority (no sound, no heads-up)
    pub low_priority: bool,
}

impl Default for ForegroundNotice {
    fn default() -> Self {
        Self {
            channel_id: "playback_channel".to_string(),
            notice_id: 1,
            title: "Audio playback".to_string(),
            body: "Playing media".to_string(),
            ongoing: true,
            low_priority: true,
        }
    }
}

// ============================================================================
// ForegroundError
// ============================================================================

/// Errors that can occur while changing the foreground state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForegroundError {
    /// The host does not offer a foreground surface.
    #[error("フォアグラウンド表示が利用できません")]
    NotAvailable,

    /// Promotion was refused.
    #[error("フォアグラウンド化に失敗しました: {0}")]
    PromotionFailed(String),

    /// Demotion was refused.
    #[error("フォアグラウンド解除に失敗しました: {0}")]
    DemotionFailed(String),
}

impl ForegroundError {
    /// Returns true if the surface does not exist at all.
    #[must_use]
    pub fn is_not_available(&self) -> bool {
        matches!(self, Self::NotAvailable)
    }

    /// Returns true if the session should keep running.
    ///
    /// Always true: foreground failures are never fatal.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        true
    }

    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NotAvailable => "通知の権限を確認してください",
            Self::PromotionFailed(_) | Self::DemotionFailed(_) => {
                "デーモンを再起動してください"
            }
        }
    }
}

// ============================================================================
// ForegroundSurface
// ============================================================================

/// A host surface that keeps the session in the foreground.
pub trait ForegroundSurface: Send + Sync {
    /// Shows the notice and promotes the session.
    fn promote(&self, notice: &ForegroundNotice) -> Result<(), ForegroundError>;

    /// Removes the notice and demotes the session.
    fn demote(&self) -> Result<(), ForegroundError>;

    /// Returns true while promoted.
    fn is_foreground(&self) -> bool;
}

/// Surface for headless hosts: records the state and logs the notice.
#[derive(Debug, Default)]
pub struct LogForegroundSurface {
    promoted: AtomicBool,
}

impl LogForegroundSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ForegroundSurface for LogForegroundSurface {
    fn promote(&self, notice: &ForegroundNotice) -> Result<(), ForegroundError> {
        self.promoted.store(true, Ordering::SeqCst);
        info!(
            "Foreground notice [{}#{}]: {} - {}",
            notice.channel_id, notice.notice_id, notice.title, notice.body
        );
        Ok(())
    }

    fn demote(&self) -> Result<(), ForegroundError> {
        if self.promoted.swap(false, Ordering::SeqCst) {
            info!("Foreground notice removed");
        }
        Ok(())
    }

    fn is_foreground(&self) -> bool {
        self.promoted.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Mock
// ============================================================================

/// Mock foreground surface for testing.
#[derive(Debug, Default)]
pub struct MockForegroundSurface {
    promotions: Mutex<Vec<ForegroundNotice>>,
    demote_calls: Mutex<usize>,
    promoted: AtomicBool,
    should_fail_promote: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockForegroundSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail_promote(&self, should_fail: bool) {
        self.should_fail_promote.store(should_fail, Ordering::SeqCst);
    }

    /// Makes `promote` block for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    #[must_use]
    pub fn promote_call_count(&self) -> usize {
        self.promotions.lock().unwrap().len()
    }

    #[must_use]
    pub fn demote_call_count(&self) -> usize {
        *self.demote_calls.lock().unwrap()
    }

    #[must_use]
    pub fn last_notice(&self) -> Option<ForegroundNotice> {
        self.promotions.lock().unwrap().last().cloned()
    }
}

impl ForegroundSurface for MockForegroundSurface {
    fn promote(&self, notice: &ForegroundNotice) -> Result<(), ForegroundError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.promotions.lock().unwrap().push(notice.clone());
        if self.should_fail_promote.load(Ordering::SeqCst) {
            return Err(ForegroundError::PromotionFailed(
                "simulated failure".to_string(),
            ));
        }
        self.promoted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn demote(&self) -> Result<(), ForegroundError> {
        *self.demote_calls.lock().unwrap() += 1;
        self.promoted.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_foreground(&self) -> bool {
        self.promoted.load(Ordering::SeqCst)
    }
}
