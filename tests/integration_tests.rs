//! Integration Tests for the audio session bridge.
//!
//! These tests run a real `IpcServer` + `RequestHandler` pair over a
//! temporary Unix socket and talk to it through `IpcClient`:
//! - TC-I-001: Source creation and status
//! - TC-I-002: Transport commands
//! - TC-I-003: Error responses
//! - TC-I-004: Callback polling
//! - TC-I-005: Metadata commands
//! - TC-I-006: App focus callbacks
//! - TC-I-007: Callback backlog

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

use audiosession::cli::client::IpcClient;
use audiosession::daemon::config::DaemonConfig;
use audiosession::daemon::coordinator::SessionCoordinator;
use audiosession::daemon::foreground::MockForegroundSurface;
use audiosession::daemon::ipc::{IpcServer, RequestHandler};
use audiosession::engine::{EngineCall, EngineEvent, MockEngineFactory};
use audiosession::session::SessionEvent;
use audiosession::types::{
    CallbackPayload, IpcRequest, MetadataFields, PlaybackState, SourceOptions,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Creates a temporary socket path for testing.
fn create_temp_socket_path() -> PathBuf {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("integration_test.sock");
    // Keep the directory so it's not deleted
    std::mem::forget(dir);
    path
}

struct TestBridge {
    client: IpcClient,
    factory: Arc<MockEngineFactory>,
    coordinator: Arc<Mutex<SessionCoordinator>>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    server_handle: tokio::task::JoinHandle<()>,
}

impl TestBridge {
    /// Applies every queued engine event and timer tick.
    async fn pump(&mut self) {
        let mut coordinator = self.coordinator.lock().await;
        while let Ok(event) = self.events.try_recv() {
            coordinator.handle_event(event);
        }
    }
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// Starts a server answering `count` requests.
async fn start_bridge(count: usize) -> TestBridge {
    let socket_path = create_temp_socket_path();
    let (tx, events) = mpsc::unbounded_channel();
    let factory = Arc::new(MockEngineFactory::new());

    let mut coordinator = SessionCoordinator::new(
        DaemonConfig::default(),
        factory.clone(),
        Arc::new(MockForegroundSurface::new()),
        tx,
    );
    coordinator.start();
    let coordinator = Arc::new(Mutex::new(coordinator));

    let server = IpcServer::new(&socket_path).unwrap();
    let handler = RequestHandler::new(coordinator.clone());
    let server_handle = tokio::spawn(async move {
        for _ in 0..count {
            if let Ok(mut stream) = server.accept().await {
                if let Ok(request) = IpcServer::receive_request(&mut stream).await {
                    let response = handler.handle(request).await;
                    let _ = IpcServer::send_response(&mut stream, &response).await;
                }
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    TestBridge {
        client: IpcClient::with_socket_path(socket_path).with_max_retries(1),
        factory,
        coordinator,
        events,
        server_handle,
    }
}

fn create_request(audio_id: &str, source: &str) -> IpcRequest {
    IpcRequest::Create {
        options: SourceOptions::new(audio_id, source),
    }
}

// ============================================================================
// TC-I-001: Source creation and status
// ============================================================================

#[tokio::test]
async fn tc_i_001_create_and_status() {
    let bridge = start_bridge(3).await;

    let response = bridge
        .client
        .send(&create_request("intro", "/audio/intro.mp3"))
        .await
        .unwrap();
    assert_eq!(response.message, "音声ソースを作成しました");
    let data = response.data.unwrap();
    assert_eq!(data.audio_id, Some("intro".to_string()));
    assert_eq!(data.state, Some(PlaybackState::Stopped));

    bridge
        .client
        .send(&IpcRequest::Create {
            options: SourceOptions::new("theme", "/audio/theme.mp3").for_notification(),
        })
        .await
        .unwrap();

    let response = bridge.client.status().await.unwrap();
    let sources = response.data.unwrap().sources.unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].audio_id, "intro");
    assert!(sources[0].initialized);
    assert_eq!(sources[1].audio_id, "theme");
    assert!(sources[1].use_for_notification);
    assert!(!sources[1].initialized);
}

#[tokio::test]
async fn tc_i_001_initialize_notification_source() {
    let bridge = start_bridge(2).await;

    bridge
        .client
        .send(&IpcRequest::Create {
            options: SourceOptions::new("theme", "/audio/theme.mp3").for_notification(),
        })
        .await
        .unwrap();
    let response = bridge
        .client
        .send(&IpcRequest::Initialize {
            audio_id: "theme".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(response.message, "音声ソースを初期化しました");
    // Only the shared engine exists: the notification source borrowed it.
    assert_eq!(bridge.factory.created_count(), 1);
    let shared = bridge.factory.created()[0].clone();
    assert_eq!(shared.media_item().unwrap().uri, "/audio/theme.mp3");
}

// ============================================================================
// TC-I-002: Transport commands
// ============================================================================

#[tokio::test]
async fn tc_i_002_transport_commands() {
    let bridge = start_bridge(8).await;
    bridge
        .client
        .send(&create_request("a", "/audio/a.mp3"))
        .await
        .unwrap();
    let engine = bridge.factory.last().unwrap();

    let play = IpcRequest::Play {
        audio_id: "a".to_string(),
    };
    let response = bridge.client.send(&play).await.unwrap();
    assert_eq!(response.data.unwrap().state, Some(PlaybackState::Playing));
    assert!(engine.is_playing());

    let response = bridge
        .client
        .send(&IpcRequest::Seek {
            audio_id: "a".to_string(),
            time_in_seconds: 30,
        })
        .await
        .unwrap();
    assert_eq!(response.data.unwrap().current_time, Some(30.0));

    bridge
        .client
        .send(&IpcRequest::SetVolume {
            audio_id: "a".to_string(),
            volume: 0.25,
        })
        .await
        .unwrap();
    bridge
        .client
        .send(&IpcRequest::SetRate {
            audio_id: "a".to_string(),
            rate: 1.5,
        })
        .await
        .unwrap();
    assert_eq!(engine.volume(), Some(0.25));
    assert_eq!(engine.speed(), Some(1.5));

    let response = bridge
        .client
        .send(&IpcRequest::Pause {
            audio_id: "a".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.data.unwrap().state, Some(PlaybackState::Paused));

    let response = bridge
        .client
        .send(&IpcRequest::Stop {
            audio_id: "a".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.data.unwrap().state, Some(PlaybackState::Stopped));
    assert!(engine.calls().ends_with(&[EngineCall::Pause, EngineCall::SeekTo(0)]));

    let response = bridge
        .client
        .send(&IpcRequest::IsPlaying {
            audio_id: "a".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.data.unwrap().is_playing, Some(false));
}

#[tokio::test]
async fn tc_i_002_change_audio_source_keeps_state() {
    let bridge = start_bridge(3).await;
    bridge
        .client
        .send(&create_request("a", "/audio/a.mp3"))
        .await
        .unwrap();
    bridge
        .client
        .send(&IpcRequest::Play {
            audio_id: "a".to_string(),
        })
        .await
        .unwrap();

    let response = bridge
        .client
        .send(&IpcRequest::ChangeAudioSource {
            audio_id: "a".to_string(),
            source: "/audio/b.mp3".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(response.data.unwrap().state, Some(PlaybackState::Playing));
    let engine = bridge.factory.last().unwrap();
    assert_eq!(engine.media_item().unwrap().uri, "/audio/b.mp3");
}

// ============================================================================
// TC-I-003: Error responses
// ============================================================================

#[tokio::test]
async fn tc_i_003_unknown_source_is_an_error() {
    let bridge = start_bridge(1).await;

    let err = bridge
        .client
        .send(&IpcRequest::GetDuration {
            audio_id: "ghost".to_string(),
        })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("ghost"));
}

#[tokio::test]
async fn tc_i_003_duplicate_and_second_notification_source() {
    let bridge = start_bridge(4).await;
    bridge
        .client
        .send(&create_request("a", "/audio/a.mp3"))
        .await
        .unwrap();

    let err = bridge
        .client
        .send(&create_request("a", "/audio/other.mp3"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("既に存在します"));

    bridge
        .client
        .send(&IpcRequest::Create {
            options: SourceOptions::new("n1", "/audio/n1.mp3").for_notification(),
        })
        .await
        .unwrap();
    let err = bridge
        .client
        .send(&IpcRequest::Create {
            options: SourceOptions::new("n2", "/audio/n2.mp3").for_notification(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("既に存在します"));
}

#[tokio::test]
async fn tc_i_003_out_of_range_arguments() {
    let bridge = start_bridge(3).await;
    bridge
        .client
        .send(&create_request("a", "/audio/a.mp3"))
        .await
        .unwrap();

    let volume = bridge
        .client
        .send(&IpcRequest::SetVolume {
            audio_id: "a".to_string(),
            volume: 1.2,
        })
        .await;
    let rate = bridge
        .client
        .send(&IpcRequest::SetRate {
            audio_id: "a".to_string(),
            rate: 0.0,
        })
        .await;

    assert!(volume.unwrap_err().to_string().contains("無効な引数です"));
    assert!(rate.unwrap_err().to_string().contains("無効な引数です"));
}

// ============================================================================
// TC-I-004: Callback polling
// ============================================================================

#[tokio::test]
async fn tc_i_004_end_of_media_callbacks() {
    let mut bridge = start_bridge(5).await;
    bridge
        .client
        .send(&create_request("a", "/audio/a.mp3"))
        .await
        .unwrap();
    bridge
        .client
        .send(&IpcRequest::OnAudioEnd {
            audio_id: "a".to_string(),
            callback_id: "end-1".to_string(),
        })
        .await
        .unwrap();
    bridge
        .client
        .send(&IpcRequest::OnPlaybackStatusChange {
            audio_id: "a".to_string(),
            callback_id: "status-1".to_string(),
        })
        .await
        .unwrap();
    bridge
        .client
        .send(&IpcRequest::Play {
            audio_id: "a".to_string(),
        })
        .await
        .unwrap();

    bridge.factory.last().unwrap().emit(EngineEvent::Ended);
    bridge.pump().await;

    let response = bridge.client.send(&IpcRequest::PollCallbacks).await.unwrap();
    let callbacks = response.data.unwrap().callbacks.unwrap();
    let ids: Vec<&str> = callbacks.iter().map(|c| c.callback_id.as_str()).collect();

    // PlayingChanged(true) from play, then the end and its status change.
    assert_eq!(ids, vec!["status-1", "end-1", "status-1"]);
    assert_eq!(
        callbacks[2].payload,
        CallbackPayload::PlaybackStatusChange {
            audio_id: "a".to_string(),
            status: PlaybackState::Stopped,
            error: None,
        }
    );
}

// ============================================================================
// TC-I-005: Metadata commands
// ============================================================================

#[tokio::test]
async fn tc_i_005_change_and_update_metadata() {
    let bridge = start_bridge(4).await;
    bridge
        .client
        .send(&IpcRequest::Create {
            options: SourceOptions::new("theme", "/audio/theme.mp3")
                .for_notification()
                .with_metadata(MetadataFields::default().with_song_title("Theme")),
        })
        .await
        .unwrap();
    bridge
        .client
        .send(&IpcRequest::Initialize {
            audio_id: "theme".to_string(),
        })
        .await
        .unwrap();

    let response = bridge
        .client
        .send(&IpcRequest::ChangeMetadata {
            audio_id: "theme".to_string(),
            metadata: MetadataFields::default().with_artist_name("Band"),
        })
        .await
        .unwrap();
    assert_eq!(response.message, "メタデータを変更しました");

    let shared = bridge.factory.created()[0].clone();
    shared.clear_calls();
    bridge
        .client
        .send(&IpcRequest::UpdateMetadata {
            audio_id: "theme".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(shared.call_count(&EngineCall::ReplaceMediaMetadata), 1);
    let metadata = shared.media_item().unwrap().metadata;
    assert_eq!(metadata.title, "Theme");
    assert_eq!(metadata.artist, "Band");
}

#[tokio::test]
async fn tc_i_005_update_metadata_needs_engine() {
    let bridge = start_bridge(2).await;
    bridge
        .client
        .send(&IpcRequest::Create {
            options: SourceOptions::new("theme", "/audio/theme.mp3").for_notification(),
        })
        .await
        .unwrap();

    let err = bridge
        .client
        .send(&IpcRequest::UpdateMetadata {
            audio_id: "theme".to_string(),
        })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("無効な状態です"));
}

// ============================================================================
// TC-I-006: App focus callbacks
// ============================================================================

#[tokio::test]
async fn tc_i_006_app_focus_callbacks() {
    let bridge = start_bridge(5).await;

    bridge
        .client
        .send(&IpcRequest::OnAppGainsFocus {
            callback_id: "gains".to_string(),
        })
        .await
        .unwrap();
    let response = bridge
        .client
        .send(&IpcRequest::SetAppFocus { focused: true })
        .await
        .unwrap();
    assert_eq!(response.message, "フォーカス状態を通知しました");

    // No loses-focus callback registered yet.
    bridge
        .client
        .send(&IpcRequest::SetAppFocus { focused: false })
        .await
        .unwrap();
    bridge
        .client
        .send(&IpcRequest::SetAppFocus { focused: true })
        .await
        .unwrap();

    let response = bridge.client.send(&IpcRequest::PollCallbacks).await.unwrap();
    let callbacks = response.data.unwrap().callbacks.unwrap();
    assert_eq!(callbacks.len(), 2);
    assert!(callbacks
        .iter()
        .all(|c| c.callback_id == "gains" && c.payload == CallbackPayload::AppGainsFocus));
}

// ============================================================================
// TC-I-007: Callback backlog
// ============================================================================

#[tokio::test]
async fn tc_i_007_large_callback_backlog_is_polled_in_batches() {
    let bridge = start_bridge(20).await;
    let callback_id = format!("gains-{}", "x".repeat(120));
    let queued = 1000;
    {
        let mut coordinator = bridge.coordinator.lock().await;
        coordinator.on_app_gains_focus(&callback_id);
        for _ in 0..queued {
            coordinator.set_app_focus(true);
        }
    }

    let mut received = 0;
    let mut polls = 0;
    loop {
        let response = bridge.client.send(&IpcRequest::PollCallbacks).await.unwrap();
        let data = response.data.unwrap();
        let callbacks = data.callbacks.unwrap();
        assert!(!callbacks.is_empty());
        assert!(callbacks.iter().all(|c| c.callback_id == callback_id));
        received += callbacks.len();
        polls += 1;
        if data.pending_callbacks == Some(0) {
            break;
        }
        assert!(polls < 20, "backlog was not drained");
    }

    assert_eq!(received, queued);
    assert!(polls > 1);
}
