//! Daemon module for the audio session.
//!
//! This module contains the session host:
//! - `config`: daemon settings
//! - `coordinator`: source registry, shared engine and session lifecycle
//! - `foreground`: persistent foreground surface
//! - `ipc`: Unix socket server and request dispatch

pub mod config;
pub mod coordinator;
pub mod foreground;
pub mod ipc;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::engine::{EngineFactory, RodioEngineFactory};
use crate::types::{ErrorCode, IpcResponse};

pub use config::DaemonConfig;
pub use coordinator::{SessionCoordinator, StartupReport};
pub use foreground::{
    ForegroundError, ForegroundNotice, ForegroundSurface, LogForegroundSurface,
    MockForegroundSurface,
};
pub use ipc::{IpcError, IpcServer, RequestHandler};

/// Runs the daemon on the default audio output until a session-ending
/// request or Ctrl-C arrives.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the audio output cannot
/// be opened or the socket cannot be bound.
pub async fn run_daemon(config: DaemonConfig) -> Result<()> {
    config.validate().map_err(anyhow::Error::msg)?;
    let factory =
        RodioEngineFactory::open_default().context("オーディオ出力を開けませんでした")?;
    serve(config, Arc::new(factory), Arc::new(LogForegroundSurface::new())).await
}

/// Serves one session with the given engine factory and foreground surface.
///
/// Requests are handled one at a time, interleaved with engine events and
/// timer ticks, so every session mutation happens on this task.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound.
pub async fn serve(
    config: DaemonConfig,
    factory: Arc<dyn EngineFactory>,
    foreground: Arc<dyn ForegroundSurface>,
) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let server = IpcServer::new(&config.socket_path)?;

    let mut coordinator = SessionCoordinator::new(config, factory, foreground, event_tx);
    let report = coordinator.start();
    debug!("Startup: {:?}", report);

    let coordinator = Arc::new(Mutex::new(coordinator));
    let handler = RequestHandler::new(coordinator.clone());
    info!("Listening on {:?}", server.socket_path());

    loop {
        tokio::select! {
            accepted = server.accept() => {
                let mut stream = match accepted {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("{:#}", e);
                        continue;
                    }
                };

                let (response, ends_session) = match IpcServer::receive_request(&mut stream).await {
                    Ok(request) => {
                        let ends_session = request.ends_session();
                        (handler.handle(request).await, ends_session)
                    }
                    Err(e) => (
                        IpcResponse::error_with_code(ErrorCode::BadRequest, format!("{:#}", e)),
                        false,
                    ),
                };

                if let Err(e) = IpcServer::send_response(&mut stream, &response).await {
                    warn!("{:#}", e);
                }
                if ends_session {
                    info!("Session end requested");
                    break;
                }
            }
            Some(event) = event_rx.recv() => {
                coordinator.lock().await.handle_event(event);
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Interrupted");
                break;
            }
        }
    }

    coordinator.lock().await.teardown();
    Ok(())
}
