//! voice-relay entry point.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Build the HTTP server client, a stdin line recognizer and the
//!    system-voice output.
//! 4. Spawn the session coordinator and a task that logs its events.
//! 5. Start listening (push-to-talk mode waits for gestures instead).
//! 6. Run until Ctrl-C, then shut the session down.
//!
//! Dictation is read from stdin one line per result; a line starting with
//! `~` is an interim result.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::BufReader;
use tokio::sync::broadcast::error::RecvError;

use voice_relay::{
    config::{AppConfig, ModeKind},
    playback::SystemVoiceOutput,
    recognition::LineRecognizer,
    server::{HttpServerApi, ServerApi},
    session::{SessionCoordinator, SessionEvent},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice-relay starting up");

    // 2. Config
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    log::info!(
        "Server {} | mode {}",
        config.server.base_url,
        config.dispatch.mode.label()
    );

    // 3. Collaborators
    let api: Arc<dyn ServerApi> = Arc::new(HttpServerApi::from_config(&config.server));
    let recognizer = LineRecognizer::spawn(BufReader::new(tokio::io::stdin()));
    let output = Arc::new(SystemVoiceOutput::new(
        Arc::clone(&api),
        config.playback.speech_rate,
    ));

    // 4. Coordinator
    let listen = config.dispatch.mode != ModeKind::PushToTalk;
    let (coordinator, handle) = SessionCoordinator::new(config, recognizer, api, output);
    let session = tokio::spawn(coordinator.run());

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => log::debug!("skipped {n} session events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // 5. Listen
    if listen {
        if let Err(e) = handle.start_listening().await {
            log::error!("Could not start listening: {e}");
        }
    }

    // 6. Wait for Ctrl-C
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    log::info!("Shutting down");
    handle.shutdown().ok();
    session.await.context("session task failed")?;
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Dispatched { text } => log::info!("Sent: {text}"),
        SessionEvent::DispatchFailed { text, error } => log::warn!("Not sent ({error}): {text}"),
        SessionEvent::Error { message } => log::warn!("{message}"),
        SessionEvent::InputUnavailable { message } => log::error!("Voice input unavailable: {message}"),
        SessionEvent::Preview { .. } | SessionEvent::Queued { .. } => {
            if let Ok(json) = serde_json::to_string(event) {
                log::debug!("{json}");
            }
        }
        other => {
            if let Ok(json) = serde_json::to_string(other) {
                log::info!("{json}");
            }
        }
    }
}
