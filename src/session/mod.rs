//! The voice session: one coordinator task and the handles that talk to it.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_relay::config::AppConfig;
//! use voice_relay::playback::SystemVoiceOutput;
//! use voice_relay::recognition::LineRecognizer;
//! use voice_relay::server::{HttpServerApi, ServerApi};
//! use voice_relay::session::SessionCoordinator;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let api: Arc<dyn ServerApi> = Arc::new(HttpServerApi::from_config(&config.server));
//!     let recognizer = LineRecognizer::spawn(tokio::io::BufReader::new(tokio::io::stdin()));
//!     let output = Arc::new(SystemVoiceOutput::new(api.clone(), config.playback.speech_rate));
//!
//!     let (coordinator, handle) = SessionCoordinator::new(config, recognizer, api, output);
//!     tokio::spawn(coordinator.run());
//!
//!     handle.start_listening().await.ok();
//! }
//! ```

pub mod coordinator;
pub mod handle;
pub mod state;
pub mod timers;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use coordinator::SessionCoordinator;
pub use handle::{SessionCommand, SessionError, SessionHandle};
pub use state::{new_shared_state, SessionEvent, SessionState, SharedState};
