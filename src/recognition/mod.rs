//! Continuous speech recognition.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ SpeechRecognizer (trait)       RecognitionEngine        │
//! │  - LineRecognizer     signals   - session lifecycle    │
//! │  - (platform backend) ───────▶  - final index filter   │
//! │                     SessionSink - auto-restart/backoff │
//! └──────────────────────────────────────┬─────────────────┘
//!                                        ▼
//!                                  EngineOutput
//! ```

pub mod backend;
pub mod engine;
pub mod line;
pub mod types;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use backend::{EngineSignal, SessionSink, SignalKind, SpeechRecognizer};
pub use engine::{backoff_delay, EngineOutput, RecognitionEngine, RecognitionState};
pub use line::LineRecognizer;
pub use types::{RecognitionError, RecognitionErrorCode, TranscriptEvent};

#[cfg(test)]
pub use backend::MockRecognizer;
