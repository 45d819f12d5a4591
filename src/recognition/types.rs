//! Transcript events and the recognition error taxonomy.

use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// TranscriptEvent
// ---------------------------------------------------------------------------

/// One result delivered by the recognizer.
///
/// Interim events (`is_final == false`) are superseded by whatever comes
/// next.  Final events carry the per-session sequence `index` assigned by the
/// backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    pub confidence: Option<f32>,
    pub index: Option<u64>,
}

impl TranscriptEvent {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence: None,
            index: None,
        }
    }

    pub fn final_result(index: u64, text: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence,
            index: Some(index),
        }
    }
}

// ---------------------------------------------------------------------------
// RecognitionErrorCode
// ---------------------------------------------------------------------------

/// Error codes a recognizer backend may report for a session.
///
/// The string forms match the codes used by browser-style recognizers, which
/// is also what [`RecognitionErrorCode::from_code`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecognitionErrorCode {
    NoSpeech,
    Aborted,
    AudioCapture,
    Network,
    NotAllowed,
    ServiceNotAllowed,
    BadGrammar,
    LanguageNotSupported,
}

impl RecognitionErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionErrorCode::NoSpeech => "no-speech",
            RecognitionErrorCode::Aborted => "aborted",
            RecognitionErrorCode::AudioCapture => "audio-capture",
            RecognitionErrorCode::Network => "network",
            RecognitionErrorCode::NotAllowed => "not-allowed",
            RecognitionErrorCode::ServiceNotAllowed => "service-not-allowed",
            RecognitionErrorCode::BadGrammar => "bad-grammar",
            RecognitionErrorCode::LanguageNotSupported => "language-not-supported",
        }
    }

    /// Parse a backend code string.  Unknown codes yield `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        let parsed = match code {
            "no-speech" => RecognitionErrorCode::NoSpeech,
            "aborted" => RecognitionErrorCode::Aborted,
            "audio-capture" => RecognitionErrorCode::AudioCapture,
            "network" => RecognitionErrorCode::Network,
            "not-allowed" => RecognitionErrorCode::NotAllowed,
            "service-not-allowed" => RecognitionErrorCode::ServiceNotAllowed,
            "bad-grammar" => RecognitionErrorCode::BadGrammar,
            "language-not-supported" => RecognitionErrorCode::LanguageNotSupported,
            _ => return None,
        };
        Some(parsed)
    }

    /// Codes the engine retries with backoff.  Everything else ends the
    /// session for good.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RecognitionErrorCode::Network
                | RecognitionErrorCode::NoSpeech
                | RecognitionErrorCode::Aborted
        )
    }

    /// Whether the user has to grant microphone access before anything
    /// else can work.
    pub fn is_permission(&self) -> bool {
        matches!(
            self,
            RecognitionErrorCode::NotAllowed | RecognitionErrorCode::ServiceNotAllowed
        )
    }

    /// Human-readable explanation shown to the user.
    pub fn message(&self) -> &'static str {
        match self {
            RecognitionErrorCode::NoSpeech => "No speech detected. Please try again.",
            RecognitionErrorCode::Aborted => "Speech recognition aborted.",
            RecognitionErrorCode::AudioCapture => "Microphone not available.",
            RecognitionErrorCode::Network => "Network error during speech recognition.",
            RecognitionErrorCode::NotAllowed => "Microphone permission denied.",
            RecognitionErrorCode::ServiceNotAllowed => "Speech recognition service not allowed.",
            RecognitionErrorCode::BadGrammar => "Speech grammar error.",
            RecognitionErrorCode::LanguageNotSupported => "Language not supported.",
        }
    }
}

impl fmt::Display for RecognitionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RecognitionError
// ---------------------------------------------------------------------------

/// Errors surfaced by the recognition engine to its consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    /// The user (or the platform) refused microphone access.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No recognizer exists on this platform, or the backend has shut down.
    #[error("speech recognition is not available")]
    EngineUnavailable,

    /// A retryable hiccup.  Only surfaced by backends, never past the engine.
    #[error("transient recognition error: {0}")]
    Transient(RecognitionErrorCode),

    /// Auto-restart gave up after this many consecutive attempts.
    #[error("recognition stopped after {attempts} restart attempts")]
    RetriesExhausted { attempts: u32 },

    /// A non-retryable backend error other than permission.
    #[error("recognition failed: {}", .0.message())]
    Fatal(RecognitionErrorCode),
}

impl RecognitionError {
    pub fn from_code(code: RecognitionErrorCode) -> Self {
        if code.is_permission() {
            RecognitionError::PermissionDenied
        } else if code.is_transient() {
            RecognitionError::Transient(code)
        } else {
            RecognitionError::Fatal(code)
        }
    }
}
