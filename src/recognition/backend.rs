//! The recognizer backend seam.
//!
//! A [`SpeechRecognizer`] turns microphone audio into transcript signals.
//! Each call to [`SpeechRecognizer::start`] opens a new session and hands the
//! backend a [`SessionSink`]; the backend reports everything that happens in
//! that session through it, ending with exactly one `ended()` call.
//!
//! Signals are tagged with the session id so the engine can ignore late
//! traffic from a session it has already abandoned.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{RecognitionError, RecognitionErrorCode};

// ---------------------------------------------------------------------------
// EngineSignal
// ---------------------------------------------------------------------------

/// A single event from one recognition session.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSignal {
    pub session: u64,
    pub kind: SignalKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalKind {
    /// Audio capture is running.
    Started,
    Interim {
        text: String,
    },
    Final {
        index: u64,
        text: String,
        confidence: Option<f32>,
    },
    Error(RecognitionErrorCode),
    /// The session is over.  Nothing else arrives for this session.
    Ended,
}

// ---------------------------------------------------------------------------
// SessionSink
// ---------------------------------------------------------------------------

/// Where a backend delivers the signals of one session.
///
/// Cheap to clone.  Sends never block and silently fail once the engine is
/// gone.
#[derive(Debug, Clone)]
pub struct SessionSink {
    session: u64,
    tx: mpsc::UnboundedSender<EngineSignal>,
}

impl SessionSink {
    pub fn new(session: u64, tx: mpsc::UnboundedSender<EngineSignal>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    fn emit(&self, kind: SignalKind) {
        let _ = self.tx.send(EngineSignal {
            session: self.session,
            kind,
        });
    }

    pub fn started(&self) {
        self.emit(SignalKind::Started);
    }

    pub fn interim(&self, text: impl Into<String>) {
        self.emit(SignalKind::Interim { text: text.into() });
    }

    pub fn final_result(&self, index: u64, text: impl Into<String>, confidence: Option<f32>) {
        self.emit(SignalKind::Final {
            index,
            text: text.into(),
            confidence,
        });
    }

    pub fn error(&self, code: RecognitionErrorCode) {
        self.emit(SignalKind::Error(code));
    }

    pub fn ended(&self) {
        self.emit(SignalKind::Ended);
    }
}

// ---------------------------------------------------------------------------
// SpeechRecognizer trait
// ---------------------------------------------------------------------------

/// Continuous speech-to-text backend.
///
/// Implementors must be `Send + Sync` so they can be held behind an
/// `Arc<dyn SpeechRecognizer>`.
///
/// # Contract
///
/// - `start` returns once the session has been requested.  `language` is
///   the BCP-47 tag to recognize.  Refused microphone access is reported as
///   `Err(PermissionDenied)`.
/// - After a successful `start`, the backend calls `sink.started()` when
///   capture is live and `sink.ended()` exactly once when the session is over,
///   whether it ended on its own or because `stop` was called.
/// - Final results may still be delivered between `stop` and `ended()`.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// `false` when no recognizer exists on this platform.
    fn is_available(&self) -> bool {
        true
    }

    async fn start(&self, sink: SessionSink, language: &str) -> Result<(), RecognitionError>;

    async fn stop(&self);
}

// Compile-time assertion: Box<dyn SpeechRecognizer> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn SpeechRecognizer>) {}
};

// ---------------------------------------------------------------------------
// MockRecognizer  (test-only)
// ---------------------------------------------------------------------------

/// Scriptable backend for engine and coordinator tests.
///
/// By default a started session reports `Started` immediately and a stop
/// reports `Ended` immediately.  Tests push results through
/// [`MockRecognizer::sink`].
#[cfg(test)]
pub struct MockRecognizer {
    inner: std::sync::Mutex<MockInner>,
}

#[cfg(test)]
#[derive(Default)]
struct MockInner {
    sink: Option<SessionSink>,
    starts: usize,
    stops: usize,
    languages: Vec<String>,
    fail_with: Option<RecognitionError>,
    silent_stop: bool,
    unavailable: bool,
}

#[cfg(test)]
impl MockRecognizer {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(MockInner::default()),
        }
    }

    /// Every `start` fails with `err`.
    pub fn failing(err: RecognitionError) -> Self {
        let mock = Self::new();
        mock.inner.lock().unwrap().fail_with = Some(err);
        mock
    }

    /// `is_available` reports `false`.
    pub fn unavailable() -> Self {
        let mock = Self::new();
        mock.inner.lock().unwrap().unavailable = true;
        mock
    }

    /// `stop` does not report `Ended`, as a sluggish platform recognizer
    /// might.
    pub fn with_silent_stop(self) -> Self {
        self.inner.lock().unwrap().silent_stop = true;
        self
    }

    /// Sink of the most recently started session.
    pub fn sink(&self) -> SessionSink {
        self.inner
            .lock()
            .unwrap()
            .sink
            .clone()
            .expect("no session started")
    }

    pub fn starts(&self) -> usize {
        self.inner.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.inner.lock().unwrap().stops
    }

    /// Language requested by each `start`, oldest first.
    pub fn languages(&self) -> Vec<String> {
        self.inner.lock().unwrap().languages.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    fn is_available(&self) -> bool {
        !self.inner.lock().unwrap().unavailable
    }

    async fn start(&self, sink: SessionSink, language: &str) -> Result<(), RecognitionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.starts += 1;
        inner.languages.push(language.to_string());
        if let Some(err) = inner.fail_with.clone() {
            return Err(err);
        }
        sink.started();
        inner.sink = Some(sink);
        Ok(())
    }

    async fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stops += 1;
        if !inner.silent_stop {
            if let Some(sink) = &inner.sink {
                sink.ended();
            }
        }
    }
}
