//! Text-line recognizer backend.
//!
//! Reads dictation from any async line source and reports each line as a
//! recognition result.  The binary uses it over stdin, which makes the whole
//! session drivable from a terminal or a pipe:
//!
//! ```text
//! ~turn on the           interim result (leading '~')
//! turn on the lights     final result
//! ```
//!
//! Lines read while no session is open are discarded, the same way a
//! microphone captures nothing while recognition is stopped.  End of input
//! reports `audio-capture` and makes the backend unavailable.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::backend::{SessionSink, SpeechRecognizer};
use super::types::{RecognitionError, RecognitionErrorCode};

const INTERIM_PREFIX: char = '~';

#[derive(Default)]
struct LineSession {
    sink: Option<SessionSink>,
    next_index: u64,
    closed: bool,
}

pub struct LineRecognizer {
    session: Arc<Mutex<LineSession>>,
}

impl LineRecognizer {
    /// Spawn the reader task on the current tokio runtime.
    pub fn spawn<R>(reader: R) -> Arc<Self>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let session = Arc::new(Mutex::new(LineSession::default()));
        let shared = Arc::clone(&session);

        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => deliver(&shared, &line),
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("line-recognizer: read failed: {e}");
                        break;
                    }
                }
            }

            let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
            guard.closed = true;
            if let Some(sink) = guard.sink.take() {
                sink.error(RecognitionErrorCode::AudioCapture);
                sink.ended();
            }
            log::info!("line-recognizer: input closed");
        });

        Arc::new(Self { session })
    }
}

fn deliver(session: &Mutex<LineSession>, line: &str) {
    let mut guard = session.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(sink) = guard.sink.clone() else {
        log::debug!("line-recognizer: not listening, dropped line");
        return;
    };

    if let Some(interim) = line.strip_prefix(INTERIM_PREFIX) {
        sink.interim(interim.trim());
        return;
    }

    let text = line.trim();
    if text.is_empty() {
        return;
    }
    let index = guard.next_index;
    guard.next_index += 1;
    sink.final_result(index, text, Some(1.0));
}

#[async_trait]
impl SpeechRecognizer for LineRecognizer {
    fn is_available(&self) -> bool {
        !self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    async fn start(&self, sink: SessionSink, language: &str) -> Result<(), RecognitionError> {
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.closed {
            return Err(RecognitionError::EngineUnavailable);
        }
        log::debug!("line recognizer: session {} ({language})", sink.session());
        if let Some(previous) = guard.sink.take() {
            previous.ended();
        }
        sink.started();
        guard.sink = Some(sink);
        guard.next_index = 0;
        Ok(())
    }

    async fn stop(&self) {
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sink) = guard.sink.take() {
            sink.ended();
        }
    }
}
