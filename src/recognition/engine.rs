//! Recognition engine: session lifecycle, result filtering and auto-restart.
//!
//! The engine wraps a [`SpeechRecognizer`] backend and turns its raw session
//! signals into [`EngineOutput`]s for the coordinator.  It never sleeps or
//! spawns anything itself: a restart is returned as
//! [`EngineOutput::RestartScheduled`] and comes back in through
//! [`RecognitionEngine::on_restart_timer`] carrying the generation it was
//! issued with.
//!
//! ```text
//!            start()                 Started
//! Stopped ───────────▶ Starting ───────────────▶ Active
//!    ▲                    │                        │
//!    │   stop()/pause()   │   Ended (unsolicited)  │
//!    └────────────────────┴────────────────────────┘
//!                         │
//!                         ├─ transient / none ─▶ RestartScheduled (n × base, capped)
//!                         ├─ attempts ≥ max ───▶ Terminated(RetriesExhausted)
//!                         └─ non-transient ────▶ Terminated(..) , state Error
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::RecognitionConfig;

use super::backend::{EngineSignal, SessionSink, SignalKind, SpeechRecognizer};
use super::types::{RecognitionError, RecognitionErrorCode, TranscriptEvent};

// ---------------------------------------------------------------------------
// RecognitionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecognitionState {
    #[default]
    Stopped,
    Starting,
    Active,
    Error,
}

impl RecognitionState {
    pub fn label(&self) -> &'static str {
        match self {
            RecognitionState::Stopped => "Stopped",
            RecognitionState::Starting => "Starting",
            RecognitionState::Active => "Active",
            RecognitionState::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// EngineOutput
// ---------------------------------------------------------------------------

/// What the engine wants its consumer to know or do.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Interim(TranscriptEvent),
    Final(TranscriptEvent),
    /// A non-transient backend error.  Transient ones stay inside.
    Error(RecognitionErrorCode),
    /// The `Active` state was entered (`true`) or left (`false`).
    ActiveChanged(bool),
    /// Call [`RecognitionEngine::on_restart_timer`] with `generation` after
    /// `delay`.
    RestartScheduled {
        attempt: u32,
        delay: Duration,
        generation: u64,
    },
    /// The current backend session has fully ended.
    SessionClosed,
    /// Listening is over until the consumer calls `start` again.
    Terminated(RecognitionError),
}

// ---------------------------------------------------------------------------
// RecognitionEngine
// ---------------------------------------------------------------------------

pub struct RecognitionEngine {
    backend: Arc<dyn SpeechRecognizer>,
    signals: mpsc::UnboundedSender<EngineSignal>,
    config: RecognitionConfig,

    state: RecognitionState,
    /// Id of the newest session; signals for any other id are stale.
    session: u64,
    /// The newest session has not reported `Ended` yet.
    session_open: bool,
    /// The consumer wants to be listening.
    wanted: bool,
    /// Playback holds the microphone; no starts or restarts.
    paused: bool,
    restart_attempts: u32,
    restart_generation: u64,
    last_final_index: Option<u64>,
    last_error: Option<RecognitionErrorCode>,
}

impl RecognitionEngine {
    /// `signals` is the sender half of the channel the consumer reads
    /// [`EngineSignal`]s from and feeds back into [`handle_signal`](Self::handle_signal).
    pub fn new(
        backend: Arc<dyn SpeechRecognizer>,
        signals: mpsc::UnboundedSender<EngineSignal>,
        config: RecognitionConfig,
    ) -> Self {
        Self {
            backend,
            signals,
            config,
            state: RecognitionState::Stopped,
            session: 0,
            session_open: false,
            wanted: false,
            paused: false,
            restart_attempts: 0,
            restart_generation: 0,
            last_final_index: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> RecognitionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == RecognitionState::Active
    }

    pub fn is_wanted(&self) -> bool {
        self.wanted
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            RecognitionState::Starting | RecognitionState::Active
        )
    }

    // -----------------------------------------------------------------------
    // Consumer operations
    // -----------------------------------------------------------------------

    /// Begin listening.  While paused this only records the intent; the
    /// session opens on [`resume`](Self::resume).
    pub async fn start(&mut self) -> Result<Vec<EngineOutput>, RecognitionError> {
        self.wanted = true;
        self.restart_attempts = 0;
        self.restart_generation += 1;
        if self.paused || self.is_live() {
            return Ok(Vec::new());
        }
        self.open_session().await
    }

    /// Stop listening.  `Stopped` is entered before this returns and no
    /// restart will follow.
    pub async fn stop(&mut self) -> Vec<EngineOutput> {
        self.wanted = false;
        self.close_session().await
    }

    /// Release the microphone for playback without forgetting whether the
    /// consumer wants to listen.  The flag is `true` when a backend session
    /// was open and its [`EngineOutput::SessionClosed`] is still to come.
    pub async fn pause(&mut self) -> (Vec<EngineOutput>, bool) {
        self.paused = true;
        let awaiting_close = self.session_open;
        let outputs = self.close_session().await;
        log::debug!("engine: paused (awaiting close: {awaiting_close})");
        (outputs, awaiting_close)
    }

    /// Lift the playback pause and reopen a session if one is wanted.
    pub async fn resume(&mut self) -> Result<Vec<EngineOutput>, RecognitionError> {
        self.paused = false;
        if !self.wanted || self.is_live() {
            return Ok(Vec::new());
        }
        log::debug!("engine: resuming after pause");
        self.restart_attempts = 0;
        self.open_session().await
    }

    /// A backoff timer fired.  Stale generations are ignored.
    pub async fn on_restart_timer(
        &mut self,
        generation: u64,
    ) -> Result<Vec<EngineOutput>, RecognitionError> {
        if generation != self.restart_generation
            || !self.wanted
            || self.paused
            || self.session_open
        {
            log::debug!("engine: ignoring restart timer (generation {generation})");
            return Ok(Vec::new());
        }
        log::info!("engine: restarting, attempt {}", self.restart_attempts);
        self.open_session().await
    }

    // -----------------------------------------------------------------------
    // Backend signals
    // -----------------------------------------------------------------------

    pub fn handle_signal(&mut self, signal: EngineSignal) -> Vec<EngineOutput> {
        if signal.session != self.session || !self.session_open {
            log::debug!(
                "engine: dropping {:?} from stale session {}",
                signal.kind,
                signal.session
            );
            return Vec::new();
        }

        match signal.kind {
            SignalKind::Started => {
                if self.state != RecognitionState::Starting {
                    return Vec::new();
                }
                self.state = RecognitionState::Active;
                self.restart_attempts = 0;
                self.last_final_index = None;
                log::info!("engine: session {} active", self.session);
                vec![EngineOutput::ActiveChanged(true)]
            }

            SignalKind::Interim { text } => {
                vec![EngineOutput::Interim(TranscriptEvent::interim(text))]
            }

            SignalKind::Final {
                index,
                text,
                confidence,
            } => {
                if self.last_final_index.is_some_and(|last| index <= last) {
                    log::debug!("engine: ignoring re-delivered final #{index}");
                    return Vec::new();
                }
                self.last_final_index = Some(index);
                vec![EngineOutput::Final(TranscriptEvent::final_result(
                    index, text, confidence,
                ))]
            }

            SignalKind::Error(code) => {
                self.last_error = Some(code);
                if code.is_transient() {
                    log::debug!("engine: transient error '{code}'");
                    Vec::new()
                } else {
                    log::warn!("engine: recognition error '{code}': {}", code.message());
                    if self.is_live() {
                        self.state = RecognitionState::Error;
                    }
                    vec![EngineOutput::Error(code)]
                }
            }

            SignalKind::Ended => self.on_session_end(),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn open_session(&mut self) -> Result<Vec<EngineOutput>, RecognitionError> {
        if !self.backend.is_available() {
            self.wanted = false;
            self.state = RecognitionState::Error;
            return Err(RecognitionError::EngineUnavailable);
        }

        self.session += 1;
        self.session_open = true;
        self.last_error = None;
        self.last_final_index = None;
        self.state = RecognitionState::Starting;
        log::debug!("engine: starting session {}", self.session);

        let sink = SessionSink::new(self.session, self.signals.clone());
        if let Err(e) = self.backend.start(sink, &self.config.language).await {
            log::warn!("engine: backend refused to start: {e}");
            self.state = RecognitionState::Error;
            self.session_open = false;
            self.wanted = false;
            return Err(e);
        }
        Ok(Vec::new())
    }

    async fn close_session(&mut self) -> Vec<EngineOutput> {
        self.restart_generation += 1;
        let mut outputs = Vec::new();
        if self.state == RecognitionState::Active {
            outputs.push(EngineOutput::ActiveChanged(false));
        }
        self.state = RecognitionState::Stopped;
        if self.session_open {
            self.backend.stop().await;
        }
        outputs
    }

    fn on_session_end(&mut self) -> Vec<EngineOutput> {
        self.session_open = false;
        let unsolicited = self.state != RecognitionState::Stopped;

        let mut outputs = Vec::new();
        if self.state == RecognitionState::Active {
            outputs.push(EngineOutput::ActiveChanged(false));
        }
        outputs.push(EngineOutput::SessionClosed);

        if !unsolicited {
            log::debug!("engine: session {} closed", self.session);
            return outputs;
        }
        self.state = RecognitionState::Stopped;
        if !self.wanted || self.paused {
            return outputs;
        }

        match self.last_error.take() {
            Some(code) if !code.is_transient() => {
                self.wanted = false;
                self.state = RecognitionState::Error;
                outputs.push(EngineOutput::Terminated(RecognitionError::from_code(code)));
            }
            _ => outputs.push(self.schedule_restart()),
        }
        outputs
    }

    fn schedule_restart(&mut self) -> EngineOutput {
        if self.restart_attempts >= self.config.max_restart_attempts {
            log::warn!(
                "engine: giving up after {} restart attempts",
                self.restart_attempts
            );
            self.wanted = false;
            self.state = RecognitionState::Error;
            return EngineOutput::Terminated(RecognitionError::RetriesExhausted {
                attempts: self.restart_attempts,
            });
        }

        self.restart_attempts += 1;
        self.restart_generation += 1;
        let delay = backoff_delay(&self.config, self.restart_attempts);
        log::debug!(
            "engine: restart {} scheduled in {delay:?}",
            self.restart_attempts
        );
        EngineOutput::RestartScheduled {
            attempt: self.restart_attempts,
            delay,
            generation: self.restart_generation,
        }
    }
}

/// `attempt × base`, capped at the configured ceiling.
pub fn backoff_delay(config: &RecognitionConfig, attempt: u32) -> Duration {
    let ms = config
        .restart_base_delay_ms
        .saturating_mul(u64::from(attempt))
        .min(config.restart_max_delay_ms);
    Duration::from_millis(ms)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
