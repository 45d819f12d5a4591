//! The cloneable front door to a running coordinator.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::{ModeKind, PttConfig};
use crate::hotkey::{HotkeyError, KeyCombo, KeyPress};
use crate::recognition::RecognitionError;

use super::state::{with_state, SessionEvent, SessionState, SharedState};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Microphone access refused.  No retry until the user grants it.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No speech recognizer on this platform.
    #[error("speech recognition is not available")]
    EngineUnavailable,

    /// A retryable recognition problem that outlived its retries.
    #[error("speech recognition interrupted: {0}")]
    Transient(String),

    /// The utterance did not reach the server; it is pending again.
    #[error("failed to send utterance: {0}")]
    SubmissionFailed(String),

    /// The event stream dropped; it reconnects on its own.
    #[error("event stream disconnected: {0}")]
    StreamDisconnected(String),

    #[error("invalid key binding: {0}")]
    InvalidBinding(#[from] HotkeyError),

    /// The coordinator task is gone.
    #[error("voice session has shut down")]
    Closed,
}

impl From<RecognitionError> for SessionError {
    fn from(e: RecognitionError) -> Self {
        match e {
            RecognitionError::PermissionDenied => SessionError::PermissionDenied,
            RecognitionError::EngineUnavailable => SessionError::EngineUnavailable,
            other => SessionError::Transient(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionCommand
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum SessionCommand {
    StartListening(oneshot::Sender<Result<(), SessionError>>),
    StopListening,
    SetMode(ModeKind),
    SetTriggerWord(String),
    ConfigurePtt(PttConfig),
    PttPress { repeat: bool },
    PttRelease,
    FocusLost,
    KeyDown(KeyPress),
    KeyUp(KeyPress),
    SendNow,
    Clear,
    Shutdown,
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    state: SharedState,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<SessionCommand>,
        events: broadcast::Sender<SessionEvent>,
        state: SharedState,
    ) -> Self {
        Self {
            commands,
            events,
            state,
        }
    }

    fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }

    /// Begin continuous listening.  Resolves once the engine has accepted or
    /// refused the start.  Ignored in push-to-talk mode.
    pub async fn start_listening(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::StartListening(reply))?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Stop listening.  In auto-send mode pending text is sent; in
    /// trigger-word mode the queue is kept.
    pub fn stop_listening(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StopListening)
    }

    pub fn set_mode(&self, mode: ModeKind) -> Result<(), SessionError> {
        self.send(SessionCommand::SetMode(mode))
    }

    pub fn set_trigger_word(&self, word: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::SetTriggerWord(word.into()))
    }

    /// Replace the push-to-talk binding and timing.  The key combination is
    /// validated here, before anything changes.
    pub fn configure_ptt(&self, config: PttConfig) -> Result<(), SessionError> {
        KeyCombo::parse(&config.key)?;
        self.send(SessionCommand::ConfigurePtt(config))
    }

    pub fn ptt_press(&self, repeat: bool) -> Result<(), SessionError> {
        self.send(SessionCommand::PttPress { repeat })
    }

    pub fn ptt_release(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::PttRelease)
    }

    /// The window lost focus; an in-progress push-to-talk gesture ends.
    pub fn focus_lost(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::FocusLost)
    }

    pub fn key_down(&self, press: KeyPress) -> Result<(), SessionError> {
        self.send(SessionCommand::KeyDown(press))
    }

    pub fn key_up(&self, press: KeyPress) -> Result<(), SessionError> {
        self.send(SessionCommand::KeyUp(press))
    }

    /// Dispatch whatever is pending right now.
    pub fn send_now(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::SendNow)
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Clear)
    }

    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        with_state(&self.state, |s| s.clone())
    }
}
