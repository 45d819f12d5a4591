//! Session snapshot and UI notifications.
//!
//! [`SessionState`] is the single source of truth for a UI that polls: the
//! coordinator writes it after every input it processes.  [`SessionEvent`]s
//! are pushed over a broadcast channel for a UI that prefers to react.
//!
//! [`SharedState`] is a type alias for `Arc<Mutex<SessionState>>`, cheap to
//! clone and safe to share across tasks.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::config::{AppConfig, ModeKind};
use crate::dispatch::PttState;
use crate::stream::ConnectionState;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub mode: ModeKind,
    /// The engine is wanted (continuous listening or a PTT recording).
    pub listening: bool,
    /// The engine has a live session.
    pub recognition_active: bool,
    /// Recognition is held off for playback.
    pub paused_for_playback: bool,
    pub ptt: PttState,
    /// Pending text preview (accumulated plus interim).
    pub preview: String,
    /// Queued trigger-word fragments.
    pub queued: Vec<String>,
    pub trigger_word: String,
    pub connection: ConnectionState,
    /// The stream dropped and a reconnect is pending.
    pub reconnecting: bool,
    /// The agent is waiting for the user.
    pub peer_waiting: bool,
    pub playing: bool,
    pub voice_responses_enabled: bool,
    /// Set when input cannot work (permission, no recognizer).
    pub input_blocked: Option<String>,
    pub last_dispatched: Option<String>,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            mode: config.dispatch.mode,
            listening: false,
            recognition_active: false,
            paused_for_playback: false,
            ptt: PttState::Idle,
            preview: String::new(),
            queued: Vec::new(),
            trigger_word: config.dispatch.trigger_word.clone(),
            connection: ConnectionState::Disconnected,
            reconnecting: false,
            peer_waiting: false,
            playing: false,
            voice_responses_enabled: true,
            input_blocked: None,
            last_dispatched: None,
            last_error: None,
        }
    }
}

pub type SharedState = Arc<Mutex<SessionState>>;

pub fn new_shared_state(config: &AppConfig) -> SharedState {
    Arc::new(Mutex::new(SessionState::new(config)))
}

/// Run `f` with the state locked.  A poisoned lock is recovered; the state
/// is plain data and stays usable.
pub fn with_state<R>(state: &SharedState, f: impl FnOnce(&mut SessionState) -> R) -> R {
    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Pending/interim preview changed.
    Preview { text: String },
    /// Queued trigger-word fragments changed.
    Queued { fragments: Vec<String> },
    Dispatched { text: String },
    /// Submission failed; the text is pending again.
    DispatchFailed { text: String, error: String },
    ModeChanged { mode: ModeKind },
    RecognitionActive { active: bool },
    Ptt { state: PttState },
    /// A push-to-talk gesture was too short to count.
    PttDiscarded { effective_ms: u64 },
    Connection { state: ConnectionState },
    PeerWaiting { waiting: bool },
    Playback { playing: bool },
    Error { message: String },
    /// Input is disabled until the cause is fixed.  Sent once per cause.
    InputUnavailable { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_reflects_config() {
        let mut config = AppConfig::default();
        config.dispatch.mode = ModeKind::TriggerWord;
        config.dispatch.trigger_word = "over".into();

        let state = SessionState::new(&config);
        assert_eq!(state.mode, ModeKind::TriggerWord);
        assert_eq!(state.trigger_word, "over");
        assert!(!state.listening);
        assert_eq!(state.connection, ConnectionState::Disconnected);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(SessionEvent::Ptt {
            state: PttState::Recording,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "ptt", "state": "recording"}));
    }

    #[test]
    fn poisoned_state_is_still_readable() {
        let state = new_shared_state(&AppConfig::default());
        let clone = Arc::clone(&state);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();

        with_state(&state, |s| s.peer_waiting = true);
        assert!(with_state(&state, |s| s.peer_waiting));
    }
}
