//! Dispatch modes: deciding when recognized speech becomes an utterance.
//!
//! Each mode is a small synchronous state machine.  It receives transcript
//! events and timer firings and answers with a list of [`ModeEffect`]s; the
//! session coordinator performs the effects (sending text, updating the
//! display, arming timers, starting or stopping the engine).  Modes never
//! sleep or spawn, so their tests need neither a runtime nor a clock.
//!
//! # Timers
//!
//! A mode asks for a timer with [`ModeEffect::Schedule`], tagging it with its
//! current generation.  Every state transition bumps the generation, so when
//! an old timer fires [`DispatchBehavior::on_timer`] sees a mismatch and does
//! nothing.
//!
//! | Mode        | Dispatches when                                  |
//! |-------------|--------------------------------------------------|
//! | AutoSend    | the silence timer fires with pending text        |
//! | TriggerWord | a final result contains the trigger word         |
//! | PushToTalk  | the trailing-results wait after a release ends   |

pub mod auto_send;
pub mod dedup;
pub mod push_to_talk;
pub mod trigger_word;

use std::time::Duration;

use tokio::time::Instant;

use crate::config::{DispatchConfig, ModeKind, PttConfig};
use crate::recognition::TranscriptEvent;

pub use auto_send::AutoSend;
pub use dedup::{Admission, Deduplicator};
pub use push_to_talk::{PttState, PushToTalk};
pub use trigger_word::{strip_trigger, TriggerWord};

// ---------------------------------------------------------------------------
// Effects and timers
// ---------------------------------------------------------------------------

/// Timers a mode may arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeTimer {
    Silence,
    PttStart,
    PttStop,
    PttTrailing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModeEffect {
    /// Dispatch this utterance.
    Send(String),
    /// Replace the pending/interim preview.
    Preview(String),
    /// Replace the queued-fragment list.
    Queue(Vec<String>),
    /// Call `on_timer(timer, generation)` after `delay`.
    Schedule {
        timer: ModeTimer,
        delay: Duration,
        generation: u64,
    },
    StartEngine,
    StopEngine,
    PttState(PttState),
    /// A push-to-talk recording was too short and was dropped.
    Discarded { effective: Duration },
}

// ---------------------------------------------------------------------------
// DispatchBehavior trait
// ---------------------------------------------------------------------------

/// Capability contract shared by every dispatch mode.
pub trait DispatchBehavior: Send {
    fn kind(&self) -> ModeKind;

    fn handle_interim(&mut self, event: &TranscriptEvent) -> Vec<ModeEffect>;

    fn handle_final(&mut self, event: &TranscriptEvent) -> Vec<ModeEffect>;

    /// A timer armed through [`ModeEffect::Schedule`] fired.
    fn on_timer(&mut self, timer: ModeTimer, generation: u64, now: Instant) -> Vec<ModeEffect>;

    /// Dispatch whatever is pending right now ("send now").
    fn flush(&mut self) -> Vec<ModeEffect>;

    /// Put back text whose submission failed so the user can retry.
    fn restore(&mut self, text: &str) -> Vec<ModeEffect>;

    /// Drop pending text.
    fn clear(&mut self) -> Vec<ModeEffect>;

    /// Called once before the mode is replaced.  Cancels timers and releases
    /// anything the mode started.
    fn deactivate(&mut self) -> Vec<ModeEffect> {
        self.clear()
    }

    /// Pending text as it would be dispatched now.
    fn pending_text(&self) -> String;
}

/// Join non-empty fragments with single spaces.
pub(crate) fn join_fragments<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// DispatchMode
// ---------------------------------------------------------------------------

/// The active mode, selected once at the coordinator boundary.
pub enum DispatchMode {
    AutoSend(AutoSend),
    TriggerWord(TriggerWord),
    PushToTalk(PushToTalk),
}

impl DispatchMode {
    pub fn new(kind: ModeKind, dispatch: &DispatchConfig, ptt: &PttConfig) -> Self {
        match kind {
            ModeKind::AutoSend => DispatchMode::AutoSend(AutoSend::new(Duration::from_millis(
                dispatch.silence_delay_ms,
            ))),
            ModeKind::TriggerWord => {
                DispatchMode::TriggerWord(TriggerWord::new(&dispatch.trigger_word))
            }
            ModeKind::PushToTalk => DispatchMode::PushToTalk(PushToTalk::new(ptt)),
        }
    }

    pub fn behavior(&self) -> &dyn DispatchBehavior {
        match self {
            DispatchMode::AutoSend(m) => m,
            DispatchMode::TriggerWord(m) => m,
            DispatchMode::PushToTalk(m) => m,
        }
    }

    pub fn behavior_mut(&mut self) -> &mut dyn DispatchBehavior {
        match self {
            DispatchMode::AutoSend(m) => m,
            DispatchMode::TriggerWord(m) => m,
            DispatchMode::PushToTalk(m) => m,
        }
    }

    pub fn kind(&self) -> ModeKind {
        self.behavior().kind()
    }

    pub fn as_push_to_talk_mut(&mut self) -> Option<&mut PushToTalk> {
        match self {
            DispatchMode::PushToTalk(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_trigger_word_mut(&mut self) -> Option<&mut TriggerWord> {
        match self {
            DispatchMode::TriggerWord(m) => Some(m),
            _ => None,
        }
    }
}
