//! Send-on-silence mode.
//!
//! Every transcript event restarts the silence timer under a new generation.
//! Finals already heard in the current utterance are kept and the latest
//! interim is appended, so a sentence the recognizer splits into several
//! final segments still goes out as one utterance.
//!
//! This differs on purpose from a mode where each event replaces the pending
//! text.  Under replacement only the last final segment of a long sentence
//! would be sent.  Only interims replace each other here.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ModeKind;
use crate::recognition::TranscriptEvent;

use super::{join_fragments, DispatchBehavior, ModeEffect, ModeTimer};

pub struct AutoSend {
    silence_delay: Duration,
    committed: Vec<String>,
    interim: String,
    generation: u64,
}

impl AutoSend {
    pub fn new(silence_delay: Duration) -> Self {
        Self {
            silence_delay,
            committed: Vec::new(),
            interim: String::new(),
            generation: 0,
        }
    }

    fn rearm(&mut self) -> Vec<ModeEffect> {
        self.generation += 1;
        vec![
            ModeEffect::Preview(self.pending_text()),
            ModeEffect::Schedule {
                timer: ModeTimer::Silence,
                delay: self.silence_delay,
                generation: self.generation,
            },
        ]
    }
}

impl DispatchBehavior for AutoSend {
    fn kind(&self) -> ModeKind {
        ModeKind::AutoSend
    }

    fn handle_interim(&mut self, event: &TranscriptEvent) -> Vec<ModeEffect> {
        self.interim = event.text.trim().to_string();
        self.rearm()
    }

    fn handle_final(&mut self, event: &TranscriptEvent) -> Vec<ModeEffect> {
        let text = event.text.trim();
        if !text.is_empty() {
            self.committed.push(text.to_string());
        }
        self.interim.clear();
        self.rearm()
    }

    fn on_timer(&mut self, timer: ModeTimer, generation: u64, _now: Instant) -> Vec<ModeEffect> {
        if timer != ModeTimer::Silence || generation != self.generation {
            return Vec::new();
        }
        log::debug!("auto-send: silence elapsed");
        self.flush()
    }

    fn flush(&mut self) -> Vec<ModeEffect> {
        let text = self.pending_text();
        self.committed.clear();
        self.interim.clear();
        self.generation += 1;
        if text.is_empty() {
            return Vec::new();
        }
        vec![ModeEffect::Send(text), ModeEffect::Preview(String::new())]
    }

    fn restore(&mut self, text: &str) -> Vec<ModeEffect> {
        self.committed.insert(0, text.to_string());
        vec![ModeEffect::Preview(self.pending_text())]
    }

    fn clear(&mut self) -> Vec<ModeEffect> {
        self.committed.clear();
        self.interim.clear();
        self.generation += 1;
        vec![ModeEffect::Preview(String::new())]
    }

    fn pending_text(&self) -> String {
        join_fragments(
            self.committed
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(self.interim.as_str())),
        )
    }
}
