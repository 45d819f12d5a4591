//! Dispatch deduplication.
//!
//! Overlapping recognition results (a forced engine restart re-delivering a
//! final, a mobile recognizer double-firing) can produce the same utterance
//! twice.  Every dispatch goes through [`Deduplicator::admit`] first:
//!
//! - identical text inside `window` of its previous dispatch is a
//!   [`Admission::Duplicate`];
//! - other text inside `guard` of the previous dispatch is
//!   [`Admission::TooSoon`].  It is new speech, so the caller keeps it.
//!
//! A failed submission calls [`Deduplicator::forget`] so the user can retry
//! straight away.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
    TooSoon,
}

pub struct Deduplicator {
    window: Duration,
    guard: Duration,
    recent: Vec<(String, Instant)>,
    last_dispatch: Option<Instant>,
}

impl Deduplicator {
    pub fn new(window: Duration, guard: Duration) -> Self {
        Self {
            window,
            guard,
            recent: Vec::new(),
            last_dispatch: None,
        }
    }

    /// Decide whether `text` may be dispatched at `now`, recording it if so.
    pub fn admit(&mut self, text: &str, now: Instant) -> Admission {
        let window = self.window;
        self.recent
            .retain(|(_, at)| now.saturating_duration_since(*at) < window);

        if self.recent.iter().any(|(t, _)| t == text) {
            return Admission::Duplicate;
        }
        if self
            .last_dispatch
            .is_some_and(|at| now.saturating_duration_since(at) < self.guard)
        {
            return Admission::TooSoon;
        }

        self.recent.push((text.to_string(), now));
        self.last_dispatch = Some(now);
        Admission::Accepted
    }

    /// Undo the record of a dispatch that did not reach the server.
    pub fn forget(&mut self, text: &str) {
        self.recent.retain(|(t, _)| t != text);
        self.last_dispatch = self.recent.iter().map(|(_, at)| *at).max();
    }
}
