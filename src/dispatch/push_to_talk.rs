//! Push-to-talk mode.
//!
//! # State machine
//!
//! ```text
//! Idle ──press──▶ Starting ──start delay──▶ Recording ──stop request──▶ Stopping
//!  ▲                 │                         │                          │
//!  │   stop request  │      too short          │        stop delay        │
//!  ├─────(abort)─────┘  ◀──(discard, engine ───┘     ──▶ StopEngine       │
//!  │                          stopped)                  trailing wait     │
//!  └────────────────────────── Send(fragments + interim) ◀────────────────┘
//! ```
//!
//! In hold style the press starts and the release stops.  In toggle style
//! each non-repeat press flips between the two and releases are ignored.
//! Every transition bumps the generation, which kills whatever timer the
//! previous state had armed.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::{ModeKind, PttConfig, PttStyle};
use crate::recognition::TranscriptEvent;

use super::{join_fragments, DispatchBehavior, ModeEffect, ModeTimer};

// ---------------------------------------------------------------------------
// PttState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PttState {
    #[default]
    Idle,
    Starting,
    Recording,
    Stopping,
}

// ---------------------------------------------------------------------------
// PushToTalk
// ---------------------------------------------------------------------------

pub struct PushToTalk {
    style: PttStyle,
    start_delay: Duration,
    stop_delay: Duration,
    min_duration: Duration,
    trailing_wait: Duration,

    state: PttState,
    generation: u64,
    pressed_at: Option<Instant>,
    engine_started: bool,
    fragments: Vec<String>,
    interim: String,
}

impl PushToTalk {
    pub fn new(config: &PttConfig) -> Self {
        let mut ptt = Self {
            style: config.style,
            start_delay: Duration::ZERO,
            stop_delay: Duration::ZERO,
            min_duration: Duration::ZERO,
            trailing_wait: Duration::ZERO,
            state: PttState::Idle,
            generation: 0,
            pressed_at: None,
            engine_started: false,
            fragments: Vec::new(),
            interim: String::new(),
        };
        ptt.configure(config);
        ptt
    }

    /// Apply new timing and style.  A recording in progress keeps going and
    /// uses the new values from its next transition on.
    pub fn configure(&mut self, config: &PttConfig) {
        self.style = config.style;
        self.start_delay = Duration::from_millis(config.start_delay_ms);
        self.stop_delay = Duration::from_millis(config.stop_delay_ms);
        self.min_duration = Duration::from_millis(config.min_duration_ms);
        self.trailing_wait = Duration::from_millis(config.trailing_results_ms);
    }

    pub fn state(&self) -> PttState {
        self.state
    }

    pub fn style(&self) -> PttStyle {
        self.style
    }

    // -----------------------------------------------------------------------
    // Gestures
    // -----------------------------------------------------------------------

    /// The talk key went down.  `repeat` marks auto-repeat events from a
    /// held key, which never change state.
    pub fn press(&mut self, now: Instant, repeat: bool) -> Vec<ModeEffect> {
        if repeat {
            return Vec::new();
        }
        match (self.style, self.state) {
            (_, PttState::Idle) => self.begin(now),
            (PttStyle::Toggle, PttState::Starting | PttState::Recording) => {
                self.request_stop(now)
            }
            _ => Vec::new(),
        }
    }

    /// The talk key went up.
    pub fn release(&mut self, now: Instant) -> Vec<ModeEffect> {
        match self.style {
            PttStyle::Hold => self.request_stop(now),
            PttStyle::Toggle => Vec::new(),
        }
    }

    /// Focus loss or an external stop.  Ends the gesture in either style.
    pub fn interrupt(&mut self, now: Instant) -> Vec<ModeEffect> {
        self.request_stop(now)
    }

    fn begin(&mut self, now: Instant) -> Vec<ModeEffect> {
        self.state = PttState::Starting;
        self.pressed_at = Some(now);
        self.generation += 1;
        log::debug!("ptt: starting");
        vec![
            ModeEffect::PttState(PttState::Starting),
            ModeEffect::Schedule {
                timer: ModeTimer::PttStart,
                delay: self.start_delay,
                generation: self.generation,
            },
        ]
    }

    fn request_stop(&mut self, now: Instant) -> Vec<ModeEffect> {
        match self.state {
            // Nothing running, or a stop sequence already in flight.
            PttState::Idle | PttState::Stopping => Vec::new(),

            PttState::Starting => {
                log::debug!("ptt: released before recording began");
                self.reset();
                vec![ModeEffect::PttState(PttState::Idle)]
            }

            PttState::Recording => {
                let elapsed = self
                    .pressed_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                let effective = elapsed.saturating_sub(self.start_delay);

                if effective < self.min_duration {
                    log::debug!("ptt: {effective:?} is below the minimum, discarding");
                    let mut effects = self.stop_engine();
                    self.reset();
                    effects.push(ModeEffect::Discarded { effective });
                    effects.push(ModeEffect::Preview(String::new()));
                    effects.push(ModeEffect::PttState(PttState::Idle));
                    return effects;
                }

                self.state = PttState::Stopping;
                self.generation += 1;
                vec![
                    ModeEffect::PttState(PttState::Stopping),
                    ModeEffect::Schedule {
                        timer: ModeTimer::PttStop,
                        delay: self.stop_delay,
                        generation: self.generation,
                    },
                ]
            }
        }
    }

    fn stop_engine(&mut self) -> Vec<ModeEffect> {
        if std::mem::take(&mut self.engine_started) {
            vec![ModeEffect::StopEngine]
        } else {
            Vec::new()
        }
    }

    fn reset(&mut self) {
        self.state = PttState::Idle;
        self.generation += 1;
        self.pressed_at = None;
        self.fragments.clear();
        self.interim.clear();
    }

    fn capturing(&self) -> bool {
        matches!(self.state, PttState::Recording | PttState::Stopping)
    }
}

impl DispatchBehavior for PushToTalk {
    fn kind(&self) -> ModeKind {
        ModeKind::PushToTalk
    }

    fn handle_interim(&mut self, event: &TranscriptEvent) -> Vec<ModeEffect> {
        if !self.capturing() {
            return Vec::new();
        }
        self.interim = event.text.trim().to_string();
        vec![ModeEffect::Preview(self.pending_text())]
    }

    fn handle_final(&mut self, event: &TranscriptEvent) -> Vec<ModeEffect> {
        if !self.capturing() {
            return Vec::new();
        }
        let text = event.text.trim();
        if !text.is_empty() {
            self.fragments.push(text.to_string());
        }
        self.interim.clear();
        vec![ModeEffect::Preview(self.pending_text())]
    }

    fn on_timer(&mut self, timer: ModeTimer, generation: u64, _now: Instant) -> Vec<ModeEffect> {
        if generation != self.generation {
            return Vec::new();
        }
        match (timer, self.state) {
            (ModeTimer::PttStart, PttState::Starting) => {
                self.state = PttState::Recording;
                self.fragments.clear();
                self.interim.clear();
                self.engine_started = true;
                log::debug!("ptt: recording");
                vec![
                    ModeEffect::StartEngine,
                    ModeEffect::Preview(String::new()),
                    ModeEffect::PttState(PttState::Recording),
                ]
            }

            (ModeTimer::PttStop, PttState::Stopping) => {
                self.generation += 1;
                let mut effects = self.stop_engine();
                effects.push(ModeEffect::Schedule {
                    timer: ModeTimer::PttTrailing,
                    delay: self.trailing_wait,
                    generation: self.generation,
                });
                effects
            }

            (ModeTimer::PttTrailing, PttState::Stopping) => {
                let utterance = self.pending_text();
                self.reset();
                let mut effects = Vec::new();
                if utterance.is_empty() {
                    log::debug!("ptt: nothing recognized");
                } else {
                    effects.push(ModeEffect::Send(utterance));
                }
                effects.push(ModeEffect::Preview(String::new()));
                effects.push(ModeEffect::PttState(PttState::Idle));
                effects
            }

            _ => Vec::new(),
        }
    }

    /// Only text put back by [`restore`](DispatchBehavior::restore) can be
    /// pending while idle; a recording dispatches on its own.
    fn flush(&mut self) -> Vec<ModeEffect> {
        if self.state != PttState::Idle {
            return Vec::new();
        }
        let utterance = self.pending_text();
        self.fragments.clear();
        self.interim.clear();
        if utterance.is_empty() {
            return Vec::new();
        }
        vec![ModeEffect::Send(utterance), ModeEffect::Preview(String::new())]
    }

    fn restore(&mut self, text: &str) -> Vec<ModeEffect> {
        if self.state != PttState::Idle {
            return Vec::new();
        }
        self.fragments.insert(0, text.to_string());
        vec![ModeEffect::Preview(self.pending_text())]
    }

    fn clear(&mut self) -> Vec<ModeEffect> {
        self.fragments.clear();
        self.interim.clear();
        vec![ModeEffect::Preview(String::new())]
    }

    fn deactivate(&mut self) -> Vec<ModeEffect> {
        let was_idle = self.state == PttState::Idle;
        let mut effects = self.stop_engine();
        self.reset();
        effects.push(ModeEffect::Preview(String::new()));
        if !was_idle {
            effects.push(ModeEffect::PttState(PttState::Idle));
        }
        effects
    }

    fn pending_text(&self) -> String {
        join_fragments(
            self.fragments
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(self.interim.as_str())),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config(style: PttStyle) -> PttConfig {
        PttConfig {
            style,
            ..PttConfig::default()
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn scheduled(effects: &[ModeEffect], timer: ModeTimer) -> u64 {
        effects
            .iter()
            .find_map(|e| match e {
                ModeEffect::Schedule {
                    timer: t,
                    generation,
                    ..
                } if *t == timer => Some(*generation),
                _ => None,
            })
            .unwrap_or_else(|| panic!("{timer:?} not scheduled in {effects:?}"))
    }

    fn sends(effects: &[ModeEffect]) -> Vec<&str> {
        effects
            .iter()
            .filter_map(|e| match e {
                ModeEffect::Send(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Press at `t0`, let the start delay pass, and return the mode recording.
    fn recording(style: PttStyle, t0: Instant) -> PushToTalk {
        let mut ptt = PushToTalk::new(&config(style));
        let start = scheduled(&ptt.press(t0, false), ModeTimer::PttStart);
        let effects = ptt.on_timer(ModeTimer::PttStart, start, t0 + ms(100));
        assert!(effects.contains(&ModeEffect::StartEngine));
        assert_eq!(ptt.state(), PttState::Recording);
        ptt
    }

    /// Drive the stop and trailing timers to completion.
    fn finish(ptt: &mut PushToTalk, stop_effects: &[ModeEffect], at: Instant) -> Vec<ModeEffect> {
        let stop = scheduled(stop_effects, ModeTimer::PttStop);
        let effects = ptt.on_timer(ModeTimer::PttStop, stop, at + ms(500));
        assert!(effects.contains(&ModeEffect::StopEngine));
        let trailing = scheduled(&effects, ModeTimer::PttTrailing);
        ptt.on_timer(ModeTimer::PttTrailing, trailing, at + ms(600))
    }

    #[test]
    fn short_hold_is_discarded() {
        let t0 = Instant::now();
        let mut ptt = recording(PttStyle::Hold, t0);
        ptt.handle_interim(&TranscriptEvent::interim("uh"));

        let effects = ptt.release(t0 + ms(200));

        assert!(sends(&effects).is_empty());
        assert!(effects.contains(&ModeEffect::StopEngine));
        assert!(effects.contains(&ModeEffect::Discarded { effective: ms(100) }));
        assert_eq!(ptt.state(), PttState::Idle);
    }

    #[test]
    fn long_hold_dispatches_once() {
        let t0 = Instant::now();
        let mut ptt = recording(PttStyle::Hold, t0);
        ptt.handle_final(&TranscriptEvent::final_result(0, "hello", None));

        let release = ptt.release(t0 + ms(600));
        assert_eq!(ptt.state(), PttState::Stopping);

        let done = finish(&mut ptt, &release, t0 + ms(600));
        assert_eq!(sends(&done), vec!["hello"]);
        assert_eq!(ptt.state(), PttState::Idle);
    }

    #[test]
    fn trailing_interim_is_included() {
        let t0 = Instant::now();
        let mut ptt = recording(PttStyle::Hold, t0);
        ptt.handle_final(&TranscriptEvent::final_result(0, "turn on", None));

        let release = ptt.release(t0 + ms(800));
        ptt.handle_interim(&TranscriptEvent::interim("the lights"));

        let done = finish(&mut ptt, &release, t0 + ms(800));
        assert_eq!(sends(&done), vec!["turn on the lights"]);
    }

    #[test]
    fn release_during_start_delay_never_starts_engine() {
        let t0 = Instant::now();
        let mut ptt = PushToTalk::new(&config(PttStyle::Hold));
        let start = scheduled(&ptt.press(t0, false), ModeTimer::PttStart);

        let effects = ptt.release(t0 + ms(50));
        assert_eq!(effects, vec![ModeEffect::PttState(PttState::Idle)]);

        // The start timer that was already armed must not fire into Recording.
        assert!(ptt.on_timer(ModeTimer::PttStart, start, t0 + ms(100)).is_empty());
        assert_eq!(ptt.state(), PttState::Idle);
    }

    #[test]
    fn hold_key_repeat_is_a_no_op() {
        let t0 = Instant::now();
        let mut ptt = recording(PttStyle::Hold, t0);
        assert!(ptt.press(t0 + ms(300), true).is_empty());
        assert!(ptt.press(t0 + ms(350), false).is_empty());
        assert_eq!(ptt.state(), PttState::Recording);
    }

    #[test]
    fn stop_while_stopping_is_ignored() {
        let t0 = Instant::now();
        let mut ptt = recording(PttStyle::Hold, t0);
        ptt.handle_final(&TranscriptEvent::final_result(0, "once", None));

        let release = ptt.release(t0 + ms(700));
        assert!(ptt.interrupt(t0 + ms(710)).is_empty());
        assert!(ptt.release(t0 + ms(720)).is_empty());

        let done = finish(&mut ptt, &release, t0 + ms(700));
        assert_eq!(sends(&done), vec!["once"]);
    }

    #[test]
    fn toggle_flips_and_ignores_repeats() {
        let t0 = Instant::now();
        let mut ptt = recording(PttStyle::Toggle, t0);

        // Repeats and releases do nothing.
        assert!(ptt.press(t0 + ms(200), true).is_empty());
        assert!(ptt.release(t0 + ms(250)).is_empty());
        assert_eq!(ptt.state(), PttState::Recording);

        ptt.handle_final(&TranscriptEvent::final_result(0, "first", None));
        let stop = ptt.press(t0 + ms(900), false);
        let done = finish(&mut ptt, &stop, t0 + ms(900));
        assert_eq!(sends(&done), vec!["first"]);
        assert_eq!(ptt.state(), PttState::Idle);

        let t1 = t0 + ms(2_000);
        let start = scheduled(&ptt.press(t1, false), ModeTimer::PttStart);
        ptt.on_timer(ModeTimer::PttStart, start, t1 + ms(100));
        assert_eq!(ptt.state(), PttState::Recording);
    }

    #[test]
    fn toggle_second_press_during_start_delay_aborts() {
        let t0 = Instant::now();
        let mut ptt = PushToTalk::new(&config(PttStyle::Toggle));
        ptt.press(t0, false);
        assert_eq!(
            ptt.press(t0 + ms(40), false),
            vec![ModeEffect::PttState(PttState::Idle)]
        );
    }

    #[test]
    fn results_outside_a_recording_are_ignored() {
        let mut ptt = PushToTalk::new(&config(PttStyle::Hold));
        assert!(ptt
            .handle_final(&TranscriptEvent::final_result(0, "stray", None))
            .is_empty());
        assert_eq!(ptt.pending_text(), "");
    }

    #[test]
    fn deactivate_stops_a_running_recording() {
        let t0 = Instant::now();
        let mut ptt = recording(PttStyle::Hold, t0);
        let effects = ptt.deactivate();
        assert_eq!(effects.first(), Some(&ModeEffect::StopEngine));
        assert_eq!(effects.last(), Some(&ModeEffect::PttState(PttState::Idle)));
        assert_eq!(ptt.state(), PttState::Idle);
    }

    #[test]
    fn restored_text_can_be_resent_when_idle() {
        let mut ptt = PushToTalk::new(&config(PttStyle::Hold));
        ptt.restore("lost in transit");
        assert_eq!(sends(&ptt.flush()), vec!["lost in transit"]);
    }
}
