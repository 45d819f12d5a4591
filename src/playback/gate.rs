//! Mutual exclusion between recognition and speech playback.
//!
//! ```text
//! request ──▶ recognition wanted? ──no──▶ Play
//!                    │yes
//!                    ▼
//!           PauseRecognition ──session closed / fallback──▶ Play
//!                                                            │ finished
//!                         queue empty? ──no──▶ Play next ◀───┘
//!                              │yes
//!                              ▼
//!                      ResumeRecognition
//! ```
//!
//! The gate stays paused across queued requests, so the microphone is not
//! reopened between two consecutive utterances of the agent.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::PlaybackConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAction {
    /// Stop recognition; call `recognition_stopped` once its session has
    /// closed, or `fallback_elapsed(generation)` after `fallback`.
    PauseRecognition { fallback: Duration, generation: u64 },
    /// Play `request`; report back with `playback_finished(generation)`.
    Play {
        request: PlaybackRequest,
        generation: u64,
    },
    ResumeRecognition,
}

#[derive(Debug)]
enum Phase {
    Idle,
    AwaitingStop {
        request: PlaybackRequest,
        generation: u64,
    },
    Playing {
        generation: u64,
    },
}

pub struct PlaybackGate {
    pause_mic: bool,
    fallback: Duration,
    queue: VecDeque<PlaybackRequest>,
    phase: Phase,
    /// Recognition was paused by us and must be resumed when the queue
    /// drains.
    paused: bool,
    generation: u64,
}

impl PlaybackGate {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            pause_mic: config.pause_mic_during_playback,
            fallback: Duration::from_millis(config.engine_stop_timeout_ms),
            queue: VecDeque::new(),
            phase: Phase::Idle,
            paused: false,
            generation: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Queue `request`.  `recognition_wanted` says whether the engine is
    /// (or is about to be) listening.
    pub fn request(
        &mut self,
        request: PlaybackRequest,
        recognition_wanted: bool,
    ) -> Vec<GateAction> {
        self.queue.push_back(request);
        if self.is_busy() {
            log::debug!("gate: playback busy, {} queued", self.queue.len());
            return Vec::new();
        }
        self.advance(recognition_wanted)
    }

    /// The engine reported its session closed.
    pub fn recognition_stopped(&mut self) -> Vec<GateAction> {
        match self.phase {
            Phase::AwaitingStop { .. } => self.begin_playing(),
            _ => Vec::new(),
        }
    }

    /// The engine did not report in time; play anyway.
    pub fn fallback_elapsed(&mut self, generation: u64) -> Vec<GateAction> {
        match self.phase {
            Phase::AwaitingStop { generation: g, .. } if g == generation => {
                log::debug!("gate: engine stop not confirmed, playing anyway");
                self.begin_playing()
            }
            _ => Vec::new(),
        }
    }

    /// Playback `generation` ended, successfully or not.
    pub fn playback_finished(
        &mut self,
        generation: u64,
        recognition_wanted: bool,
    ) -> Vec<GateAction> {
        match self.phase {
            Phase::Playing { generation: g } if g == generation => {
                self.phase = Phase::Idle;
                self.advance(recognition_wanted)
            }
            _ => Vec::new(),
        }
    }

    fn advance(&mut self, recognition_wanted: bool) -> Vec<GateAction> {
        let Some(request) = self.queue.pop_front() else {
            if std::mem::take(&mut self.paused) {
                log::debug!("gate: queue drained, resuming recognition");
                return vec![GateAction::ResumeRecognition];
            }
            return Vec::new();
        };

        self.generation += 1;
        let generation = self.generation;

        if !self.paused && self.pause_mic && recognition_wanted {
            self.paused = true;
            self.phase = Phase::AwaitingStop {
                request,
                generation,
            };
            return vec![GateAction::PauseRecognition {
                fallback: self.fallback,
                generation,
            }];
        }

        self.phase = Phase::Playing { generation };
        vec![GateAction::Play {
            request,
            generation,
        }]
    }

    fn begin_playing(&mut self) -> Vec<GateAction> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::AwaitingStop {
                request,
                generation,
            } => {
                self.phase = Phase::Playing { generation };
                vec![GateAction::Play {
                    request,
                    generation,
                }]
            }
            other => {
                self.phase = other;
                Vec::new()
            }
        }
    }
}
