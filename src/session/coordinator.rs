//! Session coordinator: the single task that owns the voice session.
//!
//! [`SessionCoordinator`] owns the [`RecognitionEngine`], the active
//! [`DispatchMode`], the [`PlaybackGate`] and the [`Deduplicator`].  It
//! processes one input at a time from its inbox and writes the
//! [`SharedState`] snapshot after each one.
//!
//! # Inputs
//!
//! ```text
//! SessionCommand ──┐
//! EngineSignal ────┤                          ┌─▶ Engine(EngineOutput)
//! Internal ────────┼─▶ coordinator ─▶ drive ──┼─▶ Mode(ModeEffect)
//! StreamUpdate ────┘      (one task)          └─▶ Gate(GateAction)
//! ```
//!
//! Network I/O (submission, mic signal, playback, the event stream) runs in
//! spawned tasks that report back as [`Internal`] messages or
//! [`StreamUpdate`]s.  Timers are spawned sleeps tagged with the mode epoch
//! and the generation of the state machine that asked for them; a firing is
//! applied only when both are still current.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{AppConfig, ModeKind, PttStyle};
use crate::dispatch::{
    Admission, Deduplicator, DispatchMode, ModeEffect, ModeTimer, PushToTalk,
};
use crate::hotkey::{KeyCombo, KeyPress};
use crate::playback::{GateAction, PlaybackError, PlaybackGate, PlaybackRequest, SpeechOutput};
use crate::recognition::{
    EngineOutput, EngineSignal, RecognitionEngine, RecognitionError, SpeechRecognizer,
};
use crate::server::{ServerApi, ServerError};
use crate::stream::{ConnectionState, EventStreamClient, PttAction, ServerEvent, StreamUpdate};

use super::handle::{SessionCommand, SessionError, SessionHandle};
use super::state::{new_shared_state, with_state, SessionEvent, SharedState};
use super::timers::TimerSet;

const EVENT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Internal messages
// ---------------------------------------------------------------------------

/// Timer firings and spawned-task completions.
enum Internal {
    ModeTimer {
        epoch: u64,
        timer: ModeTimer,
        generation: u64,
    },
    EngineRestart {
        generation: u64,
    },
    PlaybackFallback {
        generation: u64,
    },
    Submitted {
        text: String,
        result: Result<(), ServerError>,
    },
    PlaybackFinished {
        generation: u64,
        result: Result<(), PlaybackError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimerKey {
    Mode(ModeTimer),
    EngineRestart,
    PlaybackFallback,
}

/// One unit of work for [`SessionCoordinator::drive`].
enum Action {
    Engine(EngineOutput),
    Mode(ModeEffect),
    Gate(GateAction),
}

fn engine_actions(outputs: Vec<EngineOutput>) -> Vec<Action> {
    outputs.into_iter().map(Action::Engine).collect()
}

fn mode_actions(effects: Vec<ModeEffect>) -> Vec<Action> {
    effects.into_iter().map(Action::Mode).collect()
}

fn gate_actions(actions: Vec<GateAction>) -> Vec<Action> {
    actions.into_iter().map(Action::Gate).collect()
}

struct Inbox {
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    signals: mpsc::UnboundedReceiver<EngineSignal>,
    internal: mpsc::UnboundedReceiver<Internal>,
    stream: mpsc::UnboundedReceiver<StreamUpdate>,
    mic: watch::Receiver<bool>,
}

// ---------------------------------------------------------------------------
// SessionCoordinator
// ---------------------------------------------------------------------------

pub struct SessionCoordinator {
    config: AppConfig,
    api: Arc<dyn ServerApi>,
    output: Arc<dyn SpeechOutput>,

    engine: RecognitionEngine,
    mode: DispatchMode,
    /// Bumped on every mode switch; timers of the old mode are stale.
    mode_epoch: u64,
    gate: PlaybackGate,
    dedup: Deduplicator,
    ptt_combo: Option<KeyCombo>,
    voice_responses_enabled: bool,

    timers: TimerSet<TimerKey, Internal>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    stream_tx: Option<mpsc::UnboundedSender<StreamUpdate>>,
    stream_task: Option<JoinHandle<()>>,
    mic: watch::Sender<bool>,

    events: broadcast::Sender<SessionEvent>,
    state: SharedState,
    inbox: Option<Inbox>,
}

impl SessionCoordinator {
    pub fn new(
        config: AppConfig,
        recognizer: Arc<dyn SpeechRecognizer>,
        api: Arc<dyn ServerApi>,
        output: Arc<dyn SpeechOutput>,
    ) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let (internal_tx, internal) = mpsc::unbounded_channel();
        let (stream_tx, stream) = mpsc::unbounded_channel();
        let (mic, mic_rx) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = new_shared_state(&config);

        let ptt_combo = match KeyCombo::parse(&config.ptt.key) {
            Ok(combo) => Some(combo),
            Err(e) => {
                log::warn!("coordinator: push-to-talk key disabled: {e}");
                None
            }
        };

        let coordinator = Self {
            engine: RecognitionEngine::new(recognizer, signal_tx, config.recognition.clone()),
            mode: DispatchMode::new(config.dispatch.mode, &config.dispatch, &config.ptt),
            mode_epoch: 0,
            gate: PlaybackGate::new(&config.playback),
            dedup: Deduplicator::new(
                Duration::from_millis(config.dispatch.dedup_window_ms),
                Duration::from_millis(config.dispatch.rapid_fire_guard_ms),
            ),
            ptt_combo,
            voice_responses_enabled: true,
            timers: TimerSet::new(internal_tx.clone()),
            internal_tx,
            stream_tx: Some(stream_tx),
            stream_task: None,
            mic,
            events: events.clone(),
            state: Arc::clone(&state),
            inbox: Some(Inbox {
                commands,
                signals,
                internal,
                stream,
                mic: mic_rx,
            }),
            config,
            api,
            output,
        };
        let handle = SessionHandle::new(command_tx, events, state);
        (coordinator, handle)
    }

    /// Run until [`SessionHandle::shutdown`] or until every handle is
    /// dropped.
    pub async fn run(mut self) {
        let Some(mut inbox) = self.inbox.take() else {
            return;
        };
        let mic_task = tokio::spawn(mic_loop(Arc::clone(&self.api), inbox.mic.clone()));

        match self.stream_tx.take() {
            Some(tx) if self.config.server.event_stream => {
                let client = EventStreamClient::new(
                    Arc::clone(&self.api),
                    self.config.server.reconnect_delay(),
                    tx,
                );
                self.stream_task = Some(client.spawn());
            }
            _ => log::info!("coordinator: event stream disabled"),
        }

        log::info!(
            "coordinator: running in {} mode",
            self.mode.kind().label()
        );
        self.sync_snapshot();

        loop {
            let keep_going = tokio::select! {
                command = inbox.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => false,
                },
                Some(signal) = inbox.signals.recv() => {
                    let outputs = self.engine.handle_signal(signal);
                    self.drive(engine_actions(outputs)).await;
                    true
                }
                Some(message) = inbox.internal.recv() => {
                    self.handle_internal(message).await;
                    true
                }
                Some(update) = inbox.stream.recv() => {
                    self.handle_stream_update(update).await;
                    true
                }
                else => false,
            };
            self.sync_snapshot();
            if !keep_going {
                break;
            }
        }

        self.shutdown().await;
        drop(inbox);
        drop(self);
        // The sender is gone; the loop sends the final mic state and exits.
        let _ = mic_task.await;
    }

    async fn shutdown(&mut self) {
        log::info!("coordinator: shutting down");
        let outputs = self.engine.stop().await;
        self.drive(engine_actions(outputs)).await;
        self.timers.cancel_all();
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        self.sync_snapshot();
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// `false` ends the run loop.
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::StartListening(reply) => {
                let result = self.start_listening().await;
                let _ = reply.send(result);
            }
            SessionCommand::StopListening => self.stop_listening().await,
            SessionCommand::SetMode(kind) => self.switch_mode(kind).await,
            SessionCommand::SetTriggerWord(word) => {
                if let Some(trigger) = self.mode.as_trigger_word_mut() {
                    trigger.set_trigger_word(&word);
                }
                with_state(&self.state, |s| s.trigger_word = word.clone());
                self.config.dispatch.trigger_word = word;
            }
            SessionCommand::ConfigurePtt(ptt) => {
                match KeyCombo::parse(&ptt.key) {
                    Ok(combo) => {
                        log::info!("coordinator: push-to-talk bound to {combo}");
                        self.ptt_combo = Some(combo);
                    }
                    Err(e) => log::warn!("coordinator: keeping old push-to-talk key: {e}"),
                }
                if let Some(mode) = self.mode.as_push_to_talk_mut() {
                    mode.configure(&ptt);
                }
                self.config.ptt = ptt;
            }
            SessionCommand::PttPress { repeat } => {
                self.ptt_gesture(|ptt, now| ptt.press(now, repeat)).await
            }
            SessionCommand::PttRelease => self.ptt_gesture(|ptt, now| ptt.release(now)).await,
            SessionCommand::FocusLost => self.ptt_gesture(|ptt, now| ptt.interrupt(now)).await,
            SessionCommand::KeyDown(press) => self.key_down(press).await,
            SessionCommand::KeyUp(press) => self.key_up(press).await,
            SessionCommand::SendNow => {
                let effects = self.mode.behavior_mut().flush();
                self.drive(mode_actions(effects)).await;
            }
            SessionCommand::Clear => {
                let effects = self.mode.behavior_mut().clear();
                self.drive(mode_actions(effects)).await;
            }
            SessionCommand::Shutdown => return false,
        }
        true
    }

    async fn start_listening(&mut self) -> Result<(), SessionError> {
        if self.mode.kind() == ModeKind::PushToTalk {
            log::debug!("coordinator: start ignored in push-to-talk mode");
            return Ok(());
        }
        match self.engine.start().await {
            Ok(outputs) => {
                log::info!("coordinator: listening");
                self.drive(engine_actions(outputs)).await;
                Ok(())
            }
            Err(e) => {
                self.start_failed(e.clone());
                Err(SessionError::from(e))
            }
        }
    }

    async fn stop_listening(&mut self) {
        let effects = match self.mode.kind() {
            ModeKind::AutoSend => self.mode.behavior_mut().flush(),
            ModeKind::TriggerWord => Vec::new(),
            ModeKind::PushToTalk => match self.mode.as_push_to_talk_mut() {
                Some(ptt) => ptt.interrupt(Instant::now()),
                None => Vec::new(),
            },
        };
        self.drive(mode_actions(effects)).await;

        let outputs = self.engine.stop().await;
        log::info!("coordinator: stopped listening");
        self.drive(engine_actions(outputs)).await;
    }

    async fn switch_mode(&mut self, kind: ModeKind) {
        if kind == self.mode.kind() {
            return;
        }
        log::info!(
            "coordinator: switching mode {} -> {}",
            self.mode.kind().label(),
            kind.label()
        );

        let effects = self.mode.behavior_mut().deactivate();
        self.drive(mode_actions(effects)).await;
        self.timers.cancel_where(|key| matches!(key, TimerKey::Mode(_)));
        self.mode_epoch += 1;

        self.config.dispatch.mode = kind;
        self.mode = DispatchMode::new(kind, &self.config.dispatch, &self.config.ptt);

        if kind == ModeKind::PushToTalk && self.engine.is_wanted() {
            let outputs = self.engine.stop().await;
            self.drive(engine_actions(outputs)).await;
        }

        with_state(&self.state, |s| {
            s.mode = kind;
            s.preview.clear();
            s.queued.clear();
        });
        self.emit(SessionEvent::ModeChanged { mode: kind });
    }

    async fn ptt_gesture(&mut self, gesture: impl FnOnce(&mut PushToTalk, Instant) -> Vec<ModeEffect>) {
        let Some(ptt) = self.mode.as_push_to_talk_mut() else {
            log::debug!("coordinator: push-to-talk gesture outside push-to-talk mode");
            return;
        };
        let effects = gesture(ptt, Instant::now());
        self.drive(mode_actions(effects)).await;
    }

    async fn key_down(&mut self, press: KeyPress) {
        if self.ptt_combo.as_ref().is_some_and(|c| c.matches(&press)) {
            let repeat = press.repeat;
            self.ptt_gesture(|ptt, now| ptt.press(now, repeat)).await;
        }
    }

    async fn key_up(&mut self, press: KeyPress) {
        if self.ptt_combo.as_ref().is_some_and(|c| c.involves(&press.key)) {
            self.ptt_gesture(|ptt, now| ptt.release(now)).await;
        }
    }

    // -----------------------------------------------------------------------
    // Internal messages
    // -----------------------------------------------------------------------

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::ModeTimer {
                epoch,
                timer,
                generation,
            } => {
                if epoch != self.mode_epoch {
                    log::debug!("coordinator: dropping {timer:?} from a previous mode");
                    return;
                }
                let effects = self
                    .mode
                    .behavior_mut()
                    .on_timer(timer, generation, Instant::now());
                self.drive(mode_actions(effects)).await;
            }

            Internal::EngineRestart { generation } => {
                match self.engine.on_restart_timer(generation).await {
                    Ok(outputs) => self.drive(engine_actions(outputs)).await,
                    Err(e) => self.start_failed(e),
                }
            }

            Internal::PlaybackFallback { generation } => {
                let actions = self.gate.fallback_elapsed(generation);
                self.drive(gate_actions(actions)).await;
            }

            Internal::Submitted { text, result } => match result {
                Ok(()) => {
                    log::info!("coordinator: delivered {text:?}");
                    with_state(&self.state, |s| s.last_dispatched = Some(text.clone()));
                    self.emit(SessionEvent::Dispatched { text });
                }
                Err(e) => {
                    let error = SessionError::SubmissionFailed(e.to_string()).to_string();
                    log::warn!("coordinator: {error}");
                    self.dedup.forget(&text);
                    let effects = self.mode.behavior_mut().restore(&text);
                    self.drive(mode_actions(effects)).await;
                    with_state(&self.state, |s| s.last_error = Some(error.clone()));
                    self.emit(SessionEvent::DispatchFailed { text, error });
                }
            },

            Internal::PlaybackFinished { generation, result } => {
                if let Err(e) = result {
                    log::warn!("coordinator: playback failed: {e}");
                }
                let actions = self
                    .gate
                    .playback_finished(generation, self.engine.is_wanted());
                self.drive(gate_actions(actions)).await;
                if !self.gate.is_busy() {
                    self.set_playing(false);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Event stream
    // -----------------------------------------------------------------------

    async fn handle_stream_update(&mut self, update: StreamUpdate) {
        match update {
            StreamUpdate::State(connection) => {
                with_state(&self.state, |s| {
                    s.connection = connection;
                    if connection == ConnectionState::Connected {
                        s.reconnecting = false;
                        s.last_error = None;
                    }
                });
                self.emit(SessionEvent::Connection { state: connection });
            }

            StreamUpdate::InitialState(initial) => {
                self.voice_responses_enabled = initial.voice_responses_enabled;
                let active = *self.mic.borrow();
                if initial.voice_input_active != active {
                    log::debug!("coordinator: server mic state out of date, resending");
                    self.mic.send_replace(active);
                }
            }

            StreamUpdate::Event(event) => self.handle_server_event(event).await,

            StreamUpdate::Error(reason) => {
                let message = SessionError::StreamDisconnected(reason).to_string();
                with_state(&self.state, |s| {
                    s.reconnecting = true;
                    s.last_error = Some(message.clone());
                });
                self.emit(SessionEvent::Error { message });
            }
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected => log::debug!("coordinator: server greeted us"),

            ServerEvent::Speak { text } => {
                if !self.voice_responses_enabled {
                    log::debug!("coordinator: voice responses disabled, not speaking");
                    return;
                }
                if text.trim().is_empty() {
                    return;
                }
                let actions = self
                    .gate
                    .request(PlaybackRequest { text }, self.engine.is_wanted());
                self.drive(gate_actions(actions)).await;
            }

            ServerEvent::WaitStatus { is_waiting } => {
                with_state(&self.state, |s| s.peer_waiting = is_waiting);
                self.emit(SessionEvent::PeerWaiting {
                    waiting: is_waiting,
                });
            }

            ServerEvent::Ptt { action } => match action {
                PttAction::Start => self.ptt_gesture(|ptt, now| ptt.press(now, false)).await,
                PttAction::Stop => {
                    self.ptt_gesture(|ptt, now| match ptt.style() {
                        PttStyle::Hold => ptt.release(now),
                        PttStyle::Toggle => Vec::new(),
                    })
                    .await
                }
                PttAction::Unknown => log::debug!("coordinator: unknown ptt action"),
            },

            ServerEvent::Unknown => {}
        }
    }

    // -----------------------------------------------------------------------
    // Effects
    // -----------------------------------------------------------------------

    /// Apply `initial` and everything it leads to, in order.
    async fn drive(&mut self, initial: Vec<Action>) {
        let mut work: VecDeque<Action> = initial.into();
        while let Some(action) = work.pop_front() {
            let more = match action {
                Action::Engine(output) => self.apply_engine_output(output),
                Action::Mode(effect) => self.apply_mode_effect(effect).await,
                Action::Gate(gate) => self.apply_gate_action(gate).await,
            };
            work.extend(more);
        }
    }

    fn apply_engine_output(&mut self, output: EngineOutput) -> Vec<Action> {
        match output {
            EngineOutput::Interim(event) => mode_actions(self.mode.behavior_mut().handle_interim(&event)),
            EngineOutput::Final(event) => {
                log::debug!("coordinator: final {:?}", event.text);
                mode_actions(self.mode.behavior_mut().handle_final(&event))
            }
            EngineOutput::Error(code) => {
                self.report_error(code.message().to_string());
                Vec::new()
            }
            EngineOutput::ActiveChanged(active) => {
                if active {
                    with_state(&self.state, |s| s.input_blocked = None);
                }
                self.mic.send_if_modified(|current| {
                    if *current == active {
                        false
                    } else {
                        *current = active;
                        true
                    }
                });
                self.emit(SessionEvent::RecognitionActive { active });
                Vec::new()
            }
            EngineOutput::RestartScheduled {
                attempt,
                delay,
                generation,
            } => {
                log::info!("coordinator: recognition restart {attempt} in {delay:?}");
                self.timers.schedule(
                    TimerKey::EngineRestart,
                    delay,
                    Internal::EngineRestart { generation },
                );
                Vec::new()
            }
            EngineOutput::SessionClosed => gate_actions(self.gate.recognition_stopped()),
            EngineOutput::Terminated(e) => {
                self.start_failed(e);
                Vec::new()
            }
        }
    }

    async fn apply_mode_effect(&mut self, effect: ModeEffect) -> Vec<Action> {
        match effect {
            ModeEffect::Send(text) => return self.dispatch(text),

            ModeEffect::Preview(text) => {
                let changed = with_state(&self.state, |s| {
                    if s.preview == text {
                        false
                    } else {
                        s.preview = text.clone();
                        true
                    }
                });
                if changed {
                    self.emit(SessionEvent::Preview { text });
                }
            }

            ModeEffect::Queue(fragments) => {
                with_state(&self.state, |s| s.queued = fragments.clone());
                self.emit(SessionEvent::Queued { fragments });
            }

            ModeEffect::Schedule {
                timer,
                delay,
                generation,
            } => self.timers.schedule(
                TimerKey::Mode(timer),
                delay,
                Internal::ModeTimer {
                    epoch: self.mode_epoch,
                    timer,
                    generation,
                },
            ),

            // While playback holds the microphone these only move the
            // engine's wanted flag; resume honours it.
            ModeEffect::StartEngine => match self.engine.start().await {
                Ok(outputs) => return engine_actions(outputs),
                Err(e) => self.start_failed(e),
            },
            ModeEffect::StopEngine => return engine_actions(self.engine.stop().await),

            ModeEffect::PttState(ptt) => {
                with_state(&self.state, |s| s.ptt = ptt);
                self.emit(SessionEvent::Ptt { state: ptt });
            }

            ModeEffect::Discarded { effective } => {
                log::info!("coordinator: push-to-talk too short ({effective:?}), discarded");
                self.emit(SessionEvent::PttDiscarded {
                    effective_ms: u64::try_from(effective.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }
        Vec::new()
    }

    async fn apply_gate_action(&mut self, action: GateAction) -> Vec<Action> {
        match action {
            GateAction::PauseRecognition {
                fallback,
                generation,
            } => {
                log::debug!("coordinator: pausing recognition for playback");
                let (outputs, awaiting_close) = self.engine.pause().await;
                let mut actions = engine_actions(outputs);
                if awaiting_close {
                    self.timers.schedule(
                        TimerKey::PlaybackFallback,
                        fallback,
                        Internal::PlaybackFallback { generation },
                    );
                } else {
                    actions.extend(gate_actions(self.gate.recognition_stopped()));
                }
                actions
            }

            GateAction::Play {
                request,
                generation,
            } => {
                self.timers.cancel(&TimerKey::PlaybackFallback);
                self.set_playing(true);
                let output = Arc::clone(&self.output);
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = output.speak(&request.text).await;
                    let _ = tx.send(Internal::PlaybackFinished { generation, result });
                });
                Vec::new()
            }

            GateAction::ResumeRecognition => {
                log::debug!("coordinator: playback done, resuming recognition");
                match self.engine.resume().await {
                    Ok(outputs) => engine_actions(outputs),
                    Err(e) => {
                        self.start_failed(e);
                        Vec::new()
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, text: String) -> Vec<Action> {
        match self.dedup.admit(&text, Instant::now()) {
            Admission::Accepted => {}
            Admission::Duplicate => {
                log::info!("coordinator: dropping duplicate {text:?}");
                return Vec::new();
            }
            Admission::TooSoon => {
                log::info!("coordinator: holding {text:?}, too soon after the last dispatch");
                return mode_actions(self.mode.behavior_mut().restore(&text));
            }
        }

        log::info!("coordinator: dispatching {text:?}");
        let api = Arc::clone(&self.api);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = api.submit_utterance(&text).await;
            let _ = tx.send(Internal::Submitted { text, result });
        });
        Vec::new()
    }

    // -----------------------------------------------------------------------
    // Errors and snapshot
    // -----------------------------------------------------------------------

    fn start_failed(&mut self, error: RecognitionError) {
        match error {
            RecognitionError::PermissionDenied | RecognitionError::EngineUnavailable => {
                self.block_input(SessionError::from(error))
            }
            other => self.report_error(SessionError::from(other).to_string()),
        }
    }

    /// Mark input unavailable.  The explanatory event goes out once per
    /// cause, however often the user retries.
    fn block_input(&mut self, error: SessionError) {
        let message = error.to_string();
        let first = with_state(&self.state, |s| {
            let first = s.input_blocked.as_deref() != Some(message.as_str());
            s.input_blocked = Some(message.clone());
            s.last_error = Some(message.clone());
            first
        });
        if first {
            log::error!("coordinator: input unavailable: {message}");
            self.emit(SessionEvent::InputUnavailable { message });
        }
    }

    fn report_error(&mut self, message: String) {
        log::warn!("coordinator: {message}");
        with_state(&self.state, |s| s.last_error = Some(message.clone()));
        self.emit(SessionEvent::Error { message });
    }

    fn set_playing(&mut self, playing: bool) {
        let changed = with_state(&self.state, |s| std::mem::replace(&mut s.playing, playing) != playing);
        if changed {
            self.emit(SessionEvent::Playback { playing });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn sync_snapshot(&self) {
        with_state(&self.state, |s| {
            s.mode = self.mode.kind();
            s.listening = self.engine.is_wanted();
            s.recognition_active = self.engine.is_active();
            s.paused_for_playback = self.engine.is_paused();
            s.voice_responses_enabled = self.voice_responses_enabled;
        });
    }
}

/// Push the latest mic state to the server.  Changes made while a request
/// is in flight collapse into one.
async fn mic_loop(api: Arc<dyn ServerApi>, mut rx: watch::Receiver<bool>) {
    while rx.changed().await.is_ok() {
        let active = *rx.borrow_and_update();
        if let Err(e) = api.set_mic_active(active).await {
            log::warn!("coordinator: could not report mic state: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PttConfig;
    use crate::playback::MockSpeechOutput;
    use crate::recognition::MockRecognizer;
    use crate::server::{InitialState, MockConnection, MockServerApi};
    use crate::dispatch::PttState;
    use tokio::sync::broadcast::error::TryRecvError;

    struct Harness {
        handle: SessionHandle,
        recognizer: Arc<MockRecognizer>,
        api: Arc<MockServerApi>,
        output: Arc<MockSpeechOutput>,
        events: broadcast::Receiver<SessionEvent>,
        task: JoinHandle<()>,
    }

    impl Harness {
        fn drain(&mut self) -> Vec<SessionEvent> {
            let mut out = Vec::new();
            loop {
                match self.events.try_recv() {
                    Ok(event) => out.push(event),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            out
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.event_stream = false;
        config
    }

    fn config_with_mode(mode: ModeKind) -> AppConfig {
        let mut config = config();
        config.dispatch.mode = mode;
        config
    }

    fn spawn(config: AppConfig) -> Harness {
        spawn_with(config, MockRecognizer::new(), MockServerApi::new())
    }

    fn spawn_with(config: AppConfig, recognizer: MockRecognizer, api: MockServerApi) -> Harness {
        let output = MockSpeechOutput::new(Duration::from_millis(1_000));
        spawn_full(config, recognizer, api, output)
    }

    fn spawn_full(
        config: AppConfig,
        recognizer: MockRecognizer,
        api: MockServerApi,
        output: MockSpeechOutput,
    ) -> Harness {
        let recognizer = Arc::new(recognizer);
        let api = Arc::new(api);
        let output = Arc::new(output);

        let dyn_recognizer: Arc<dyn SpeechRecognizer> = recognizer.clone();
        let dyn_api: Arc<dyn ServerApi> = api.clone();
        let dyn_output: Arc<dyn SpeechOutput> = output.clone();
        let (coordinator, handle) =
            SessionCoordinator::new(config, dyn_recognizer, dyn_api, dyn_output);
        let events = handle.subscribe();
        let task = tokio::spawn(coordinator.run());

        Harness {
            handle,
            recognizer,
            api,
            output,
            events,
            task,
        }
    }

    /// Let every ready task run; advances the paused clock by 1 ms.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    // -- auto-send -----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn auto_send_dispatches_once_after_silence() {
        let h = spawn(config());
        h.handle.start_listening().await.unwrap();
        settle().await;
        assert!(h.handle.state().recognition_active);

        h.recognizer.sink().final_result(0, "hello world", Some(0.9));
        settle().await;
        assert_eq!(h.handle.state().preview, "hello world");

        advance(1_400).await;
        assert!(h.api.submitted().is_empty());

        advance(200).await;
        assert_eq!(h.api.submitted(), vec!["hello world"]);
        let state = h.handle.state();
        assert_eq!(state.last_dispatched.as_deref(), Some("hello world"));
        assert_eq!(state.preview, "");

        advance(5_000).await;
        assert_eq!(h.api.submitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interim_results_restart_the_silence_timer() {
        let h = spawn(config());
        h.handle.start_listening().await.unwrap();
        settle().await;

        let sink = h.recognizer.sink();
        sink.interim("hello");
        advance(1_000).await;
        sink.interim("hello there");
        advance(1_000).await;
        assert!(h.api.submitted().is_empty());

        advance(600).await;
        assert_eq!(h.api.submitted(), vec!["hello there"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_listening_flushes_auto_send() {
        let h = spawn(config());
        h.handle.start_listening().await.unwrap();
        settle().await;

        h.recognizer.sink().final_result(0, "stop here", None);
        settle().await;
        h.handle.stop_listening().unwrap();
        settle().await;

        assert_eq!(h.api.submitted(), vec!["stop here"]);
        let state = h.handle.state();
        assert!(!state.listening);
        assert!(!state.recognition_active);
    }

    // -- trigger word --------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn trigger_word_dispatches_joined_fragments() {
        let mut h = spawn(config_with_mode(ModeKind::TriggerWord));
        h.handle.start_listening().await.unwrap();
        settle().await;

        let sink = h.recognizer.sink();
        sink.final_result(0, "turn on", None);
        settle().await;
        assert_eq!(h.handle.state().queued, vec!["turn on"]);

        sink.final_result(1, "the lights send", None);
        settle().await;
        assert_eq!(h.api.submitted(), vec!["turn on the lights"]);
        assert!(h.handle.state().queued.is_empty());
        assert!(h
            .drain()
            .contains(&SessionEvent::Dispatched {
                text: "turn on the lights".into()
            }));
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_word_queues_without_trigger_and_keeps_queue_on_stop() {
        let h = spawn(config_with_mode(ModeKind::TriggerWord));
        h.handle.start_listening().await.unwrap();
        settle().await;

        let sink = h.recognizer.sink();
        sink.final_result(0, "turn on", None);
        sink.final_result(1, "the lights", None);
        advance(5_000).await;
        assert!(h.api.submitted().is_empty());
        assert_eq!(h.handle.state().queued.len(), 2);

        h.handle.stop_listening().unwrap();
        settle().await;
        assert_eq!(h.handle.state().queued.len(), 2);

        h.handle.send_now().unwrap();
        settle().await;
        assert_eq!(h.api.submitted(), vec!["turn on the lights"]);
    }

    #[tokio::test(start_paused = true)]
    async fn changing_the_trigger_word_takes_effect() {
        let h = spawn(config_with_mode(ModeKind::TriggerWord));
        h.handle.start_listening().await.unwrap();
        h.handle.set_trigger_word("over").unwrap();
        settle().await;
        assert_eq!(h.handle.state().trigger_word, "over");

        h.recognizer.sink().final_result(0, "send it over", None);
        settle().await;
        assert_eq!(h.api.submitted(), vec!["send it"]);
    }

    // -- push-to-talk --------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn short_push_to_talk_is_discarded() {
        let mut h = spawn(config_with_mode(ModeKind::PushToTalk));
        settle().await;

        h.handle.ptt_press(false).unwrap();
        advance(200).await;
        assert_eq!(h.handle.state().ptt, PttState::Recording);
        assert_eq!(h.recognizer.starts(), 1);

        h.handle.ptt_release().unwrap();
        advance(1_000).await;

        assert!(h.api.submitted().is_empty());
        let state = h.handle.state();
        assert_eq!(state.ptt, PttState::Idle);
        assert!(!state.listening);
        assert!(h
            .drain()
            .iter()
            .any(|e| matches!(e, SessionEvent::PttDiscarded { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn held_push_to_talk_dispatches_once() {
        let h = spawn(config_with_mode(ModeKind::PushToTalk));
        settle().await;

        h.handle.ptt_press(false).unwrap();
        advance(150).await;
        h.recognizer.sink().final_result(0, "hello", None);
        advance(450).await;

        h.handle.ptt_press(true).unwrap();
        h.handle.ptt_release().unwrap();
        settle().await;
        assert_eq!(h.handle.state().ptt, PttState::Stopping);

        advance(700).await;
        assert_eq!(h.api.submitted(), vec!["hello"]);
        assert_eq!(h.handle.state().ptt, PttState::Idle);
        assert!(!h.handle.state().recognition_active);

        advance(5_000).await;
        assert_eq!(h.api.submitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_push_to_talk_flips_on_presses() {
        let mut config = config_with_mode(ModeKind::PushToTalk);
        config.ptt.style = PttStyle::Toggle;
        let h = spawn(config);
        settle().await;

        h.handle.ptt_press(false).unwrap();
        advance(150).await;
        assert_eq!(h.handle.state().ptt, PttState::Recording);

        h.handle.ptt_press(true).unwrap();
        h.handle.ptt_release().unwrap();
        advance(400).await;
        assert_eq!(h.handle.state().ptt, PttState::Recording);

        h.handle.ptt_press(false).unwrap();
        advance(700).await;
        assert_eq!(h.handle.state().ptt, PttState::Idle);

        h.handle.ptt_press(false).unwrap();
        advance(150).await;
        assert_eq!(h.handle.state().ptt, PttState::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn key_binding_drives_push_to_talk() {
        let h = spawn(config_with_mode(ModeKind::PushToTalk));
        settle().await;

        h.handle.key_down(KeyPress::new("A")).unwrap();
        settle().await;
        assert_eq!(h.handle.state().ptt, PttState::Idle);

        h.handle.key_down(KeyPress::new("Space").with_ctrl()).unwrap();
        advance(600).await;
        assert_eq!(h.handle.state().ptt, PttState::Recording);

        // Releasing the modifier ends the hold.
        h.handle.key_up(KeyPress::new("Control")).unwrap();
        settle().await;
        assert_eq!(h.handle.state().ptt, PttState::Stopping);
    }

    #[tokio::test(start_paused = true)]
    async fn rebinding_push_to_talk_applies_new_key() {
        let h = spawn(config_with_mode(ModeKind::PushToTalk));
        h.handle
            .configure_ptt(PttConfig {
                key: "F9".into(),
                ..PttConfig::default()
            })
            .unwrap();
        settle().await;

        h.handle.key_down(KeyPress::new("Space").with_ctrl()).unwrap();
        settle().await;
        assert_eq!(h.handle.state().ptt, PttState::Idle);

        h.handle.key_down(KeyPress::new("f9")).unwrap();
        settle().await;
        assert_eq!(h.handle.state().ptt, PttState::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_loss_ends_a_recording() {
        let h = spawn(config_with_mode(ModeKind::PushToTalk));
        settle().await;

        h.handle.ptt_press(false).unwrap();
        advance(600).await;
        h.handle.focus_lost().unwrap();
        settle().await;
        assert_eq!(h.handle.state().ptt, PttState::Stopping);
    }

    #[tokio::test(start_paused = true)]
    async fn start_listening_is_ignored_in_push_to_talk_mode() {
        let h = spawn(config_with_mode(ModeKind::PushToTalk));
        h.handle.start_listening().await.unwrap();
        settle().await;
        assert_eq!(h.recognizer.starts(), 0);
        assert!(!h.handle.state().listening);
    }

    // -- dedup ---------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn redelivered_final_after_restart_is_not_sent_twice() {
        let mut config = config();
        config.dispatch.silence_delay_ms = 500;
        let h = spawn(config);
        h.handle.start_listening().await.unwrap();
        settle().await;

        h.recognizer.sink().final_result(0, "hello", None);
        advance(600).await;
        assert_eq!(h.api.submitted(), vec!["hello"]);

        // The platform drops the session; the engine restarts after 1 s.
        h.recognizer.sink().ended();
        advance(1_100).await;
        assert_eq!(h.recognizer.starts(), 2);
        assert!(h.handle.state().recognition_active);

        // The new session re-delivers the same result.
        h.recognizer.sink().final_result(0, "hello", None);
        advance(600).await;
        assert_eq!(h.api.submitted(), vec!["hello"]);
    }

    #[tokio::test(start_paused = true)]
    async fn new_speech_inside_rapid_fire_guard_is_kept_for_later() {
        let h = spawn(config_with_mode(ModeKind::TriggerWord));
        h.handle.start_listening().await.unwrap();
        settle().await;

        let sink = h.recognizer.sink();
        sink.final_result(0, "one send", None);
        settle().await;
        sink.final_result(1, "two send", None);
        settle().await;

        assert_eq!(h.api.submitted(), vec!["one"]);
        let state = h.handle.state();
        assert_eq!(state.queued, vec!["two"]);
        assert_eq!(state.preview, "two");

        advance(600).await;
        h.handle.send_now().unwrap();
        settle().await;
        assert_eq!(h.api.submitted(), vec!["one", "two"]);
    }

    // -- submission failure --------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn failed_submission_is_restored_and_can_be_resent() {
        let api = MockServerApi::new();
        api.fail_next_submissions(1);
        let mut h = spawn_with(config(), MockRecognizer::new(), api);
        h.handle.start_listening().await.unwrap();
        settle().await;

        h.recognizer.sink().final_result(0, "hello", None);
        advance(1_600).await;
        assert!(h.api.submitted().is_empty());
        let state = h.handle.state();
        assert_eq!(state.preview, "hello");
        assert!(state.last_error.is_some());
        assert!(h
            .drain()
            .iter()
            .any(|e| matches!(e, SessionEvent::DispatchFailed { text, .. } if text == "hello")));

        h.handle.send_now().unwrap();
        settle().await;
        assert_eq!(h.api.submitted(), vec!["hello"]);
        assert_eq!(
            h.api.calls().iter().filter(|c| *c == "submit:hello").count(),
            2
        );
    }

    // -- errors --------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn permission_denied_blocks_input_with_one_event() {
        let mut h = spawn_with(
            config(),
            MockRecognizer::failing(RecognitionError::PermissionDenied),
            MockServerApi::new(),
        );

        assert_eq!(
            h.handle.start_listening().await,
            Err(SessionError::PermissionDenied)
        );
        assert_eq!(
            h.handle.start_listening().await,
            Err(SessionError::PermissionDenied)
        );
        settle().await;

        let state = h.handle.state();
        assert!(state.input_blocked.is_some());
        assert!(!state.listening);
        let unavailable = h
            .drain()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::InputUnavailable { .. }))
            .count();
        assert_eq!(unavailable, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_recognizer_reports_engine_unavailable() {
        let h = spawn_with(config(), MockRecognizer::unavailable(), MockServerApi::new());
        assert_eq!(
            h.handle.start_listening().await,
            Err(SessionError::EngineUnavailable)
        );
    }

    // -- mode switching ------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn mode_switch_cancels_pending_dispatch() {
        let h = spawn(config());
        h.handle.start_listening().await.unwrap();
        settle().await;

        h.recognizer.sink().final_result(0, "pending", None);
        advance(500).await;
        h.handle.set_mode(ModeKind::TriggerWord).unwrap();
        advance(3_000).await;

        assert!(h.api.submitted().is_empty());
        let state = h.handle.state();
        assert_eq!(state.mode, ModeKind::TriggerWord);
        assert_eq!(state.preview, "");
        assert!(state.recognition_active);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_to_push_to_talk_stops_continuous_listening() {
        let h = spawn(config());
        h.handle.start_listening().await.unwrap();
        settle().await;

        h.handle.set_mode(ModeKind::PushToTalk).unwrap();
        settle().await;
        assert_eq!(h.recognizer.stops(), 1);
        let state = h.handle.state();
        assert!(!state.listening);
        assert_eq!(state.mode, ModeKind::PushToTalk);
    }

    // -- mic signal ----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn mic_state_follows_recognition() {
        let h = spawn(config());
        h.handle.start_listening().await.unwrap();
        settle().await;
        assert_eq!(h.api.mic_states(), vec![true]);

        h.handle.stop_listening().unwrap();
        settle().await;
        assert_eq!(h.api.mic_states(), vec![true, false]);
    }

    // -- event stream and playback -------------------------------------------

    fn streaming_config() -> AppConfig {
        let mut config = config();
        config.server.event_stream = true;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn recognition_is_paused_during_playback() {
        let api = MockServerApi::new();
        let (server, rx) = mpsc::unbounded_channel();
        api.push_connection(MockConnection::Open(rx));
        let h = spawn_with(streaming_config(), MockRecognizer::new(), api);
        h.handle.start_listening().await.unwrap();
        settle().await;
        assert!(h.handle.state().recognition_active);
        assert_eq!(h.handle.state().connection, ConnectionState::Connected);

        server
            .send(r#"{"type":"speak","text":"hi there"}"#.into())
            .unwrap();
        settle().await;

        let state = h.handle.state();
        assert!(state.playing);
        assert!(state.paused_for_playback);
        assert!(!state.recognition_active);
        assert!(state.listening);
        assert_eq!(h.output.spoken(), vec!["hi there"]);

        advance(1_000).await;
        let state = h.handle.state();
        assert!(!state.playing);
        assert!(!state.paused_for_playback);
        assert!(state.recognition_active);
        assert_eq!(h.recognizer.starts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_playback_still_resumes_recognition() {
        let api = MockServerApi::new();
        let (server, rx) = mpsc::unbounded_channel();
        api.push_connection(MockConnection::Open(rx));
        let mut h = spawn_full(
            streaming_config(),
            MockRecognizer::new(),
            api,
            MockSpeechOutput::failing(Duration::from_millis(1_000)),
        );
        h.handle.start_listening().await.unwrap();
        settle().await;

        server
            .send(r#"{"type":"speak","text":"hi there"}"#.into())
            .unwrap();
        settle().await;
        assert!(h.handle.state().paused_for_playback);

        advance(1_001).await;
        let state = h.handle.state();
        assert!(!state.playing);
        assert!(!state.paused_for_playback);
        assert!(state.recognition_active);
        assert_eq!(h.recognizer.starts(), 2);
        assert!(h
            .drain()
            .contains(&SessionEvent::Playback { playing: false }));
    }

    #[tokio::test(start_paused = true)]
    async fn queued_speech_keeps_recognition_paused_and_honours_last_request() {
        let api = MockServerApi::new();
        let (server, rx) = mpsc::unbounded_channel();
        api.push_connection(MockConnection::Open(rx));
        let h = spawn_with(streaming_config(), MockRecognizer::new(), api);
        h.handle.start_listening().await.unwrap();
        settle().await;

        server.send(r#"{"type":"speak","text":"one"}"#.into()).unwrap();
        server.send(r#"{"type":"speak","text":"two"}"#.into()).unwrap();
        settle().await;

        // Stop then start again while the microphone is held.
        h.handle.stop_listening().unwrap();
        h.handle.start_listening().await.unwrap();
        settle().await;
        assert_eq!(h.recognizer.starts(), 1);

        advance(1_200).await;
        let state = h.handle.state();
        assert_eq!(h.output.spoken(), vec!["one", "two"]);
        assert!(state.playing);
        assert!(state.paused_for_playback);
        assert!(!state.recognition_active);
        assert_eq!(h.recognizer.starts(), 1);

        advance(1_000).await;
        let state = h.handle.state();
        assert!(!state.playing);
        assert!(state.listening);
        assert!(state.recognition_active);
        assert_eq!(h.recognizer.starts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_playback_prevents_resume() {
        let api = MockServerApi::new();
        let (server, rx) = mpsc::unbounded_channel();
        api.push_connection(MockConnection::Open(rx));
        let h = spawn_with(streaming_config(), MockRecognizer::new(), api);
        h.handle.start_listening().await.unwrap();
        settle().await;

        server.send(r#"{"type":"speak","text":"hi"}"#.into()).unwrap();
        settle().await;
        h.handle.stop_listening().unwrap();
        advance(1_500).await;

        let state = h.handle.state();
        assert!(!state.playing);
        assert!(!state.listening);
        assert!(!state.recognition_active);
        assert_eq!(h.recognizer.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn push_to_talk_release_during_playback_is_honoured() {
        let api = MockServerApi::new();
        let (server, rx) = mpsc::unbounded_channel();
        api.push_connection(MockConnection::Open(rx));
        let mut config = streaming_config();
        config.dispatch.mode = ModeKind::PushToTalk;
        let h = spawn_with(config, MockRecognizer::new(), api);
        settle().await;

        h.handle.ptt_press(false).unwrap();
        advance(150).await;
        assert!(h.handle.state().recognition_active);
        h.recognizer.sink().final_result(0, "before", None);
        advance(450).await;

        server.send(r#"{"type":"speak","text":"reply"}"#.into()).unwrap();
        settle().await;
        assert!(h.handle.state().paused_for_playback);

        h.handle.ptt_release().unwrap();
        advance(2_000).await;

        let state = h.handle.state();
        assert_eq!(h.api.submitted(), vec!["before"]);
        assert_eq!(state.ptt, PttState::Idle);
        assert!(!state.playing);
        assert!(!state.listening);
        assert!(!state.recognition_active);
        assert_eq!(h.recognizer.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn speak_is_ignored_when_voice_responses_are_disabled() {
        let api = MockServerApi::new().with_initial_state(InitialState {
            voice_input_active: false,
            voice_responses_enabled: false,
        });
        let (server, rx) = mpsc::unbounded_channel();
        api.push_connection(MockConnection::Open(rx));
        let h = spawn_with(streaming_config(), MockRecognizer::new(), api);
        h.handle.start_listening().await.unwrap();
        settle().await;

        server
            .send(r#"{"type":"speak","text":"hi"}"#.into())
            .unwrap();
        settle().await;

        assert!(h.output.spoken().is_empty());
        assert!(h.handle.state().recognition_active);
        assert!(!h.handle.state().voice_responses_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_status_and_ptt_events_are_applied() {
        let api = MockServerApi::new();
        let (server, rx) = mpsc::unbounded_channel();
        api.push_connection(MockConnection::Open(rx));
        let h = spawn_with(
            {
                let mut c = streaming_config();
                c.dispatch.mode = ModeKind::PushToTalk;
                c
            },
            MockRecognizer::new(),
            api,
        );
        settle().await;

        server
            .send(r#"{"type":"waitStatus","isWaiting":true}"#.into())
            .unwrap();
        server
            .send(r#"{"type":"ptt","action":"start"}"#.into())
            .unwrap();
        settle().await;

        let state = h.handle.state();
        assert!(state.peer_waiting);
        assert_eq!(state.ptt, PttState::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_stream_shows_reconnecting_until_reconnected() {
        // No scripted connection: the first attempt is refused.
        let h = spawn_with(streaming_config(), MockRecognizer::new(), MockServerApi::new());
        settle().await;
        let state = h.handle.state();
        assert!(state.reconnecting);
        assert_eq!(state.connection, ConnectionState::Disconnected);
        assert!(state.last_error.is_some());

        let (_server, rx) = mpsc::unbounded_channel();
        h.api.push_connection(MockConnection::Open(rx));
        advance(3_000).await;
        let state = h.handle.state();
        assert!(!state.reconnecting);
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(state.last_error, None);
    }

    // -- shutdown ------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_recognition_and_closes_the_handle() {
        let h = spawn(config());
        h.handle.start_listening().await.unwrap();
        settle().await;

        h.handle.shutdown().unwrap();
        h.task.await.unwrap();

        assert_eq!(h.recognizer.stops(), 1);
        assert_eq!(h.api.mic_states(), vec![true, false]);
        assert_eq!(h.handle.send_now(), Err(SessionError::Closed));
    }
}
