//! Session settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every struct is `#[serde(default)]`, so a partial `settings.toml` fills
//! the missing keys from the defaults below.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// ModeKind
// ---------------------------------------------------------------------------

/// Selects when accumulated speech becomes a dispatched utterance.
///
/// | Variant     | Dispatch trigger                              |
/// |-------------|-----------------------------------------------|
/// | AutoSend    | a pause in speech (silence timer)             |
/// | TriggerWord | a configured word spoken at the end           |
/// | PushToTalk  | releasing (or toggling off) the talk key      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    #[default]
    AutoSend,
    TriggerWord,
    PushToTalk,
}

impl ModeKind {
    /// Short label used in logs and status output.
    pub fn label(&self) -> &'static str {
        match self {
            ModeKind::AutoSend => "auto-send",
            ModeKind::TriggerWord => "trigger-word",
            ModeKind::PushToTalk => "push-to-talk",
        }
    }
}

// ---------------------------------------------------------------------------
// PttStyle
// ---------------------------------------------------------------------------

/// How the push-to-talk key drives recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PttStyle {
    /// Record while the key is held down.
    #[default]
    Hold,
    /// Each press flips recording on or off.
    Toggle,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Connection details for the agent server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Per-request timeout for the short JSON endpoints.  The event stream
    /// itself has no timeout.
    pub request_timeout_secs: u64,
    /// Fixed delay before each event-stream reconnect.
    pub reconnect_delay_ms: u64,
    /// Whether to open the server-push event stream at all.
    pub event_stream: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5111".into(),
            request_timeout_secs: 10,
            reconnect_delay_ms: 3_000,
            event_stream: true,
        }
    }
}

impl ServerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// RecognitionConfig
// ---------------------------------------------------------------------------

/// Recognition engine and auto-restart settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// BCP-47 recognition language handed to the backend on every session
    /// start.
    pub language: String,
    /// Restarts allowed after consecutive unsolicited session ends before
    /// the engine gives up.
    pub max_restart_attempts: u32,
    /// Backoff per attempt; the n-th restart waits `n × base`.
    pub restart_base_delay_ms: u64,
    /// Upper bound on a single backoff delay.
    pub restart_max_delay_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            language: "en-US".into(),
            max_restart_attempts: 5,
            restart_base_delay_ms: 1_000,
            restart_max_delay_ms: 5_000,
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchConfig
// ---------------------------------------------------------------------------

/// Dispatch-mode selection and deduplication windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Mode active at startup.
    pub mode: ModeKind,
    /// Trigger word for [`ModeKind::TriggerWord`].  Empty disables it.
    pub trigger_word: String,
    /// Silence that ends an utterance in [`ModeKind::AutoSend`].
    pub silence_delay_ms: u64,
    /// Identical text inside this window is dispatched only once.
    pub dedup_window_ms: u64,
    /// Any dispatch this soon after the previous one is dropped.
    pub rapid_fire_guard_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: ModeKind::default(),
            trigger_word: "send".into(),
            silence_delay_ms: 1_500,
            dedup_window_ms: 3_000,
            rapid_fire_guard_ms: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// PttConfig
// ---------------------------------------------------------------------------

/// Push-to-talk binding and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PttConfig {
    /// Key combination, e.g. `"Ctrl+Space"` or `"F9"`.
    pub key: String,
    /// Hold or toggle.
    pub style: PttStyle,
    /// Delay between the press and starting the engine, so the key click is
    /// not captured.
    pub start_delay_ms: u64,
    /// Delay between the release and stopping the engine, so the last words
    /// are not cut off.
    pub stop_delay_ms: u64,
    /// Recordings shorter than this (after the start delay) are discarded.
    pub min_duration_ms: u64,
    /// Wait after stopping the engine for trailing results.
    pub trailing_results_ms: u64,
}

impl Default for PttConfig {
    fn default() -> Self {
        Self {
            key: "Ctrl+Space".into(),
            style: PttStyle::default(),
            start_delay_ms: 100,
            stop_delay_ms: 500,
            min_duration_ms: 300,
            trailing_results_ms: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Text-to-speech playback and microphone gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Stop recognition while the system speaks.
    pub pause_mic_during_playback: bool,
    /// How long to wait for the engine to report its session closed before
    /// playing anyway.
    pub engine_stop_timeout_ms: u64,
    /// Speech rate multiplier; `1.0` is 150 words per minute.
    pub speech_rate: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            pause_mic_during_playback: true,
            engine_stop_timeout_ms: 500,
            speech_rate: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_relay::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub recognition: RecognitionConfig,
    pub dispatch: DispatchConfig,
    pub ptt: PttConfig,
    pub playback: PlaybackConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// so callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
