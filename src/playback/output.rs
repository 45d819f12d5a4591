//! Speech output backends.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::server::{ServerApi, ServerError};

#[derive(Debug, Clone, Error)]
pub enum PlaybackError {
    #[error("speech playback failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Speaks text aloud.  `speak` resolves once the audio has finished.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), PlaybackError>;
}

/// Has the server speak with the operating system voice.
pub struct SystemVoiceOutput {
    api: Arc<dyn ServerApi>,
    rate_wpm: u32,
}

impl SystemVoiceOutput {
    /// `speech_rate` 1.0 is 150 words per minute.
    pub fn new(api: Arc<dyn ServerApi>, speech_rate: f32) -> Self {
        Self {
            api,
            rate_wpm: words_per_minute(speech_rate),
        }
    }
}

pub fn words_per_minute(speech_rate: f32) -> u32 {
    (speech_rate.max(0.1) * 150.0).round() as u32
}

#[async_trait]
impl SpeechOutput for SystemVoiceOutput {
    async fn speak(&self, text: &str) -> Result<(), PlaybackError> {
        log::debug!("playback: system voice at {} wpm", self.rate_wpm);
        self.api.speak_system(text, self.rate_wpm).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockSpeechOutput  (test-only)
// ---------------------------------------------------------------------------

/// Takes `duration` of (virtual) time per utterance and records what it said.
#[cfg(test)]
pub struct MockSpeechOutput {
    duration: std::time::Duration,
    fail: bool,
    spoken: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockSpeechOutput {
    pub fn new(duration: std::time::Duration) -> Self {
        Self {
            duration,
            fail: false,
            spoken: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failing(duration: std::time::Duration) -> Self {
        Self {
            fail: true,
            ..Self::new(duration)
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl SpeechOutput for MockSpeechOutput {
    async fn speak(&self, text: &str) -> Result<(), PlaybackError> {
        self.spoken.lock().unwrap().push(text.to_string());
        tokio::time::sleep(self.duration).await;
        if self.fail {
            return Err(PlaybackError::Failed("audio device lost".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::MockServerApi;

    #[test]
    fn rate_maps_to_words_per_minute() {
        assert_eq!(words_per_minute(1.0), 150);
        assert_eq!(words_per_minute(1.5), 225);
        assert_eq!(words_per_minute(0.0), 15);
    }

    #[tokio::test]
    async fn system_voice_goes_through_the_server() {
        let api = Arc::new(MockServerApi::new());
        let dyn_api: Arc<dyn ServerApi> = api.clone();
        let output = SystemVoiceOutput::new(dyn_api, 1.0);

        output.speak("all done").await.unwrap();
        assert_eq!(api.spoken(), vec!["all done"]);
    }
}
