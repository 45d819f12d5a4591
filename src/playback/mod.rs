//! Text-to-speech playback and the microphone gate around it.

pub mod gate;
pub mod output;

pub use gate::{GateAction, PlaybackGate, PlaybackRequest};
pub use output::{words_per_minute, PlaybackError, SpeechOutput, SystemVoiceOutput};

#[cfg(test)]
pub use output::MockSpeechOutput;
