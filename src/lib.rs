//! Voice input and output for a conversational agent.
//!
//! Speech recognized on this machine is turned into utterances and posted to
//! the agent's server; the server's replies arrive over an event stream and
//! are spoken back, with the microphone held off while they play.

pub mod config;
pub mod dispatch;
pub mod hotkey;
pub mod playback;
pub mod recognition;
pub mod server;
pub mod session;
pub mod stream;
