//! Server-push event stream: message types and the reconnecting client.

pub mod client;
pub mod events;

pub use client::{ConnectionState, EventStreamClient, StreamUpdate};
pub use events::{PttAction, ServerEvent};
