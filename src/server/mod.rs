//! Agent server interface: HTTP endpoints and the event-stream wire format.

pub mod client;
pub mod sse;

pub use client::{HttpServerApi, InitialState, MessageStream, ServerApi, ServerError};
pub use sse::SseDecoder;

#[cfg(test)]
pub use client::{MockConnection, MockServerApi};
