//! Long-lived, self-reconnecting server-push client.
//!
//! # Connection loop
//!
//! ```text
//! ┌─▶ Connecting ── fetch initial state ── open stream ──▶ Connected
//! │                                                         │
//! │                                          messages ──▶ StreamUpdate::Event
//! │                                                         │ error / EOF
//! └── sleep(reconnect_delay) ◀── Error(reason) ◀── Disconnected
//! ```
//!
//! The loop owns the only stream, so at most one connection exists at a
//! time.  Reconnection never gives up; the loop ends only when the receiver
//! of [`StreamUpdate`]s is dropped or the task is aborted.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::server::{InitialState, MessageStream, ServerApi, ServerError};

use super::events::ServerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// What the client reports to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    State(ConnectionState),
    InitialState(InitialState),
    Event(ServerEvent),
    /// The connection dropped (or could not be opened) for this reason.
    Error(String),
}

pub struct EventStreamClient {
    api: Arc<dyn ServerApi>,
    reconnect_delay: Duration,
    updates: mpsc::UnboundedSender<StreamUpdate>,
}

impl EventStreamClient {
    pub fn new(
        api: Arc<dyn ServerApi>,
        reconnect_delay: Duration,
        updates: mpsc::UnboundedSender<StreamUpdate>,
    ) -> Self {
        Self {
            api,
            reconnect_delay,
            updates,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        loop {
            if !self.report(StreamUpdate::State(ConnectionState::Connecting)) {
                return;
            }

            // Resync anything that changed while we were away.  A failed
            // fetch does not hold up the stream.
            match self.api.fetch_initial_state().await {
                Ok(state) => {
                    self.report(StreamUpdate::InitialState(state));
                }
                Err(e) => log::warn!("stream: initial state fetch failed: {e}"),
            }

            let reason = match self.api.open_event_stream().await {
                Ok(mut stream) => {
                    log::info!("stream: connected");
                    self.report(StreamUpdate::State(ConnectionState::Connected));
                    self.forward(&mut stream).await
                }
                Err(e) => e,
            };

            log::warn!(
                "stream: disconnected ({reason}), reconnecting in {:?}",
                self.reconnect_delay
            );
            self.report(StreamUpdate::State(ConnectionState::Disconnected));
            if !self.report(StreamUpdate::Error(reason.to_string())) {
                return;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// Forward messages until the stream fails or ends.
    async fn forward(&self, stream: &mut MessageStream) -> ServerError {
        while let Some(item) = stream.next().await {
            let data = match item {
                Ok(data) => data,
                Err(e) => return e,
            };
            match ServerEvent::parse(&data) {
                Ok(ServerEvent::Unknown) => {
                    log::debug!("stream: ignoring unknown event {data}");
                }
                Ok(event) => {
                    if !self.report(StreamUpdate::Event(event)) {
                        return ServerError::StreamEnded;
                    }
                }
                Err(e) => log::warn!("stream: malformed event {data:?}: {e}"),
            }
        }
        ServerError::StreamEnded
    }

    /// `false` once nobody is listening any more.
    fn report(&self, update: StreamUpdate) -> bool {
        self.updates.send(update).is_ok()
    }
}
