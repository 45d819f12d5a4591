//! HTTP client for the agent server.
//!
//! [`ServerApi`] is the seam the session talks through; [`HttpServerApi`]
//! implements it over `reqwest`.  No URL is hardcoded beyond the endpoint
//! paths: the base URL and timeouts come from [`ServerConfig`].
//!
//! | Operation            | Request                                   |
//! |----------------------|-------------------------------------------|
//! | submit utterance     | `POST /api/potential-utterances {text}`   |
//! | initial state        | `GET  /api/voice-preferences`             |
//! | mic active           | `POST /api/voice-input-state {active}`    |
//! | system speech        | `POST /api/speak-system {text, rate}`     |
//! | event stream         | `GET  /api/tts-events` (event-stream)     |

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ServerConfig;

use super::sse::SseDecoder;

// ---------------------------------------------------------------------------
// ServerError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum ServerError {
    /// Transport or connection failure.
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("server request timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: &'static str, status: u16 },

    /// The response body was not the expected JSON.
    #[error("failed to parse server response: {0}")]
    Parse(String),

    /// The event stream ended without an error.
    #[error("event stream closed by server")]
    StreamEnded,
}

impl From<reqwest::Error> for ServerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServerError::Timeout
        } else if e.is_decode() {
            ServerError::Parse(e.to_string())
        } else {
            ServerError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Snapshot fetched on every (re)connect.  Missing fields mean the server
/// predates them: input off, responses on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitialState {
    pub voice_input_active: bool,
    pub voice_responses_enabled: bool,
}

impl Default for InitialState {
    fn default() -> Self {
        Self {
            voice_input_active: false,
            voice_responses_enabled: true,
        }
    }
}

#[derive(Serialize)]
struct UtteranceBody<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct MicStateBody {
    active: bool,
}

#[derive(Serialize)]
struct SpeakBody<'a> {
    text: &'a str,
    rate: u32,
}

/// Decoded `data` payloads of the server-push stream.
pub type MessageStream = BoxStream<'static, Result<String, ServerError>>;

// ---------------------------------------------------------------------------
// ServerApi trait
// ---------------------------------------------------------------------------

/// Everything the session needs from the server.
///
/// Implementors must be `Send + Sync` so they can be shared across tasks
/// behind an `Arc<dyn ServerApi>`.
#[async_trait]
pub trait ServerApi: Send + Sync {
    async fn submit_utterance(&self, text: &str) -> Result<(), ServerError>;

    async fn fetch_initial_state(&self) -> Result<InitialState, ServerError>;

    async fn set_mic_active(&self, active: bool) -> Result<(), ServerError>;

    /// Ask the server to speak `text` with the system voice at `rate_wpm`
    /// words per minute.  Resolves when playback has finished.
    async fn speak_system(&self, text: &str, rate_wpm: u32) -> Result<(), ServerError>;

    async fn open_event_stream(&self) -> Result<MessageStream, ServerError>;
}

// ---------------------------------------------------------------------------
// HttpServerApi
// ---------------------------------------------------------------------------

pub struct HttpServerApi {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpServerApi {
    /// The client itself has no overall timeout so the event stream can stay
    /// open indefinitely; the short requests carry `request_timeout_secs`
    /// each.
    pub fn from_config(config: &ServerConfig) -> Self {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        endpoint: &'static str,
        body: &B,
    ) -> Result<reqwest::Response, ServerError> {
        let resp = self
            .client
            .post(self.url(endpoint))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;
        check_status(endpoint, resp)
    }
}

fn check_status(
    endpoint: &'static str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, ServerError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(ServerError::Status {
            endpoint,
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl ServerApi for HttpServerApi {
    async fn submit_utterance(&self, text: &str) -> Result<(), ServerError> {
        self.post_json("/api/potential-utterances", &UtteranceBody { text })
            .await?;
        log::debug!("server: utterance accepted ({} chars)", text.len());
        Ok(())
    }

    async fn fetch_initial_state(&self) -> Result<InitialState, ServerError> {
        let endpoint = "/api/voice-preferences";
        let resp = self
            .client
            .get(self.url(endpoint))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let state = check_status(endpoint, resp)?
            .json::<InitialState>()
            .await
            .map_err(|e| ServerError::Parse(e.to_string()))?;
        Ok(state)
    }

    async fn set_mic_active(&self, active: bool) -> Result<(), ServerError> {
        self.post_json("/api/voice-input-state", &MicStateBody { active })
            .await?;
        Ok(())
    }

    async fn speak_system(&self, text: &str, rate_wpm: u32) -> Result<(), ServerError> {
        // Playback runs for as long as the text takes to say, so no
        // per-request timeout here.
        let endpoint = "/api/speak-system";
        let resp = self
            .client
            .post(self.url(endpoint))
            .json(&SpeakBody {
                text,
                rate: rate_wpm,
            })
            .send()
            .await?;
        check_status(endpoint, resp)?;
        Ok(())
    }

    async fn open_event_stream(&self) -> Result<MessageStream, ServerError> {
        let endpoint = "/api/tts-events";
        let resp = self
            .client
            .get(self.url(endpoint))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = check_status(endpoint, resp)?;

        let mut decoder = SseDecoder::new();
        let messages = resp.bytes_stream().flat_map(move |chunk| {
            let items: Vec<Result<String, ServerError>> = match chunk {
                Ok(bytes) => decoder.feed(&bytes).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(ServerError::from(e))],
            };
            stream::iter(items)
        });
        Ok(messages.boxed())
    }
}

// ---------------------------------------------------------------------------
// MockServerApi  (test-only)
// ---------------------------------------------------------------------------

/// Records every call in order.  Event streams are handed out from a queue
/// of scripted connections; each connection is a list of messages and an
/// optional terminating error.
#[cfg(test)]
pub struct MockServerApi {
    inner: std::sync::Mutex<MockInner>,
}

#[cfg(test)]
#[derive(Default)]
struct MockInner {
    calls: Vec<String>,
    submitted: Vec<String>,
    mic_states: Vec<bool>,
    spoken: Vec<String>,
    fail_submissions: usize,
    initial_state: InitialState,
    streams: std::collections::VecDeque<MockConnection>,
}

#[cfg(test)]
pub enum MockConnection {
    /// The connection attempt itself fails.
    Refused,
    /// Messages followed by an error (or a clean close when `None`).
    Messages(Vec<String>, Option<ServerError>),
    /// Stays open until the receiver side is dropped.
    Open(tokio::sync::mpsc::UnboundedReceiver<String>),
}

#[cfg(test)]
impl MockServerApi {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(MockInner {
                initial_state: InitialState {
                    voice_input_active: false,
                    voice_responses_enabled: true,
                },
                ..MockInner::default()
            }),
        }
    }

    pub fn with_initial_state(self, state: InitialState) -> Self {
        self.inner.lock().unwrap().initial_state = state;
        self
    }

    /// The next `n` submissions fail with HTTP 500.
    pub fn fail_next_submissions(&self, n: usize) {
        self.inner.lock().unwrap().fail_submissions = n;
    }

    pub fn push_connection(&self, conn: MockConnection) {
        self.inner.lock().unwrap().streams.push_back(conn);
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn submitted(&self) -> Vec<String> {
        self.inner.lock().unwrap().submitted.clone()
    }

    pub fn mic_states(&self) -> Vec<bool> {
        self.inner.lock().unwrap().mic_states.clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.inner.lock().unwrap().spoken.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ServerApi for MockServerApi {
    async fn submit_utterance(&self, text: &str) -> Result<(), ServerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("submit:{text}"));
        if inner.fail_submissions > 0 {
            inner.fail_submissions -= 1;
            return Err(ServerError::Status {
                endpoint: "/api/potential-utterances",
                status: 500,
            });
        }
        inner.submitted.push(text.to_string());
        Ok(())
    }

    async fn fetch_initial_state(&self) -> Result<InitialState, ServerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push("initial-state".into());
        Ok(inner.initial_state)
    }

    async fn set_mic_active(&self, active: bool) -> Result<(), ServerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("mic:{active}"));
        inner.mic_states.push(active);
        Ok(())
    }

    async fn speak_system(&self, text: &str, _rate_wpm: u32) -> Result<(), ServerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("speak:{text}"));
        inner.spoken.push(text.to_string());
        Ok(())
    }

    async fn open_event_stream(&self) -> Result<MessageStream, ServerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push("open-stream".into());
        match inner.streams.pop_front() {
            None | Some(MockConnection::Refused) => {
                Err(ServerError::Request("connection refused".into()))
            }
            Some(MockConnection::Messages(messages, error)) => {
                let items = messages
                    .into_iter()
                    .map(Ok)
                    .chain(error.map(Err))
                    .collect::<Vec<_>>();
                Ok(stream::iter(items).boxed())
            }
            Some(MockConnection::Open(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|msg| (Ok(msg), rx))
            })
            .boxed()),
        }
    }
}
