//! Push-stream transport for live updates.
//!
//! The backend exposes a server-sent-events endpoint emitting named events
//! (`connected`, `flag.*`, `config.*`, `ai_config.*`). The core engine only
//! depends on the [`StreamTransport`] trait so tests can script connections
//! and failures; [`SseTransport`] is the production implementation reading
//! `text/event-stream` over the same HTTP stack as the request gateway.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::form_urlencoded;

/// Errors produced by the push-stream transport.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The transport is structurally unavailable in this environment; the
    /// channel falls back to polling immediately instead of retrying.
    #[error("push transport unavailable: {0}")]
    Unsupported(String),
    /// The connection attempt was rejected or failed to handshake.
    #[error("stream connection failed: {0}")]
    Connect(String),
    /// An established stream broke mid-session.
    #[error("stream closed: {0}")]
    Closed(String),
}

/// High-level category of an inbound push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Handshake acknowledgement; resets the reconnect counter.
    Connected,
    /// Any flag mutation; triggers a full flag re-fetch.
    Flag,
    /// Any config mutation; triggers a full config re-fetch.
    Config,
    /// Any AI config mutation; only a notification, consumers re-fetch.
    AiConfig,
}

/// A single named event received from the push stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    /// Event name, e.g. `flag.toggled` or `config.value_updated`.
    pub name: String,
    /// JSON payload carried in the data field (`Null` when absent).
    pub data: Value,
}

impl PushEvent {
    /// Maps the event name to its category, if it is one we act on.
    pub fn category(&self) -> Option<ChangeKind> {
        if self.name == "connected" {
            return Some(ChangeKind::Connected);
        }
        if self.name.starts_with("flag.") {
            return Some(ChangeKind::Flag);
        }
        if self.name.starts_with("config.") {
            return Some(ChangeKind::Config);
        }
        if self.name.starts_with("ai_config.") {
            return Some(ChangeKind::AiConfig);
        }
        None
    }
}

/// Stream of push events terminated by an error or server close.
pub type EventStream = BoxStream<'static, Result<PushEvent, StreamError>>;

/// Long-lived server-to-client event channel.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Establishes a fresh connection and returns the event stream.
    async fn connect(&self) -> Result<EventStream, StreamError>;
}

/// Incremental parser for the `text/event-stream` wire format.
///
/// Feed it one line at a time (without the trailing newline); it yields a
/// [`PushEvent`] on each blank-line dispatch.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Consumes one line, returning a completed event on dispatch.
    pub(crate) fn feed_line(&mut self, line: &str) -> Option<PushEvent> {
        if line.is_empty() {
            return self.flush();
        }
        if line.starts_with(':') {
            // Comment lines keep the connection warm; nothing to record.
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // `id` and `retry` are valid SSE fields we have no use for.
            _ => {}
        }
        None
    }

    /// Dispatches the buffered event, if any fields were accumulated.
    fn flush(&mut self) -> Option<PushEvent> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        // SSE defaults the event type to "message"; the backend always names
        // its events, so this mostly covers malformed frames.
        let name = self.event.take().unwrap_or_else(|| "message".to_string());
        let raw = self.data.join("\n");
        self.data.clear();
        let data = if raw.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        };
        Some(PushEvent { name, data })
    }
}

/// Production SSE transport.
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: Client,
    url: String,
}

impl SseTransport {
    /// Builds a transport for `<base_url>/stream?api_key=<key>`; the
    /// environment hint rides along when configured.
    pub fn new(
        base_url: &str,
        api_key: &str,
        environment: Option<&str>,
    ) -> Result<Self, StreamError> {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("api_key", api_key);
        if let Some(environment) = environment {
            query.append_pair("environment", environment);
        }
        let url = format!("{}/stream?{}", base_url, query.finish());

        // No overall timeout here: the stream is expected to stay open.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| StreamError::Unsupported(err.to_string()))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl StreamTransport for SseTransport {
    /// Opens the SSE connection and adapts the byte stream into events.
    async fn connect(&self) -> Result<EventStream, StreamError> {
        debug!(url = %self.url, "flagkit opening push stream");
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .send()
            .await
            .map_err(|err| StreamError::Connect(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Connect(format!(
                "stream endpoint returned status {status}"
            )));
        }

        let state = SseState {
            bytes: response.bytes_stream().boxed(),
            buffer: String::new(),
            parser: SseParser::default(),
            pending: VecDeque::new(),
        };
        Ok(futures_util::stream::unfold(state, next_event).boxed())
    }
}

/// Adapter state turning a byte stream into parsed events.
struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: String,
    parser: SseParser,
    pending: VecDeque<PushEvent>,
}

/// Pulls bytes until a full event is available (or the stream ends).
async fn next_event(mut state: SseState) -> Option<(Result<PushEvent, StreamError>, SseState)> {
    loop {
        if let Some(event) = state.pending.pop_front() {
            return Some((Ok(event), state));
        }
        match state.bytes.next().await {
            Some(Ok(chunk)) => {
                state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = state.buffer.find('\n') {
                    let line = state.buffer[..pos].trim_end_matches('\r').to_string();
                    state.buffer.drain(..=pos);
                    if let Some(event) = state.parser.feed_line(&line) {
                        state.pending.push_back(event);
                    }
                }
            }
            Some(Err(err)) => {
                return Some((Err(StreamError::Closed(err.to_string())), state));
            }
            // Server closed the connection; the channel treats EOF as a
            // stream error and enters its reconnect path.
            None => return None,
        }
    }
}
