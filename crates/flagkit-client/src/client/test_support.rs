//! Scripted gateway and transport fixtures for client tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::http::{HttpError, RequestGateway};
use crate::stream::{EventStream, PushEvent, StreamError, StreamTransport};

use super::core::FlagClient;

/// Canned response for a routed path.
#[derive(Debug, Clone)]
pub(crate) enum MockResponse {
    Json(Value),
    Status(u16),
}

/// In-memory gateway: routes keyed by path (query stripped), every request
/// recorded with its full path and query.
#[derive(Default)]
pub(crate) struct MockGateway {
    routes: StdMutex<HashMap<String, MockResponse>>,
    calls: StdMutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_json(&self, path: &str, body: Value) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), MockResponse::Json(body));
    }

    pub fn set_status(&self, path: &str, status: u16) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), MockResponse::Status(status));
    }

    /// Every request made so far, full path and query, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests whose path starts with `prefix`.
    pub fn calls_for(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|path| path.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl RequestGateway for MockGateway {
    async fn request(&self, path_and_query: &str) -> Result<Value, HttpError> {
        self.calls
            .lock()
            .unwrap()
            .push(path_and_query.to_string());
        let path = path_and_query
            .split('?')
            .next()
            .unwrap_or(path_and_query)
            .to_string();
        let response = self.routes.lock().unwrap().get(&path).cloned();
        match response {
            Some(MockResponse::Json(body)) => Ok(body),
            Some(MockResponse::Status(status)) => Err(status_error(status, &path)),
            None => Err(HttpError::NotFound(path)),
        }
    }
}

fn status_error(status: u16, path: &str) -> HttpError {
    match status {
        401 => HttpError::Unauthorized,
        404 => HttpError::NotFound(path.to_string()),
        400..=499 => HttpError::Client(status),
        _ => HttpError::Server(status),
    }
}

/// One scripted connection attempt.
pub(crate) struct MockConnect {
    /// Events the stream yields before going quiet, or a connect error.
    pub outcome: Result<Vec<Result<PushEvent, StreamError>>, StreamError>,
    /// Keep the stream open after the scripted events instead of closing.
    pub hold_open: bool,
}

impl MockConnect {
    pub fn ok(events: Vec<Result<PushEvent, StreamError>>) -> Self {
        Self {
            outcome: Ok(events),
            hold_open: true,
        }
    }

    pub fn fail(message: &str) -> Self {
        Self {
            outcome: Err(StreamError::Connect(message.to_string())),
            hold_open: false,
        }
    }
}

/// Transport replaying scripted connection attempts in order. Attempts past
/// the script fail with a connect error.
pub(crate) struct MockTransport {
    connects: StdMutex<Vec<MockConnect>>,
    attempts: AtomicUsize,
}

impl MockTransport {
    pub fn new(connects: Vec<MockConnect>) -> Arc<Self> {
        Arc::new(Self {
            connects: StdMutex::new(connects),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn connect(&self) -> Result<EventStream, StreamError> {
        let index = self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut connects = self.connects.lock().unwrap();
        if index >= connects.len() {
            return Err(StreamError::Connect("script exhausted".to_string()));
        }
        let connect = connects.remove(0);
        match connect.outcome {
            Err(err) => Err(err),
            Ok(events) => {
                let scripted = futures_util::stream::iter(events);
                if connect.hold_open {
                    Ok(scripted.chain(futures_util::stream::pending()).boxed())
                } else {
                    Ok(scripted.boxed())
                }
            }
        }
    }
}

pub(crate) fn push_event(name: &str, data: Value) -> Result<PushEvent, StreamError> {
    Ok(PushEvent {
        name: name.to_string(),
        data,
    })
}

/// Config pointing at the mock gateway; no polling, no realtime.
pub(crate) fn test_config() -> ClientConfig {
    ClientConfig {
        api_key: "test-key".to_string(),
        base_url: "http://mock".to_string(),
        ..ClientConfig::default()
    }
}

pub(crate) fn polling_config(interval: Duration) -> ClientConfig {
    ClientConfig {
        refresh_interval: interval,
        ..test_config()
    }
}

pub(crate) fn realtime_config() -> ClientConfig {
    ClientConfig {
        realtime: true,
        ..test_config()
    }
}

/// Default flag and config routes used by most tests.
pub(crate) fn seed_defaults(gateway: &MockGateway) {
    gateway.set_json(
        "/flags",
        json!({ "flags": { "bool_flag": true, "string_flag": "hello" } }),
    );
    gateway.set_json(
        "/configs",
        json!({ "configs": [ { "key": "welcome", "value": "hi" } ] }),
    );
}

pub(crate) fn build_client(
    config: ClientConfig,
    gateway: Arc<MockGateway>,
    transport: Option<Arc<MockTransport>>,
) -> FlagClient {
    FlagClient::with_parts(
        config.sanitise(),
        gateway,
        transport.map(|t| t as Arc<dyn StreamTransport>),
    )
}
