//! State shared between the client facade and its background tasks.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::cache::CacheKind;
use crate::config::ClientConfig;
use crate::events::{EventBus, EventName};
use crate::http::RequestGateway;
use crate::model::{ConfigsEnvelope, FlagsEnvelope};
use crate::stream::StreamTransport;

use super::state::ClientState;

/// Everything the facade and the background tasks need to agree on.
pub(crate) struct ClientShared {
    pub gateway: Arc<dyn RequestGateway>,
    pub transport: Option<Arc<dyn StreamTransport>>,
    pub state: Mutex<ClientState>,
    pub bus: EventBus,
    pub config: ClientConfig,
    pub ready_tx: watch::Sender<bool>,
}

impl ClientShared {
    /// Appends the environment hint to a path, preserving existing queries.
    pub fn path_with_environment(&self, path: &str) -> String {
        match &self.config.environment {
            Some(environment) => {
                let sep = if path.contains('?') { '&' } else { '?' };
                let encoded: String =
                    url::form_urlencoded::byte_serialize(environment.as_bytes()).collect();
                format!("{path}{sep}environment={encoded}")
            }
            None => path.to_string(),
        }
    }

    /// Fetches the full flag set, updates the cache, and announces the
    /// change. Failures are recorded and surfaced as an `error` event; the
    /// previous cache contents stay in place.
    pub async fn refresh_flags(&self) -> Option<Map<String, Value>> {
        let path = self.path_with_environment("/flags");
        match self.gateway.request(&path).await {
            Ok(body) => match serde_json::from_value::<FlagsEnvelope>(body) {
                Ok(envelope) => {
                    let mut state = self.state.lock().await;
                    state.cache.set_all(CacheKind::Flags, envelope.flags.clone());
                    drop(state);
                    debug!(count = envelope.flags.len(), "flagkit flags refreshed");
                    let payload = Value::Object(envelope.flags);
                    self.bus.emit(EventName::FlagsUpdated, &payload);
                    match payload {
                        Value::Object(flags) => Some(flags),
                        _ => None,
                    }
                }
                Err(err) => {
                    self.note_error(format!("failed to decode flags response: {err}"))
                        .await;
                    None
                }
            },
            Err(err) => {
                self.note_error(format!("failed to fetch flags: {err}")).await;
                None
            }
        }
    }

    /// Fetches the full config set; mirrors [`Self::refresh_flags`] and also
    /// emits the legacy `remote-config-updated` alias.
    pub async fn refresh_configs(&self) -> Option<Map<String, Value>> {
        let path = self.path_with_environment("/configs");
        match self.gateway.request(&path).await {
            Ok(body) => match serde_json::from_value::<ConfigsEnvelope>(body) {
                Ok(envelope) => {
                    let mut values = Map::new();
                    for entry in envelope.configs {
                        values.insert(entry.key, entry.value);
                    }
                    let mut state = self.state.lock().await;
                    state.cache.set_all(CacheKind::Configs, values.clone());
                    drop(state);
                    debug!(count = values.len(), "flagkit configs refreshed");
                    let payload = Value::Object(values);
                    self.bus.emit(EventName::ConfigsUpdated, &payload);
                    self.bus.emit(EventName::RemoteConfigUpdated, &payload);
                    match payload {
                        Value::Object(values) => Some(values),
                        _ => None,
                    }
                }
                Err(err) => {
                    self.note_error(format!("failed to decode configs response: {err}"))
                        .await;
                    None
                }
            },
            Err(err) => {
                self.note_error(format!("failed to fetch configs: {err}"))
                    .await;
                None
            }
        }
    }

    /// Refreshes flags and configs concurrently.
    pub async fn refresh_all(&self) {
        tokio::join!(self.refresh_flags(), self.refresh_configs());
    }

    /// Initial fetch. The client becomes ready whether or not the fetch
    /// succeeded; callers fall back to defaults until data arrives.
    pub async fn startup(&self) {
        self.refresh_all().await;
        let _ = self.ready_tx.send(true);
        self.bus.emit(EventName::Ready, &Value::Null);
    }

    /// Records a non-fatal failure and notifies `error` listeners.
    pub async fn note_error(&self, message: String) {
        warn!(error = %message, "flagkit client error");
        let mut state = self.state.lock().await;
        state.last_error = Some(message.clone());
        drop(state);
        self.bus
            .emit(EventName::Error, &json!({ "message": message }));
    }
}
