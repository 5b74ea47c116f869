//! Client facade: construction, evaluation operations, and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheKind, ExpiryPolicy, ValueCache};
use crate::config::ClientConfig;
use crate::context::EvaluationContext;
use crate::events::{EventBus, EventName, Subscription};
use crate::http::{HttpError, HttpGateway, RequestGateway};
use crate::model::{
    AiConfigEnvelope, AiConfigFile, AiConfigFilter, AiConfigKind, AiConfigsEnvelope, ConfigDetail,
    FlagDetail,
};
use crate::stream::{SseTransport, StreamTransport};

use super::channel::{run_channel, ChannelCommand};
use super::shared::ClientShared;
use super::state::{ClientSnapshot, ClientState};

/// Fatal construction errors. Everything after construction degrades to
/// cached values or caller defaults instead of failing.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No API key was supplied in config or environment.
    #[error("an API key is required; set `api_key` or FLAGKIT_API_KEY")]
    MissingCredential,
    /// The HTTP stack could not be constructed.
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Evaluation client for flags, remote configs, and AI configs.
///
/// Construction spawns the initial fetch and the live-update channel;
/// [`FlagClient::ready`] awaits the former. All evaluation methods are
/// infallible by design: on any failure they fall back to cached values,
/// then to the caller-supplied default, and report through the `error`
/// event instead of returning `Err`.
pub struct FlagClient {
    shared: Arc<ClientShared>,
    shutdown: broadcast::Sender<()>,
    commands: mpsc::Sender<ChannelCommand>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl FlagClient {
    /// Builds a client against the hosted backend.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let config = config.sanitise();
        if config.api_key.is_empty() {
            return Err(ClientError::MissingCredential);
        }
        let gateway =
            HttpGateway::new(&config.base_url, &config.api_key, config.request_timeout)?
                .into_shared();
        let transport: Option<Arc<dyn StreamTransport>> = match SseTransport::new(
            &config.base_url,
            &config.api_key,
            config.environment.as_deref(),
        ) {
            Ok(transport) => Some(Arc::new(transport)),
            Err(err) => {
                warn!(error = %err, "flagkit push transport unavailable");
                None
            }
        };
        Ok(Self::with_parts(config, gateway, transport))
    }

    /// Builds a client from pre-constructed transports. The entry point for
    /// tests and for embedders bringing their own HTTP stack.
    pub fn with_parts(
        config: ClientConfig,
        gateway: Arc<dyn RequestGateway>,
        transport: Option<Arc<dyn StreamTransport>>,
    ) -> Self {
        let cache = ValueCache::new(ExpiryPolicy::from_ttl(config.cache_ttl));
        let (ready_tx, _ready_rx) = watch::channel(false);
        let shared = Arc::new(ClientShared {
            gateway,
            transport,
            state: Mutex::new(ClientState::new(cache)),
            bus: EventBus::new(),
            config,
            ready_tx,
        });

        let (shutdown, _) = broadcast::channel(1);
        let (commands, command_rx) = mpsc::channel(8);

        let startup = {
            let shared = Arc::clone(&shared);
            let mut shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {}
                    _ = shared.startup() => {}
                }
            })
        };
        let channel = {
            let shared = Arc::clone(&shared);
            let shutdown = shutdown.subscribe();
            tokio::spawn(run_channel(shared, command_rx, shutdown))
        };

        Self {
            shared,
            shutdown,
            commands,
            tasks: Mutex::new(vec![startup, channel]),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Waits until the initial fetch has completed. Returns immediately if
    /// the client is already ready, including after a failed fetch.
    pub async fn ready(&self) {
        let mut rx = self.shared.ready_tx.subscribe();
        // wait_for only errs when the sender is dropped, which cannot
        // outlive `shared`.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Evaluates a single flag, falling back to `default` (or `Null`).
    ///
    /// With a context the evaluation always goes to the backend, since the
    /// result depends on targeting rules the client never sees. Without one
    /// the cached bulk snapshot answers; a missing key after a fresh fetch
    /// is authoritative and resolves to the default with no extra request.
    pub async fn flag(
        &self,
        key: &str,
        context: Option<&EvaluationContext>,
        default: Option<Value>,
    ) -> Value {
        let default = default.unwrap_or(Value::Null);
        if let Some(context) = context {
            return match self.fetch_flag_detail(key, Some(context)).await {
                Some(detail) => detail.value,
                None => self.cached_flag(key).await.unwrap_or(default),
            };
        }

        if let Some(value) = self.cached_flag(key).await {
            return value;
        }
        self.ready().await;
        if let Some(value) = self.cached_flag(key).await {
            return value;
        }
        // A live bulk entry means the key genuinely does not exist.
        if self.has_flag_snapshot().await {
            return default;
        }
        match self.shared.refresh_flags().await {
            Some(flags) => flags.get(key).cloned().unwrap_or(default),
            None => default,
        }
    }

    /// Returns all flags for an optional context.
    ///
    /// Contextual calls bypass the cache entirely; plain calls serve the
    /// cached snapshot and only hit the network when it is missing or
    /// expired.
    pub async fn all_flags(&self, context: Option<&EvaluationContext>) -> Map<String, Value> {
        if let Some(context) = context {
            let path = self
                .shared
                .path_with_environment(&format!("/flags?{}", context.to_query_string()));
            return match self.shared.gateway.request(&path).await {
                Ok(body) => match serde_json::from_value::<crate::model::FlagsEnvelope>(body) {
                    Ok(envelope) => envelope.flags,
                    Err(err) => {
                        self.shared
                            .note_error(format!("failed to decode flags response: {err}"))
                            .await;
                        Map::new()
                    }
                },
                Err(err) => {
                    self.shared
                        .note_error(format!("failed to fetch flags: {err}"))
                        .await;
                    Map::new()
                }
            };
        }

        if let Some(flags) = self.cached_flag_snapshot().await {
            return flags;
        }
        self.ready().await;
        if let Some(flags) = self.cached_flag_snapshot().await {
            return flags;
        }
        self.shared.refresh_flags().await.unwrap_or_default()
    }

    /// Evaluates a flag with full detail (reason, variation). Always asks
    /// the backend; on failure synthesizes a `default` detail from the
    /// fallback value.
    pub async fn flag_detail(
        &self,
        key: &str,
        context: Option<&EvaluationContext>,
        default: Option<Value>,
    ) -> FlagDetail {
        match self.fetch_flag_detail(key, context).await {
            Some(detail) => detail,
            None => FlagDetail::fallback(key, default.unwrap_or(Value::Null)),
        }
    }

    /// Returns a remote config value, falling back to `default`.
    pub async fn config_value(&self, key: &str, default: Option<Value>) -> Value {
        let default = default.unwrap_or(Value::Null);
        if let Some(value) = self.cached_config(key).await {
            return value;
        }
        self.ready().await;
        if let Some(value) = self.cached_config(key).await {
            return value;
        }
        let path = self
            .shared
            .path_with_environment(&format!("/configs/{key}"));
        match self.shared.gateway.request(&path).await {
            Ok(body) => match serde_json::from_value::<ConfigDetail>(body) {
                Ok(detail) => {
                    let mut state = self.shared.state.lock().await;
                    state
                        .cache
                        .set(CacheKind::Configs, key, detail.value.clone());
                    detail.value
                }
                Err(err) => {
                    self.shared
                        .note_error(format!("failed to decode config response: {err}"))
                        .await;
                    default
                }
            },
            Err(err) => {
                self.shared
                    .note_error(format!("failed to fetch config {key}: {err}"))
                    .await;
                default
            }
        }
    }

    /// Returns all remote config values.
    pub async fn all_configs(&self) -> Map<String, Value> {
        if let Some(configs) = self.cached_config_snapshot().await {
            return configs;
        }
        self.ready().await;
        if let Some(configs) = self.cached_config_snapshot().await {
            return configs;
        }
        self.shared.refresh_configs().await.unwrap_or_default()
    }

    /// Fetches an AI config file by name.
    ///
    /// A missing config resolves to `None` unless `default` content is
    /// supplied, in which case a local rule file is synthesized so callers
    /// can ship a baked-in prompt.
    pub async fn ai_config(&self, name: &str, default: Option<&str>) -> Option<AiConfigFile> {
        let path = self
            .shared
            .path_with_environment(&format!("/ai-configs/{name}"));
        match self.shared.gateway.request(&path).await {
            Ok(body) => match serde_json::from_value::<AiConfigEnvelope>(body) {
                Ok(envelope) => Some(envelope.ai_config),
                Err(err) => {
                    self.shared
                        .note_error(format!("failed to decode ai config response: {err}"))
                        .await;
                    default.map(|content| synthesize_ai_config(name, content))
                }
            },
            Err(HttpError::NotFound(_)) => {
                debug!(name, "flagkit ai config not found");
                default.map(|content| synthesize_ai_config(name, content))
            }
            Err(err) => {
                self.shared
                    .note_error(format!("failed to fetch ai config {name}: {err}"))
                    .await;
                default.map(|content| synthesize_ai_config(name, content))
            }
        }
    }

    /// Lists AI config files, optionally filtered by kind and folder.
    /// Failures resolve to an empty list.
    pub async fn list_ai_configs(&self, filter: Option<&AiConfigFilter>) -> Vec<AiConfigFile> {
        let path = self.shared.path_with_environment("/ai-configs");
        match self.shared.gateway.request(&path).await {
            Ok(body) => match serde_json::from_value::<AiConfigsEnvelope>(body) {
                Ok(envelope) => match filter {
                    Some(filter) => envelope
                        .ai_configs
                        .into_iter()
                        .filter(|file| filter.matches(file))
                        .collect(),
                    None => envelope.ai_configs,
                },
                Err(err) => {
                    self.shared
                        .note_error(format!("failed to decode ai configs response: {err}"))
                        .await;
                    Vec::new()
                }
            },
            Err(err) => {
                self.shared
                    .note_error(format!("failed to fetch ai configs: {err}"))
                    .await;
                Vec::new()
            }
        }
    }

    /// Turns on push updates at runtime. Data is refreshed first so the
    /// cache is current when the stream takes over. Without a push
    /// transport the channel falls back to polling instead.
    pub async fn enable_realtime(&self) {
        if self.shared.transport.is_some() {
            self.shared.refresh_all().await;
        }
        let _ = self.commands.send(ChannelCommand::EnableRealtime).await;
    }

    /// Turns off push updates; polling resumes if an interval is configured.
    pub async fn disable_realtime(&self) {
        let _ = self.commands.send(ChannelCommand::DisableRealtime).await;
    }

    /// Registers a listener for a named event.
    pub fn on<F>(&self, event: EventName, listener: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.bus.on(event, listener)
    }

    /// Captures the current client state for diagnostics.
    pub async fn snapshot(&self) -> ClientSnapshot {
        let state = self.shared.state.lock().await;
        ClientSnapshot::capture(&state, &self.shared.ready_tx)
    }

    /// Stops background work and drops all listeners. Idempotent; the
    /// client is unusable for live updates afterwards, though cached reads
    /// still work.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(());
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        self.shared.bus.clear();
        debug!("flagkit client destroyed");
    }

    async fn fetch_flag_detail(
        &self,
        key: &str,
        context: Option<&EvaluationContext>,
    ) -> Option<FlagDetail> {
        let mut path = format!("/flags/{key}");
        if let Some(context) = context {
            if !context.is_empty() {
                path.push('?');
                path.push_str(&context.to_query_string());
            }
        }
        let path = self.shared.path_with_environment(&path);
        match self.shared.gateway.request(&path).await {
            Ok(body) => match serde_json::from_value::<FlagDetail>(body) {
                Ok(detail) => Some(detail),
                Err(err) => {
                    self.shared
                        .note_error(format!("failed to decode flag response: {err}"))
                        .await;
                    None
                }
            },
            Err(err) => {
                self.shared
                    .note_error(format!("failed to fetch flag {key}: {err}"))
                    .await;
                None
            }
        }
    }

    async fn cached_flag(&self, key: &str) -> Option<Value> {
        let mut state = self.shared.state.lock().await;
        state.cache.get(CacheKind::Flags, key)
    }

    async fn cached_config(&self, key: &str) -> Option<Value> {
        let mut state = self.shared.state.lock().await;
        state.cache.get(CacheKind::Configs, key)
    }

    async fn cached_flag_snapshot(&self) -> Option<Map<String, Value>> {
        let mut state = self.shared.state.lock().await;
        state.cache.get_all(CacheKind::Flags)
    }

    async fn cached_config_snapshot(&self) -> Option<Map<String, Value>> {
        let mut state = self.shared.state.lock().await;
        state.cache.get_all(CacheKind::Configs)
    }

    async fn has_flag_snapshot(&self) -> bool {
        self.cached_flag_snapshot().await.is_some()
    }
}

/// Builds a local rule file standing in for a missing AI config.
fn synthesize_ai_config(name: &str, content: &str) -> AiConfigFile {
    AiConfigFile {
        file_name: name.to_string(),
        file_type: AiConfigKind::Rule,
        content: content.to_string(),
        folder: None,
    }
}
