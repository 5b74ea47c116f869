//! Construction-time configuration for the FlagKit client.
//!
//! This module provides the static options consumed by [`crate::FlagClient`]
//! plus environment-driven helpers to derive them from the host process.
//! Defaults are sanitised up-front so embedders inherit sensible limits even
//! when they forget to validate their own inputs.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use tracing::warn;

/// Base URL used when the embedder does not supply one.
pub const DEFAULT_BASE_URL: &str = "https://api.flagkit.io/v1";
/// Timeout applied to every gateway request when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Minimum polling cadence accepted for background refreshes.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Name of the environment variable carrying the API key.
const ENV_API_KEY: &str = "FLAGKIT_API_KEY";
/// Environment variable overriding the service base URL.
const ENV_BASE_URL: &str = "FLAGKIT_BASE_URL";
/// Environment variable carrying the optional environment routing hint.
const ENV_ENVIRONMENT: &str = "FLAGKIT_ENVIRONMENT";
/// Environment variable setting the polling interval in milliseconds.
const ENV_REFRESH_INTERVAL_MS: &str = "FLAGKIT_REFRESH_INTERVAL_MS";
/// Environment variable setting the per-request timeout in milliseconds.
const ENV_REQUEST_TIMEOUT_MS: &str = "FLAGKIT_REQUEST_TIMEOUT_MS";
/// Environment variable toggling the push-stream transport.
const ENV_REALTIME: &str = "FLAGKIT_REALTIME";
/// Environment variable setting the cache TTL in milliseconds.
const ENV_CACHE_TTL_MS: &str = "FLAGKIT_CACHE_TTL_MS";

/// Configuration values that control the FlagKit client runtime.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key authenticating every request. Required; an empty key fails
    /// client construction.
    pub api_key: String,
    /// Service base URL (scheme + host + version prefix, no trailing slash).
    pub base_url: String,
    /// Optional environment routing hint appended to every request as an
    /// `environment` query parameter. Never required for readiness.
    pub environment: Option<String>,
    /// Background polling cadence. Zero disables polling entirely.
    pub refresh_interval: Duration,
    /// Timeout bounding each gateway request.
    pub request_timeout: Duration,
    /// Whether the push-stream transport should be used instead of polling.
    pub realtime: bool,
    /// Cache expiry policy: `None` keeps entries until replaced (snapshot
    /// mode), `Some(d)` expires entries after `d`, and `Some(0)` disables
    /// caching so every read hits the network.
    pub cache_ttl: Option<Duration>,
}

impl Default for ClientConfig {
    /// Returns the defaults used by the hosted service SDKs.
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            environment: None,
            refresh_interval: Duration::ZERO,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            realtime: false,
            cache_ttl: None,
        }
    }
}

impl ClientConfig {
    /// Applies safety limits to the configuration.
    ///
    /// The API key is trimmed, the base URL loses any trailing slash so path
    /// joining stays predictable, a zero timeout falls back to the default,
    /// and sub-second polling intervals are raised to the minimum.
    pub(crate) fn sanitise(mut self) -> Self {
        self.api_key = sanitize_api_key(&self.api_key).unwrap_or_default();

        while self.base_url.ends_with('/') {
            self.base_url.pop();
        }
        if self.base_url.is_empty() {
            warn!("empty base URL; using {DEFAULT_BASE_URL}");
            self.base_url = DEFAULT_BASE_URL.to_string();
        }

        if self.request_timeout.is_zero() {
            warn!(
                "request timeout must be > 0; defaulting to {:?}",
                DEFAULT_REQUEST_TIMEOUT
            );
            self.request_timeout = DEFAULT_REQUEST_TIMEOUT;
        }

        if !self.refresh_interval.is_zero() && self.refresh_interval < MIN_REFRESH_INTERVAL {
            warn!(
                "refresh interval {:?} is below the minimum {:?}; clamping",
                self.refresh_interval, MIN_REFRESH_INTERVAL
            );
            self.refresh_interval = MIN_REFRESH_INTERVAL;
        }

        if let Some(environment) = &self.environment {
            if environment.trim().is_empty() {
                self.environment = None;
            }
        }

        self
    }

    /// Returns `true` when a positive polling interval is configured.
    pub(crate) fn polling_configured(&self) -> bool {
        !self.refresh_interval.is_zero()
    }
}

/// Captures environment-derived options used to bootstrap the client.
#[derive(Debug, Clone, Default)]
pub struct ClientEnv {
    /// API key read from `FLAGKIT_API_KEY`.
    pub api_key: Option<String>,
    /// Base URL override read from `FLAGKIT_BASE_URL`.
    pub base_url: Option<String>,
    /// Environment hint read from `FLAGKIT_ENVIRONMENT`.
    pub environment: Option<String>,
    /// Polling interval read from `FLAGKIT_REFRESH_INTERVAL_MS`.
    pub refresh_interval: Option<Duration>,
    /// Request timeout read from `FLAGKIT_REQUEST_TIMEOUT_MS`.
    pub request_timeout: Option<Duration>,
    /// Push-stream toggle read from `FLAGKIT_REALTIME`.
    pub realtime: Option<bool>,
    /// Cache TTL read from `FLAGKIT_CACHE_TTL_MS`.
    pub cache_ttl: Option<Duration>,
}

impl ClientEnv {
    /// Builds settings from the current process environment.
    ///
    /// Side-effect free apart from reading `std::env::vars`.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        Self {
            api_key: map.get(ENV_API_KEY).and_then(|v| sanitize_api_key(v)),
            base_url: map.get(ENV_BASE_URL).and_then(|v| sanitize_non_empty(v)),
            environment: map.get(ENV_ENVIRONMENT).and_then(|v| sanitize_non_empty(v)),
            refresh_interval: map
                .get(ENV_REFRESH_INTERVAL_MS)
                .and_then(|v| parse_millis(v)),
            request_timeout: map
                .get(ENV_REQUEST_TIMEOUT_MS)
                .and_then(|v| parse_millis(v)),
            realtime: map.get(ENV_REALTIME).map(|v| parse_bool(v)),
            cache_ttl: map.get(ENV_CACHE_TTL_MS).and_then(|v| parse_millis(v)),
        }
    }

    /// Merges the environment-derived values over the provided defaults.
    pub fn apply_to(self, mut config: ClientConfig) -> ClientConfig {
        if let Some(api_key) = self.api_key {
            config.api_key = api_key;
        }
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
        if let Some(environment) = self.environment {
            config.environment = Some(environment);
        }
        if let Some(refresh_interval) = self.refresh_interval {
            config.refresh_interval = refresh_interval;
        }
        if let Some(request_timeout) = self.request_timeout {
            config.request_timeout = request_timeout;
        }
        if let Some(realtime) = self.realtime {
            config.realtime = realtime;
        }
        if let Some(cache_ttl) = self.cache_ttl {
            config.cache_ttl = Some(cache_ttl);
        }
        config
    }
}

/// Normalises an API key by trimming whitespace and surrounding quotes.
///
/// Returns `None` when nothing usable remains so callers can fall back to
/// other sources instead of sending a blank credential header.
pub fn sanitize_api_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Returns the trimmed value when it is non-empty.
fn sanitize_non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses a millisecond count into a `Duration`, rejecting garbage quietly.
fn parse_millis(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_millis)
}

/// Parses common truthy spellings; anything else reads as false.
fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
