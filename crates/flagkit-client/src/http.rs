//! Request gateway for the FlagKit backend.
//!
//! The core engine only depends on the [`RequestGateway`] trait: a single
//! authenticated, timeout-bounded JSON call. [`HttpGateway`] is the
//! production implementation backed by `reqwest`; tests substitute their own
//! gateway to script responses and count calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Error taxonomy for gateway calls.
///
/// Every variant is caught at the facade boundary; none of them escape the
/// public client API except through the `error` event.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Credentials were rejected by the backend.
    #[error("unauthorized - invalid API key or missing scope")]
    Unauthorized,
    /// The requested resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),
    /// Request was rejected by the backend (4xx excluding 401/404).
    #[error("client error: status {0}")]
    Client(u16),
    /// Backend reported a server-side failure (5xx).
    #[error("server error: status {0}")]
    Server(u16),
    /// The request exceeded the configured timeout and was aborted.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Transport-level issue (DNS, TLS, socket, etc.).
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Response body could not be decoded as JSON.
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
    /// The supplied configuration produced an unusable HTTP client.
    #[error("invalid gateway configuration: {0}")]
    InvalidConfig(String),
}

/// Authenticated JSON call abstraction consumed by the client core.
///
/// `path_and_query` is relative to the configured base URL and may carry an
/// encoded query string. Implementations perform exactly one attempt per
/// call; retries live at the stream-reconnection layer, never here.
#[async_trait]
pub trait RequestGateway: Send + Sync {
    /// Issues a GET request and returns the decoded JSON body.
    async fn request(&self, path_and_query: &str) -> Result<Value, HttpError>;
}

/// Production gateway encapsulating a reusable `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    /// Underlying HTTP client (shared across requests, carries the timeout).
    client: Client,
    /// Service base URL (no trailing slash).
    base_url: String,
    /// Timeout mirrored from the client so timeout errors can report it.
    timeout: Duration,
}

impl HttpGateway {
    /// Builds a gateway using the provided base URL, API key, and timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, HttpError> {
        let base_url = base_url.into();

        let mut headers = HeaderMap::new();
        let user_agent = format!("flagkit-client/{}", env!("CARGO_PKG_VERSION"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&user_agent)
                .map_err(|_| HttpError::InvalidConfig("invalid user agent".into()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| HttpError::InvalidConfig("API key contains invalid characters".into()))?;
        // Marking the header sensitive keeps it out of reqwest debug output.
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(HttpError::Transport)?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Returns the base URL currently configured for the gateway.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Wraps the gateway in an `Arc<dyn RequestGateway>` for the client core.
    pub fn into_shared(self) -> Arc<dyn RequestGateway> {
        Arc::new(self)
    }
}

#[async_trait]
impl RequestGateway for HttpGateway {
    /// Sends the request, classifies the status, and decodes the JSON body.
    async fn request(&self, path_and_query: &str) -> Result<Value, HttpError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        debug!(url = %url, "flagkit HTTP request");

        let response = self.client.get(&url).send().await.map_err(|err| {
            if err.is_timeout() {
                HttpError::Timeout(self.timeout)
            } else {
                HttpError::Transport(err)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            // Buffer the body so operators can see what the backend said.
            let body = response.bytes().await.unwrap_or_default();
            debug!(
                url = %url,
                status = %status,
                body = %String::from_utf8_lossy(&body),
                "flagkit HTTP error response"
            );
            return Err(classify_status(status, path_and_query));
        }

        let bytes = response.bytes().await.map_err(|err| {
            if err.is_timeout() {
                HttpError::Timeout(self.timeout)
            } else {
                HttpError::Transport(err)
            }
        })?;
        debug!(url = %url, status = %status, body_len = bytes.len(), "flagkit HTTP response");
        serde_json::from_slice(&bytes).map_err(HttpError::Decode)
    }
}

/// Maps non-success HTTP status codes to the gateway error taxonomy.
fn classify_status(status: StatusCode, path: &str) -> HttpError {
    if status == StatusCode::UNAUTHORIZED {
        // Authentication failure: retrying is pointless until the key changes.
        return HttpError::Unauthorized;
    }
    if status == StatusCode::NOT_FOUND {
        return HttpError::NotFound(path.split('?').next().unwrap_or(path).to_string());
    }
    if status.is_client_error() || status.is_redirection() {
        // Redirects are treated as misconfiguration rather than followed blindly.
        return HttpError::Client(status.as_u16());
    }
    HttpError::Server(status.as_u16())
}
