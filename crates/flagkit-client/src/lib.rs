//! Client engine for the FlagKit feature management service.
//!
//! The crate keeps a local cache of feature flags, remote configs, and AI
//! config files, refreshes it by polling or over a push stream, and exposes
//! an evaluation facade that degrades to cached values and caller defaults
//! instead of surfacing transport errors.
//!
//! ```no_run
//! use flagkit_client::{ClientConfig, FlagClient};
//!
//! # async fn run() -> Result<(), flagkit_client::ClientError> {
//! let client = FlagClient::new(ClientConfig {
//!     api_key: "fk_live_...".to_string(),
//!     ..ClientConfig::default()
//! })?;
//! client.ready().await;
//! let enabled = client.flag("new-checkout", None, Some(false.into())).await;
//! # let _ = enabled;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod events;
pub mod http;
pub mod model;
pub mod stream;

pub use cache::{CacheKind, ExpiryPolicy, ValueCache};
pub use client::{
    ChannelState, ClientError, ClientSnapshot, FlagClient, FALLBACK_POLL_INTERVAL,
    MAX_STREAM_RETRIES,
};
pub use config::{sanitize_api_key, ClientConfig, ClientEnv, DEFAULT_BASE_URL};
pub use context::{EvaluationContext, UserContext};
pub use events::{EventBus, EventName, Subscription};
pub use http::{HttpError, HttpGateway, RequestGateway};
pub use model::{AiConfigFile, AiConfigFilter, AiConfigKind, EvaluationReason, FlagDetail};
pub use stream::{ChangeKind, PushEvent, SseTransport, StreamError, StreamTransport};
