//! Live-update channel state machine and client state snapshot.
//!
//! The channel transitions are defined as a pure function over
//! [`ChannelInput`] so the reconnect policy can be tested without timers or
//! sockets. The driver in `channel.rs` feeds inputs and sleeps the backoff
//! delays; this module decides where each input leads.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::cache::ValueCache;

/// Reconnect attempts before the channel gives up on the push stream.
pub const MAX_STREAM_RETRIES: u32 = 5;

/// Poll cadence used when the stream is lost and no interval is configured.
pub const FALLBACK_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Where the live-update channel currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No live updates: realtime off and no refresh interval configured.
    Idle,
    /// Periodic re-fetching on a timer.
    Polling,
    /// Push stream connected and delivering events.
    Streaming,
    /// Working to (re)establish the push stream.
    Reconnecting {
        /// Failed attempts so far. Zero means connect immediately; otherwise
        /// the driver waits out `backoff_delay(retries)` first.
        retries: u32,
    },
}

/// Inputs that drive channel transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelInput {
    /// A push connection was established.
    StreamConnected,
    /// A connect attempt failed or an open stream broke.
    StreamFailed,
    /// The transport is structurally unavailable; skip the retry ladder.
    TransportUnavailable,
    /// Caller asked for realtime updates.
    RealtimeEnabled,
    /// Caller turned realtime off.
    RealtimeDisabled,
    /// The client is shutting down.
    Stopped,
}

impl ChannelState {
    /// Computes the next state for `input`.
    ///
    /// `polling_configured` reports whether a refresh interval exists; it
    /// decides whether `RealtimeDisabled` lands in polling or goes idle.
    /// Stream loss always falls back to polling, on the fallback cadence if
    /// no interval is configured.
    pub fn apply(self, input: ChannelInput, polling_configured: bool) -> ChannelState {
        use ChannelInput::*;
        match input {
            Stopped => ChannelState::Idle,
            StreamConnected => ChannelState::Streaming,
            TransportUnavailable => ChannelState::Polling,
            RealtimeEnabled => match self {
                // Already streaming or mid-reconnect; leave the ladder alone.
                ChannelState::Streaming | ChannelState::Reconnecting { .. } => self,
                _ => ChannelState::Reconnecting { retries: 0 },
            },
            RealtimeDisabled => {
                if polling_configured {
                    ChannelState::Polling
                } else {
                    ChannelState::Idle
                }
            }
            StreamFailed => match self {
                ChannelState::Streaming => ChannelState::Reconnecting { retries: 1 },
                ChannelState::Reconnecting { retries } if retries < MAX_STREAM_RETRIES => {
                    ChannelState::Reconnecting {
                        retries: retries + 1,
                    }
                }
                // Retry budget spent; polling is permanent until realtime is
                // explicitly re-enabled.
                ChannelState::Reconnecting { .. } => ChannelState::Polling,
                other => other,
            },
        }
    }

    /// True while the push stream is the active update source.
    pub fn is_streaming(self) -> bool {
        matches!(self, ChannelState::Streaming)
    }
}

/// Backoff after `retries` consecutive failures: 1s, 2s, 4s, 8s, 16s.
pub fn backoff_delay(retries: u32) -> Duration {
    let failures = retries.clamp(1, MAX_STREAM_RETRIES);
    Duration::from_secs(1 << (failures - 1))
}

/// Mutable client state guarded by the shared mutex.
#[derive(Debug)]
pub struct ClientState {
    /// Cached flag and config values.
    pub cache: ValueCache,
    /// Current channel position, published for snapshots.
    pub channel: ChannelState,
    /// Most recent non-fatal failure, surfaced through snapshots.
    pub last_error: Option<String>,
}

impl ClientState {
    pub fn new(cache: ValueCache) -> Self {
        Self {
            cache,
            channel: ChannelState::Idle,
            last_error: None,
        }
    }
}

/// Point-in-time view of the client, safe to serialize into diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    /// Whether the initial fetch completed (successfully or not).
    pub ready: bool,
    /// Current live-update channel state.
    pub channel: ChannelState,
    /// Most recent non-fatal error message, if any.
    pub last_error: Option<String>,
}

impl ClientSnapshot {
    pub(crate) fn capture(state: &ClientState, ready: &watch::Sender<bool>) -> Self {
        Self {
            ready: *ready.borrow(),
            channel: state.channel,
            last_error: state.last_error.clone(),
        }
    }
}
