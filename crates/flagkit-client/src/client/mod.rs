//! Client engine: facade, shared state, and the live-update channel.

mod channel;
mod core;
mod shared;
mod state;

#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;

pub use self::core::{ClientError, FlagClient};
pub use self::state::{ChannelState, ClientSnapshot, FALLBACK_POLL_INTERVAL, MAX_STREAM_RETRIES};
