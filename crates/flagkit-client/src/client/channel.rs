//! Live-update channel driver.
//!
//! One background task owns the update channel for the lifetime of the
//! client. It polls on a timer, maintains the push stream with exponential
//! backoff, and falls back to polling when the stream cannot be kept alive.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::events::EventName;
use crate::stream::{ChangeKind, EventStream, StreamError};

use super::shared::ClientShared;
use super::state::{backoff_delay, ChannelInput, ChannelState, FALLBACK_POLL_INTERVAL};

/// Commands sent from the facade to the channel task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelCommand {
    EnableRealtime,
    DisableRealtime,
}

/// How a streaming session ended.
enum SessionEnd {
    /// The stream broke or the server closed it.
    Lost,
    /// The caller disabled realtime while streaming.
    Disabled,
    /// The client is shutting down.
    Shutdown,
}

/// Runs the update channel until shutdown.
pub(crate) async fn run_channel(
    shared: Arc<ClientShared>,
    mut commands: mpsc::Receiver<ChannelCommand>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let initial = if shared.config.realtime {
        if shared.transport.is_some() {
            // Zero failures so far: the first attempt runs without backoff.
            ChannelState::Reconnecting { retries: 0 }
        } else {
            warn!("flagkit realtime configured without a push transport, polling instead");
            ChannelState::Polling
        }
    } else if shared.config.polling_configured() {
        ChannelState::Polling
    } else {
        ChannelState::Idle
    };
    set_channel(&shared, initial).await;

    loop {
        let current = shared.state.lock().await.channel;
        match current {
            ChannelState::Idle => {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => return,
                    command = commands.recv() => match command {
                        Some(command) => handle_command(&shared, command).await,
                        None => return,
                    },
                }
            }
            ChannelState::Polling => {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => return,
                    command = commands.recv() => match command {
                        Some(command) => handle_command(&shared, command).await,
                        None => return,
                    },
                    _ = tokio::time::sleep(poll_interval(&shared)) => {
                        shared.refresh_all().await;
                    }
                }
            }
            ChannelState::Reconnecting { retries } => {
                if retries > 0 {
                    let delay = backoff_delay(retries);
                    debug!(failures = retries, delay_secs = delay.as_secs(), "flagkit stream backoff");
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => return,
                        command = commands.recv() => match command {
                            Some(command) => {
                                handle_command(&shared, command).await;
                                continue;
                            }
                            None => return,
                        },
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                match connect_once(&shared).await {
                    Ok(stream) => {
                        set_channel(&shared, ChannelState::Streaming).await;
                        shared.bus.emit(EventName::RealtimeChanged, &Value::Bool(true));
                        match drive_stream(&shared, stream, &mut commands, &mut shutdown).await {
                            SessionEnd::Shutdown => return,
                            SessionEnd::Disabled => {
                                apply_input(&shared, ChannelInput::RealtimeDisabled).await;
                                shared.bus.emit(EventName::RealtimeChanged, &Value::Bool(false));
                            }
                            SessionEnd::Lost => {
                                apply_input(&shared, ChannelInput::StreamFailed).await;
                            }
                        }
                    }
                    Err(StreamError::Unsupported(reason)) => {
                        warn!(reason = %reason, "flagkit push transport unavailable, polling instead");
                        apply_input(&shared, ChannelInput::TransportUnavailable).await;
                        shared.bus.emit(EventName::RealtimeChanged, &Value::Bool(false));
                    }
                    Err(err) => {
                        shared.note_error(format!("stream connect failed: {err}")).await;
                        let next = apply_input(&shared, ChannelInput::StreamFailed).await;
                        if next == ChannelState::Polling {
                            warn!("flagkit stream retries exhausted, falling back to polling");
                            shared.bus.emit(EventName::RealtimeChanged, &Value::Bool(false));
                        }
                    }
                }
            }
            // Streaming is only ever entered from the arm above; the state
            // is back on the ladder or in polling by the time we loop.
            ChannelState::Streaming => {
                apply_input(&shared, ChannelInput::StreamFailed).await;
            }
        }
    }
}

async fn connect_once(shared: &Arc<ClientShared>) -> Result<EventStream, StreamError> {
    match &shared.transport {
        Some(transport) => transport.connect().await,
        None => Err(StreamError::Unsupported(
            "no push transport configured".to_string(),
        )),
    }
}

/// Processes stream events until the session ends one way or another.
async fn drive_stream(
    shared: &Arc<ClientShared>,
    mut stream: EventStream,
    commands: &mut mpsc::Receiver<ChannelCommand>,
    shutdown: &mut broadcast::Receiver<()>,
) -> SessionEnd {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => return SessionEnd::Shutdown,
            command = commands.recv() => match command {
                Some(ChannelCommand::DisableRealtime) => return SessionEnd::Disabled,
                Some(ChannelCommand::EnableRealtime) => {}
                None => return SessionEnd::Shutdown,
            },
            item = stream.next() => match item {
                Some(Ok(event)) => match event.category() {
                    Some(ChangeKind::Connected) => {
                        debug!("flagkit stream connected");
                    }
                    Some(ChangeKind::Flag) => {
                        shared.refresh_flags().await;
                    }
                    Some(ChangeKind::Config) => {
                        shared.refresh_configs().await;
                    }
                    Some(ChangeKind::AiConfig) => {
                        shared.bus.emit(EventName::AiConfigUpdated, &event.data);
                    }
                    None => {
                        debug!(name = %event.name, "flagkit ignoring unknown stream event");
                    }
                },
                Some(Err(err)) => {
                    shared.note_error(format!("stream error: {err}")).await;
                    return SessionEnd::Lost;
                }
                None => {
                    debug!("flagkit stream closed by server");
                    return SessionEnd::Lost;
                }
            },
        }
    }
}

/// Applies a facade command to the channel.
async fn handle_command(shared: &Arc<ClientShared>, command: ChannelCommand) {
    match command {
        ChannelCommand::EnableRealtime => {
            if shared.transport.is_none() {
                warn!("flagkit realtime requested without a push transport, polling instead");
                apply_input(shared, ChannelInput::TransportUnavailable).await;
                shared.bus.emit(EventName::RealtimeChanged, &Value::Bool(false));
                return;
            }
            apply_input(shared, ChannelInput::RealtimeEnabled).await;
        }
        ChannelCommand::DisableRealtime => {
            let before = shared.state.lock().await.channel;
            apply_input(shared, ChannelInput::RealtimeDisabled).await;
            if matches!(before, ChannelState::Reconnecting { .. }) {
                shared.bus.emit(EventName::RealtimeChanged, &Value::Bool(false));
            }
        }
    }
}

async fn apply_input(shared: &Arc<ClientShared>, input: ChannelInput) -> ChannelState {
    let polling_configured = shared.config.polling_configured();
    let mut state = shared.state.lock().await;
    state.channel = state.channel.apply(input, polling_configured);
    state.channel
}

async fn set_channel(shared: &Arc<ClientShared>, channel: ChannelState) {
    shared.state.lock().await.channel = channel;
}

/// Cadence for the polling state: the configured interval, or the fallback
/// when polling was entered because the stream could not be kept alive.
fn poll_interval(shared: &Arc<ClientShared>) -> Duration {
    if shared.config.polling_configured() {
        shared.config.refresh_interval
    } else {
        FALLBACK_POLL_INTERVAL
    }
}
