//! WebSocket transport endpoint: one connection per participant.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::{stream::StreamExt, SinkExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use watchparty_common::helpers::preview;
use watchparty_common::{ClientMessage, ServerMessage};

use crate::registry::ParticipantId;
use crate::relay::{Envelope, RelayLimits, SharedRelay, SignalRelay, Signaler};

const RATE_WINDOW: Duration = Duration::from_secs(60);
const LOG_PREVIEW_CHARS: usize = 96;

/// Limits applied per WebSocket connection.
#[derive(Debug, Clone, Copy)]
pub struct EndpointLimits {
    pub max_message_bytes: usize,
    pub max_messages_per_minute: u32,
    pub outbox_capacity: usize,
    pub max_connections: usize,
}

impl Default for EndpointLimits {
    fn default() -> Self {
        Self {
            max_message_bytes: 64 * 1024,
            max_messages_per_minute: 600,
            outbox_capacity: 128,
            max_connections: 4096,
        }
    }
}

/// State shared by every request handler.
#[derive(Clone)]
pub struct GatewayState {
    pub relay: SharedRelay,
    pub limits: EndpointLimits,
    active_connections: Arc<AtomicUsize>,
}

impl GatewayState {
    pub fn new(relay_limits: RelayLimits, limits: EndpointLimits) -> Self {
        Self {
            relay: Arc::new(SignalRelay::new(relay_limits)),
            limits,
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }
}

/// A counted connection; the count drops with it, including when the
/// upgrade never completes.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn reserve(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        if active.fetch_add(1, Ordering::AcqRel) >= max {
            active.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(Self(active.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let Some(slot) =
        ConnectionSlot::reserve(&state.active_connections, state.limits.max_connections)
    else {
        warn!("rejecting connection from {}: connection limit reached", addr);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let max = state.limits.max_message_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_socket(socket, state, addr, slot))
        .into_response()
}

/// Why an inbound frame could not be turned into a `ClientMessage`.
#[derive(Debug)]
struct Rejected {
    event: Option<String>,
    reason: String,
}

fn decode_client_message(text: &str) -> Result<ClientMessage, Rejected> {
    let value: Value = serde_json::from_str(text).map_err(|err| Rejected {
        event: None,
        reason: err.to_string(),
    })?;
    let event = value
        .get("event")
        .and_then(Value::as_str)
        .map(str::to_string);
    serde_json::from_value(value).map_err(|err| Rejected {
        event,
        reason: err.to_string(),
    })
}

async fn handle_socket(
    stream: WebSocket,
    state: GatewayState,
    addr: SocketAddr,
    slot: ConnectionSlot,
) {
    let participant = ParticipantId::new();
    info!(participant = %participant, "client connected from {}", addr);

    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.limits.outbox_capacity);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        while let Some(signal) = rx.recv().await {
            let text = match signal.to_text() {
                Ok(text) => text,
                Err(err) => {
                    warn!("failed to encode {}: {}", signal.event_name(), err);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = disconnect_tx.try_send(());
    });

    let own = Signaler::new(tx);
    state.relay.connect(participant, own.clone()).await;

    let mut message_window_start = Instant::now();
    let mut message_count: u32 = 0;

    loop {
        tokio::select! {
            _ = disconnect_rx.recv() => {
                break;
            }
            msg = receiver.next() => {
                let Some(msg) = msg else { break; };
                let Ok(msg) = msg else { break; };

                let now = Instant::now();
                if now.duration_since(message_window_start) >= RATE_WINDOW {
                    message_window_start = now;
                    message_count = 0;
                }
                message_count = message_count.saturating_add(1);
                if message_count > state.limits.max_messages_per_minute {
                    warn!(participant = %participant, "rate limit exceeded, closing");
                    break;
                }

                let text = match msg {
                    Message::Text(text) => text,
                    Message::Binary(_) => {
                        debug!(participant = %participant, "ignoring binary frame");
                        continue;
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                if text.len() > state.limits.max_message_bytes {
                    warn!(participant = %participant, "ignoring oversized frame ({} bytes)", text.len());
                    continue;
                }

                match decode_client_message(&text) {
                    Ok(message) => {
                        debug!(participant = %participant, "received {}", message.event_name());
                        state.relay.handle(Envelope::new(participant, message)).await;
                    }
                    Err(rejected) => {
                        warn!(
                            participant = %participant,
                            "invalid message {}: {}",
                            preview(&text, LOG_PREVIEW_CHARS),
                            rejected.reason
                        );
                        if rejected.event.as_deref() == Some("join-room") {
                            own.try_send(ServerMessage::join_error());
                        }
                    }
                }
            }
        }
    }

    drop(own);
    state.relay.disconnect(participant).await;
    drop(slot);
}
