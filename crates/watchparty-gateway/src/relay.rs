//! Signaling relay: routes negotiation messages between the two occupants
//! of a session.
//!
//! The relay never inspects session descriptions or candidates. It
//! resolves "the other participant" through the registry and forwards the
//! payload with only the envelope fields rewritten.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use watchparty_common::{ClientMessage, ServerMessage, SessionId};

use crate::registry::{ParticipantId, SessionRegistry};

/// Per-payload size caps applied before forwarding.
#[derive(Debug, Clone, Copy)]
pub struct RelayLimits {
    pub max_sdp_bytes: usize,
    pub max_candidate_bytes: usize,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            max_sdp_bytes: 32 * 1024,
            max_candidate_bytes: 4096,
        }
    }
}

/// Outbound half of a participant's transport endpoint.
#[derive(Debug, Clone)]
pub struct Signaler(mpsc::Sender<ServerMessage>);

impl Signaler {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self(tx)
    }

    /// Queue a message without waiting; `false` if the outbox is full or gone.
    pub fn try_send(&self, message: ServerMessage) -> bool {
        self.0.try_send(message).is_ok()
    }
}

/// A decoded client message stamped with the connection it arrived on.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sender: ParticipantId,
    pub message: ClientMessage,
}

impl Envelope {
    pub fn new(sender: ParticipantId, message: ClientMessage) -> Self {
        Self { sender, message }
    }
}

struct Participant {
    signaler: Signaler,
    name: Option<String>,
}

pub type SharedRelay = Arc<SignalRelay>;

pub struct SignalRelay {
    registry: RwLock<SessionRegistry>,
    participants: RwLock<HashMap<ParticipantId, Participant>>,
    limits: RelayLimits,
}

impl Default for SignalRelay {
    fn default() -> Self {
        Self::new(RelayLimits::default())
    }
}

impl SignalRelay {
    pub fn new(limits: RelayLimits) -> Self {
        Self {
            registry: RwLock::new(SessionRegistry::new()),
            participants: RwLock::new(HashMap::new()),
            limits,
        }
    }

    /// Register a freshly connected participant.
    pub async fn connect(&self, participant: ParticipantId, signaler: Signaler) {
        self.participants.write().await.insert(
            participant,
            Participant {
                signaler,
                name: None,
            },
        );
        debug!(participant = %participant, "participant connected");
    }

    /// Forget a participant and vacate its slots.
    ///
    /// Returns the sessions reclaimed because nobody is left in them.
    pub async fn disconnect(&self, participant: ParticipantId) -> Vec<SessionId> {
        let reclaimed = self.registry.write().await.remove_participant(participant);
        let removed = self.participants.write().await.remove(&participant);

        let name = removed.and_then(|p| p.name).unwrap_or_default();
        info!(participant = %participant, name = %name, "participant disconnected");
        for session_id in &reclaimed {
            info!(room = %session_id, "room reclaimed");
        }
        reclaimed
    }

    /// Dispatch one message. Never fails: routing problems are logged and
    /// the message is dropped.
    pub async fn handle(&self, envelope: Envelope) {
        let Envelope { sender, message } = envelope;
        match message {
            ClientMessage::CreateRoom { name } => self.create_room(sender, name).await,
            ClientMessage::JoinRoom { room_id, name } => {
                self.join_room(sender, &room_id, name).await
            }
            ClientMessage::Offer { sdp, room_id } => {
                if self.oversized(&sdp, self.limits.max_sdp_bytes) {
                    warn!(participant = %sender, "dropping oversized offer");
                    return;
                }
                let forwarded = ServerMessage::Offer {
                    sdp,
                    room_id: room_id.clone(),
                };
                self.forward(sender, &room_id, forwarded).await;
            }
            ClientMessage::Answer { sdp, room_id } => {
                if self.oversized(&sdp, self.limits.max_sdp_bytes) {
                    warn!(participant = %sender, "dropping oversized answer");
                    return;
                }
                let forwarded = ServerMessage::Answer {
                    sdp,
                    room_id: room_id.clone(),
                };
                self.forward(sender, &room_id, forwarded).await;
            }
            ClientMessage::AddIceCandidate {
                candidate,
                room_id,
                role,
            } => {
                if self.oversized(&candidate, self.limits.max_candidate_bytes) {
                    warn!(participant = %sender, "dropping oversized candidate");
                    return;
                }
                let forwarded = ServerMessage::AddIceCandidate { candidate, role };
                self.forward(sender, &room_id, forwarded).await;
            }
            ClientMessage::ScreenShareStatus {
                is_sharing,
                room_id,
            } => {
                let forwarded = ServerMessage::ScreenShareStatus { is_sharing };
                self.forward(sender, &room_id, forwarded).await;
            }
        }
    }

    pub async fn participant_count(&self) -> usize {
        self.participants.read().await.len()
    }

    pub async fn session_count(&self) -> usize {
        self.registry.read().await.len()
    }

    async fn create_room(&self, sender: ParticipantId, name: Option<String>) {
        self.remember_name(sender, name).await;
        let session_id = self.registry.write().await.create_session(sender);
        info!(participant = %sender, room = %session_id, "room created");

        self.deliver(
            sender,
            ServerMessage::RoomCreated {
                room_id: session_id.to_string(),
            },
        )
        .await;
    }

    async fn join_room(&self, sender: ParticipantId, room_id: &str, name: Option<String>) {
        self.remember_name(sender, name).await;

        let pairing = match room_id.parse::<SessionId>() {
            Ok(session_id) => self
                .registry
                .write()
                .await
                .join_session(session_id, sender)
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };

        let pairing = match pairing {
            Ok(pairing) => pairing,
            Err(reason) => {
                info!(participant = %sender, room = %room_id, reason = %reason, "join rejected");
                self.deliver(sender, ServerMessage::join_error()).await;
                return;
            }
        };

        info!(
            room = %pairing.session_id,
            creator = %pairing.creator,
            joiner = %pairing.joiner,
            "room paired"
        );

        let room_id = pairing.session_id.to_string();
        self.deliver(
            pairing.creator,
            ServerMessage::UserJoined {
                room_id: room_id.clone(),
            },
        )
        .await;
        self.deliver(
            pairing.joiner,
            ServerMessage::UserJoined {
                room_id: room_id.clone(),
            },
        )
        .await;
        self.deliver(pairing.creator, ServerMessage::SendOffer { room_id })
            .await;
    }

    async fn forward(&self, sender: ParticipantId, room_id: &str, message: ServerMessage) {
        let Ok(session_id) = room_id.parse::<SessionId>() else {
            debug!(participant = %sender, room = %room_id, "dropping {}: invalid room id", message.event_name());
            return;
        };

        let target = self.registry.read().await.relay_target(session_id, sender);
        match target {
            Some(target) => self.deliver(target, message).await,
            None => {
                debug!(
                    participant = %sender,
                    room = %session_id,
                    "dropping {}: no peer to relay to",
                    message.event_name()
                );
            }
        }
    }

    async fn deliver(&self, target: ParticipantId, message: ServerMessage) {
        let signaler = {
            let guard = self.participants.read().await;
            guard.get(&target).map(|p| p.signaler.clone())
        };

        let event = message.event_name();
        match signaler {
            Some(signaler) => {
                if !signaler.try_send(message) {
                    warn!(participant = %target, "failed to queue {} message", event);
                }
            }
            None => debug!(participant = %target, "target not connected, dropping {}", event),
        }
    }

    async fn remember_name(&self, participant: ParticipantId, name: Option<String>) {
        let Some(name) = name else {
            return;
        };
        if let Some(entry) = self.participants.write().await.get_mut(&participant) {
            entry.name = Some(name);
        }
    }

    fn oversized(&self, payload: &Value, max_bytes: usize) -> bool {
        serde_json::to_vec(payload)
            .map(|encoded| encoded.len() > max_bytes)
            .unwrap_or(true)
    }
}
