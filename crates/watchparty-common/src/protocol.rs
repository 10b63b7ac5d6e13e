//! Signaling messages exchanged between participants and the gateway.
//!
//! Every WebSocket text frame carries one JSON object of the shape
//! `{"event": "<name>", "data": {...}}`. Event names and the camelCase
//! field names are fixed: existing browser peers depend on them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Text sent with `room-join-error`, whatever the reason for the refusal.
pub const JOIN_ERROR_MESSAGE: &str = "Room not found or full";

/// Process-unique session (room) identifier.
///
/// Allocated from a monotonic counter and rendered on the wire as a
/// decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::protocol(format!("invalid room id {s:?}")));
        }
        trimmed
            .parse::<u64>()
            .map(SessionId)
            .map_err(|_| Error::protocol(format!("invalid room id {s:?}")))
    }
}

/// Which peer connection an ICE candidate was gathered on.
///
/// `Sender` candidates come from the initiator's connection and are
/// applied to the responder's; `Receiver` candidates go the other way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateRole {
    Sender,
    Receiver,
}

impl fmt::Display for CandidateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateRole::Sender => f.write_str("sender"),
            CandidateRole::Receiver => f.write_str("receiver"),
        }
    }
}

/// Messages a participant sends to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    CreateRoom {
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Offer { sdp: Value, room_id: String },
    #[serde(rename_all = "camelCase")]
    Answer { sdp: Value, room_id: String },
    #[serde(rename_all = "camelCase")]
    AddIceCandidate {
        candidate: Value,
        room_id: String,
        #[serde(rename = "type")]
        role: CandidateRole,
    },
    #[serde(rename_all = "camelCase")]
    ScreenShareStatus { is_sharing: bool, room_id: String },
}

impl ClientMessage {
    /// Wire name of the event, for logs.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::CreateRoom { .. } => "create-room",
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::AddIceCandidate { .. } => "add-ice-candidate",
            ClientMessage::ScreenShareStatus { .. } => "screen-share-status",
        }
    }

    /// Room the message is addressed to, if it names one.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            ClientMessage::CreateRoom { .. } => None,
            ClientMessage::JoinRoom { room_id, .. }
            | ClientMessage::Offer { room_id, .. }
            | ClientMessage::Answer { room_id, .. }
            | ClientMessage::AddIceCandidate { room_id, .. }
            | ClientMessage::ScreenShareStatus { room_id, .. } => Some(room_id),
        }
    }

    /// Encode as a text frame.
    pub fn to_text(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages the gateway sends to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomCreated { room_id: String },
    RoomJoinError { message: String },
    #[serde(rename_all = "camelCase")]
    UserJoined { room_id: String },
    #[serde(rename_all = "camelCase")]
    SendOffer { room_id: String },
    #[serde(rename_all = "camelCase")]
    Offer { sdp: Value, room_id: String },
    #[serde(rename_all = "camelCase")]
    Answer { sdp: Value, room_id: String },
    AddIceCandidate {
        candidate: Value,
        #[serde(rename = "type")]
        role: CandidateRole,
    },
    #[serde(rename_all = "camelCase")]
    ScreenShareStatus { is_sharing: bool },
}

impl ServerMessage {
    /// Wire name of the event, for logs.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::RoomCreated { .. } => "room-created",
            ServerMessage::RoomJoinError { .. } => "room-join-error",
            ServerMessage::UserJoined { .. } => "user-joined",
            ServerMessage::SendOffer { .. } => "send-offer",
            ServerMessage::Offer { .. } => "offer",
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::AddIceCandidate { .. } => "add-ice-candidate",
            ServerMessage::ScreenShareStatus { .. } => "screen-share-status",
        }
    }

    pub fn join_error() -> Self {
        ServerMessage::RoomJoinError {
            message: JOIN_ERROR_MESSAGE.to_string(),
        }
    }

    /// Encode as a text frame.
    pub fn to_text(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }
}
