//! The peer-connection capability the negotiation core drives.
//!
//! Media capture and the actual transport live outside this crate. They are
//! reached through [`PeerConnection`], built by a [`PeerConnectionFactory`],
//! and report back asynchronously through [`PeerEvents`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::negotiation::NegotiationRole;

/// Stream label carried by camera and microphone tracks.
pub const CAMERA_STREAM_LABEL: &str = "camera";
/// Stream label carried by the shared-screen video track.
pub const SCREEN_STREAM_LABEL: &str = "screen";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A local outbound track, as handed over by the media collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: TrackId,
    pub kind: TrackKind,
    pub stream_label: String,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, stream_label: impl Into<String>) -> Self {
        Self {
            id: TrackId::new(id),
            kind,
            stream_label: stream_label.into(),
        }
    }

    pub fn camera(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Video, CAMERA_STREAM_LABEL)
    }

    pub fn microphone(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Audio, CAMERA_STREAM_LABEL)
    }

    pub fn with_stream_label(mut self, label: impl Into<String>) -> Self {
        self.stream_label = label.into();
        self
    }
}

/// An inbound track reported by the peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: TrackId,
    pub kind: TrackKind,
    /// Remote stream id; `None` when the remote did not send one.
    pub stream_label: Option<String>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, stream_label: Option<String>) -> Self {
        Self {
            id: TrackId::new(id),
            kind,
            stream_label,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description in the browser's `RTCSessionDescriptionInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PeerConnectionError {
    #[error("session description rejected: {0}")]
    Description(String),

    #[error("ICE candidate rejected: {0}")]
    Candidate(String),

    #[error("track operation failed for {track}: {reason}")]
    Track { track: TrackId, reason: String },

    #[error("peer connection is closed")]
    Closed,

    #[error("peer connection backend error: {0}")]
    Backend(String),
}

/// Asynchronous notifications from a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A local candidate was gathered and should be trickled to the peer.
    IceCandidate(IceCandidate),
    TrackReceived(RemoteTrack),
    TrackEnded(TrackId),
    NegotiationNeeded,
    Connected,
    Disconnected,
}

pub type PeerEventSender = mpsc::UnboundedSender<(NegotiationRole, PeerEvent)>;
pub type PeerEventReceiver = mpsc::UnboundedReceiver<(NegotiationRole, PeerEvent)>;

pub fn peer_event_channel() -> (PeerEventSender, PeerEventReceiver) {
    mpsc::unbounded_channel()
}

/// Event sink handed to a peer connection when it is created.
///
/// Every event is stamped with the role the connection was created for so
/// the session can ignore events from a connection it already replaced.
#[derive(Debug, Clone)]
pub struct PeerEvents {
    role: NegotiationRole,
    tx: PeerEventSender,
}

impl PeerEvents {
    pub fn new(role: NegotiationRole, tx: PeerEventSender) -> Self {
        Self { role, tx }
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    /// Returns `false` once the session stopped listening.
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.tx.send((self.role, event)).is_ok()
    }
}

/// One peer connection. Implementations must be cheap to share behind an
/// `Arc` and internally synchronized.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, PeerConnectionError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerConnectionError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerConnectionError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerConnectionError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerConnectionError>;

    /// Start sending `track`. Changes the negotiated media set.
    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerConnectionError>;

    /// Stop sending the track. Changes the negotiated media set.
    async fn remove_track(&self, track: &TrackId) -> Result<(), PeerConnectionError>;

    /// Swap the source of an existing sender without renegotiation.
    async fn replace_track(
        &self,
        current: &TrackId,
        replacement: &MediaTrack,
    ) -> Result<(), PeerConnectionError>;

    async fn close(&self) -> Result<(), PeerConnectionError>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        events: PeerEvents,
    ) -> Result<Arc<dyn PeerConnection>, PeerConnectionError>;
}
