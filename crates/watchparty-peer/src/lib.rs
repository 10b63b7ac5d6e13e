//! Participant side of a Watchparty call.
//!
//! A [`ParticipantSession`] turns gateway messages, peer-connection events
//! and user commands into signaling messages. [`run_session`] drives one
//! over a WebSocket. The media transport is abstracted behind
//! [`PeerConnection`]; the `webrtc-backend` feature provides one built on
//! the `webrtc` crate.

#![forbid(unsafe_code)]

pub mod client;
pub mod media;
pub mod negotiation;
#[cfg(feature = "webrtc-backend")]
pub mod rtc;
pub mod session;
pub mod signaling;
pub mod tracks;
pub mod types;

pub use client::run_session;
pub use media::{
    peer_event_channel, IceCandidate, MediaTrack, PeerConnection, PeerConnectionError,
    PeerConnectionFactory, PeerEvent, PeerEventReceiver, PeerEventSender, PeerEvents, RemoteTrack,
    SdpType, SessionDescription, TrackId, TrackKind, CAMERA_STREAM_LABEL, SCREEN_STREAM_LABEL,
};
pub use negotiation::{NegotiationError, NegotiationRole, NegotiationState, Negotiator};
pub use session::ParticipantSession;
pub use signaling::SignalingClient;
pub use tracks::{TrackRole, TrackRoleResolver};
pub use types::{LocalMedia, SessionCommand, SessionPhase, SessionView};

#[cfg(feature = "webrtc-backend")]
pub use rtc::{WebRtcPeerConnectionFactory, DEFAULT_STUN_SERVER};
