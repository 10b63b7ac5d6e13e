//! `webrtc` crate implementation of the peer-connection capability.
//!
//! Capture is still the media collaborator's job: it creates the
//! `TrackLocal` objects (with stream ids matching the `MediaTrack` labels)
//! and registers them here before the session attaches them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::media::{
    IceCandidate, MediaTrack, PeerConnection, PeerConnectionError, PeerConnectionFactory,
    PeerEvent, PeerEvents, RemoteTrack, SdpType, SessionDescription, TrackId, TrackKind,
};

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

pub type LocalTrackHandle = Arc<dyn TrackLocal + Send + Sync>;

fn backend(err: webrtc::Error) -> PeerConnectionError {
    PeerConnectionError::Backend(err.to_string())
}

/// Inbound track handles, released together with the connection that
/// received them.
struct RemoteTracks<T> {
    handles: HashMap<TrackId, T>,
    owners: HashMap<u64, Vec<TrackId>>,
}

impl<T> Default for RemoteTracks<T> {
    fn default() -> Self {
        Self {
            handles: HashMap::new(),
            owners: HashMap::new(),
        }
    }
}

impl<T: Clone> RemoteTracks<T> {
    fn insert(&mut self, owner: u64, id: TrackId, handle: T) {
        self.handles.insert(id.clone(), handle);
        self.owners.entry(owner).or_default().push(id);
    }

    fn get(&self, id: &TrackId) -> Option<T> {
        self.handles.get(id).cloned()
    }

    fn release(&mut self, owner: u64) {
        for id in self.owners.remove(&owner).unwrap_or_default() {
            self.handles.remove(&id);
        }
    }
}

#[derive(Default)]
struct TrackRegistry {
    local: HashMap<TrackId, LocalTrackHandle>,
    remote: RemoteTracks<Arc<TrackRemote>>,
}

pub struct WebRtcPeerConnectionFactory {
    api: API,
    ice_servers: Vec<String>,
    tracks: Arc<Mutex<TrackRegistry>>,
    next_connection: AtomicU64,
}

impl WebRtcPeerConnectionFactory {
    pub fn new(ice_servers: Vec<String>) -> Result<Self, PeerConnectionError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(backend)?;
        let api = APIBuilder::new().with_media_engine(media).build();

        let ice_servers = if ice_servers.is_empty() {
            vec![DEFAULT_STUN_SERVER.to_string()]
        } else {
            ice_servers
        };
        Ok(Self {
            api,
            ice_servers,
            tracks: Arc::new(Mutex::new(TrackRegistry::default())),
            next_connection: AtomicU64::new(1),
        })
    }

    /// Make a captured track available to `add_track`/`replace_track`.
    pub async fn register_local_track(&self, id: TrackId, track: LocalTrackHandle) {
        self.tracks.lock().await.local.insert(id, track);
    }

    /// Inbound track handle for rendering, once `TrackReceived` fired.
    pub async fn remote_track(&self, id: &TrackId) -> Option<Arc<TrackRemote>> {
        self.tracks.lock().await.remote.get(id)
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerConnectionFactory {
    async fn create(
        &self,
        events: PeerEvents,
    ) -> Result<Arc<dyn PeerConnection>, PeerConnectionError> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await.map_err(backend)?);
        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
        wire_events(&pc, events, self.tracks.clone(), connection);

        Ok(Arc::new(WebRtcPeerConnection {
            pc,
            connection,
            tracks: self.tracks.clone(),
            senders: Mutex::new(HashMap::new()),
        }))
    }
}

fn wire_events(
    pc: &RTCPeerConnection,
    events: PeerEvents,
    tracks: Arc<Mutex<TrackRegistry>>,
    connection: u64,
) {
    let ev = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let ev = ev.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                debug!("ICE gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    ev.emit(PeerEvent::IceCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
                Err(e) => warn!("failed to encode local candidate: {}", e),
            }
        })
    }));

    let ev = events.clone();
    pc.on_track(Box::new(move |track, _, _| {
        let ev = ev.clone();
        let tracks = tracks.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            let id = TrackId::new(track.id());
            let stream = track.stream_id();
            let stream_label = (!stream.is_empty()).then_some(stream);
            info!(track = %id, ?kind, "remote track received");

            tracks
                .lock()
                .await
                .remote
                .insert(connection, id.clone(), track);
            ev.emit(PeerEvent::TrackReceived(RemoteTrack {
                id,
                kind,
                stream_label,
            }));
        })
    }));

    let ev = events.clone();
    pc.on_negotiation_needed(Box::new(move || {
        let ev = ev.clone();
        Box::pin(async move {
            ev.emit(PeerEvent::NegotiationNeeded);
        })
    }));

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let ev = events.clone();
        Box::pin(async move {
            debug!("peer connection state: {}", state);
            match state {
                RTCPeerConnectionState::Connected => {
                    ev.emit(PeerEvent::Connected);
                }
                RTCPeerConnectionState::Disconnected
                | RTCPeerConnectionState::Failed
                | RTCPeerConnectionState::Closed => {
                    ev.emit(PeerEvent::Disconnected);
                }
                _ => {}
            }
        })
    }));
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, PeerConnectionError> {
    let converted = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            return Err(PeerConnectionError::Description(
                "rollback is not supported".into(),
            ))
        }
    };
    converted.map_err(|e| PeerConnectionError::Description(e.to_string()))
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription, PeerConnectionError> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(PeerConnectionError::Description(
                "unspecified description type".into(),
            ))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

pub struct WebRtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    connection: u64,
    tracks: Arc<Mutex<TrackRegistry>>,
    senders: Mutex<HashMap<TrackId, Arc<RTCRtpSender>>>,
}

impl WebRtcPeerConnection {
    async fn local_track(&self, id: &TrackId) -> Result<LocalTrackHandle, PeerConnectionError> {
        self.tracks
            .lock()
            .await
            .local
            .get(id)
            .cloned()
            .ok_or_else(|| PeerConnectionError::Track {
                track: id.clone(),
                reason: "track was never registered".into(),
            })
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, PeerConnectionError> {
        from_rtc(self.pc.create_offer(None).await.map_err(backend)?)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerConnectionError> {
        from_rtc(self.pc.create_answer(None).await.map_err(backend)?)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerConnectionError> {
        self.pc
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(|e| PeerConnectionError::Description(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerConnectionError> {
        self.pc
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(|e| PeerConnectionError::Description(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerConnectionError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| PeerConnectionError::Candidate(e.to_string()))
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerConnectionError> {
        let handle = self.local_track(&track.id).await?;
        let sender = self.pc.add_track(handle).await.map_err(backend)?;
        self.senders.lock().await.insert(track.id.clone(), sender);
        Ok(())
    }

    async fn remove_track(&self, track: &TrackId) -> Result<(), PeerConnectionError> {
        let sender = self
            .senders
            .lock()
            .await
            .remove(track)
            .ok_or_else(|| PeerConnectionError::Track {
                track: track.clone(),
                reason: "not being sent".into(),
            })?;
        self.pc.remove_track(&sender).await.map_err(backend)
    }

    async fn replace_track(
        &self,
        current: &TrackId,
        replacement: &MediaTrack,
    ) -> Result<(), PeerConnectionError> {
        let handle = self.local_track(&replacement.id).await?;
        let mut senders = self.senders.lock().await;
        let sender = senders
            .get(current)
            .cloned()
            .ok_or_else(|| PeerConnectionError::Track {
                track: current.clone(),
                reason: "not being sent".into(),
            })?;
        sender
            .replace_track(Some(handle))
            .await
            .map_err(|e| PeerConnectionError::Track {
                track: replacement.id.clone(),
                reason: e.to_string(),
            })?;
        senders.remove(current);
        senders.insert(replacement.id.clone(), sender);
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerConnectionError> {
        self.tracks.lock().await.remote.release(self.connection);
        self.senders.lock().await.clear();
        self.pc.close().await.map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_tracks_released_with_their_connection() {
        let mut remote = RemoteTracks::default();
        remote.insert(1, TrackId::new("a-cam"), "a-cam");
        remote.insert(1, TrackId::new("a-scr"), "a-scr");
        remote.insert(2, TrackId::new("b-cam"), "b-cam");

        remote.release(1);
        assert_eq!(remote.get(&TrackId::new("a-cam")), None);
        assert_eq!(remote.get(&TrackId::new("a-scr")), None);
        assert_eq!(remote.get(&TrackId::new("b-cam")), Some("b-cam"));
        assert!(!remote.owners.contains_key(&1));

        // Releasing twice, or an unknown connection, is harmless.
        remote.release(1);
        remote.release(9);
        assert_eq!(remote.handles.len(), 1);
    }
}
