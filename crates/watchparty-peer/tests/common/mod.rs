//! Recording peer connection shared by the integration suites.
//!
//! Descriptions list the senders as `m=<kind> <id> <label>` lines, so
//! applying a remote description reports track arrivals and removals the
//! way a real connection would.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use watchparty_peer::{
    IceCandidate, MediaTrack, PeerConnection, PeerConnectionError, PeerConnectionFactory,
    PeerEvent, PeerEvents, RemoteTrack, SessionDescription, TrackId, TrackKind,
};

struct Sender {
    negotiated: MediaTrack,
    current: TrackId,
}

#[derive(Default)]
struct State {
    senders: Vec<Sender>,
    remote_tracks: Vec<RemoteTrack>,
    local_set: bool,
    remote_set: bool,
    connected: bool,
    closed: bool,
    offers: usize,
    gathered: usize,
    applied_candidates: Vec<String>,
}

pub struct RecordingPeerConnection {
    label: String,
    events: PeerEvents,
    state: Mutex<State>,
}

impl RecordingPeerConnection {
    fn render(&self, state: &State) -> String {
        let mut sdp = format!("v=0\r\ns={}\r\n", self.label);
        for sender in &state.senders {
            let kind = match sender.negotiated.kind {
                TrackKind::Audio => "audio",
                TrackKind::Video => "video",
            };
            sdp.push_str(&format!(
                "m={} {} {}\r\n",
                kind, sender.negotiated.id, sender.negotiated.stream_label
            ));
        }
        sdp
    }

    fn parse(sdp: &str) -> Vec<RemoteTrack> {
        sdp.split("\r\n")
            .filter_map(|line| line.strip_prefix("m="))
            .filter_map(|line| {
                let mut parts = line.split(' ');
                let kind = match parts.next()? {
                    "audio" => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                let id = parts.next()?;
                let label = parts.next().map(str::to_string);
                Some(RemoteTrack::new(id, kind, label))
            })
            .collect()
    }

    fn maybe_connected(&self, state: &mut State) {
        if state.local_set && state.remote_set && !state.connected {
            state.connected = true;
            self.events.emit(PeerEvent::Connected);
        }
    }

    pub fn offers(&self) -> usize {
        self.state.lock().unwrap().offers
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.state.lock().unwrap().applied_candidates.clone()
    }

    /// Tracks currently fed into senders.
    pub fn sending(&self) -> Vec<TrackId> {
        self.state
            .lock()
            .unwrap()
            .senders
            .iter()
            .map(|s| s.current.clone())
            .collect()
    }

    pub fn remote_tracks(&self) -> Vec<RemoteTrack> {
        self.state.lock().unwrap().remote_tracks.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl PeerConnection for RecordingPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, PeerConnectionError> {
        let mut state = self.state.lock().unwrap();
        state.offers += 1;
        Ok(SessionDescription::offer(self.render(&state)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerConnectionError> {
        let state = self.state.lock().unwrap();
        Ok(SessionDescription::answer(self.render(&state)))
    }

    async fn set_local_description(
        &self,
        _description: SessionDescription,
    ) -> Result<(), PeerConnectionError> {
        let mut state = self.state.lock().unwrap();
        state.local_set = true;
        state.gathered += 1;
        let mut candidate =
            IceCandidate::new(format!("candidate:{}:{}", self.label, state.gathered));
        candidate.sdp_mid = Some("0".into());
        candidate.sdp_mline_index = Some(0);
        self.events.emit(PeerEvent::IceCandidate(candidate));
        self.maybe_connected(&mut state);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerConnectionError> {
        let mut state = self.state.lock().unwrap();
        let tracks = Self::parse(&description.sdp);
        for gone in state.remote_tracks.iter().filter(|t| !tracks.contains(t)) {
            self.events.emit(PeerEvent::TrackEnded(gone.id.clone()));
        }
        for fresh in tracks.iter().filter(|t| !state.remote_tracks.contains(t)) {
            self.events.emit(PeerEvent::TrackReceived(fresh.clone()));
        }
        state.remote_tracks = tracks;
        state.remote_set = true;
        self.maybe_connected(&mut state);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerConnectionError> {
        let mut state = self.state.lock().unwrap();
        if !state.remote_set {
            return Err(PeerConnectionError::Candidate(
                "no remote description".into(),
            ));
        }
        state.applied_candidates.push(candidate.candidate);
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerConnectionError> {
        self.state.lock().unwrap().senders.push(Sender {
            negotiated: track.clone(),
            current: track.id.clone(),
        });
        Ok(())
    }

    async fn remove_track(&self, track: &TrackId) -> Result<(), PeerConnectionError> {
        let mut state = self.state.lock().unwrap();
        let before = state.senders.len();
        state.senders.retain(|s| s.current != *track);
        if state.senders.len() == before {
            return Err(PeerConnectionError::Track {
                track: track.clone(),
                reason: "not being sent".into(),
            });
        }
        Ok(())
    }

    async fn replace_track(
        &self,
        current: &TrackId,
        replacement: &MediaTrack,
    ) -> Result<(), PeerConnectionError> {
        let mut state = self.state.lock().unwrap();
        let sender = state
            .senders
            .iter_mut()
            .find(|s| s.current == *current)
            .ok_or_else(|| PeerConnectionError::Track {
                track: current.clone(),
                reason: "not being sent".into(),
            })?;
        sender.current = replacement.id.clone();
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerConnectionError> {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.events.emit(PeerEvent::Disconnected);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingFactory {
    label: String,
    created: Mutex<Vec<Arc<RecordingPeerConnection>>>,
}

impl RecordingFactory {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<RecordingPeerConnection> {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no peer connection created")
    }
}

#[async_trait]
impl PeerConnectionFactory for RecordingFactory {
    async fn create(
        &self,
        events: PeerEvents,
    ) -> Result<Arc<dyn PeerConnection>, PeerConnectionError> {
        let pc = Arc::new(RecordingPeerConnection {
            label: self.label.clone(),
            events,
            state: Mutex::new(State::default()),
        });
        self.created.lock().unwrap().push(pc.clone());
        Ok(pc)
    }
}
