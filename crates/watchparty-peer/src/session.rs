//! Participant-side session: lobby phase, one negotiator, inbound track
//! roles and the local screen share.
//!
//! Every operation returns the signaling messages to send; the caller owns
//! the socket.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use watchparty_common::{ClientMessage, ServerMessage};

use crate::media::{
    IceCandidate, MediaTrack, PeerConnection, PeerConnectionFactory, PeerEvent, PeerEventSender,
    PeerEvents, SessionDescription, TrackId, SCREEN_STREAM_LABEL,
};
use crate::negotiation::{NegotiationError, NegotiationRole, Negotiator};
use crate::tracks::TrackRoleResolver;
use crate::types::{LocalMedia, SessionPhase, SessionView};

type Outgoing = Result<Vec<ClientMessage>, NegotiationError>;

#[derive(Debug, Clone)]
struct ScreenShare {
    video: MediaTrack,
    mixed_audio: Option<MediaTrack>,
    /// The screen went out on the camera sender instead of a new track.
    replaced_camera: bool,
}

pub struct ParticipantSession {
    factory: Arc<dyn PeerConnectionFactory>,
    peer_events: PeerEventSender,
    media: LocalMedia,
    name: Option<String>,
    phase: SessionPhase,
    negotiator: Option<Negotiator>,
    resolver: TrackRoleResolver,
    screen: Option<ScreenShare>,
    join_error: Option<String>,
    view_tx: watch::Sender<SessionView>,
}

fn decode<T: DeserializeOwned>(what: &'static str, value: Value) -> Result<T, NegotiationError> {
    serde_json::from_value(value).map_err(|err| NegotiationError::invalid_payload(what, err))
}

fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Value, NegotiationError> {
    serde_json::to_value(value).map_err(|err| NegotiationError::invalid_payload(what, err))
}

fn offer_message(
    offer: SessionDescription,
    room_id: &str,
) -> Result<ClientMessage, NegotiationError> {
    Ok(ClientMessage::Offer {
        sdp: encode("offer", &offer)?,
        room_id: room_id.to_string(),
    })
}

impl ParticipantSession {
    pub fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        media: LocalMedia,
        peer_events: PeerEventSender,
    ) -> Self {
        let (view_tx, _) = watch::channel(SessionView {
            lobby: true,
            ..SessionView::default()
        });
        Self {
            factory,
            peer_events,
            media,
            name: None,
            phase: SessionPhase::Lobby,
            negotiator: None,
            resolver: TrackRoleResolver::new(),
            screen: None,
            join_error: None,
            view_tx,
        }
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn negotiator(&self) -> Option<&Negotiator> {
        self.negotiator.as_ref()
    }

    pub fn resolver(&self) -> &TrackRoleResolver {
        &self.resolver
    }

    /// Watch the rendered view; updated after every operation.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            lobby: self.phase == SessionPhase::Lobby,
            room_id: self.phase.room_id().map(str::to_owned),
            paired: matches!(self.phase, SessionPhase::Paired(_)),
            main: self.resolver.main_view().cloned(),
            secondary: self.resolver.secondary_view().cloned(),
            remote_sharing: self.resolver.remote_sharing(),
            local_sharing: self.screen.is_some(),
            join_error: self.join_error.clone(),
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }

    pub fn create_room(&mut self, name: Option<String>) -> Vec<ClientMessage> {
        if self.phase != SessionPhase::Lobby {
            warn!(phase = ?self.phase, "create-room ignored outside the lobby");
            return Vec::new();
        }
        self.name = name.clone();
        self.join_error = None;
        self.publish();
        vec![ClientMessage::CreateRoom { name }]
    }

    pub fn join_room(&mut self, room_id: String, name: Option<String>) -> Vec<ClientMessage> {
        if self.phase != SessionPhase::Lobby {
            warn!(phase = ?self.phase, "join-room ignored outside the lobby");
            return Vec::new();
        }
        self.name = name.clone();
        self.join_error = None;
        self.phase = SessionPhase::Waiting(room_id.clone());
        self.publish();
        vec![ClientMessage::JoinRoom { room_id, name }]
    }

    pub async fn handle_server_message(&mut self, message: ServerMessage) -> Outgoing {
        let result = self.dispatch_server_message(message).await;
        self.publish();
        result
    }

    async fn dispatch_server_message(&mut self, message: ServerMessage) -> Outgoing {
        match message {
            ServerMessage::RoomCreated { room_id } => {
                info!(room = %room_id, "room created, waiting for a peer");
                self.phase = SessionPhase::Waiting(room_id);
                Ok(Vec::new())
            }
            ServerMessage::RoomJoinError { message } => {
                warn!("join refused: {}", message);
                self.phase = SessionPhase::Lobby;
                self.join_error = Some(message);
                Ok(Vec::new())
            }
            ServerMessage::UserJoined { room_id } => {
                info!(room = %room_id, "paired");
                self.phase = SessionPhase::Paired(room_id);
                self.join_error = None;
                Ok(Vec::new())
            }
            ServerMessage::SendOffer { room_id } => self.become_initiator(room_id).await,
            ServerMessage::Offer { sdp, room_id } => {
                let offer: SessionDescription = decode("offer", sdp)?;
                if !matches!(self.phase, SessionPhase::Paired(_)) {
                    self.phase = SessionPhase::Paired(room_id.clone());
                }
                let negotiator = self.ensure_responder().await?;
                let answer = negotiator.handle_offer(offer).await?;
                Ok(vec![ClientMessage::Answer {
                    sdp: encode("answer", &answer)?,
                    room_id,
                }])
            }
            ServerMessage::Answer { sdp, .. } => {
                let negotiator = self
                    .negotiator
                    .as_mut()
                    .ok_or(NegotiationError::NoPeerConnection)?;
                let answer: SessionDescription = match decode("answer", sdp) {
                    Ok(answer) => answer,
                    Err(err) => {
                        negotiator.abandon_offer();
                        return Err(err);
                    }
                };
                let follow_up = negotiator.handle_answer(answer).await?;
                self.offer_messages(follow_up)
            }
            ServerMessage::AddIceCandidate { candidate, role } => {
                let candidate: IceCandidate = decode("candidate", candidate)?;
                let applying = NegotiationRole::applying(role);
                if self.negotiator.is_none() {
                    if applying != NegotiationRole::Responder {
                        debug!(tag = %role, "candidate before negotiation started, dropping");
                        return Ok(Vec::new());
                    }
                    self.negotiator = Some(Negotiator::responder(None));
                }
                let negotiator = self
                    .negotiator
                    .as_mut()
                    .ok_or(NegotiationError::NoPeerConnection)?;
                if negotiator.role() != applying {
                    return Err(NegotiationError::WrongRole {
                        expected: applying,
                        actual: negotiator.role(),
                    });
                }
                negotiator.add_remote_candidate(candidate).await?;
                Ok(Vec::new())
            }
            ServerMessage::ScreenShareStatus { is_sharing } => {
                info!(sharing = is_sharing, "peer screen share status");
                self.resolver.on_screen_share_status(is_sharing);
                Ok(Vec::new())
            }
        }
    }

    async fn open_connection(
        &self,
        role: NegotiationRole,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        let events = PeerEvents::new(role, self.peer_events.clone());
        let pc = self.factory.create(events).await?;
        for track in self.media.tracks() {
            pc.add_track(track).await?;
        }
        debug!(%role, "peer connection opened");
        Ok(pc)
    }

    async fn become_initiator(&mut self, room_id: String) -> Outgoing {
        self.phase = SessionPhase::Paired(room_id);
        if let Some(existing) = &self.negotiator {
            if existing.role() == NegotiationRole::Initiator && existing.has_peer_connection() {
                debug!("already initiating, ignoring send-offer");
                return Ok(Vec::new());
            }
            warn!(role = %existing.role(), "replacing negotiator on send-offer");
        }
        if let Some(mut stale) = self.negotiator.take() {
            stale.close().await;
        }

        let pc = self.open_connection(NegotiationRole::Initiator).await?;
        let negotiator = self.negotiator.insert(Negotiator::initiator(pc));
        let offer = negotiator.negotiate().await?;
        self.offer_messages(offer)
    }

    /// The responder negotiator, with its connection opened on first use.
    async fn ensure_responder(&mut self) -> Result<&mut Negotiator, NegotiationError> {
        let needs_connection = match &self.negotiator {
            Some(existing) if existing.role() == NegotiationRole::Initiator => {
                return Err(NegotiationError::UnexpectedMessage {
                    role: existing.role(),
                    state: existing.state(),
                    message: "offer",
                });
            }
            Some(existing) => !existing.has_peer_connection(),
            None => true,
        };
        if needs_connection {
            let pc = self.open_connection(NegotiationRole::Responder).await?;
            self.negotiator
                .get_or_insert_with(|| Negotiator::responder(None))
                .set_peer_connection(pc);
        }
        self.negotiator
            .as_mut()
            .ok_or(NegotiationError::NoPeerConnection)
    }

    fn offer_messages(&self, offer: Option<SessionDescription>) -> Outgoing {
        let Some(offer) = offer else {
            return Ok(Vec::new());
        };
        match self.phase.room_id() {
            Some(room_id) => Ok(vec![offer_message(offer, room_id)?]),
            None => {
                warn!("offer created outside a room, dropping");
                Ok(Vec::new())
            }
        }
    }

    pub async fn handle_peer_event(&mut self, role: NegotiationRole, event: PeerEvent) -> Outgoing {
        let result = self.dispatch_peer_event(role, event).await;
        self.publish();
        result
    }

    async fn dispatch_peer_event(&mut self, role: NegotiationRole, event: PeerEvent) -> Outgoing {
        let Some(negotiator) = self.negotiator.as_mut() else {
            debug!(%role, ?event, "peer event without a negotiator");
            return Ok(Vec::new());
        };
        if negotiator.role() != role {
            debug!(%role, ?event, "event from a replaced connection");
            return Ok(Vec::new());
        }

        match event {
            PeerEvent::IceCandidate(candidate) => match self.phase.room_id() {
                Some(room_id) => Ok(vec![ClientMessage::AddIceCandidate {
                    candidate: encode("candidate", &candidate)?,
                    room_id: room_id.to_string(),
                    role: role.local_candidate_role(),
                }]),
                None => {
                    debug!("local candidate outside a room, dropping");
                    Ok(Vec::new())
                }
            },
            PeerEvent::TrackReceived(track) => {
                self.resolver.on_track(&track);
                Ok(Vec::new())
            }
            PeerEvent::TrackEnded(id) => {
                self.resolver.on_track_ended(&id);
                Ok(Vec::new())
            }
            PeerEvent::NegotiationNeeded => {
                if role != NegotiationRole::Initiator || !negotiator.state().is_stable() {
                    debug!(%role, state = %negotiator.state(), "negotiation-needed ignored");
                    return Ok(Vec::new());
                }
                let offer = negotiator.negotiate().await?;
                self.offer_messages(offer)
            }
            PeerEvent::Connected => {
                negotiator.on_connected();
                Ok(Vec::new())
            }
            PeerEvent::Disconnected => {
                info!(%role, "peer connection lost");
                Ok(Vec::new())
            }
        }
    }

    /// Share a screen track with the peer.
    ///
    /// The initiator sends it as an extra track labelled `"screen"` and
    /// renegotiates. The responder cannot offer, so it swaps the screen
    /// onto its camera sender. `mixed_audio` replaces the microphone for
    /// the duration of the share.
    pub async fn start_screen_share(
        &mut self,
        video: MediaTrack,
        mixed_audio: Option<MediaTrack>,
    ) -> Outgoing {
        let result = self.share_screen(video, mixed_audio).await;
        self.publish();
        result
    }

    async fn share_screen(
        &mut self,
        video: MediaTrack,
        mut mixed_audio: Option<MediaTrack>,
    ) -> Outgoing {
        if self.screen.is_some() {
            warn!("screen share already running");
            return Ok(Vec::new());
        }
        let room_id = match &self.phase {
            SessionPhase::Paired(room_id) => room_id.clone(),
            _ => return Err(NegotiationError::NoPeerConnection),
        };
        let negotiator = self
            .negotiator
            .as_mut()
            .ok_or(NegotiationError::NoPeerConnection)?;
        let pc = negotiator
            .peer_connection()
            .cloned()
            .ok_or(NegotiationError::NoPeerConnection)?;
        let video = video.with_stream_label(SCREEN_STREAM_LABEL);

        let replaced_camera = match negotiator.role() {
            NegotiationRole::Initiator => {
                pc.add_track(&video).await?;
                false
            }
            NegotiationRole::Responder => {
                let camera = self.media.camera.as_ref().ok_or(NegotiationError::WrongRole {
                    expected: NegotiationRole::Initiator,
                    actual: NegotiationRole::Responder,
                })?;
                pc.replace_track(&camera.id, &video).await?;
                true
            }
        };

        if let (Some(mixed), Some(mic)) = (&mixed_audio, &self.media.microphone) {
            if let Err(err) = pc.replace_track(&mic.id, mixed).await {
                warn!("keeping microphone audio, mixed track rejected: {}", err);
                mixed_audio = None;
            }
        } else {
            mixed_audio = None;
        }

        info!(track = %video.id, replaced_camera, "screen share started");
        self.screen = Some(ScreenShare {
            video,
            mixed_audio,
            replaced_camera,
        });

        let mut out = Vec::new();
        if !replaced_camera {
            if let Some(offer) = negotiator.negotiate().await? {
                out.push(offer_message(offer, &room_id)?);
            }
        }
        out.push(ClientMessage::ScreenShareStatus {
            is_sharing: true,
            room_id,
        });
        Ok(out)
    }

    pub async fn stop_screen_share(&mut self) -> Outgoing {
        let result = self.unshare_screen().await;
        self.publish();
        result
    }

    /// The share is over once this runs, even when the connection rejects
    /// a track step: the peer is always told, and the initiator always
    /// renegotiates.
    async fn unshare_screen(&mut self) -> Outgoing {
        let Some(share) = self.screen.take() else {
            return Ok(Vec::new());
        };
        info!(track = %share.video.id, "screen share stopped");
        let room_id = self.phase.room_id().map(str::to_owned);

        let mut out = Vec::new();
        let pc = self
            .negotiator
            .as_ref()
            .and_then(|negotiator| negotiator.peer_connection().cloned());
        if let Some(pc) = pc {
            let restored = if share.replaced_camera {
                match &self.media.camera {
                    Some(camera) => pc.replace_track(&share.video.id, camera).await,
                    None => Ok(()),
                }
            } else {
                pc.remove_track(&share.video.id).await
            };
            if let Err(err) = restored {
                warn!(track = %share.video.id, "failed to detach screen track: {}", err);
            }
            if let (Some(mixed), Some(mic)) = (&share.mixed_audio, &self.media.microphone) {
                if let Err(err) = pc.replace_track(&mixed.id, mic).await {
                    warn!("failed to restore microphone audio: {}", err);
                }
            }

            if !share.replaced_camera {
                if let Some(negotiator) = self.negotiator.as_mut() {
                    match negotiator.negotiate().await {
                        Ok(offer) => out.extend(self.offer_messages(offer)?),
                        Err(err) => warn!("renegotiation after screen share failed: {}", err),
                    }
                }
            }
        }

        if let Some(room_id) = room_id {
            out.push(ClientMessage::ScreenShareStatus {
                is_sharing: false,
                room_id,
            });
        }
        Ok(out)
    }

    /// A local capture track ended, e.g. the OS "stop sharing" control.
    pub async fn local_track_ended(&mut self, id: &TrackId) -> Outgoing {
        let is_screen = matches!(&self.screen, Some(share) if share.video.id == *id);
        if is_screen {
            return self.stop_screen_share().await;
        }
        debug!(track = %id, "local track ended");
        Ok(Vec::new())
    }

    /// Release the peer connection and go back to the lobby.
    pub async fn close(&mut self) {
        if let Some(mut negotiator) = self.negotiator.take() {
            negotiator.close().await;
        }
        self.resolver.reset();
        self.screen = None;
        self.phase = SessionPhase::Lobby;
        self.publish();
    }
}
