//! Offer/answer state machine for one participant.
//!
//! The initiator creates offers and applies answers; the responder applies
//! offers and creates answers. Both sides trickle candidates and queue the
//! peer's candidates until a remote description is in place.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use watchparty_common::CandidateRole;

use crate::media::{IceCandidate, PeerConnection, PeerConnectionError, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferCreated,
    OfferSent,
    RemoteOfferReceived,
    AnswerCreated,
    AnswerSent,
    Connected,
}

impl NegotiationState {
    /// No offer/answer round is in flight.
    pub fn is_stable(self) -> bool {
        matches!(
            self,
            NegotiationState::Idle | NegotiationState::AnswerSent | NegotiationState::Connected
        )
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationRole {
    Initiator,
    Responder,
}

impl NegotiationRole {
    /// Tag put on candidates this side gathers.
    pub fn local_candidate_role(self) -> CandidateRole {
        match self {
            NegotiationRole::Initiator => CandidateRole::Sender,
            NegotiationRole::Responder => CandidateRole::Receiver,
        }
    }

    /// Which side applies a candidate carrying `tag`.
    pub fn applying(tag: CandidateRole) -> Self {
        match tag {
            CandidateRole::Sender => NegotiationRole::Responder,
            CandidateRole::Receiver => NegotiationRole::Initiator,
        }
    }
}

impl fmt::Display for NegotiationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationRole::Initiator => f.write_str("initiator"),
            NegotiationRole::Responder => f.write_str("responder"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("{role} cannot handle {message} in state {state}")]
    UnexpectedMessage {
        role: NegotiationRole,
        state: NegotiationState,
        message: &'static str,
    },

    #[error("expected the {expected} role, this side is the {actual}")]
    WrongRole {
        expected: NegotiationRole,
        actual: NegotiationRole,
    },

    #[error("no peer connection")]
    NoPeerConnection,

    #[error("invalid {what} payload: {reason}")]
    InvalidPayload { what: &'static str, reason: String },

    #[error(transparent)]
    PeerConnection(#[from] PeerConnectionError),
}

impl NegotiationError {
    pub fn invalid_payload(what: &'static str, err: impl fmt::Display) -> Self {
        NegotiationError::InvalidPayload {
            what,
            reason: err.to_string(),
        }
    }
}

pub struct Negotiator {
    role: NegotiationRole,
    state: NegotiationState,
    pc: Option<Arc<dyn PeerConnection>>,
    remote_description_set: bool,
    pending_candidates: VecDeque<IceCandidate>,
    renegotiate_after_answer: bool,
    /// Stable state the current offer round started from.
    round_origin: NegotiationState,
}

impl fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiator")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("has_pc", &self.pc.is_some())
            .field("pending_candidates", &self.pending_candidates.len())
            .finish()
    }
}

impl Negotiator {
    pub fn initiator(pc: Arc<dyn PeerConnection>) -> Self {
        Self::with_role(NegotiationRole::Initiator, Some(pc))
    }

    /// A responder may exist before its connection: candidates tagged
    /// `sender` can overtake the first offer.
    pub fn responder(pc: Option<Arc<dyn PeerConnection>>) -> Self {
        Self::with_role(NegotiationRole::Responder, pc)
    }

    fn with_role(role: NegotiationRole, pc: Option<Arc<dyn PeerConnection>>) -> Self {
        Self {
            role,
            state: NegotiationState::Idle,
            pc,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
            renegotiate_after_answer: false,
            round_origin: NegotiationState::Idle,
        }
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn peer_connection(&self) -> Option<&Arc<dyn PeerConnection>> {
        self.pc.as_ref()
    }

    pub fn has_peer_connection(&self) -> bool {
        self.pc.is_some()
    }

    pub fn set_peer_connection(&mut self, pc: Arc<dyn PeerConnection>) {
        self.pc = Some(pc);
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    fn transition(&mut self, next: NegotiationState) {
        debug!(role = %self.role, from = %self.state, to = %next, "negotiation transition");
        self.state = next;
    }

    fn connection(&self) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        self.pc.clone().ok_or(NegotiationError::NoPeerConnection)
    }

    fn require_role(&self, expected: NegotiationRole) -> Result<(), NegotiationError> {
        if self.role == expected {
            Ok(())
        } else {
            Err(NegotiationError::WrongRole {
                expected,
                actual: self.role,
            })
        }
    }

    /// Start an offer round.
    ///
    /// Returns the offer to send, or `None` when a round is already in
    /// flight; in that case a new offer goes out once the answer lands.
    pub async fn negotiate(&mut self) -> Result<Option<SessionDescription>, NegotiationError> {
        self.require_role(NegotiationRole::Initiator)?;
        let pc = self.connection()?;

        if !self.state.is_stable() {
            debug!(state = %self.state, "offer in flight, renegotiating after answer");
            self.renegotiate_after_answer = true;
            return Ok(None);
        }

        let prior = self.state;
        match self.create_and_apply_offer(pc.as_ref()).await {
            Ok(offer) => {
                self.round_origin = prior;
                Ok(Some(offer))
            }
            Err(err) => {
                self.state = prior;
                Err(err)
            }
        }
    }

    async fn create_and_apply_offer(
        &mut self,
        pc: &dyn PeerConnection,
    ) -> Result<SessionDescription, NegotiationError> {
        let offer = pc.create_offer().await?;
        self.transition(NegotiationState::OfferCreated);
        pc.set_local_description(offer.clone()).await?;
        self.transition(NegotiationState::OfferSent);
        Ok(offer)
    }

    /// Apply a peer offer and produce the answer. Reuses the existing
    /// connection for every offer of the session.
    pub async fn handle_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        if self.role != NegotiationRole::Responder || !self.state.is_stable() {
            return Err(NegotiationError::UnexpectedMessage {
                role: self.role,
                state: self.state,
                message: "offer",
            });
        }
        let pc = self.connection()?;

        let prior = self.state;
        match self.apply_offer(pc.as_ref(), offer).await {
            Ok(answer) => Ok(answer),
            Err(err) => {
                self.state = prior;
                Err(err)
            }
        }
    }

    async fn apply_offer(
        &mut self,
        pc: &dyn PeerConnection,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.transition(NegotiationState::RemoteOfferReceived);
        pc.set_remote_description(offer).await?;
        self.remote_description_set = true;
        self.flush_pending(pc).await;

        let answer = pc.create_answer().await?;
        self.transition(NegotiationState::AnswerCreated);
        pc.set_local_description(answer.clone()).await?;
        self.transition(NegotiationState::AnswerSent);
        Ok(answer)
    }

    /// Apply the peer's answer. Returns a follow-up offer when track
    /// changes happened while the previous round was in flight.
    pub async fn handle_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<Option<SessionDescription>, NegotiationError> {
        if self.role != NegotiationRole::Initiator || self.state != NegotiationState::OfferSent {
            return Err(NegotiationError::UnexpectedMessage {
                role: self.role,
                state: self.state,
                message: "answer",
            });
        }
        let pc = self.connection()?;

        if let Err(err) = pc.set_remote_description(answer).await {
            self.abandon_offer();
            return Err(err.into());
        }
        self.remote_description_set = true;
        self.flush_pending(pc.as_ref()).await;
        self.transition(NegotiationState::Connected);

        if std::mem::take(&mut self.renegotiate_after_answer) {
            return self.negotiate().await;
        }
        Ok(None)
    }

    /// End an offer round whose answer will never be applied. The next
    /// `negotiate` starts a fresh offer carrying every track change made
    /// in the meantime.
    pub fn abandon_offer(&mut self) {
        if self.role != NegotiationRole::Initiator || self.state.is_stable() {
            return;
        }
        warn!(role = %self.role, state = %self.state, "abandoning offer round");
        self.renegotiate_after_answer = false;
        let origin = self.round_origin;
        self.transition(origin);
    }

    /// Apply a remote candidate, or queue it until the connection and a
    /// remote description exist.
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), NegotiationError> {
        match &self.pc {
            Some(pc) if self.remote_description_set => {
                pc.add_ice_candidate(candidate).await?;
                Ok(())
            }
            _ => {
                debug!(role = %self.role, "queueing remote candidate");
                self.pending_candidates.push_back(candidate);
                Ok(())
            }
        }
    }

    async fn flush_pending(&mut self, pc: &dyn PeerConnection) {
        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(err) = pc.add_ice_candidate(candidate).await {
                warn!(role = %self.role, "dropping queued candidate: {}", err);
            }
        }
    }

    /// Transport reports the connection up.
    pub fn on_connected(&mut self) {
        if self.state == NegotiationState::AnswerSent {
            self.transition(NegotiationState::Connected);
        }
        info!(role = %self.role, "peer connection established");
    }

    pub async fn close(&mut self) {
        if let Some(pc) = self.pc.take() {
            if let Err(err) = pc.close().await {
                warn!(role = %self.role, "failed to close peer connection: {}", err);
            }
        }
        self.pending_candidates.clear();
        self.remote_description_set = false;
        self.renegotiate_after_answer = false;
        self.transition(NegotiationState::Idle);
    }
}
