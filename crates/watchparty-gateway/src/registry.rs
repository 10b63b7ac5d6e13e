//! Room registry: pairs exactly two participants per session.
//!
//! Lifecycle of a session:
//! - WAITING_PEER: created, only the creator slot is filled
//! - SEALED: the joiner slot was filled once; nobody else may join
//! - reclaimed: every occupant disconnected, the entry is dropped
//!
//! Slot mutation is not synchronised here; the relay keeps the registry
//! behind a single write lock. Ids come from an atomic counter and never
//! repeat within the process.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;
use watchparty_common::SessionId;

/// Identity of one transport connection, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Session state as seen from outside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Creator present, joiner slot open
    WaitingPeer,
    /// Joiner slot has been filled; the session never reopens
    Sealed,
}

/// Slot a participant occupies inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Creator,
    Joiner,
}

/// A pairing record for two participants.
#[derive(Debug)]
pub struct Session {
    /// Session ID handed out to the creator
    pub id: SessionId,
    creator: Option<ParticipantId>,
    joiner: Option<ParticipantId>,
    sealed: bool,
}

impl Session {
    fn new(id: SessionId, creator: ParticipantId) -> Self {
        Self {
            id,
            creator: Some(creator),
            joiner: None,
            sealed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.sealed {
            SessionState::Sealed
        } else {
            SessionState::WaitingPeer
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn creator(&self) -> Option<ParticipantId> {
        self.creator
    }

    pub fn joiner(&self) -> Option<ParticipantId> {
        self.joiner
    }

    /// Slot held by `participant`, if any.
    pub fn slot_of(&self, participant: ParticipantId) -> Option<Slot> {
        if self.creator == Some(participant) {
            Some(Slot::Creator)
        } else if self.joiner == Some(participant) {
            Some(Slot::Joiner)
        } else {
            None
        }
    }

    /// The other occupant relative to `sender`.
    ///
    /// `None` unless the session is sealed, the sender holds a slot, and
    /// the other slot is still occupied.
    pub fn peer_of(&self, sender: ParticipantId) -> Option<ParticipantId> {
        if !self.sealed {
            return None;
        }
        match self.slot_of(sender)? {
            Slot::Creator => self.joiner,
            Slot::Joiner => self.creator,
        }
    }

    fn vacate(&mut self, participant: ParticipantId) -> bool {
        match self.slot_of(participant) {
            Some(Slot::Creator) => {
                self.creator = None;
                true
            }
            Some(Slot::Joiner) => {
                self.joiner = None;
                true
            }
            None => false,
        }
    }

    fn is_empty(&self) -> bool {
        self.creator.is_none() && self.joiner.is_none()
    }
}

/// Why a join was refused. The registry is left untouched in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("session not found")]
    UnknownSession,
    #[error("session full")]
    SessionFull,
    #[error("participant already occupies this session")]
    AlreadyOccupant,
}

/// Result of a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pairing {
    pub session_id: SessionId,
    /// Designated initiator
    pub creator: ParticipantId,
    pub joiner: ParticipantId,
}

/// Owns every live session and the id counter.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    memberships: HashMap<ParticipantId, Vec<SessionId>>,
    next_id: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            memberships: HashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> SessionId {
        SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate a fresh id and seat `creator` in slot A. Never fails.
    pub fn create_session(&mut self, creator: ParticipantId) -> SessionId {
        let id = self.allocate_id();
        self.sessions.insert(id, Session::new(id, creator));
        self.memberships.entry(creator).or_default().push(id);
        id
    }

    /// Fill slot B of `session_id` and seal the session.
    pub fn join_session(
        &mut self,
        session_id: SessionId,
        joiner: ParticipantId,
    ) -> Result<Pairing, JoinError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(JoinError::UnknownSession)?;

        if session.sealed {
            return Err(JoinError::SessionFull);
        }
        if session.slot_of(joiner).is_some() {
            return Err(JoinError::AlreadyOccupant);
        }
        // Unsealed sessions are reclaimed as soon as the creator leaves.
        let creator = session.creator.ok_or(JoinError::UnknownSession)?;

        session.joiner = Some(joiner);
        session.sealed = true;
        self.memberships.entry(joiner).or_default().push(session_id);

        Ok(Pairing {
            session_id,
            creator,
            joiner,
        })
    }

    /// The occupant a message from `sender` should be delivered to.
    pub fn relay_target(
        &self,
        session_id: SessionId,
        sender: ParticipantId,
    ) -> Option<ParticipantId> {
        self.sessions.get(&session_id)?.peer_of(sender)
    }

    /// Vacate every slot `participant` holds.
    ///
    /// Sessions left without occupants are dropped; their ids are returned.
    pub fn remove_participant(&mut self, participant: ParticipantId) -> Vec<SessionId> {
        let Some(session_ids) = self.memberships.remove(&participant) else {
            return Vec::new();
        };

        let mut reclaimed = Vec::new();
        for session_id in session_ids {
            let empty = match self.sessions.get_mut(&session_id) {
                Some(session) => session.vacate(participant) && session.is_empty(),
                None => false,
            };
            if empty {
                self.sessions.remove(&session_id);
                reclaimed.push(session_id);
            }
        }
        reclaimed
    }

    pub fn get(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
