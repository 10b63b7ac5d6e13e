use crate::media::{MediaTrack, TrackId};

/// Where the participant is in the room lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Lobby,
    /// Room created or join requested, no peer yet.
    Waiting(String),
    Paired(String),
}

impl SessionPhase {
    pub fn room_id(&self) -> Option<&str> {
        match self {
            SessionPhase::Lobby => None,
            SessionPhase::Waiting(room_id) | SessionPhase::Paired(room_id) => Some(room_id),
        }
    }
}

/// Local capture handed over by the media collaborator.
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    pub camera: Option<MediaTrack>,
    pub microphone: Option<MediaTrack>,
}

impl LocalMedia {
    pub fn new(camera: Option<MediaTrack>, microphone: Option<MediaTrack>) -> Self {
        Self { camera, microphone }
    }

    pub fn tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.camera.iter().chain(self.microphone.iter())
    }
}

/// What the renderer should show.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionView {
    pub lobby: bool,
    pub room_id: Option<String>,
    pub paired: bool,
    pub main: Option<TrackId>,
    pub secondary: Option<TrackId>,
    pub remote_sharing: bool,
    pub local_sharing: bool,
    /// Set when the last join attempt was refused.
    pub join_error: Option<String>,
}

/// User intents fed to the session driver.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    CreateRoom {
        name: Option<String>,
    },
    JoinRoom {
        room_id: String,
        name: Option<String>,
    },
    StartScreenShare {
        video: MediaTrack,
        mixed_audio: Option<MediaTrack>,
    },
    StopScreenShare,
    /// A local capture track ended outside our control.
    LocalTrackEnded(TrackId),
    Leave,
}
