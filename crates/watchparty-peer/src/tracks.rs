//! Classification of inbound tracks into camera and screen.
//!
//! A track whose stream label is `"camera"` or `"screen"` gets that role.
//! Unlabelled video tracks fall back to arrival order: the first one is the
//! camera, any later one is the screen share.

use tracing::debug;

use crate::media::{RemoteTrack, TrackId, TrackKind, CAMERA_STREAM_LABEL, SCREEN_STREAM_LABEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackRole {
    Camera,
    Screen,
}

impl TrackRole {
    fn from_label(label: Option<&str>) -> Option<Self> {
        match label {
            Some(CAMERA_STREAM_LABEL) => Some(TrackRole::Camera),
            Some(SCREEN_STREAM_LABEL) => Some(TrackRole::Screen),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct TrackRoleResolver {
    camera: Option<TrackId>,
    screen: Option<TrackId>,
    audio: Vec<TrackId>,
    remote_sharing: bool,
}

impl TrackRoleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arriving track. Returns the role given to a video track,
    /// `None` for audio.
    pub fn on_track(&mut self, track: &RemoteTrack) -> Option<TrackRole> {
        if track.kind == TrackKind::Audio {
            if !self.audio.contains(&track.id) {
                self.audio.push(track.id.clone());
            }
            return None;
        }

        let role = TrackRole::from_label(track.stream_label.as_deref()).unwrap_or(
            match &self.camera {
                None => TrackRole::Camera,
                Some(camera) if *camera == track.id => TrackRole::Camera,
                Some(_) => TrackRole::Screen,
            },
        );

        match role {
            TrackRole::Camera => {
                if self.screen.as_ref() == Some(&track.id) {
                    self.screen = None;
                }
                self.camera = Some(track.id.clone());
            }
            TrackRole::Screen => self.screen = Some(track.id.clone()),
        }
        debug!(track = %track.id, ?role, "inbound video track classified");
        Some(role)
    }

    /// Forget a track that ended. The camera takes the main view back when
    /// the screen track goes away.
    pub fn on_track_ended(&mut self, id: &TrackId) {
        if self.screen.as_ref() == Some(id) {
            debug!(track = %id, "screen track ended");
            self.screen = None;
        }
        if self.camera.as_ref() == Some(id) {
            debug!(track = %id, "camera track ended");
            self.camera = None;
        }
        self.audio.retain(|audio| audio != id);
    }

    /// Apply the peer's `screen-share-status`.
    ///
    /// `true` only records the flag; the main view switches when the screen
    /// track itself arrives, whichever comes first.
    pub fn on_screen_share_status(&mut self, sharing: bool) {
        self.remote_sharing = sharing;
        if !sharing {
            if let Some(screen) = self.screen.take() {
                debug!(track = %screen, "screen share stopped by peer");
            }
        }
    }

    pub fn camera(&self) -> Option<&TrackId> {
        self.camera.as_ref()
    }

    pub fn screen(&self) -> Option<&TrackId> {
        self.screen.as_ref()
    }

    pub fn audio(&self) -> &[TrackId] {
        &self.audio
    }

    pub fn remote_sharing(&self) -> bool {
        self.remote_sharing
    }

    /// Track shown large: the screen share while there is one, else the camera.
    pub fn main_view(&self) -> Option<&TrackId> {
        self.screen.as_ref().or(self.camera.as_ref())
    }

    /// The remembered camera, shown small while a screen share is on.
    pub fn secondary_view(&self) -> Option<&TrackId> {
        self.screen.as_ref().and(self.camera.as_ref())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
