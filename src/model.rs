use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

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

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Sound,
    Interview,
}

impl ContentType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sound" | "sounds" => Some(Self::Sound),
            "interview" | "interviews" => Some(Self::Interview),
            _ => None,
        }
    }
}

/// A catalog record as delivered by the persistence layer.
///
/// Records are immutable once fetched; the engine shares them as
/// `Arc<Track>` and compares them by [`TrackId`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub audio_url: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    pub duration: u32,
    pub content_type: ContentType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub type SharedTrack = Arc<Track>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

impl RepeatMode {
    pub fn next(self) -> Self {
        match self {
            Self::Off => Self::All,
            Self::All => Self::One,
            Self::One => Self::Off,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::All => "all",
            Self::One => "one",
        }
    }
}

/// Logical playback state. Owned by [`crate::store::PlaybackStore`] and only
/// changed through its `dispatch`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub current_track: Option<SharedTrack>,
    pub playlist: Vec<SharedTrack>,
    pub current_index: Option<usize>,
    pub is_playing: bool,
    pub is_paused: bool,
    pub is_loading: bool,
    /// Set when a track change happens while playing; consumed once the new
    /// source reports it can play.
    pub pending_resume: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f32,
    pub is_muted: bool,
    pub shuffle_mode: bool,
    pub repeat_mode: RepeatMode,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_track: None,
            playlist: Vec::new(),
            current_index: None,
            is_playing: false,
            is_paused: false,
            is_loading: false,
            pending_resume: false,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            is_muted: false,
            shuffle_mode: false,
            repeat_mode: RepeatMode::Off,
        }
    }
}

impl PlaybackState {
    pub fn current_id(&self) -> Option<&TrackId> {
        self.current_track.as_ref().map(|track| &track.id)
    }

    pub fn index_of(&self, id: &TrackId) -> Option<usize> {
        self.playlist.iter().position(|track| &track.id == id)
    }

    pub fn effective_volume(&self) -> f32 {
        if self.is_muted { 0.0 } else { self.volume }
    }
}
