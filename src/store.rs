use crate::model::{PlaybackState, RepeatMode, SharedTrack};
use crate::navigation;
use rand::SeedableRng;
use rand::rngs::SmallRng;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetTrack(SharedTrack),
    SetPlaylist(Vec<SharedTrack>),
    Play,
    Pause,
    Stop,
    SetLoading(bool),
    SetTime(f64),
    SetDuration(f64),
    SetVolume(f32),
    ToggleMute,
    ToggleShuffle,
    SetRepeat(RepeatMode),
    NextTrack,
    PreviousTrack,
    SetIndex(usize),
    /// The device finished loading the current source.
    LoadComplete,
}

/// Single dispatch path for every logical state change.
#[derive(Debug)]
pub struct PlaybackStore {
    state: PlaybackState,
    rng: SmallRng,
}

impl PlaybackStore {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_os_rng())
    }

    pub fn with_rng(rng: SmallRng) -> Self {
        Self {
            state: PlaybackState::default(),
            rng,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn dispatch(&mut self, action: Action) {
        tracing::trace!(?action, "dispatch");
        reduce(&mut self.state, action, &mut self.rng);
    }
}

impl Default for PlaybackStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn reduce(state: &mut PlaybackState, action: Action, rng: &mut SmallRng) {
    match action {
        Action::SetTrack(track) => {
            state.current_index = state.index_of(&track.id);
            begin_load(state, track);
        }
        Action::SetPlaylist(tracks) => {
            state.playlist = tracks;
            state.current_index = state
                .current_track
                .as_ref()
                .and_then(|track| state.playlist.iter().position(|t| t.id == track.id));
            // Follow the refreshed record so edited metadata shows up.
            if let Some(idx) = state.current_index {
                state.current_track = Some(state.playlist[idx].clone());
            }
        }
        Action::Play => {
            state.is_playing = true;
            state.is_paused = false;
            state.is_loading = false;
            state.pending_resume = false;
        }
        Action::Pause => {
            state.is_playing = false;
            state.is_paused = true;
            state.pending_resume = false;
        }
        Action::Stop => {
            state.is_playing = false;
            state.is_paused = false;
            state.is_loading = false;
            state.pending_resume = false;
            state.current_time = 0.0;
            state.current_track = None;
            state.current_index = None;
        }
        Action::SetLoading(loading) => state.is_loading = loading,
        Action::SetTime(seconds) => state.current_time = seconds.max(0.0),
        Action::SetDuration(seconds) => state.duration = seconds.max(0.0),
        Action::SetVolume(volume) => {
            let volume = if volume.is_finite() {
                volume.clamp(0.0, 1.0)
            } else {
                0.0
            };
            state.volume = volume;
            // Only ever set here; a nonzero volume leaves the mute flag alone.
            if volume == 0.0 {
                state.is_muted = true;
            }
        }
        Action::ToggleMute => state.is_muted = !state.is_muted,
        Action::ToggleShuffle => state.shuffle_mode = !state.shuffle_mode,
        Action::SetRepeat(mode) => state.repeat_mode = mode,
        Action::NextTrack => {
            let next = navigation::next_index(
                state.playlist.len(),
                state.current_index,
                state.shuffle_mode,
                state.repeat_mode,
                rng,
            );
            if let Some(idx) = next {
                select_index(state, idx);
            }
        }
        Action::PreviousTrack => {
            let prev = navigation::previous_index(
                state.playlist.len(),
                state.current_index,
                state.repeat_mode,
            );
            if let Some(idx) = prev {
                select_index(state, idx);
            }
        }
        Action::SetIndex(idx) => {
            if idx < state.playlist.len() {
                select_index(state, idx);
            }
        }
        Action::LoadComplete => state.is_loading = false,
    }
}

fn select_index(state: &mut PlaybackState, idx: usize) {
    let track = state.playlist[idx].clone();
    state.current_index = Some(idx);
    begin_load(state, track);
}

fn begin_load(state: &mut PlaybackState, track: SharedTrack) {
    state.pending_resume = state.is_playing || state.pending_resume;
    state.is_playing = false;
    state.is_paused = !state.pending_resume;
    state.is_loading = true;
    state.current_time = 0.0;
    state.duration = f64::from(track.duration);
    state.current_track = Some(track);
}
