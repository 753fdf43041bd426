use crate::analysis::{AnalysisPipeline, FrequencyBands};
use crate::audio::{DeviceEvent, SharedDevice};
use crate::config::Settings;
use crate::error::PlaybackError;
use crate::model::{PlaybackState, RepeatMode, SharedTrack, TrackId};
use crate::navigation::{self, EndedAction};
use crate::reconcile::ReconciliationLoop;
use crate::stop::{EndpointId, SharedRegistry, StopReason, SweepReport};
use crate::store::{Action, PlaybackStore};
use std::time::{Duration, Instant};

/// Binds the logical store to the session's single media endpoint.
///
/// Every operation that has a device-visible effect performs the device
/// mutation and the matching dispatch in the same call. Device events flow
/// back through [`Player::handle_device_event`]. Failures are logged here and
/// never returned to the caller.
pub struct Player {
    store: PlaybackStore,
    device: SharedDevice,
    registry: SharedRegistry,
    endpoint: EndpointId,
    analysis: AnalysisPipeline,
    watchdog: ReconciliationLoop,
}

impl Player {
    pub fn new(device: SharedDevice, registry: SharedRegistry, settings: &Settings) -> Self {
        Self::with_store(PlaybackStore::new(), device, registry, settings)
    }

    pub fn with_store(
        store: PlaybackStore,
        device: SharedDevice,
        registry: SharedRegistry,
        settings: &Settings,
    ) -> Self {
        let endpoint = registry.borrow_mut().register("player", &device);
        let mut player = Self {
            store,
            device,
            registry,
            endpoint,
            analysis: AnalysisPipeline::new(&settings.analysis),
            watchdog: ReconciliationLoop::new(settings.reconcile_interval()),
        };
        if settings.initial_volume < 1.0 {
            player.set_volume(settings.initial_volume);
        }
        player
    }

    pub fn snapshot(&self) -> &PlaybackState {
        self.store.state()
    }

    pub fn bands(&self) -> FrequencyBands {
        self.analysis.bands()
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub fn play_track(&mut self, track: SharedTrack, playlist: Option<Vec<SharedTrack>>) {
        self.emergency_stop(StopReason::NewTrack);
        if let Some(playlist) = playlist {
            self.store.dispatch(Action::SetPlaylist(playlist));
        }
        self.store.dispatch(Action::SetTrack(track));
        self.load_current_source();
    }

    pub fn play(&mut self) {
        if self.store.state().current_track.is_none() {
            if self.store.state().playlist.is_empty() {
                tracing::debug!("play requested with nothing to play");
                return;
            }
            self.change_track(Action::SetIndex(0));
        }

        let endpoint = self.endpoint;
        self.registry
            .borrow_mut()
            .silence_others(endpoint, StopReason::Resume);

        let result = {
            let mut device = self.device.borrow_mut();
            if device.source().is_none()
                && let Some(track) = self.store.state().current_track.as_ref()
            {
                device.load(&track.audio_url);
            }
            if !device.has_enough_data() {
                device.reload();
            }
            device.play()
        };

        match result {
            Ok(()) => self.store.dispatch(Action::Play),
            Err(err) => {
                tracing::warn!(error = %err, "play request failed; staying paused");
            }
        }
    }

    pub fn pause(&mut self) {
        self.device.borrow_mut().pause();
        self.store.dispatch(Action::Pause);
    }

    pub fn stop(&mut self) {
        self.emergency_stop(StopReason::Requested);
        self.store.dispatch(Action::Stop);
    }

    pub fn toggle_play_pause(&mut self) {
        if self.store.state().is_playing {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn next_track(&mut self) {
        self.change_track(Action::NextTrack);
    }

    pub fn previous_track(&mut self) {
        self.change_track(Action::PreviousTrack);
    }

    pub fn select_index(&mut self, idx: usize) {
        if idx < self.store.state().playlist.len() {
            self.change_track(Action::SetIndex(idx));
        }
    }

    pub fn seek_to(&mut self, seconds: f64) {
        let mut target = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let duration = self.store.state().duration;
        if duration > 0.0 {
            target = target.min(duration);
        }

        if let Err(err) = self
            .device
            .borrow_mut()
            .seek_to(Duration::from_secs_f64(target))
        {
            tracing::warn!(error = %err, seconds = target, "seek failed on device");
        }
        self.store.dispatch(Action::SetTime(target));
    }

    pub fn seek_by(&mut self, delta: f64) {
        let target = self.store.state().current_time + delta;
        self.seek_to(target);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.store.dispatch(Action::SetVolume(volume));
        let state = self.store.state();
        let mut device = self.device.borrow_mut();
        device.set_volume(state.volume);
        device.set_muted(state.is_muted);
    }

    pub fn toggle_mute(&mut self) {
        self.store.dispatch(Action::ToggleMute);
        let muted = self.store.state().is_muted;
        self.device.borrow_mut().set_muted(muted);
    }

    pub fn set_playlist(&mut self, tracks: Vec<SharedTrack>) {
        self.store.dispatch(Action::SetPlaylist(tracks));
    }

    pub fn add_to_playlist(&mut self, track: SharedTrack) {
        let state = self.store.state();
        if state.index_of(&track.id).is_some() {
            tracing::debug!(track = %track.id, "track already in playlist");
            return;
        }
        let mut playlist = state.playlist.clone();
        playlist.push(track);
        self.store.dispatch(Action::SetPlaylist(playlist));
    }

    pub fn remove_from_playlist(&mut self, id: &TrackId) {
        let state = self.store.state();
        if state.index_of(id).is_none() {
            return;
        }
        let playlist = state
            .playlist
            .iter()
            .filter(|track| &track.id != id)
            .cloned()
            .collect();
        let removing_current = state.current_id() == Some(id);

        self.store.dispatch(Action::SetPlaylist(playlist));
        if removing_current {
            self.emergency_stop(StopReason::StaleTrack);
            self.store.dispatch(Action::Stop);
        }
    }

    pub fn toggle_shuffle(&mut self) {
        self.store.dispatch(Action::ToggleShuffle);
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.store.dispatch(Action::SetRepeat(mode));
    }

    /// Applies a refreshed upstream track set.
    pub fn reconcile_playlist(&mut self, tracks: Vec<SharedTrack>) {
        let was_empty = self.store.state().playlist.is_empty();
        let current = self.store.state().current_id().cloned();

        self.store.dispatch(Action::SetPlaylist(tracks));

        if let Some(id) = current
            && self.store.state().index_of(&id).is_none()
        {
            let err = PlaybackError::StaleTrackReference(id);
            tracing::warn!(error = %err, "current track vanished upstream");
            self.emergency_stop(StopReason::StaleTrack);
            self.store.dispatch(Action::Stop);
        }

        if self.store.state().playlist.is_empty() {
            if !was_empty {
                self.emergency_stop(StopReason::EmptyPlaylist);
            }
            return;
        }

        if was_empty && self.store.state().current_track.is_none() {
            self.change_track(Action::SetIndex(0));
        }
    }

    pub fn handle_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::LoadStart => self.store.dispatch(Action::SetLoading(true)),
            DeviceEvent::LoadedMetadata { duration } => {
                if let Some(duration) = duration {
                    self.store
                        .dispatch(Action::SetDuration(duration.as_secs_f64()));
                }
            }
            DeviceEvent::CanPlay => {
                self.store.dispatch(Action::LoadComplete);
                if self.store.state().pending_resume {
                    tracing::debug!("resuming after track change");
                    self.play();
                }
            }
            DeviceEvent::TimeUpdate(position) => {
                self.store.dispatch(Action::SetTime(position.as_secs_f64()));
            }
            DeviceEvent::Play => {
                if !self.store.state().is_playing {
                    self.store.dispatch(Action::Play);
                }
            }
            DeviceEvent::Pause => {
                if self.store.state().is_playing {
                    self.store.dispatch(Action::Pause);
                }
            }
            DeviceEvent::Ended => self.on_ended(),
            DeviceEvent::Error(reason) => {
                let locator = self
                    .store
                    .state()
                    .current_track
                    .as_ref()
                    .map(|track| track.audio_url.clone())
                    .unwrap_or_default();
                let err = PlaybackError::LoadFailure { locator, reason };
                tracing::warn!(error = %err, "device failed to load source");
                self.store.dispatch(Action::SetLoading(false));
            }
        }
    }

    /// Drains pending device events into the store.
    pub fn pump(&mut self) {
        let events = self.device.borrow_mut().poll_events();
        for event in events {
            self.handle_device_event(event);
        }
    }

    pub fn reconcile(&mut self, now: Instant) {
        let correction = {
            let device = self.device.borrow();
            self.watchdog.tick(now, self.store.state(), &*device)
        };
        if let Some(action) = correction {
            self.store.dispatch(action);
        }
    }

    pub fn tick(&mut self, now: Instant) {
        self.pump();
        self.reconcile(now);
    }

    pub fn analysis_frame(&mut self) -> FrequencyBands {
        let playing = self.store.state().is_playing;
        let mut device = self.device.borrow_mut();
        self.analysis.frame(&mut *device, playing)
    }

    fn on_ended(&mut self) {
        let state = self.store.state();
        let action = navigation::on_track_ended(
            state.playlist.len(),
            state.current_index,
            state.shuffle_mode,
            state.repeat_mode,
        );
        tracing::debug!(?action, "track ended");

        match action {
            EndedAction::RestartCurrent => {
                let result = {
                    let mut device = self.device.borrow_mut();
                    if let Err(err) = device.seek_to(Duration::ZERO) {
                        tracing::debug!(error = %err, "rewind failed, reloading source");
                    }
                    if !device.has_enough_data() {
                        device.reload();
                    }
                    device.play()
                };
                self.store.dispatch(Action::SetTime(0.0));
                match result {
                    Ok(()) => {
                        if !self.store.state().is_playing {
                            self.store.dispatch(Action::Play);
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "could not restart track"),
                }
            }
            EndedAction::Advance => {
                // The device played through, so carry playback over even if
                // the watchdog already saw it go quiet.
                if !self.store.state().is_playing {
                    self.store.dispatch(Action::Play);
                }
                self.next_track();
            }
            EndedAction::Stop => self.store.dispatch(Action::Stop),
        }
    }

    fn change_track(&mut self, action: Action) {
        if self.store.state().playlist.is_empty() {
            return;
        }
        self.emergency_stop(StopReason::NewTrack);
        self.store.dispatch(action);
        self.load_current_source();
    }

    fn load_current_source(&mut self) {
        let Some(track) = self.store.state().current_track.clone() else {
            return;
        };
        tracing::info!(
            track = %track.id,
            title = %track.title,
            index = ?self.store.state().current_index,
            "loading track"
        );
        self.device.borrow_mut().load(&track.audio_url);
    }

    fn emergency_stop(&mut self, reason: StopReason) -> SweepReport {
        self.registry.borrow_mut().emergency_stop(reason)
    }
}

/// Formats seconds as `M:SS`; negative or non-finite input reads as zero.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MediaDevice, NullDevice, share};
    use crate::model::{ContentType, Track};
    use crate::stop::EndpointRegistry;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;
    use time::OffsetDateTime;

    fn track(id: &str) -> SharedTrack {
        Arc::new(Track {
            id: TrackId::from(id),
            title: id.to_uppercase(),
            artist: String::from("artist"),
            genre: None,
            description: None,
            audio_url: format!("{id}.mp3"),
            cover_image_url: None,
            duration: 90,
            content_type: ContentType::Sound,
            created_at: OffsetDateTime::UNIX_EPOCH,
        })
    }

    fn setup() -> (Player, Rc<RefCell<NullDevice>>) {
        let device = Rc::new(RefCell::new(NullDevice::new()));
        let shared: SharedDevice = device.clone();
        let player = Player::with_store(
            PlaybackStore::with_rng(SmallRng::seed_from_u64(3)),
            shared,
            EndpointRegistry::shared(),
            &Settings::default(),
        );
        (player, device)
    }

    fn playlist(ids: &[&str]) -> Vec<SharedTrack> {
        ids.iter().map(|id| track(id)).collect()
    }

    #[test]
    fn format_time_pads_seconds() {
        assert_eq!(format_time(65.0), "1:05");
        assert_eq!(format_time(3.0), "0:03");
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(3_599.9), "59:59");
        assert_eq!(format_time(-4.0), "0:00");
        assert_eq!(format_time(f64::NAN), "0:00");
    }

    #[test]
    fn play_track_does_not_autoplay_from_idle() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a", "b"]);
        player.play_track(tracks[1].clone(), Some(tracks));
        player.pump();

        let state = player.snapshot();
        assert_eq!(state.current_index, Some(1));
        assert!(!state.is_playing);
        assert!(!state.is_loading);
        assert!(device.borrow().is_paused());
        assert_eq!(device.borrow().source(), Some("b.mp3"));
    }

    #[test]
    fn play_track_while_playing_resumes_after_load() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a", "b"]);
        player.play_track(tracks[0].clone(), Some(tracks.clone()));
        player.pump();
        player.play();
        assert!(player.snapshot().is_playing);

        player.play_track(tracks[1].clone(), None);
        assert!(player.snapshot().pending_resume);
        player.pump();

        assert!(player.snapshot().is_playing);
        assert!(!player.snapshot().pending_resume);
        assert!(!device.borrow().is_paused());
        assert_eq!(device.borrow().source(), Some("b.mp3"));
    }

    #[test]
    fn pause_during_load_cancels_auto_resume() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a", "b"]);
        player.play_track(tracks[0].clone(), Some(tracks));
        player.pump();
        player.play();

        player.next_track();
        player.pause();
        player.pump();

        assert!(!player.snapshot().is_playing);
        assert!(device.borrow().is_paused());
    }

    #[test]
    fn rejected_play_leaves_state_paused() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a"]);
        player.play_track(tracks[0].clone(), Some(tracks));
        player.pump();

        device.borrow_mut().set_playback_blocked(true);
        player.play();
        assert!(!player.snapshot().is_playing);

        device.borrow_mut().set_playback_blocked(false);
        player.play();
        assert!(player.snapshot().is_playing);
    }

    #[test]
    fn play_without_selection_starts_first_track() {
        let (mut player, device) = setup();
        player.set_playlist(playlist(&["a", "b"]));
        player.play();

        assert_eq!(player.snapshot().current_index, Some(0));
        assert!(player.snapshot().is_playing);
        assert_eq!(device.borrow().source(), Some("a.mp3"));
    }

    #[test]
    fn play_after_stop_reloads_cleared_source() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a", "b"]);
        player.play_track(tracks[1].clone(), Some(tracks));
        player.pump();
        player.play();
        player.stop();
        assert_eq!(device.borrow().source(), None);
        assert_eq!(player.snapshot().current_track, None);

        player.play();
        assert_eq!(player.snapshot().current_index, Some(0));
        assert!(!device.borrow().is_paused());
    }

    #[test]
    fn volume_and_mute_reach_both_sides() {
        let (mut player, device) = setup();
        player.set_volume(0.0);
        assert!(player.snapshot().is_muted);
        assert!(device.borrow().is_muted());

        player.set_volume(0.5);
        assert!(player.snapshot().is_muted);
        assert_eq!(device.borrow().volume(), 0.5);
        assert!(device.borrow().is_muted());

        player.toggle_mute();
        assert!(!player.snapshot().is_muted);
        assert!(!device.borrow().is_muted());
    }

    #[test]
    fn seek_updates_device_and_store() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a"]);
        player.play_track(tracks[0].clone(), Some(tracks));
        player.pump();

        player.seek_to(42.0);
        assert_eq!(player.snapshot().current_time, 42.0);
        assert_eq!(device.borrow().position(), Duration::from_secs(42));

        player.seek_to(500.0);
        assert_eq!(player.snapshot().current_time, 90.0);
    }

    #[test]
    fn ended_with_repeat_one_restarts_in_place() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a", "b", "c"]);
        player.play_track(tracks[1].clone(), Some(tracks));
        player.pump();
        player.play();
        player.set_repeat_mode(RepeatMode::One);
        player.seek_to(80.0);

        player.handle_device_event(DeviceEvent::Ended);

        let state = player.snapshot();
        assert_eq!(state.current_index, Some(1));
        assert_eq!(state.current_time, 0.0);
        assert!(state.is_playing);
        assert!(!device.borrow().is_paused());
    }

    #[test]
    fn ended_advances_and_keeps_playing() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a", "b"]);
        player.play_track(tracks[0].clone(), Some(tracks));
        player.pump();
        player.play();

        player.handle_device_event(DeviceEvent::Ended);
        player.pump();

        assert_eq!(player.snapshot().current_index, Some(1));
        assert!(player.snapshot().is_playing);
        assert_eq!(device.borrow().source(), Some("b.mp3"));
    }

    #[test]
    fn ended_on_last_track_stops() {
        let (mut player, _device) = setup();
        let tracks = playlist(&["a", "b"]);
        player.play_track(tracks[1].clone(), Some(tracks));
        player.pump();
        player.play();

        player.handle_device_event(DeviceEvent::Ended);
        assert_eq!(player.snapshot().current_track, None);
        assert!(!player.snapshot().is_playing);
        assert_eq!(player.snapshot().playlist.len(), 2);
    }

    #[test]
    fn load_error_clears_loading_flag() {
        let (mut player, _device) = setup();
        let tracks = playlist(&["a"]);
        player.play_track(tracks[0].clone(), Some(tracks));
        player.handle_device_event(DeviceEvent::Error(String::from("decode failed")));
        assert!(!player.snapshot().is_loading);
        assert!(!player.snapshot().is_playing);
    }

    #[test]
    fn removing_current_track_stops_playback() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a", "b"]);
        player.play_track(tracks[0].clone(), Some(tracks));
        player.pump();
        player.play();

        player.remove_from_playlist(&TrackId::from("a"));

        assert_eq!(player.snapshot().current_track, None);
        assert_eq!(player.snapshot().playlist.len(), 1);
        assert!(device.borrow().is_paused());
    }

    #[test]
    fn add_to_playlist_ignores_duplicates() {
        let (mut player, _device) = setup();
        player.add_to_playlist(track("a"));
        player.add_to_playlist(track("a"));
        player.add_to_playlist(track("b"));
        assert_eq!(player.snapshot().playlist.len(), 2);
    }

    #[test]
    fn external_pause_is_reconciled() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a"]);
        player.play_track(tracks[0].clone(), Some(tracks));
        player.pump();
        player.play();
        player.pump();

        device.borrow_mut().pause();
        // Drop the pause event so only the watchdog can notice.
        device.borrow_mut().poll_events();
        assert!(player.snapshot().is_playing);

        player.reconcile(Instant::now());
        assert!(!player.snapshot().is_playing);
        assert!(player.snapshot().is_paused);
    }

    #[test]
    fn external_play_event_is_reflected() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a"]);
        player.play_track(tracks[0].clone(), Some(tracks));
        player.pump();

        device.borrow_mut().force_play();
        player.pump();
        assert!(player.snapshot().is_playing);
    }

    #[test]
    fn reconcile_playlist_selects_first_track_without_playing() {
        let (mut player, device) = setup();
        player.reconcile_playlist(playlist(&["a", "b"]));
        player.pump();

        assert_eq!(player.snapshot().current_index, Some(0));
        assert!(!player.snapshot().is_playing);
        assert!(device.borrow().is_paused());
    }

    #[test]
    fn reconcile_playlist_picks_up_edited_current_track() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a", "b"]);
        player.play_track(tracks[0].clone(), Some(tracks.clone()));
        player.pump();
        player.play();

        let mut edited = Track::clone(&tracks[0]);
        edited.title = String::from("A (live)");
        player.reconcile_playlist(vec![Arc::new(edited), tracks[1].clone()]);

        let state = player.snapshot();
        assert_eq!(
            state.current_track.as_ref().map(|track| track.title.as_str()),
            Some("A (live)")
        );
        assert_eq!(state.current_index, Some(0));
        assert!(state.is_playing);
        assert!(!device.borrow().is_paused());
    }

    #[test]
    fn reconcile_playlist_stops_on_vanished_track() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a", "b"]);
        player.play_track(tracks[1].clone(), Some(tracks));
        player.pump();
        player.play();

        player.reconcile_playlist(playlist(&["a"]));

        assert_eq!(player.snapshot().current_track, None);
        assert_eq!(player.snapshot().current_index, None);
        assert!(device.borrow().is_paused());
        assert_eq!(device.borrow().source(), None);
    }

    #[test]
    fn analysis_frame_connects_while_playing() {
        let (mut player, device) = setup();
        let tracks = playlist(&["a"]);
        player.play_track(tracks[0].clone(), Some(tracks));
        player.pump();
        assert_eq!(player.analysis_frame(), FrequencyBands::default());
        assert!(device.borrow().tap().is_none());

        player.play();
        player.analysis_frame();
        assert!(device.borrow().tap().is_some());
    }

    #[test]
    fn other_endpoints_are_silenced_before_a_new_track() {
        let (mut player, _device) = setup();
        let registry = player.registry.clone();
        let widget = share(NullDevice::new());
        registry.borrow_mut().register("preview", &widget);
        {
            let mut widget = widget.borrow_mut();
            widget.load("preview.mp3");
            widget.play().expect("widget plays");
        }

        let tracks = playlist(&["a"]);
        player.play_track(tracks[0].clone(), Some(tracks));
        assert!(widget.borrow().is_paused());
        assert_eq!(registry.borrow().audible_count(), 0);
    }
}
