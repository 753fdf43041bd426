use crate::audio::MediaDevice;
use crate::model::PlaybackState;
use crate::store::Action;
use std::time::{Duration, Instant};

/// Periodic watchdog for transport changes that bypassed the dispatch path,
/// such as media keys or another caller pausing the device directly.
#[derive(Debug)]
pub struct ReconciliationLoop {
    interval: Duration,
    last_run: Option<Instant>,
}

impl ReconciliationLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.last_run
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Returns the correcting action when the interval has elapsed and the
    /// device disagrees with the logical state.
    pub fn tick(
        &mut self,
        now: Instant,
        state: &PlaybackState,
        device: &dyn MediaDevice,
    ) -> Option<Action> {
        if !self.is_due(now) {
            return None;
        }
        self.last_run = Some(now);
        correction(state, device)
    }
}

pub fn correction(state: &PlaybackState, device: &dyn MediaDevice) -> Option<Action> {
    let device_playing = !device.is_paused();
    match (device_playing, state.is_playing) {
        (true, false) => {
            tracing::debug!("device is playing outside the dispatch path");
            Some(Action::Play)
        }
        (false, true) => {
            tracing::debug!("device paused outside the dispatch path");
            Some(Action::Pause)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullDevice;

    fn playing_state() -> PlaybackState {
        PlaybackState {
            is_playing: true,
            ..PlaybackState::default()
        }
    }

    #[test]
    fn agreement_needs_no_correction() {
        let device = NullDevice::new();
        assert_eq!(correction(&PlaybackState::default(), &device), None);
    }

    #[test]
    fn externally_paused_device_pauses_logical_state() {
        let device = NullDevice::new();
        assert_eq!(correction(&playing_state(), &device), Some(Action::Pause));
    }

    #[test]
    fn externally_started_device_marks_logical_state_playing() {
        let mut device = NullDevice::new();
        device.load("a.mp3");
        device.force_play();
        assert_eq!(
            correction(&PlaybackState::default(), &device),
            Some(Action::Play)
        );
    }

    #[test]
    fn tick_only_runs_once_per_interval() {
        let device = NullDevice::new();
        let mut watchdog = ReconciliationLoop::new(Duration::from_millis(100));
        let start = Instant::now();

        assert_eq!(
            watchdog.tick(start, &playing_state(), &device),
            Some(Action::Pause)
        );
        assert_eq!(
            watchdog.tick(start + Duration::from_millis(40), &playing_state(), &device),
            None
        );
        assert_eq!(
            watchdog.tick(start + Duration::from_millis(100), &playing_state(), &device),
            Some(Action::Pause)
        );
    }
}
