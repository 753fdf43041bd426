mod output;
pub mod tap;

pub use output::RodioDevice;
pub use tap::{SampleBuffer, SampleTap, TapSource};

use crate::error::{PlaybackError, PlaybackResult};
use rodio::{Decoder, Source};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Samples retained for analysis; matches a 512-point transform.
pub const TAP_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    LoadStart,
    LoadedMetadata { duration: Option<Duration> },
    CanPlay,
    TimeUpdate(Duration),
    Play,
    Pause,
    Ended,
    Error(String),
}

/// An imperative media endpoint. Transport changes made through this trait
/// surface later as [`DeviceEvent`]s from `poll_events`.
pub trait MediaDevice {
    /// Assigns a new source, aborting whatever was loading before. The device
    /// stays paused.
    fn load(&mut self, locator: &str);
    fn reload(&mut self);
    fn clear_source(&mut self);
    fn source(&self) -> Option<&str>;
    fn has_enough_data(&self) -> bool;
    fn play(&mut self) -> PlaybackResult<()>;
    fn pause(&mut self);
    /// True whenever nothing is audible: paused, ended, or without a source.
    fn is_paused(&self) -> bool;
    fn position(&self) -> Duration;
    fn seek_to(&mut self, position: Duration) -> PlaybackResult<()>;
    fn duration(&self) -> Option<Duration>;
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    fn is_muted(&self) -> bool;
    fn set_muted(&mut self, muted: bool);
    /// Connects the analysis tap. Fails with `TapAlreadyConnected` on any
    /// call after the first.
    fn connect_tap(&mut self) -> PlaybackResult<SampleTap>;
    fn tap(&self) -> Option<SampleTap>;
    fn poll_events(&mut self) -> Vec<DeviceEvent>;
    fn output_name(&self) -> Option<String>;
}

pub type SharedDevice = Rc<RefCell<dyn MediaDevice>>;

pub fn share<D: MediaDevice + 'static>(device: D) -> SharedDevice {
    Rc::new(RefCell::new(device))
}

/// Drops queued events that belong to a source that is being replaced.
fn drop_stale_events(events: &mut VecDeque<DeviceEvent>) {
    events.retain(|event| matches!(event, DeviceEvent::Play | DeviceEvent::Pause));
}

/// Clock-driven device used when no audio output is available, and in tests.
pub struct NullDevice {
    paused: bool,
    source: Option<String>,
    loaded: bool,
    volume: f32,
    muted: bool,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
    ended_reported: bool,
    playback_blocked: bool,
    tap: SampleTap,
    tap_connected: bool,
    events: VecDeque<DeviceEvent>,
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            paused: true,
            source: None,
            loaded: false,
            volume: 1.0,
            muted: false,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
            ended_reported: false,
            playback_blocked: false,
            tap: SampleBuffer::shared(TAP_CAPACITY),
            tap_connected: false,
            events: VecDeque::new(),
        }
    }

    /// Rejects every `play` call, the way a platform does when a resume is
    /// not backed by a user gesture.
    pub fn set_playback_blocked(&mut self, blocked: bool) {
        self.playback_blocked = blocked;
    }

    /// Starts playback without going through any binding, as a media key or
    /// an unrelated widget would.
    pub fn force_play(&mut self) {
        if self.source.is_some() && self.paused {
            self.paused = false;
            self.started_at = Some(Instant::now());
            self.events.push_back(DeviceEvent::Play);
        }
    }

    fn estimate_duration(locator: &str) -> Option<Duration> {
        let file = File::open(Path::new(locator)).ok()?;
        let source = Decoder::try_from(file).ok()?;
        source
            .total_duration()
            .filter(|duration| !duration.is_zero())
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if !self.paused
            && self.source.is_some()
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        if let Some(duration) = self.track_duration {
            return position.min(duration);
        }
        position
    }

    fn is_finished(&self) -> bool {
        let Some(duration) = self.track_duration else {
            return false;
        };
        self.source.is_some() && !self.paused && self.current_position() >= duration
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDevice for NullDevice {
    fn load(&mut self, locator: &str) {
        drop_stale_events(&mut self.events);
        self.source = Some(locator.to_string());
        self.paused = true;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.ended_reported = false;
        self.track_duration = Self::estimate_duration(locator);
        self.loaded = true;
        self.events.push_back(DeviceEvent::LoadStart);
        self.events.push_back(DeviceEvent::LoadedMetadata {
            duration: self.track_duration,
        });
        self.events.push_back(DeviceEvent::CanPlay);
    }

    fn reload(&mut self) {
        match self.source.clone() {
            Some(locator) => self.load(&locator),
            None => {
                self.loaded = false;
                self.position_offset = Duration::ZERO;
            }
        }
    }

    fn clear_source(&mut self) {
        drop_stale_events(&mut self.events);
        self.source = None;
        self.loaded = false;
        self.paused = true;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = None;
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn has_enough_data(&self) -> bool {
        self.loaded && !self.ended_reported
    }

    fn play(&mut self) -> PlaybackResult<()> {
        if self.source.is_none() {
            return Err(PlaybackError::NoSource);
        }
        if self.playback_blocked {
            return Err(PlaybackError::PlaybackRejected(String::from(
                "playback is blocked on this device",
            )));
        }
        if self.paused {
            self.paused = false;
            self.started_at = Some(Instant::now());
            self.events.push_back(DeviceEvent::Play);
        }
        Ok(())
    }

    fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.position_offset = self.current_position();
        self.started_at = None;
        self.paused = true;
        self.events.push_back(DeviceEvent::Pause);
    }

    fn is_paused(&self) -> bool {
        self.paused || self.source.is_none() || self.ended_reported
    }

    fn position(&self) -> Duration {
        self.current_position()
    }

    fn seek_to(&mut self, position: Duration) -> PlaybackResult<()> {
        if self.source.is_none() {
            return Err(PlaybackError::NoSource);
        }

        self.position_offset = self
            .track_duration
            .map_or(position, |duration| position.min(duration));
        self.started_at = if self.paused {
            None
        } else {
            Some(Instant::now())
        };
        self.ended_reported = false;
        self.events
            .push_back(DeviceEvent::TimeUpdate(self.position_offset));
        Ok(())
    }

    fn duration(&self) -> Option<Duration> {
        self.track_duration
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn connect_tap(&mut self) -> PlaybackResult<SampleTap> {
        if self.tap_connected {
            return Err(PlaybackError::TapAlreadyConnected);
        }
        self.tap_connected = true;
        Ok(self.tap.clone())
    }

    fn tap(&self) -> Option<SampleTap> {
        self.tap_connected.then(|| self.tap.clone())
    }

    fn poll_events(&mut self) -> Vec<DeviceEvent> {
        if !self.ended_reported && self.is_finished() {
            self.ended_reported = true;
            self.events.push_back(DeviceEvent::Ended);
        } else if !self.paused && self.source.is_some() && !self.ended_reported {
            self.events
                .push_back(DeviceEvent::TimeUpdate(self.current_position()));
        }
        self.events.drain(..).collect()
    }

    fn output_name(&self) -> Option<String> {
        Some(String::from("Null audio device"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use std::thread;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_test_dir(name: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be valid")
            .as_nanos();
        let dir = env::temp_dir().join(format!("soundstage-{name}-{stamp}"));
        fs::create_dir_all(&dir).expect("temp dir should be created");
        dir
    }

    fn write_test_wav(path: &Path, duration_ms: u32) {
        let sample_rate: u32 = 44_100;
        let channels: u16 = 1;
        let bits_per_sample: u16 = 16;
        let bytes_per_sample = u32::from(bits_per_sample / 8);
        let total_samples = (u64::from(sample_rate) * u64::from(duration_ms) / 1_000) as u32;
        let data_size = total_samples * u32::from(channels) * bytes_per_sample;
        let byte_rate = sample_rate * u32::from(channels) * bytes_per_sample;
        let block_align = channels * (bits_per_sample / 8);

        let mut bytes = Vec::with_capacity((44_u32 + data_size) as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&36_u32.saturating_add(data_size).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16_u32.to_le_bytes());
        bytes.extend_from_slice(&1_u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&byte_rate.to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&bits_per_sample.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_size.to_le_bytes());
        bytes.resize((44_u32 + data_size) as usize, 0_u8);

        fs::write(path, bytes).expect("wav fixture should be written");
    }

    #[test]
    fn load_reports_lifecycle_and_stays_paused() {
        let mut device = NullDevice::new();
        device.load("nonexistent-track.mp3");

        assert!(device.is_paused());
        assert_eq!(
            device.poll_events(),
            vec![
                DeviceEvent::LoadStart,
                DeviceEvent::LoadedMetadata { duration: None },
                DeviceEvent::CanPlay,
            ]
        );
    }

    #[test]
    fn pause_and_resume_control_position_progression() {
        let mut device = NullDevice::new();
        device.load("nonexistent-track.mp3");
        device.play().expect("play should work in null mode");
        thread::sleep(Duration::from_millis(20));

        device.pause();
        let paused = device.position();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(device.position(), paused, "position should freeze while paused");

        device.play().expect("resume");
        thread::sleep(Duration::from_millis(20));
        assert!(device.position() > paused, "position should continue after resume");
    }

    #[test]
    fn play_without_source_is_rejected() {
        let mut device = NullDevice::new();
        assert!(matches!(device.play(), Err(PlaybackError::NoSource)));
    }

    #[test]
    fn blocked_playback_leaves_device_paused() {
        let mut device = NullDevice::new();
        device.load("a.mp3");
        device.set_playback_blocked(true);
        assert!(matches!(
            device.play(),
            Err(PlaybackError::PlaybackRejected(_))
        ));
        assert!(device.is_paused());
    }

    #[test]
    fn second_tap_connection_reports_already_connected() {
        let mut device = NullDevice::new();
        assert!(device.connect_tap().is_ok());
        assert!(matches!(
            device.connect_tap(),
            Err(PlaybackError::TapAlreadyConnected)
        ));
        assert!(device.tap().is_some());
    }

    #[test]
    fn clear_source_discards_pending_load_events() {
        let mut device = NullDevice::new();
        device.load("a.mp3");
        device.clear_source();
        assert!(device.poll_events().is_empty());
        assert_eq!(device.source(), None);
    }

    #[test]
    fn ended_is_reported_once_when_known_duration_elapses() {
        let dir = unique_test_dir("null-device-duration");
        let track = dir.join("fixture.wav");
        write_test_wav(&track, 80);

        let mut device = NullDevice::new();
        device.load(&track.to_string_lossy());
        device.poll_events();
        assert!(device.duration().is_some_and(|d| d >= Duration::from_millis(70)));

        device.play().expect("play");
        thread::sleep(Duration::from_millis(120));
        let events = device.poll_events();
        assert!(events.contains(&DeviceEvent::Ended));
        assert!(device.is_paused(), "ended device should not count as audible");
        assert!(!device.poll_events().contains(&DeviceEvent::Ended));

        let _ = fs::remove_dir_all(dir);
    }
}
