use super::tap::{SampleBuffer, SampleTap, TapSource};
use super::{DeviceEvent, MediaDevice, TAP_CAPACITY, drop_stale_events};
use crate::error::{PlaybackError, PlaybackResult};
use anyhow::{Context, Result};
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use std::collections::VecDeque;
#[cfg(unix)]
use std::ffi::CString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Media endpoint backed by the default system output through rodio.
pub struct RodioDevice {
    stream: OutputStream,
    sink: Sink,
    source: Option<String>,
    media_root: Option<PathBuf>,
    track_duration: Option<Duration>,
    loaded: bool,
    volume: f32,
    muted: bool,
    tap: SampleTap,
    tap_connected: bool,
    events: VecDeque<DeviceEvent>,
    ended_reported: bool,
    last_position: Duration,
}

impl RodioDevice {
    pub fn new(media_root: Option<PathBuf>) -> Result<Self> {
        let stream = Self::open_output_stream()?;
        let sink = Sink::connect_new(stream.mixer());
        sink.pause();

        Ok(Self {
            stream,
            sink,
            source: None,
            media_root,
            track_duration: None,
            loaded: false,
            volume: 1.0,
            muted: false,
            tap: SampleBuffer::shared(TAP_CAPACITY),
            tap_connected: false,
            events: VecDeque::new(),
            ended_reported: false,
            last_position: Duration::ZERO,
        })
    }

    fn effective_volume(&self) -> f32 {
        if self.muted { 0.0 } else { self.volume }
    }

    fn resolve(&self, locator: &str) -> PlaybackResult<PathBuf> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return Err(PlaybackError::LoadFailure {
                locator: locator.to_string(),
                reason: String::from("remote locators need a local media root"),
            });
        }
        let raw = locator.strip_prefix("file://").unwrap_or(locator);
        let path = Path::new(raw);
        match &self.media_root {
            Some(root) if path.is_relative() => Ok(root.join(path)),
            _ => Ok(path.to_path_buf()),
        }
    }

    fn open_source(&self, locator: &str) -> PlaybackResult<Box<dyn Source + Send>> {
        let path = self.resolve(locator)?;
        let file = File::open(&path).map_err(|err| PlaybackError::LoadFailure {
            locator: locator.to_string(),
            reason: format!("failed to open {}: {err}", path.display()),
        })?;
        let decoder = Decoder::try_from(file).map_err(|err| PlaybackError::LoadFailure {
            locator: locator.to_string(),
            reason: format!("failed to decode {}: {err}", path.display()),
        })?;
        Ok(Box::new(decoder))
    }

    fn reset_sink(&mut self) {
        self.sink.stop();
        self.sink = Sink::connect_new(self.stream.mixer());
        self.sink.pause();
        self.sink.set_volume(self.effective_volume());
        if let Ok(mut buffer) = self.tap.lock() {
            buffer.clear();
        }
    }

    fn open_output_stream() -> Result<OutputStream> {
        let mut stream = with_silenced_stderr(|| -> Result<OutputStream> {
            match OutputStreamBuilder::from_default_device()
                .context("failed to open default system output stream")
                .and_then(|builder| {
                    builder
                        .with_error_callback(|_| {})
                        .open_stream_or_fallback()
                        .context("failed to start default output stream")
                }) {
                Ok(stream) => Ok(stream),
                Err(default_err) => {
                    let host = rodio::cpal::default_host();
                    let mut candidates: Vec<String> = host
                        .output_devices()
                        .ok()
                        .into_iter()
                        .flatten()
                        .filter_map(|device| device.name().ok())
                        .collect();
                    candidates.sort_by_cached_key(|name| {
                        let lower = name.to_ascii_lowercase();
                        let rank = if lower.contains("pulse") {
                            0_u8
                        } else if lower.contains("pipewire") {
                            1_u8
                        } else {
                            2_u8
                        };
                        (rank, lower)
                    });
                    candidates.dedup();

                    for candidate in candidates {
                        let Some(device) = host.output_devices().ok().into_iter().flatten().find(
                            |entry| entry.name().ok().as_deref() == Some(candidate.as_str()),
                        ) else {
                            continue;
                        };
                        let opened = OutputStreamBuilder::from_device(device)
                            .context("failed to open fallback output device")
                            .and_then(|builder| {
                                builder
                                    .with_error_callback(|_| {})
                                    .open_stream_or_fallback()
                                    .context("failed to start fallback output stream")
                            });
                        if let Ok(stream) = opened {
                            return Ok(stream);
                        }
                    }

                    Err(default_err).context("unable to start any audio output stream")
                }
            }
        })?;
        stream.log_on_drop(false);
        Ok(stream)
    }
}

impl MediaDevice for RodioDevice {
    fn load(&mut self, locator: &str) {
        drop_stale_events(&mut self.events);
        self.reset_sink();
        self.source = Some(locator.to_string());
        self.ended_reported = false;
        self.last_position = Duration::ZERO;
        self.events.push_back(DeviceEvent::LoadStart);

        match self.open_source(locator) {
            Ok(source) => {
                self.track_duration = source.total_duration();
                self.sink.append(TapSource::new(source, self.tap.clone()));
                self.loaded = true;
                self.events.push_back(DeviceEvent::LoadedMetadata {
                    duration: self.track_duration,
                });
                self.events.push_back(DeviceEvent::CanPlay);
            }
            Err(err) => {
                self.track_duration = None;
                self.loaded = false;
                self.events.push_back(DeviceEvent::Error(err.to_string()));
            }
        }
    }

    fn reload(&mut self) {
        match self.source.clone() {
            Some(locator) => self.load(&locator),
            None => {
                self.reset_sink();
                self.loaded = false;
            }
        }
    }

    fn clear_source(&mut self) {
        drop_stale_events(&mut self.events);
        self.reset_sink();
        self.source = None;
        self.loaded = false;
        self.track_duration = None;
        self.ended_reported = false;
        self.last_position = Duration::ZERO;
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn has_enough_data(&self) -> bool {
        self.loaded && !self.sink.empty()
    }

    fn play(&mut self) -> PlaybackResult<()> {
        let Some(locator) = self.source.as_deref() else {
            return Err(PlaybackError::NoSource);
        };
        if !self.loaded {
            return Err(PlaybackError::PlaybackRejected(format!(
                "source {locator} is not playable"
            )));
        }
        if self.sink.is_paused() {
            self.sink.play();
            self.events.push_back(DeviceEvent::Play);
        }
        Ok(())
    }

    fn pause(&mut self) {
        if self.sink.is_paused() {
            return;
        }
        self.sink.pause();
        self.events.push_back(DeviceEvent::Pause);
    }

    fn is_paused(&self) -> bool {
        self.source.is_none() || self.sink.is_paused() || self.sink.empty()
    }

    fn position(&self) -> Duration {
        if self.source.is_none() {
            return Duration::ZERO;
        }
        self.sink.get_pos()
    }

    fn seek_to(&mut self, position: Duration) -> PlaybackResult<()> {
        if self.source.is_none() {
            return Err(PlaybackError::NoSource);
        }
        self.sink
            .try_seek(position)
            .map_err(|err| PlaybackError::SeekFailed(format!("{err:?}")))?;
        self.events.push_back(DeviceEvent::TimeUpdate(position));
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
        self.sink.set_volume(self.effective_volume());
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.sink.set_volume(self.effective_volume());
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
        if self.source.is_some() && self.loaded && !self.sink.is_paused() {
            if self.sink.empty() {
                if !self.ended_reported {
                    self.ended_reported = true;
                    self.events.push_back(DeviceEvent::Ended);
                }
            } else {
                let position = self.sink.get_pos();
                if position != self.last_position {
                    self.last_position = position;
                    self.events.push_back(DeviceEvent::TimeUpdate(position));
                }
            }
        }
        self.events.drain(..).collect()
    }

    fn output_name(&self) -> Option<String> {
        Some(String::from("System default output (CPAL)"))
    }
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}
