use crate::audio::{MediaDevice, SampleTap};
use crate::config::AnalysisSettings;
use crate::error::PlaybackError;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::ops::Range;
use std::sync::Arc;

pub const FFT_SIZE: usize = 512;
pub const BIN_COUNT: usize = FFT_SIZE / 2;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const LOW_BAND: Range<usize> = 0..20;
const HIGH_BAND: Range<usize> = 15..80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Connected,
}

/// Normalized energy of the two bands the visualizers read, each in [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrequencyBands {
    pub low: f32,
    pub high: f32,
}

pub struct AnalysisPipeline {
    state: ConnectionState,
    tap: Option<SampleTap>,
    unavailable: bool,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    samples: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    bins: Vec<u8>,
    bands: FrequencyBands,
    smoothing: f32,
    high_gain: f32,
}

impl AnalysisPipeline {
    pub fn new(settings: &AnalysisSettings) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let window = (0..FFT_SIZE)
            .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / FFT_SIZE as f32).cos())
            .collect();

        Self {
            state: ConnectionState::Unconnected,
            tap: None,
            unavailable: false,
            fft,
            window,
            samples: vec![0.0; FFT_SIZE],
            spectrum: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            smoothed: vec![0.0; BIN_COUNT],
            bins: vec![0; BIN_COUNT],
            bands: FrequencyBands::default(),
            smoothing: settings.smoothing.clamp(0.0, 0.99),
            high_gain: settings.high_band_gain.max(0.0),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn bands(&self) -> FrequencyBands {
        self.bands
    }

    pub fn frequency_bins(&self) -> &[u8] {
        &self.bins
    }

    /// Attaches the tap once per session. Reconnecting is a no-op, and a
    /// device that reports the tap as already attached counts as success.
    pub fn connect(&mut self, device: &mut dyn MediaDevice) -> bool {
        if self.state == ConnectionState::Connected {
            return true;
        }
        if self.unavailable {
            return false;
        }

        self.state = ConnectionState::Connecting;
        match device.connect_tap() {
            Ok(tap) => {
                self.tap = Some(tap);
                self.state = ConnectionState::Connected;
                tracing::debug!("analysis tap connected");
            }
            Err(PlaybackError::TapAlreadyConnected) => {
                self.tap = device.tap();
                self.state = ConnectionState::Connected;
                tracing::debug!("analysis tap was already connected");
            }
            Err(err) => {
                self.state = ConnectionState::Unconnected;
                self.unavailable = true;
                let err = PlaybackError::AnalysisUnavailable(err.to_string());
                tracing::warn!(error = %err, "visualization disabled");
            }
        }
        self.state == ConnectionState::Connected
    }

    /// One animation frame. Pulls a snapshot while playing; otherwise the
    /// bands fall back to silence.
    pub fn frame(&mut self, device: &mut dyn MediaDevice, playing: bool) -> FrequencyBands {
        if !playing {
            self.smoothed.fill(0.0);
            self.bins.fill(0);
            self.bands = FrequencyBands::default();
            return self.bands;
        }
        if !self.connect(device) {
            return self.bands;
        }

        let Some(tap) = self.tap.clone() else {
            return self.bands;
        };
        if let Ok(buffer) = tap.lock() {
            buffer.copy_latest(&mut self.samples);
        }
        let samples = std::mem::take(&mut self.samples);
        self.analyze(&samples);
        self.samples = samples;
        self.bands
    }

    /// Runs one transform over `samples` (newest last) and refreshes the
    /// byte-scaled bins and the two bands.
    pub fn analyze(&mut self, samples: &[f32]) {
        let len = samples.len().min(FFT_SIZE);
        let offset = samples.len() - len;
        for (i, slot) in self.spectrum.iter_mut().enumerate() {
            let sample = if i < len { samples[offset + i] } else { 0.0 };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.spectrum);

        for (k, (smoothed, bin)) in self.smoothed.iter_mut().zip(self.bins.iter_mut()).enumerate() {
            let magnitude = self.spectrum[k].norm() / FFT_SIZE as f32;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
            *bin = byte_scale(*smoothed);
        }

        self.bands = bands_from_bins(&self.bins, self.high_gain);
    }
}

fn byte_scale(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}

pub fn bands_from_bins(bins: &[u8], high_gain: f32) -> FrequencyBands {
    let low = band_average(bins, LOW_BAND) / 255.0;
    let high = band_average(bins, HIGH_BAND) * high_gain / 255.0;
    FrequencyBands {
        low: low.clamp(0.0, 1.0),
        high: high.clamp(0.0, 1.0),
    }
}

fn band_average(bins: &[u8], range: Range<usize>) -> f32 {
    let end = range.end.min(bins.len());
    let start = range.start.min(end);
    let slice = &bins[start..end];
    if slice.is_empty() {
        return 0.0;
    }
    slice.iter().map(|bin| f32::from(*bin)).sum::<f32>() / slice.len() as f32
}
