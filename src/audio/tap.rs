use rodio::Source;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mono samples most recently rendered by a device, newest last.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
    sample_rate: u32,
}

pub type SampleTap = Arc<Mutex<SampleBuffer>>;

const FLUSH_EVERY: usize = 128;

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            sample_rate: 44_100,
        }
    }

    pub fn shared(capacity: usize) -> SampleTap {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn extend(&mut self, samples: &[f32]) {
        for sample in samples {
            if self.samples.len() == self.capacity {
                self.samples.pop_front();
            }
            self.samples.push_back(*sample);
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Copies the newest samples into `out`, right-aligned; missing history
    /// is left as silence.
    pub fn copy_latest(&self, out: &mut [f32]) {
        out.fill(0.0);
        let take = self.samples.len().min(out.len());
        let skip = self.samples.len() - take;
        let offset = out.len() - take;
        for (slot, sample) in out[offset..].iter_mut().zip(self.samples.iter().skip(skip)) {
            *slot = *sample;
        }
    }
}

/// Pass-through source that mirrors a mono mix-down of everything it yields
/// into a [`SampleTap`].
pub struct TapSource<S> {
    inner: S,
    tap: SampleTap,
    pending: Vec<f32>,
    frame_sum: f32,
    frame_fill: usize,
}

impl<S: Source> TapSource<S> {
    pub fn new(inner: S, tap: SampleTap) -> Self {
        if let Ok(mut buffer) = tap.lock() {
            buffer.set_sample_rate(u32::from(inner.sample_rate()));
        }
        Self {
            inner,
            tap,
            pending: Vec::with_capacity(FLUSH_EVERY),
            frame_sum: 0.0,
            frame_fill: 0,
        }
    }

    fn flush(&mut self) {
        if let Ok(mut buffer) = self.tap.lock() {
            buffer.extend(&self.pending);
        }
        self.pending.clear();
    }
}

impl<S: Source> Iterator for TapSource<S> {
    type Item = rodio::Sample;

    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.inner.next()?;
        let channels = usize::from(u16::from(self.inner.channels())).max(1);
        self.frame_sum += sample;
        self.frame_fill += 1;
        if self.frame_fill >= channels {
            self.pending.push(self.frame_sum / channels as f32);
            self.frame_sum = 0.0;
            self.frame_fill = 0;
            if self.pending.len() >= FLUSH_EVERY {
                self.flush();
            }
        }
        Some(sample)
    }
}

impl<S: Source> Source for TapSource<S> {
    fn current_span_len(&self) -> Option<usize> {
        self.inner.current_span_len()
    }

    fn channels(&self) -> rodio::ChannelCount {
        self.inner.channels()
    }

    fn sample_rate(&self) -> rodio::SampleRate {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }

    fn try_seek(&mut self, pos: Duration) -> Result<(), rodio::source::SeekError> {
        self.pending.clear();
        self.frame_sum = 0.0;
        self.frame_fill = 0;
        self.inner.try_seek(pos)
    }
}
