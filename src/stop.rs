//! Silencing sweep that keeps at most one audible source alive.
//!
//! Every endpoint created by the engine or by a widget that wants to play
//! audio is registered here. The registry only holds weak handles: it can
//! silence an endpoint but never owns or removes one that is still alive.

use crate::audio::{MediaDevice, SharedDevice};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    NewTrack,
    StaleTrack,
    EmptyPlaylist,
    Requested,
    /// The owning endpoint is about to start; everything else goes quiet.
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub silenced: usize,
    pub was_audible: usize,
    pub pruned: usize,
    /// Endpoints skipped because they were mid-call elsewhere.
    pub busy: usize,
}

struct Entry {
    id: EndpointId,
    label: String,
    endpoint: Weak<RefCell<dyn MediaDevice>>,
}

#[derive(Default)]
pub struct EndpointRegistry {
    entries: Vec<Entry>,
    next_id: u32,
}

pub type SharedRegistry = Rc<RefCell<EndpointRegistry>>;

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn register(&mut self, label: &str, endpoint: &SharedDevice) -> EndpointId {
        let id = EndpointId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.entries.push(Entry {
            id,
            label: label.to_string(),
            endpoint: Rc::downgrade(endpoint),
        });
        tracing::debug!(endpoint = id.0, label, "registered media endpoint");
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of live endpoints that are currently producing sound.
    pub fn audible_count(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|entry| entry.endpoint.upgrade())
            .filter(|endpoint| {
                endpoint
                    .try_borrow()
                    .map(|device| !device.is_paused())
                    .unwrap_or(false)
            })
            .count()
    }

    /// Pauses, rewinds, unloads and reloads every live endpoint.
    ///
    /// Runs synchronously so that a caller can assign a new source right
    /// after it returns.
    pub fn emergency_stop(&mut self, reason: StopReason) -> SweepReport {
        self.sweep(reason, None)
    }

    /// Same sweep, leaving `keep` untouched.
    pub fn silence_others(&mut self, keep: EndpointId, reason: StopReason) -> SweepReport {
        self.sweep(reason, Some(keep))
    }

    fn sweep(&mut self, reason: StopReason, keep: Option<EndpointId>) -> SweepReport {
        let mut report = SweepReport::default();
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.endpoint.strong_count() > 0);
        report.pruned = before - self.entries.len();

        for entry in self.entries.iter().filter(|entry| Some(entry.id) != keep) {
            let Some(endpoint) = entry.endpoint.upgrade() else {
                continue;
            };
            let Ok(mut device) = endpoint.try_borrow_mut() else {
                report.busy += 1;
                tracing::warn!(endpoint = entry.id.0, label = %entry.label, "endpoint busy during stop sweep");
                continue;
            };
            if !device.is_paused() {
                report.was_audible += 1;
            }
            silence(&mut *device);
            report.silenced += 1;
        }

        tracing::debug!(
            ?reason,
            kept = ?keep,
            silenced = report.silenced,
            was_audible = report.was_audible,
            pruned = report.pruned,
            "emergency stop sweep"
        );
        report
    }
}

fn silence(device: &mut dyn MediaDevice) {
    device.pause();
    if device.source().is_some() {
        let _ = device.seek_to(Duration::ZERO);
    }
    device.clear_source();
    device.reload();
}
