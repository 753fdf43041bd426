use crate::model::RepeatMode;
use rand::rngs::SmallRng;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndedAction {
    /// Seek the device to zero and play again without touching the index.
    RestartCurrent,
    Advance,
    Stop,
}

/// Index chosen by a "next" request, or `None` when the playlist is empty.
///
/// `current` of `None` behaves like index -1. Without shuffle, the last
/// index either wraps (`RepeatMode::All`) or stays put.
pub fn next_index(
    len: usize,
    current: Option<usize>,
    shuffle: bool,
    repeat: RepeatMode,
    rng: &mut SmallRng,
) -> Option<usize> {
    if len == 0 {
        return None;
    }

    if shuffle {
        return Some(shuffle_pick(len, current, rng));
    }

    let next = current.map_or(0, |idx| idx + 1);
    if next < len {
        return Some(next);
    }

    if repeat == RepeatMode::All {
        Some(0)
    } else {
        Some(current.unwrap_or(0).min(len - 1))
    }
}

pub fn previous_index(len: usize, current: Option<usize>, repeat: RepeatMode) -> Option<usize> {
    if len == 0 {
        return None;
    }

    match current {
        Some(idx) if idx > 0 => Some((idx - 1).min(len - 1)),
        _ if repeat == RepeatMode::All => Some(len - 1),
        _ => Some(0),
    }
}

/// Decision taken when the device reports the natural end of a track.
pub fn on_track_ended(
    len: usize,
    current: Option<usize>,
    shuffle: bool,
    repeat: RepeatMode,
) -> EndedAction {
    if repeat == RepeatMode::One {
        return EndedAction::RestartCurrent;
    }
    if repeat == RepeatMode::All || has_next(len, current, shuffle) {
        EndedAction::Advance
    } else {
        EndedAction::Stop
    }
}

fn has_next(len: usize, current: Option<usize>, shuffle: bool) -> bool {
    if shuffle {
        return len > 1;
    }
    current.map_or(len > 0, |idx| idx + 1 < len)
}

/// Uniform pick over every index except `current`. Expects `len > 0`.
fn shuffle_pick(len: usize, current: Option<usize>, rng: &mut SmallRng) -> usize {
    match current.filter(|idx| *idx < len) {
        Some(idx) if len > 1 => {
            let pick = rng.random_range(0..len - 1);
            if pick >= idx { pick + 1 } else { pick }
        }
        Some(idx) => idx,
        None => rng.random_range(0..len),
    }
}
