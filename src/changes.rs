use crate::catalog::{
    ChangeNotification, TRACKS_TABLE, TrackFilter, TrackOrdering, TrackSource,
};
use crate::player::Player;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError};

/// Keeps the player's playlist in step with the upstream track table.
pub struct ExternalChangeAdapter {
    source: Arc<dyn TrackSource>,
    filter: TrackFilter,
    ordering: TrackOrdering,
    receiver: Receiver<ChangeNotification>,
    disconnected: bool,
}

impl ExternalChangeAdapter {
    pub fn new(source: Arc<dyn TrackSource>, filter: TrackFilter, ordering: TrackOrdering) -> Self {
        let receiver = source.subscribe(TRACKS_TABLE, filter.clone());
        Self {
            source,
            filter,
            ordering,
            receiver,
            disconnected: false,
        }
    }

    /// Drains every pending notification and, if anything arrived, refetches
    /// once. Returns how many notifications were consumed.
    pub fn pump(&mut self, player: &mut Player) -> usize {
        let mut received = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(change) => {
                    tracing::debug!(
                        event_type = ?change.event_type,
                        track = %change.record.id,
                        "upstream change"
                    );
                    received += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        tracing::warn!("change feed closed; playlist will no longer refresh");
                        self.disconnected = true;
                    }
                    break;
                }
            }
        }

        if received > 0 {
            self.refresh(player);
        }
        received
    }

    /// Fetches the current track set and hands it to the player. A failed
    /// fetch leaves the playlist untouched.
    pub fn refresh(&self, player: &mut Player) -> bool {
        match self.source.fetch_tracks(&self.filter, self.ordering) {
            Ok(tracks) => {
                tracing::debug!(count = tracks.len(), "playlist refreshed");
                player.reconcile_playlist(tracks.into_iter().map(Arc::new).collect());
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to refetch tracks");
                false
            }
        }
    }
}
