use crate::model::TrackId;
use thiserror::Error;

/// Failures raised at the device seam. `Player` catches all of them at the
/// call site and logs; none reach application callers.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to load source {locator}: {reason}")]
    LoadFailure { locator: String, reason: String },

    #[error("playback request rejected: {0}")]
    PlaybackRejected(String),

    #[error("frequency analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    #[error("analysis tap already connected")]
    TapAlreadyConnected,

    #[error("track {0} is no longer in the catalog")]
    StaleTrackReference(TrackId),

    #[error("no source assigned to the device")]
    NoSource,

    #[error("seek failed: {0}")]
    SeekFailed(String),
}

pub type PlaybackResult<T> = std::result::Result<T, PlaybackError>;
