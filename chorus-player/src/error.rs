//! Error types for chorus-player
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Errors are returned to callers, never thrown through layers:
//! user-recoverable variants go back to the interaction that triggered them,
//! infrastructure variants escalate to crash recovery or rollback.

use thiserror::Error;

/// Main error type for chorus-player
#[derive(Error, Debug)]
pub enum Error {
    /// Operation submitted before the barrier's minimum throttle elapsed
    #[error("operation throttled, retry in {retry_after_ms}ms")]
    Throttled { retry_after_ms: u64 },

    /// Barrier operation body exceeded its timeout
    #[error("operation `{0}` timed out")]
    OperationTimeout(String),

    /// A crossfade is still running; no new transition may start
    #[error("crossfade in progress")]
    CrossfadeInProgress,

    /// Another skip transition holds the skip lock
    #[error("skip already in progress")]
    SkipInProgress,

    /// Cold-load did not buffer in time; the sidecar's pending-switch logic
    /// may still complete the transition
    #[error("target deck did not buffer within {waited_ms}ms")]
    BufferTimeout { waited_ms: u64 },

    /// The mixer sidecar is not running
    #[error("mixer process is not running")]
    MixerDead,

    /// Spawning or readying the mixer sidecar failed
    #[error("mixer failed to start: {0}")]
    MixerStartFailed(String),

    /// A URL accumulated too many stream errors and is marked unplayable
    #[error("stream unplayable after repeated errors: {url}")]
    StreamUnplayable { url: String },

    /// The guild session has been cleaned up
    #[error("guild session is gone: {0}")]
    GuildGone(String),

    /// State persistence failed; the mutation was rolled back
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Sidecar command rejected before execution
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// Sidecar command did not complete within its timeout
    #[error("command `{0}` timed out")]
    CommandTimeout(String),

    /// Queue operation errors (bad index, size cap, …)
    #[error("queue error: {0}")]
    Queue(String),

    /// Invalid state for operation
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error should be surfaced to the interaction that caused
    /// it rather than escalating (logged at warn, user may simply retry).
    pub fn user_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Throttled { .. }
                | Error::OperationTimeout(_)
                | Error::CrossfadeInProgress
                | Error::SkipInProgress
                | Error::BufferTimeout { .. }
        )
    }
}

/// Convenience Result type using chorus-player Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_recoverable_classification() {
        assert!(Error::Throttled { retry_after_ms: 100 }.user_recoverable());
        assert!(Error::SkipInProgress.user_recoverable());
        assert!(Error::CrossfadeInProgress.user_recoverable());
        assert!(Error::BufferTimeout { waited_ms: 8000 }.user_recoverable());
        assert!(!Error::MixerDead.user_recoverable());
        assert!(!Error::Persistence("disk full".into()).user_recoverable());
    }
}
