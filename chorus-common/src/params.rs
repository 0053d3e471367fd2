//! Global parameter management
//!
//! Centralized singleton for the playback core's tunable parameters.
//! Read-frequently, write-rarely access pattern using RwLock.
//!
//! All timing parameters are stored in a single `GlobalParams` struct,
//! accessible via the `PARAMS` static singleton. Writes happen at startup
//! (config overrides) and in tests; reads happen on the hot control paths.

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// Global parameters singleton
pub static PARAMS: Lazy<GlobalParams> = Lazy::new(GlobalParams::default);

/// Global parameter storage
///
/// All parameters stored with RwLock for thread-safe access.
/// Readers don't block each other (shared read lock).
pub struct GlobalParams {
    /// Crossfade duration between decks
    ///
    /// Default: 6000 ms
    pub crossfade_ms: RwLock<u64>,

    /// Minimum crossfade duration the sidecar accepts; shorter requests are
    /// clamped up to this value
    ///
    /// Default: 6000 ms
    pub min_crossfade_ms: RwLock<u64>,

    /// How long before the natural end of a song the sidecar announces
    /// `approaching_end`
    ///
    /// Default: 3000 ms
    pub crossfade_buffer_ms: RwLock<u64>,

    /// Idle time alone in a voice channel before the bot disconnects
    ///
    /// Default: 60000 ms
    pub disconnect_timeout_ms: RwLock<u64>,

    /// Debounce window for voice-membership reconciliation after a join
    ///
    /// Default: 5000 ms
    pub reconcile_window_ms: RwLock<u64>,

    /// Minimum gap between two mixer process starts for the same guild
    ///
    /// Default: 5000 ms
    pub restart_cooldown_ms: RwLock<u64>,

    /// Elapsed playback below this threshold is not credited to listener
    /// statistics
    ///
    /// Default: 30000 ms
    pub min_song_play_time_ms: RwLock<u64>,

    /// Delay after a song starts before the next song is preloaded onto the
    /// idle deck
    ///
    /// Default: 5000 ms
    pub preload_delay_ms: RwLock<u64>,

    /// Minimum gap between two skip attempts (guards against millisecond
    /// scale duplicate triggers, separate from the barrier throttle)
    ///
    /// Default: 250 ms
    pub skip_throttle_ms: RwLock<u64>,

    /// Minimum gap between completed barrier operations; earlier submissions
    /// are rejected synchronously
    ///
    /// Default: 2000 ms
    pub barrier_min_throttle_ms: RwLock<u64>,

    /// Timeout around a single barrier operation body
    ///
    /// Default: 15000 ms
    pub barrier_timeout_ms: RwLock<u64>,

    /// Default timeout for a single sidecar command
    ///
    /// Default: 10000 ms
    pub cmd_timeout_ms: RwLock<u64>,

    /// Upper bound on waiting for `buffer_ready` during a cold-load skip
    ///
    /// Default: 8000 ms
    pub buffer_wait_ms: RwLock<u64>,

    /// Poll period while waiting for `buffer_ready`
    ///
    /// Default: 50 ms
    pub buffer_poll_ms: RwLock<u64>,

    /// Hard expiry on the per-guild skip lock so a crashed holder cannot
    /// wedge the session
    ///
    /// Default: 30000 ms
    pub skip_lock_expiry_ms: RwLock<u64>,

    /// Gap between the initial `load` and the first `play` so the sidecar can
    /// buffer the first chunk
    ///
    /// Default: 150 ms
    pub initial_play_gap_ms: RwLock<u64>,

    /// Maximum number of songs a guild queue may hold
    ///
    /// Default: 1000
    pub max_queue_size: RwLock<usize>,

    /// Maximum songs kept in per-guild history
    ///
    /// Default: 50
    pub history_limit: RwLock<usize>,

    /// Mixer crash recovery attempts before scheduling a disconnect
    ///
    /// Default: 2
    pub crash_recovery_max_attempts: RwLock<u32>,

    /// Stream-error strikes on one URL before it is marked unplayable
    ///
    /// Default: 3
    pub stream_error_strike_limit: RwLock<u32>,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            crossfade_ms: RwLock::new(6_000),
            min_crossfade_ms: RwLock::new(6_000),
            crossfade_buffer_ms: RwLock::new(3_000),
            disconnect_timeout_ms: RwLock::new(60_000),
            reconcile_window_ms: RwLock::new(5_000),
            restart_cooldown_ms: RwLock::new(5_000),
            min_song_play_time_ms: RwLock::new(30_000),
            preload_delay_ms: RwLock::new(5_000),
            skip_throttle_ms: RwLock::new(250),
            barrier_min_throttle_ms: RwLock::new(2_000),
            barrier_timeout_ms: RwLock::new(15_000),
            cmd_timeout_ms: RwLock::new(10_000),
            buffer_wait_ms: RwLock::new(8_000),
            buffer_poll_ms: RwLock::new(50),
            skip_lock_expiry_ms: RwLock::new(30_000),
            initial_play_gap_ms: RwLock::new(150),
            max_queue_size: RwLock::new(1_000),
            history_limit: RwLock::new(50),
            crash_recovery_max_attempts: RwLock::new(2),
            stream_error_strike_limit: RwLock::new(3),
        }
    }
}

/// Convenience accessors for the hot control paths
pub mod get {
    use super::PARAMS;
    use std::time::Duration;

    pub fn crossfade() -> Duration {
        Duration::from_millis(*PARAMS.crossfade_ms.read().expect("params lock"))
    }

    pub fn preload_delay() -> Duration {
        Duration::from_millis(*PARAMS.preload_delay_ms.read().expect("params lock"))
    }

    pub fn skip_throttle() -> Duration {
        Duration::from_millis(*PARAMS.skip_throttle_ms.read().expect("params lock"))
    }

    pub fn barrier_min_throttle() -> Duration {
        Duration::from_millis(*PARAMS.barrier_min_throttle_ms.read().expect("params lock"))
    }

    pub fn barrier_timeout() -> Duration {
        Duration::from_millis(*PARAMS.barrier_timeout_ms.read().expect("params lock"))
    }

    pub fn cmd_timeout() -> Duration {
        Duration::from_millis(*PARAMS.cmd_timeout_ms.read().expect("params lock"))
    }

    pub fn buffer_wait() -> Duration {
        Duration::from_millis(*PARAMS.buffer_wait_ms.read().expect("params lock"))
    }

    pub fn buffer_poll() -> Duration {
        Duration::from_millis(*PARAMS.buffer_poll_ms.read().expect("params lock"))
    }

    pub fn skip_lock_expiry() -> Duration {
        Duration::from_millis(*PARAMS.skip_lock_expiry_ms.read().expect("params lock"))
    }

    pub fn restart_cooldown() -> Duration {
        Duration::from_millis(*PARAMS.restart_cooldown_ms.read().expect("params lock"))
    }

    pub fn initial_play_gap() -> Duration {
        Duration::from_millis(*PARAMS.initial_play_gap_ms.read().expect("params lock"))
    }

    pub fn disconnect_timeout() -> Duration {
        Duration::from_millis(*PARAMS.disconnect_timeout_ms.read().expect("params lock"))
    }

    pub fn reconcile_window() -> Duration {
        Duration::from_millis(*PARAMS.reconcile_window_ms.read().expect("params lock"))
    }

    pub fn min_song_play_time_ms() -> u64 {
        *PARAMS.min_song_play_time_ms.read().expect("params lock")
    }

    pub fn crossfade_ms() -> u64 {
        *PARAMS.crossfade_ms.read().expect("params lock")
    }

    pub fn min_crossfade_ms() -> u64 {
        *PARAMS.min_crossfade_ms.read().expect("params lock")
    }

    pub fn max_queue_size() -> usize {
        *PARAMS.max_queue_size.read().expect("params lock")
    }

    pub fn history_limit() -> usize {
        *PARAMS.history_limit.read().expect("params lock")
    }

    pub fn crash_recovery_max_attempts() -> u32 {
        *PARAMS.crash_recovery_max_attempts.read().expect("params lock")
    }

    pub fn stream_error_strike_limit() -> u32 {
        *PARAMS.stream_error_strike_limit.read().expect("params lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = GlobalParams::default();
        assert_eq!(*p.crossfade_ms.read().unwrap(), 6_000);
        assert_eq!(*p.barrier_min_throttle_ms.read().unwrap(), 2_000);
        assert_eq!(*p.max_queue_size.read().unwrap(), 1_000);
        assert_eq!(*p.crash_recovery_max_attempts.read().unwrap(), 2);
    }
}
