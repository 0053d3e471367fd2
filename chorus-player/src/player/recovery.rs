//! Mixer crash recovery
//!
//! The controller delivers exactly one crash signal per mixer instance. The
//! handler flushes listener statistics, logs the full session context, and
//! restarts playback from the current queue position with backoff, capped at
//! a small number of attempts before giving up and scheduling a disconnect.

use super::core::Player;
use chorus_common::events::CoreEvent;
use chorus_common::params;
use chorus_common::types::CrashReason;
use std::time::Duration;
use tracing::{debug, error, info, warn};

impl Player {
    pub(super) async fn handle_mixer_crash(&self, generation: u64, reason: CrashReason) {
        let guild = self.guild();

        {
            let state = self.session.state.read().await;
            if generation < state.mixer_generation {
                debug!(
                    guild = %guild,
                    generation,
                    current = state.mixer_generation,
                    "stale crash signal dropped"
                );
                return;
            }
        }

        self.credit_listening().await;
        if let Err(e) = self.session.stats.flush().await {
            warn!(guild = %guild, error = %e, "stats flush failed after crash");
        }

        // Structured record of the session at the moment of death.
        {
            let state = self.session.state.read().await;
            error!(
                guild = %guild,
                generation,
                reason = %reason,
                play_index = state.play_index,
                queue_len = state.songs.len(),
                current_deck = %state.current_deck,
                current_loaded = state.current_deck_loaded.as_deref().unwrap_or("-"),
                next_loaded = state.next_deck_loaded.as_deref().unwrap_or("-"),
                crossfading = state.is_crossfading,
                paused = state.is_paused,
                attempts = state.crash_recovery_attempts,
                "mixer crashed"
            );
        }

        let intentional = {
            let mut state = self.session.state.write().await;
            if state.intentional_kill {
                state.intentional_kill = false;
                true
            } else {
                false
            }
        };
        if intentional {
            debug!(guild = %guild, "intentional mixer stop, no recovery");
            self.session.mixer.clear();
            return;
        }

        let attempts = {
            let mut state = self.session.state.write().await;
            state.crash_recovery_attempts += 1;
            state.crash_recovery_attempts
        };
        let max_attempts = params::get::crash_recovery_max_attempts();
        let will_recover = attempts <= max_attempts;

        self.emit(CoreEvent::MixerCrashed {
            guild,
            reason: reason.to_string(),
            will_recover,
            timestamp: chrono::Utc::now(),
        });

        if !will_recover {
            warn!(
                guild = %guild,
                attempts,
                max_attempts,
                "crash recovery attempts exhausted, scheduling disconnect"
            );
            self.schedule_disconnect(Duration::ZERO);
            return;
        }

        if self.gateway.human_count(guild) == 0 {
            info!(guild = %guild, "crashed while alone in channel, disconnecting");
            self.schedule_disconnect(Duration::ZERO);
            return;
        }

        // Forget the dead instance; nothing is loaded anymore.
        self.session.mixer.clear();
        {
            let mut state = self.session.state.write().await;
            state.clear_decks();
            state.song_start_time = None;
        }

        let connected = matches!(
            self.gateway.connection_state(guild),
            crate::voice::ConnectionState::Ready
        );
        if connected && self.gateway.voice_channel(guild).is_some() {
            let backoff = Duration::from_millis(500 + 500 * attempts as u64);
            info!(
                guild = %guild,
                attempt = attempts,
                backoff_ms = backoff.as_millis() as u64,
                "restarting playback after crash"
            );
            let player = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(backoff).await;
                if let Err(e) = player.play_song().await {
                    error!(
                        guild = %player.guild(),
                        error = %e,
                        "playback restart after crash failed"
                    );
                }
            });
        } else {
            debug!(guild = %guild, "no usable voice connection, skipping crash restart");
        }
    }

    /// Fresh slate after the session leaves voice entirely
    pub(super) async fn reset_crash_attempts(&self) {
        let mut state = self.session.state.write().await;
        if state.crash_recovery_attempts != 0 {
            debug!(guild = %self.guild(), "crash recovery counter reset");
            state.crash_recovery_attempts = 0;
        }
    }
}
