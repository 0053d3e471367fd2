//! Skip transitions
//!
//! One state machine drives every deck change: preload check, cold load,
//! buffer wait, crossfade-or-skip command, atomic commit. The per-guild skip
//! lock makes the whole sequence exclusive across its await points; the
//! 250 ms throttle in the entry points guards against millisecond-scale
//! duplicate triggers before the barrier's coarser throttle even applies.

use super::core::Player;
use crate::error::{Error, Result};
use crate::mixer::{CommandOptions, MixerCommand};
use chorus_common::events::CoreEvent;
use chorus_common::params;
use chorus_common::types::{DeckId, TransitionReason};
use std::time::Instant;
use tracing::{debug, info, warn};

impl Player {
    /// User skip to the next song (barrier-serialized)
    pub async fn skip(&self) -> Result<()> {
        let player = self.clone();
        self.session
            .barrier
            .run("skip", async move {
                player.skip_next(TransitionReason::Manual).await
            })
            .await
    }

    /// User skip to the previous song (barrier-serialized)
    pub async fn previous(&self) -> Result<()> {
        let player = self.clone();
        self.session
            .barrier
            .run("prev", async move { player.skip_prev().await })
            .await
    }

    /// User jump to an absolute queue index (barrier-serialized)
    pub async fn skip_to(&self, index: usize) -> Result<()> {
        let player = self.clone();
        self.session
            .barrier
            .run("skip_to_index", async move {
                player.skip_to_index(index).await
            })
            .await
    }

    /// Advance after the current song ended (sidecar-driven)
    pub(super) async fn auto_skip(&self) -> Result<()> {
        self.session.stats.song_completed().await;
        self.skip_next(TransitionReason::Auto).await
    }

    pub(super) async fn skip_next(&self, reason: TransitionReason) -> Result<()> {
        self.check_skip_throttle().await?;

        let (loop_enabled, play_index, len) = self
            .with_state(|s| (s.loop_enabled, s.play_index, s.songs.len()))
            .await;

        if loop_enabled {
            return self.restart_current_song().await;
        }
        if play_index + 1 < len {
            self.transition_to(play_index + 1, reason).await
        } else {
            self.end_queue().await
        }
    }

    pub(super) async fn skip_prev(&self) -> Result<()> {
        self.check_skip_throttle().await?;

        let play_index = self.with_state(|s| s.play_index).await;
        if play_index == 0 {
            debug!(guild = %self.guild(), "skip_prev at queue start is a no-op");
            return Ok(());
        }
        self.transition_to(play_index - 1, TransitionReason::ManualPrev)
            .await
    }

    pub(super) async fn skip_to_index(&self, index: usize) -> Result<()> {
        self.check_skip_throttle().await?;

        let len = self.with_state(|s| s.songs.len()).await;
        if index >= len {
            return Err(Error::Queue(format!(
                "select index {index} out of bounds (len {len})"
            )));
        }
        self.transition_to(index, TransitionReason::ManualSelect).await
    }

    /// Millisecond-scale duplicate-trigger guard, separate from the barrier
    async fn check_skip_throttle(&self) -> Result<()> {
        let throttle = params::get::skip_throttle();
        let mut state = self.session.state.write().await;
        if let Some(last) = state.last_skip_attempt {
            let elapsed = last.elapsed();
            if elapsed < throttle {
                let retry_after_ms = (throttle - elapsed).as_millis() as u64;
                return Err(Error::Throttled { retry_after_ms });
            }
        }
        state.last_skip_attempt = Some(Instant::now());
        Ok(())
    }

    /// Refuses queue mutations while a transition holds the skip lock
    pub(super) fn ensure_no_transition(&self) -> Result<()> {
        if self.session.locks.has_active_lock(&self.session.skip_lock_name()) {
            return Err(Error::SkipInProgress);
        }
        Ok(())
    }

    /// The transition state machine. Runs entirely under the skip lock.
    pub(super) async fn transition_to(
        &self,
        target_index: usize,
        reason: TransitionReason,
    ) -> Result<()> {
        // Preconditions, in order: mixer up, no crossfade, lock free.
        if !self.session.mixer_alive() {
            return Err(Error::MixerDead);
        }
        if self.with_state(|s| s.crossfade_active()).await {
            return Err(Error::CrossfadeInProgress);
        }
        let _guard = self
            .session
            .locks
            .try_acquire(&self.session.skip_lock_name(), params::get::skip_lock_expiry())
            .ok_or(Error::SkipInProgress)?;

        // Lock released on all return paths via the guard's drop.
        self.run_locked_transition(target_index, reason).await
    }

    async fn run_locked_transition(
        &self,
        target_index: usize,
        reason: TransitionReason,
    ) -> Result<()> {
        let (target_url, target_deck, fade_enabled) = {
            let state = self.session.state.read().await;
            let song = state.songs.get(target_index).ok_or_else(|| {
                Error::Queue(format!(
                    "target index {target_index} out of bounds (len {})",
                    state.songs.len()
                ))
            })?;
            (song.url.clone(), state.other_deck(), state.fade_enabled)
        };

        let preloaded = {
            let state = self.session.state.read().await;
            state.next_deck_loaded.as_deref() == Some(target_url.as_str())
                && state.next_deck_target == Some(target_deck)
                && state.buffer_ready[target_deck.index()]
        };

        info!(
            guild = %self.guild(),
            target_index,
            %target_deck,
            reason = %reason,
            preloaded,
            fade = fade_enabled,
            "starting transition"
        );

        if !preloaded {
            self.cold_load(&target_url, target_deck).await?;
        }

        self.issue_switch(target_deck, fade_enabled).await?;
        self.commit_transition(target_index, target_deck, &target_url, reason)
            .await
    }

    /// Cold path: reset the target deck, load the track, wait for audio
    async fn cold_load(&self, url: &str, target_deck: DeckId) -> Result<()> {
        self.session
            .commands
            .submit_with(
                MixerCommand::StopDeck { deck: target_deck },
                CommandOptions::high_priority(),
            )
            .await?;
        {
            let mut state = self.session.state.write().await;
            state.buffer_ready[target_deck.index()] = false;
        }
        self.session
            .commands
            .submit_with(
                MixerCommand::Load {
                    url: url.to_string(),
                    deck: target_deck,
                    autoplay: false,
                },
                CommandOptions::high_priority(),
            )
            .await?;

        self.wait_for_buffer(target_deck).await
    }

    /// Poll `buffer_ready` until the sidecar announces the deck or the
    /// bounded wait elapses.
    async fn wait_for_buffer(&self, deck: DeckId) -> Result<()> {
        let wait = params::get::buffer_wait();
        let poll = params::get::buffer_poll();
        let deadline = Instant::now() + wait;

        loop {
            if self.with_state(|s| s.buffer_ready[deck.index()]).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                if !self.session.mixer_alive() {
                    return Err(Error::MixerDead);
                }
                // Tolerable: the sidecar runs its own pending-switch once the
                // data arrives and reports back with `auto_end_switch`.
                warn!(
                    guild = %self.guild(),
                    %deck,
                    waited_ms = wait.as_millis() as u64,
                    "buffer wait exceeded, leaving transition to the sidecar"
                );
                return Err(Error::BufferTimeout {
                    waited_ms: wait.as_millis() as u64,
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Fast/cold common tail: crossfade when fade is on, hard switch otherwise
    async fn issue_switch(&self, target_deck: DeckId, fade_enabled: bool) -> Result<()> {
        if fade_enabled {
            let duration_ms = params::get::crossfade_ms();
            self.session
                .commands
                .submit_with(
                    MixerCommand::crossfade(target_deck, duration_ms),
                    CommandOptions::high_priority(),
                )
                .await?;
            {
                let mut state = self.session.state.write().await;
                state.is_crossfading = true;
                state.crossfade_start = Some(Instant::now());
            }
            self.emit(CoreEvent::CrossfadeStarted {
                guild: self.guild(),
                to_deck: target_deck,
                timestamp: chrono::Utc::now(),
            });
        } else {
            self.session
                .commands
                .submit_with(
                    MixerCommand::SkipTo {
                        target_deck,
                    },
                    CommandOptions::high_priority(),
                )
                .await?;
        }
        Ok(())
    }

    /// Atomic commit: all session fields flip together under the write lock
    async fn commit_transition(
        &self,
        target_index: usize,
        target_deck: DeckId,
        target_url: &str,
        reason: TransitionReason,
    ) -> Result<()> {
        self.credit_listening().await;

        let (title, was_paused) = {
            let mut state = self.session.state.write().await;

            if let Some(prev) = state.current_song().cloned() {
                if state.play_index != target_index {
                    state.push_history(prev);
                }
            }

            state.play_index = target_index;
            state.current_deck = target_deck;
            state.current_deck_loaded = Some(target_url.to_string());
            state.clear_preload();
            let now = Instant::now();
            state.song_start_time = Some(now);
            state.last_transition = Some(now);
            state.loading_footer = None;

            (
                state.current_song().map(|s| s.title.clone()).unwrap_or_default(),
                state.is_paused,
            )
        };

        self.session.stats.song_started().await;
        if let Err(e) = self.session.persist().await {
            // The decks already switched; nothing to roll back to.
            warn!(guild = %self.guild(), error = %e, "persist failed after transition commit");
        }
        self.session.version.bump(
            "skip_complete",
            format!("index={target_index}, deck={target_deck}, reason={reason}"),
        );

        self.emit(CoreEvent::SongStarted {
            guild: self.guild(),
            index: target_index,
            title,
            deck: target_deck,
            timestamp: chrono::Utc::now(),
        });
        self.session.emit_dashboard_refresh();

        self.on_song_start().await;

        if was_paused {
            self.resume_if_paused().await?;
        }
        Ok(())
    }

    /// Queue exhausted: wind playback down, keeping only the last song
    pub(super) async fn end_queue(&self) -> Result<()> {
        let guild = self.guild();
        info!(guild = %guild, "queue finished");

        self.session.clear_timers();
        self.credit_listening().await;
        if let Err(e) = self.session.stats.flush().await {
            warn!(guild = %guild, error = %e, "stats flush failed at queue end");
        }

        let last_title = {
            let mut state = self.session.state.write().await;
            let last = state.current_song().cloned();
            if let Some(ref song) = last {
                state.push_history(song.clone());
            }
            state.songs = last.iter().cloned().collect();
            state.play_index = 0;
            state.clear_decks();
            state.song_start_time = None;
            state.is_paused = false;
            state.pause_start = None;
            state.intentional_kill = true;
            last.map(|s| s.title)
        };

        self.stop_mixer().await;

        if let Err(e) = self.session.persist().await {
            warn!(guild = %guild, error = %e, "persist failed at queue end");
        }
        self.session.version.bump("end_queue", "");

        self.emit(CoreEvent::QueueFinished {
            guild,
            last_title,
            timestamp: chrono::Utc::now(),
        });
        self.session.emit_dashboard_refresh();
        Ok(())
    }
}
