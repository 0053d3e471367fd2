//! Playback facade - play, replay, pause/resume, mixer attachment

use super::core::Player;
use crate::error::{Error, Result};
use crate::mixer::{CommandOptions, MixerCommand, MixerLink};
use crate::voice::ConnectionState;
use chorus_common::events::CoreEvent;
use chorus_common::params;
use chorus_common::types::DeckId;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

impl Player {
    /// Toggle pause/resume (barrier-serialized). Also the "play" button for
    /// a restored or disconnected session with songs queued.
    pub async fn toggle_pause(&self) -> Result<()> {
        let player = self.clone();
        self.session
            .barrier
            .run("pause_toggle", async move {
                player.toggle_pause_resume().await
            })
            .await
    }

    /// Kill and respawn the mixer on user request (barrier-serialized)
    pub async fn restart_mixer(&self) -> Result<()> {
        let player = self.clone();
        self.session
            .barrier
            .run("mixer_restart", async move {
                {
                    let mut state = player.session.state.write().await;
                    state.intentional_kill = true;
                }
                player.stop_mixer().await;
                {
                    let mut state = player.session.state.write().await;
                    state.clear_decks();
                }
                player.play_song().await
            })
            .await
    }

    /// Begin playback of the current queue entry.
    ///
    /// Precondition: a missing voice connection, mixer, or player means no
    /// deck is loaded, whatever stale state claims.
    pub async fn play_song(&self) -> Result<()> {
        let guild = self.guild();

        if self.gateway.connection_state(guild) != ConnectionState::Ready
            || !self.session.mixer_alive()
        {
            let mut state = self.session.state.write().await;
            state.current_deck_loaded = None;
        }

        let (song, deck, loop_enabled, already_loaded) = {
            let state = self.session.state.read().await;
            let song = state
                .current_song()
                .cloned()
                .ok_or_else(|| Error::InvalidState("queue is empty".into()))?;
            (
                song,
                state.current_deck,
                state.loop_enabled,
                state.current_deck_loaded.is_some(),
            )
        };

        if already_loaded && self.session.mixer_alive() {
            debug!(guild = %guild, "play_song with a loaded deck is a no-op");
            return Ok(());
        }

        self.ensure_mixer().await?;

        // The core owns crossfade policy; the sidecar must not start fades
        // on its own. The loop flag mirrors the session toggle.
        self.session
            .commands
            .submit(MixerCommand::SetProactiveCrossfade { enabled: false })
            .await?;
        self.session
            .commands
            .submit(MixerCommand::SetLoop {
                enabled: loop_enabled,
            })
            .await?;

        {
            let mut state = self.session.state.write().await;
            state.buffer_ready[deck.index()] = false;
        }
        self.session
            .commands
            .submit(MixerCommand::Load {
                url: song.url.clone(),
                deck,
                autoplay: false,
            })
            .await?;

        // Give the sidecar a moment to buffer the first chunk; replays via
        // restart_deck skip this gap.
        tokio::time::sleep(params::get::initial_play_gap()).await;

        self.session
            .commands
            .submit(MixerCommand::Play { deck })
            .await?;

        let (index, title) = {
            let mut state = self.session.state.write().await;
            state.current_deck_loaded = Some(song.url.clone());
            state.song_start_time = Some(Instant::now());
            state.session_restored = false;
            state.is_paused = false;
            state.pause_start = None;
            (state.play_index, song.title.clone())
        };

        self.session.stats.song_started().await;
        if let Err(e) = self.session.persist().await {
            warn!(guild = %guild, error = %e, "persist failed after play");
        }
        self.session.version.bump("play", format!("index={index}"));

        info!(guild = %guild, index, title = %title, %deck, "playback started");
        self.emit(CoreEvent::SongStarted {
            guild,
            index,
            title,
            deck,
            timestamp: chrono::Utc::now(),
        });
        self.session.emit_dashboard_refresh();
        self.on_song_start().await;
        Ok(())
    }

    /// Replay the current song from the top. Dead mixer means a full
    /// restart; otherwise the sidecar rewinds the deck from its sample cache
    /// with no re-download and no load/play gap.
    pub(super) async fn restart_current_song(&self) -> Result<()> {
        if !self.session.mixer_alive() {
            {
                let mut state = self.session.state.write().await;
                state.current_deck_loaded = None;
            }
            return self.play_song().await;
        }

        let deck = self.with_state(|s| s.current_deck).await;
        self.session
            .commands
            .submit_with(
                MixerCommand::RestartDeck { deck },
                CommandOptions::high_priority(),
            )
            .await?;

        let was_paused = {
            let mut state = self.session.state.write().await;
            state.song_start_time = Some(Instant::now());
            state.is_crossfading = false;
            state.is_paused
        };

        self.session.stats.song_started().await;
        self.session.version.bump("replay", format!("deck={deck}"));
        self.session.emit_dashboard_refresh();
        self.arm_preload_timer();

        if was_paused {
            self.resume_if_paused().await?;
        }
        Ok(())
    }

    /// The pause/resume state machine
    pub(super) async fn toggle_pause_resume(&self) -> Result<()> {
        let guild = self.guild();
        let (restored, queue_empty, is_paused) = self
            .with_state(|s| (s.session_restored, s.songs.is_empty(), s.is_paused))
            .await;
        let mixer_alive = self.session.mixer_alive();
        let connected = self.gateway.connection_state(guild) == ConnectionState::Ready;

        // Restored session with songs but no mixer yet: this is the "resume
        // after restart" path.
        if restored && !queue_empty && !mixer_alive {
            {
                let mut state = self.session.state.write().await;
                state.session_restored = false;
            }
            self.gateway.connect(guild).await?;
            return self.play_song().await;
        }

        // Mixer or connection missing but songs exist: reconnect and play.
        if (!mixer_alive || !connected) && !queue_empty {
            self.gateway.connect(guild).await?;
            return self.play_song().await;
        }

        if queue_empty {
            return Err(Error::InvalidState("queue is empty".into()));
        }

        if !is_paused {
            {
                let mut state = self.session.state.write().await;
                state.is_paused = true;
                state.pause_start = Some(Instant::now());
            }
            self.gateway.pause_player(guild).await?;
            self.session.commands.submit(MixerCommand::PauseAll).await?;
            self.session.version.bump("pause", "");
            info!(guild = %guild, "playback paused");
            self.emit(CoreEvent::PauseStateChanged {
                guild,
                paused: true,
                timestamp: chrono::Utc::now(),
            });
        } else {
            {
                let mut state = self.session.state.write().await;
                state.is_paused = false;
                // Shift the start time so listening credit and position math
                // exclude the paused span.
                if let (Some(start), Some(paused_at)) =
                    (state.song_start_time, state.pause_start.take())
                {
                    state.song_start_time = Some(start + paused_at.elapsed());
                }
            }
            self.session.commands.submit(MixerCommand::ResumeAll).await?;
            self.gateway.resume_player(guild).await?;
            self.session.version.bump("resume", "");
            info!(guild = %guild, "playback resumed");
            self.emit(CoreEvent::PauseStateChanged {
                guild,
                paused: false,
                timestamp: chrono::Utc::now(),
            });
            self.arm_preload_timer();
        }

        if let Err(e) = self.session.persist().await {
            warn!(guild = %guild, error = %e, "persist failed after pause toggle");
        }
        self.session.emit_dashboard_refresh();
        Ok(())
    }

    /// Common unpause tail used after a transition that happened while paused
    pub(super) async fn resume_if_paused(&self) -> Result<()> {
        let needs_resume = {
            let mut state = self.session.state.write().await;
            if state.is_paused {
                state.is_paused = false;
                state.pause_start = None;
                true
            } else {
                false
            }
        };
        if !needs_resume {
            return Ok(());
        }

        let guild = self.guild();
        self.session.commands.submit(MixerCommand::ResumeAll).await?;
        self.gateway.resume_player(guild).await?;
        self.session.version.bump("resume_after_skip", "");
        self.emit(CoreEvent::PauseStateChanged {
            guild,
            paused: false,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Forward the loop toggle to the sidecar and persist it
    pub async fn set_loop(&self, enabled: bool) -> Result<()> {
        {
            let mut state = self.session.state.write().await;
            state.loop_enabled = enabled;
        }
        if self.session.mixer_alive() {
            self.session
                .commands
                .submit(MixerCommand::SetLoop { enabled })
                .await?;
        }
        self.session.version.bump("set_loop", format!("enabled={enabled}"));
        if let Err(e) = self.session.persist().await {
            warn!(guild = %self.guild(), error = %e, "persist failed after loop toggle");
        }
        self.session.emit_dashboard_refresh();
        Ok(())
    }

    /// Toggle the automatic crossfade on track changes
    pub async fn set_fade(&self, enabled: bool) -> Result<()> {
        {
            let mut state = self.session.state.write().await;
            state.fade_enabled = enabled;
        }
        self.session.version.bump("set_fade", format!("enabled={enabled}"));
        if let Err(e) = self.session.persist().await {
            warn!(guild = %self.guild(), error = %e, "persist failed after fade toggle");
        }
        self.session.emit_dashboard_refresh();
        Ok(())
    }

    /// Spawn a mixer when none is running, respecting the start cooldown,
    /// and attach its PCM stream to the voice sender.
    pub(super) async fn ensure_mixer(&self) -> Result<Arc<dyn MixerLink>> {
        let guild = self.guild();

        if let Some(link) = self.session.mixer_link() {
            if link.is_alive() {
                return Ok(link);
            }
        }

        {
            let state = self.session.state.read().await;
            if let Some(last) = state.last_mixer_start {
                let cooldown = params::get::restart_cooldown();
                let elapsed = last.elapsed();
                if elapsed < cooldown {
                    return Err(Error::MixerStartFailed(format!(
                        "start cooldown: {}ms remaining",
                        (cooldown - elapsed).as_millis()
                    )));
                }
            }
        }

        let generation = self.session.next_generation();
        let (link, pcm) = self
            .factory
            .spawn_mixer(guild, generation, self.session.signal_sender())
            .await?;
        self.session.mixer.install(link.clone());

        {
            let mut state = self.session.state.write().await;
            state.mixer_generation = generation;
            state.last_mixer_start = Some(Instant::now());
            state.intentional_kill = false;
            state.buffer_ready = [false, false];
        }

        self.gateway.attach_pcm(guild, pcm).await?;

        // Bounded readiness check: a sidecar that dies during startup is a
        // start failure, not a crash to recover from.
        for _ in 0..4 {
            if !link.is_alive() {
                return Err(Error::MixerStartFailed("mixer died during startup".into()));
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        if !link.is_alive() {
            return Err(Error::MixerStartFailed("mixer died during startup".into()));
        }

        info!(guild = %guild, generation, "mixer ready");
        Ok(link)
    }

    /// Current playback position in the song, pause-compensated
    pub async fn position_ms(&self) -> Option<u64> {
        let state = self.session.state.read().await;
        let start = state.song_start_time?;
        let elapsed = match state.pause_start {
            Some(paused_at) => paused_at.duration_since(start),
            None => start.elapsed(),
        };
        Some(elapsed.as_millis() as u64)
    }

    /// Deck the next preload will land on (the complement of current)
    pub async fn preload_deck(&self) -> DeckId {
        self.with_state(|s| s.other_deck()).await
    }
}
