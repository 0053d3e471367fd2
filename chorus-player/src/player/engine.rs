//! Timers and sidecar event routing
//!
//! Every sidecar event lands here from the session event loop. Handlers that
//! only update state run inline; handlers that start a transition spawn a
//! task so the loop keeps draining events the transition itself waits on
//! (e.g. `buffer_ready` during a cold load).

use super::core::Player;
use crate::mixer::{CommandOptions, MixerCommand, MixerEvent};
use chorus_common::params;
use chorus_common::types::DeckId;
use tracing::{debug, error, info, trace, warn};

impl Player {
    /// A song definitively started: reset crossfade state and re-arm the
    /// preload timer.
    pub(super) async fn on_song_start(&self) {
        {
            let mut state = self.session.state.write().await;
            state.is_crossfading = false;
        }
        self.arm_preload_timer();
    }

    /// Schedule a single preload at the configured delay, replacing any
    /// previously armed timer.
    pub(super) fn arm_preload_timer(&self) {
        let player = self.clone();
        let delay = params::get::preload_delay();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            player.preload_next_song().await;
        });
        self.session.set_preload_timer(Some(handle));
    }

    /// Load the next song onto the idle deck without playing it.
    ///
    /// Snapshot-checked: if the queue changed while the load was in flight,
    /// the stale preload is discarded rather than committed.
    pub(super) async fn preload_next_song(&self) {
        let guild = self.guild();

        let snapshot = {
            let state = self.session.state.read().await;
            if state.is_paused {
                return;
            }
            let Some(next) = state.next_song() else {
                return;
            };
            if let Some(current) = state.current_song() {
                if next.same_track(current) {
                    return;
                }
            }
            if state.next_deck_loaded.as_deref() == Some(next.url.as_str()) {
                return;
            }
            if state.crossfade_active() {
                debug!(guild = %guild, "preload skipped during crossfade window");
                return;
            }
            if state.failed_urls.contains(&next.url) {
                debug!(guild = %guild, url = %next.url, "preload skipped for unplayable url");
                return;
            }
            (state.play_index, state.songs.len(), next.url.clone(), state.other_deck())
        };
        let (play_index, queue_len, next_url, target_deck) = snapshot;

        {
            let mut state = self.session.state.write().await;
            state.buffer_ready[target_deck.index()] = false;
        }

        debug!(guild = %guild, url = %next_url, deck = %target_deck, "preloading next song");
        let result = self
            .session
            .commands
            .submit_with(
                MixerCommand::Load {
                    url: next_url.clone(),
                    deck: target_deck,
                    autoplay: false,
                },
                CommandOptions {
                    timeout: params::get::buffer_wait(),
                    retries: 1,
                    ..CommandOptions::default()
                },
            )
            .await;
        if let Err(e) = result {
            warn!(guild = %guild, error = %e, "preload load command failed");
            return;
        }

        let mut state = self.session.state.write().await;
        let still_valid = state.play_index == play_index
            && state.songs.len() == queue_len
            && state.next_song().map(|n| n.url.as_str()) == Some(next_url.as_str());
        if !still_valid {
            debug!(guild = %guild, "queue changed during preload, discarding");
            state.clear_preload();
            return;
        }
        state.next_deck_loaded = Some(next_url);
        state.next_deck_target = Some(target_deck);
        drop(state);

        self.session.version.bump("preload", format!("deck={target_deck}"));
    }

    /// Entry point for every sidecar event of the current generation
    pub(super) async fn handle_mixer_event(&self, event: MixerEvent) {
        let guild = self.guild();
        match event {
            MixerEvent::BufferReady(deck) => {
                {
                    let mut state = self.session.state.write().await;
                    state.buffer_ready[deck.index()] = true;
                }
                self.session.version.bump("buffer_ready", format!("deck={deck}"));
            }

            MixerEvent::CrossfadeStarted => {
                debug!(guild = %guild, "sidecar confirmed crossfade start");
            }

            MixerEvent::ApproachingEnd => self.on_approaching_end().await,

            MixerEvent::End => self.on_end().await,

            MixerEvent::DeckChanged(deck) => {
                trace!(guild = %guild, %deck, "deck changed");
            }

            MixerEvent::AutoEndSwitch(deck) => self.on_auto_end_switch(deck).await,

            MixerEvent::AutoLoopRestart(deck) => self.on_auto_loop_restart(deck).await,

            MixerEvent::StreamError(message) => self.on_stream_error(message).await,

            MixerEvent::YtError(message) => {
                warn!(guild = %guild, message = %message, "source resolver error");
            }

            MixerEvent::EngineError(message) => {
                error!(guild = %guild, message = %message, "mixer error");
            }

            MixerEvent::StreamOpened(message) => {
                debug!(guild = %guild, message = %message, "stream opened");
            }
            MixerEvent::DeckRestarted(deck) => {
                debug!(guild = %guild, %deck, "deck restarted");
            }
            MixerEvent::Info(message) => debug!(guild = %guild, message = %message, "mixer info"),
            MixerEvent::Debug(message) => trace!(guild = %guild, message = %message, "mixer debug"),
            MixerEvent::Latency(message) => {
                trace!(guild = %guild, message = %message, "mixer latency")
            }
        }
    }

    /// The current song is almost over. With fade on and a next song queued,
    /// start the automatic crossfade. With nothing queued, clone the current
    /// track onto the idle deck so the sidecar auto-switches instead of
    /// cutting out early. With fade off and a next song queued, do nothing:
    /// the natural `end` drives the gapless path.
    async fn on_approaching_end(&self) {
        let guild = self.guild();
        let (fade_enabled, has_next, current_url, other_deck) = {
            let state = self.session.state.read().await;
            (
                state.fade_enabled,
                state.next_song().is_some(),
                state.current_deck_loaded.clone(),
                state.other_deck(),
            )
        };

        if fade_enabled && has_next {
            info!(guild = %guild, "approaching end, starting automatic crossfade");
            let player = self.clone();
            tokio::spawn(async move {
                if let Err(e) = player.auto_skip().await {
                    warn!(guild = %player.guild(), error = %e, "auto skip failed");
                }
            });
            return;
        }

        if !has_next {
            let Some(url) = current_url else {
                return;
            };
            debug!(guild = %guild, "approaching end with empty queue, cloning current deck");
            {
                let mut state = self.session.state.write().await;
                state.buffer_ready[other_deck.index()] = false;
            }
            if let Err(e) = self
                .session
                .commands
                .submit(MixerCommand::Load {
                    url,
                    deck: other_deck,
                    autoplay: false,
                })
                .await
            {
                warn!(guild = %guild, error = %e, "fallback clone load failed");
            }
        }
        // Fade off with a next song queued: rely on the natural end event.
    }

    /// Natural end with no transition running: advance (or finish) the queue
    async fn on_end(&self) {
        if self.session.locks.has_active_lock(&self.session.skip_lock_name()) {
            debug!(guild = %self.guild(), "end event during active transition, ignoring");
            return;
        }
        let player = self.clone();
        tokio::spawn(async move {
            if let Err(e) = player.auto_skip().await {
                warn!(guild = %player.guild(), error = %e, "auto advance on end failed");
            }
        });
    }

    /// The sidecar already switched decks on its own (auto-gapless); bring
    /// the session state in line without commanding it.
    async fn on_auto_end_switch(&self, new_deck: DeckId) {
        let guild = self.guild();
        self.session.stats.song_completed().await;
        self.credit_listening().await;

        let finished = {
            let state = self.session.state.read().await;
            state.play_index + 1 >= state.songs.len()
        };
        if finished {
            info!(guild = %guild, "auto switch with exhausted queue, finishing");
            if let Err(e) = self.end_queue().await {
                warn!(guild = %guild, error = %e, "end_queue after auto switch failed");
            }
            return;
        }

        {
            let mut state = self.session.state.write().await;
            if let Some(prev) = state.current_song().cloned() {
                state.push_history(prev);
            }
            let old_deck = state.current_deck;
            state.play_index += 1;
            state.current_deck = new_deck;
            let now_playing = state.current_song().map(|s| s.url.clone());
            state.current_deck_loaded = now_playing;
            state.clear_preload();
            state.buffer_ready[old_deck.index()] = false;
            state.song_start_time = Some(std::time::Instant::now());
        }

        self.session.stats.song_started().await;
        if let Err(e) = self.session.persist().await {
            warn!(guild = %guild, error = %e, "persist failed after auto switch");
        }
        self.session
            .version
            .bump("auto_end_switch", format!("deck={new_deck}"));
        info!(guild = %guild, %new_deck, "reconciled auto deck switch");

        self.session.emit_dashboard_refresh();
        self.on_song_start().await;
    }

    /// Loop mode restarted the current deck inside the sidecar
    async fn on_auto_loop_restart(&self, deck: DeckId) {
        let guild = self.guild();
        self.session.stats.song_completed().await;
        self.credit_listening().await;
        {
            let mut state = self.session.state.write().await;
            state.song_start_time = Some(std::time::Instant::now());
        }
        self.session.stats.song_started().await;
        self.session
            .version
            .bump("auto_loop_restart", format!("deck={deck}"));
        debug!(guild = %guild, %deck, "loop restart");
        self.on_song_start().await;
    }

    /// Stream pipeline error. Opus decode failures accumulate strikes on the
    /// playing URL; at the limit the URL is remembered as unplayable and the
    /// queue advances past it.
    async fn on_stream_error(&self, message: String) {
        let guild = self.guild();
        if !message.to_lowercase().contains("opus") {
            debug!(guild = %guild, message = %message, "stream error (non-fatal)");
            return;
        }

        let give_up = {
            let mut state = self.session.state.write().await;
            let Some(url) = state.current_deck_loaded.clone() else {
                return;
            };
            let strikes = state.stream_error_strikes.entry(url.clone()).or_insert(0);
            *strikes += 1;
            let count = *strikes;
            warn!(guild = %guild, url = %url, strikes = count, "opus stream error");

            if count >= params::get::stream_error_strike_limit() {
                state.stream_error_strikes.remove(&url);
                state.failed_urls.insert(url.clone());
                Some(url)
            } else {
                None
            }
        };

        if let Some(url) = give_up {
            error!(guild = %guild, url = %url, "stream unplayable, skipping");
            let player = self.clone();
            tokio::spawn(async move {
                if let Err(e) = player.auto_skip().await {
                    warn!(guild = %player.guild(), error = %e, "skip after unplayable stream failed");
                }
            });
        }
    }
}
