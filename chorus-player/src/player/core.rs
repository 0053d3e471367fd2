//! Player core - struct, event loop, and shared helpers
//!
//! The `Player` ties one guild's `Session` to the voice gateway and the
//! mixer factory. Skip, engine, playback, queue, and recovery behavior live
//! in sibling files as further `impl Player` blocks.

use crate::mixer::{MixerFactory, MixerSignal};
use crate::session::{Session, SessionState};
use crate::voice::{ConnectionState, VoiceEvent, VoiceGateway};
use chorus_common::events::CoreEvent;
use chorus_common::params;
use chorus_common::types::GuildId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Per-guild playback facade
#[derive(Clone)]
pub struct Player {
    pub(super) session: Arc<Session>,
    pub(super) gateway: Arc<dyn VoiceGateway>,
    pub(super) factory: Arc<dyn MixerFactory>,
}

impl Player {
    pub fn new(
        session: Arc<Session>,
        gateway: Arc<dyn VoiceGateway>,
        factory: Arc<dyn MixerFactory>,
    ) -> Player {
        Player {
            session,
            gateway,
            factory,
        }
    }

    pub fn guild(&self) -> GuildId {
        self.session.guild
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Spawn the per-session event loop consuming mixer signals
    pub fn start(&self, signal_rx: mpsc::UnboundedReceiver<MixerSignal>) {
        let player = self.clone();
        tokio::spawn(run_event_loop(player, signal_rx));
    }

    pub(super) fn emit(&self, event: CoreEvent) {
        self.session.bus.emit_lossy(event);
    }

    /// Stop the mixer with `intentional_kill` already set by the caller
    pub(super) async fn stop_mixer(&self) {
        if let Some(link) = self.session.mixer_link() {
            link.stop().await;
        }
        self.session.mixer.clear();
    }

    /// Compute listening credit for the elapsed portion of the current song
    /// and feed it to the stats buffer. Playback shorter than the minimum
    /// play time is treated as noise.
    pub(super) async fn credit_listening(&self) {
        let (elapsed_ms, listeners) = {
            let state = self.session.state.read().await;
            let Some(start) = state.song_start_time else {
                return;
            };
            let elapsed = match state.pause_start {
                // Paused right now: only the span up to the pause counts.
                Some(paused_at) => paused_at.duration_since(start),
                None => start.elapsed(),
            };
            (
                elapsed.as_millis() as u64,
                state.listeners.iter().copied().collect::<Vec<_>>(),
            )
        };

        if elapsed_ms < params::get::min_song_play_time_ms() {
            return;
        }
        self.session.stats.add_listening_ms(&listeners, elapsed_ms).await;
    }

    /// Arm (or re-arm) the delayed voice disconnect
    pub(super) fn schedule_disconnect(&self, delay: Duration) {
        let player = self.clone();
        debug!(guild = %self.guild(), delay_ms = delay.as_millis() as u64, "disconnect scheduled");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            player.perform_disconnect().await;
        });
        self.session.set_disconnect_timer(Some(handle));
    }

    /// Leave the voice channel: flush stats, persist, stop the mixer
    pub(super) async fn perform_disconnect(&self) {
        let guild = self.guild();
        info!(guild = %guild, "disconnecting from voice");

        self.credit_listening().await;
        if let Err(e) = self.session.stats.flush().await {
            warn!(guild = %guild, error = %e, "stats flush failed on disconnect");
        }

        {
            let mut state = self.session.state.write().await;
            state.intentional_kill = true;
            state.song_start_time = None;
            state.is_paused = false;
            state.pause_start = None;
        }
        self.stop_mixer().await;
        {
            let mut state = self.session.state.write().await;
            state.clear_decks();
        }

        if let Err(e) = self.session.persist().await {
            warn!(guild = %guild, error = %e, "persist failed on disconnect");
        }
        if let Err(e) = self.gateway.disconnect(guild).await {
            warn!(guild = %guild, error = %e, "gateway disconnect failed");
        }
        self.reset_crash_attempts().await;
        self.session.emit_dashboard_refresh();
    }

    /// Membership and connection events from the voice gateway
    pub async fn on_voice_event(&self, event: &VoiceEvent) {
        match event {
            VoiceEvent::MemberJoined { user, .. } => {
                {
                    let mut state = self.session.state.write().await;
                    state.listeners.insert(*user);
                }
                // Someone is listening again: a pending disconnect is void.
                self.session.set_disconnect_timer(None);
                self.reconcile_membership_later();
            }
            VoiceEvent::MemberLeft { user, .. } => {
                {
                    let mut state = self.session.state.write().await;
                    state.listeners.remove(user);
                }
                self.reconcile_membership_later();
            }
            VoiceEvent::ConnectionChanged { state, .. } => match state {
                ConnectionState::Ready => {
                    debug!(guild = %self.guild(), "voice connection ready");
                }
                ConnectionState::Disconnected => {
                    debug!(guild = %self.guild(), "voice connection lost");
                }
                ConnectionState::Destroyed => {
                    warn!(guild = %self.guild(), "voice connection destroyed");
                    self.credit_listening().await;
                    {
                        let mut s = self.session.state.write().await;
                        s.intentional_kill = true;
                    }
                    self.stop_mixer().await;
                    let mut s = self.session.state.write().await;
                    s.clear_decks();
                    s.song_start_time = None;
                }
            },
            // Guild removal is handled by the registry (full teardown).
            VoiceEvent::GuildRemoved { .. } => {}
        }
    }

    /// Membership flaps settle within the reconcile window before the
    /// alone-check runs; a fresh event cancels the previous check via the
    /// disconnect-timer slot only once the bot is actually alone.
    fn reconcile_membership_later(&self) {
        let player = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(params::get::reconcile_window()).await;
            player.reconcile_membership().await;
        });
    }

    pub(super) async fn reconcile_membership(&self) {
        let guild = self.guild();
        if self.gateway.voice_channel(guild).is_none() {
            return;
        }
        if self.gateway.human_count(guild) == 0 {
            if !self.session.has_disconnect_timer() {
                info!(guild = %guild, "alone in voice channel, arming disconnect");
                self.schedule_disconnect(params::get::disconnect_timeout());
            }
        } else {
            self.session.set_disconnect_timer(None);
        }
    }

    /// Graceful teardown for shutdown or guild removal
    pub async fn teardown(&self, reason: &str) {
        let guild = self.guild();
        info!(guild = %guild, reason, "session teardown");

        self.session.clear_timers();
        self.credit_listening().await;
        if let Err(e) = self.session.stats.flush().await {
            warn!(guild = %guild, error = %e, "stats flush failed during teardown");
        }

        {
            let mut state = self.session.state.write().await;
            state.intentional_kill = true;
        }
        self.stop_mixer().await;
        self.session.commands.shutdown("guild cleanup");

        if let Err(e) = self.session.persist().await {
            error!(guild = %guild, error = %e, "persist failed during teardown");
        }
        self.emit(CoreEvent::SessionDestroyed {
            guild,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Read-only snapshot helper used by entry points
    pub(super) async fn with_state<T>(&self, f: impl FnOnce(&SessionState) -> T) -> T {
        let state = self.session.state.read().await;
        f(&state)
    }
}

/// Per-session event loop: routes mixer signals into the player, dropping
/// anything from a generation older than the session's current mixer.
async fn run_event_loop(player: Player, mut rx: mpsc::UnboundedReceiver<MixerSignal>) {
    let guild = player.guild();
    debug!(guild = %guild, "session event loop started");

    while let Some(signal) = rx.recv().await {
        match signal {
            MixerSignal::Event { generation, event } => {
                let current = player.session.state.read().await.mixer_generation;
                if generation < current {
                    debug!(guild = %guild, generation, current, ?event, "stale mixer event dropped");
                    continue;
                }
                player.handle_mixer_event(event).await;
            }
            MixerSignal::Crashed { generation, reason } => {
                player.handle_mixer_crash(generation, reason).await;
            }
        }
    }
    debug!(guild = %guild, "session event loop finished");
}
