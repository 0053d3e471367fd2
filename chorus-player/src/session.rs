//! Per-guild playback session
//!
//! The `Session` is the single mutable shared state for one guild: the queue,
//! deck assignment, user toggles, and the coordinators that serialize access
//! to it (barrier, command queue, named locks, state version). All mutations
//! happen on the session's own tasks under those coordinators; readers
//! snapshot the fields they need and use the version to detect staleness.

use crate::control::{AudioOperationBarrier, NamedLocks, StateVersion};
use crate::error::Result;
use crate::mixer::{CommandQueue, MixerLink, MixerSignal, MixerSlot};
use crate::persist::{GuildBackup, PersistedSong, QueueStore, StatsStore};
use chorus_common::events::{CoreEvent, EventBus};
use chorus_common::params;
use chorus_common::types::{DeckId, GuildId, Song, UserId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Mutable playback state of one guild
pub struct SessionState {
    /// Ordered queue; immutable while a skip transition is in flight
    pub songs: Vec<Song>,
    /// Index of the currently playing song; mutated only at transition commit
    pub play_index: usize,
    /// Recently played songs, most recent last, bounded
    pub history: VecDeque<Song>,

    pub current_deck: DeckId,
    /// URL currently playing on `current_deck`, if any
    pub current_deck_loaded: Option<String>,
    /// URL and deck of the preloaded song, if any
    pub next_deck_loaded: Option<String>,
    pub next_deck_target: Option<DeckId>,
    /// Cleared at `load`, set by the sidecar's `buffer_ready`
    pub buffer_ready: [bool; 2],

    pub is_paused: bool,
    pub loop_enabled: bool,
    pub fade_enabled: bool,

    /// Gates conflicting operations while a crossfade runs
    pub is_crossfading: bool,
    pub crossfade_start: Option<Instant>,

    pub song_start_time: Option<Instant>,
    pub pause_start: Option<Instant>,

    /// State came from persistence and no mixer exists yet
    pub session_restored: bool,
    /// Suppresses crash recovery when the core itself kills the mixer
    pub intentional_kill: bool,
    /// Generation of the current mixer instance; late events from an older
    /// instance are dropped
    pub mixer_generation: u64,

    pub last_transition: Option<Instant>,
    pub last_skip_attempt: Option<Instant>,
    pub last_mixer_start: Option<Instant>,
    pub crash_recovery_attempts: u32,

    /// Stream-error strike counters per URL
    pub stream_error_strikes: HashMap<String, u32>,
    /// URLs marked unplayable after repeated stream errors
    pub failed_urls: HashSet<String>,

    /// Human members currently in the voice channel
    pub listeners: HashSet<UserId>,

    pub dashboard_message_id: Option<String>,
    pub text_channel_id: Option<String>,
    /// Transient "loading…" footer shown on the dashboard
    pub loading_footer: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            songs: Vec::new(),
            play_index: 0,
            history: VecDeque::new(),
            current_deck: DeckId::A,
            current_deck_loaded: None,
            next_deck_loaded: None,
            next_deck_target: None,
            buffer_ready: [false, false],
            is_paused: false,
            loop_enabled: false,
            fade_enabled: false,
            is_crossfading: false,
            crossfade_start: None,
            song_start_time: None,
            pause_start: None,
            session_restored: false,
            intentional_kill: false,
            mixer_generation: 0,
            last_transition: None,
            last_skip_attempt: None,
            last_mixer_start: None,
            crash_recovery_attempts: 0,
            stream_error_strikes: HashMap::new(),
            failed_urls: HashSet::new(),
            listeners: HashSet::new(),
            dashboard_message_id: None,
            text_channel_id: None,
            loading_footer: None,
        }
    }
}

impl SessionState {
    pub fn current_song(&self) -> Option<&Song> {
        self.songs.get(self.play_index)
    }

    pub fn next_song(&self) -> Option<&Song> {
        self.songs.get(self.play_index + 1)
    }

    pub fn other_deck(&self) -> DeckId {
        self.current_deck.other()
    }

    /// A crossfade is running, or finished too recently for a new transition
    /// or preload to start
    pub fn crossfade_active(&self) -> bool {
        if self.is_crossfading {
            return true;
        }
        match self.crossfade_start {
            Some(start) => start.elapsed() < params::get::crossfade(),
            None => false,
        }
    }

    /// Forget any preloaded song
    pub fn clear_preload(&mut self) {
        self.next_deck_loaded = None;
        self.next_deck_target = None;
    }

    /// Forget everything about loaded decks (mixer gone)
    pub fn clear_decks(&mut self) {
        self.current_deck_loaded = None;
        self.clear_preload();
        self.buffer_ready = [false, false];
        self.is_crossfading = false;
        self.crossfade_start = None;
    }

    /// Record the current song into bounded history
    pub fn push_history(&mut self, song: Song) {
        let limit = params::get::history_limit();
        while self.history.len() >= limit {
            self.history.pop_front();
        }
        self.history.push_back(song);
    }

    /// Snapshot for the queue backup file
    pub fn backup(&self) -> GuildBackup {
        GuildBackup {
            songs: self.songs.iter().map(PersistedSong::from).collect(),
            history: self.history.iter().map(PersistedSong::from).collect(),
            play_index: self.play_index,
            is_paused: self.is_paused,
            loop_enabled: self.loop_enabled,
            fade_enabled: self.fade_enabled,
            current_deck_loaded: self.current_deck_loaded.clone(),
            dashboard_message_id: self.dashboard_message_id.clone(),
            text_channel_id: self.text_channel_id.clone(),
        }
    }

    /// Rebuild state from a backup.
    ///
    /// The loaded deck is never restored: `current_deck_loaded` from the file
    /// only repopulates a synthetic last-played entry when the stored queue
    /// is empty and history still knows the track.
    pub fn restore(backup: GuildBackup) -> SessionState {
        let mut state = SessionState {
            songs: backup.songs.into_iter().map(Song::from).collect(),
            history: backup.history.into_iter().map(Song::from).collect(),
            is_paused: backup.is_paused,
            loop_enabled: backup.loop_enabled,
            fade_enabled: backup.fade_enabled,
            dashboard_message_id: backup.dashboard_message_id,
            text_channel_id: backup.text_channel_id,
            session_restored: true,
            ..SessionState::default()
        };

        if state.songs.is_empty() {
            if let Some(url) = backup.current_deck_loaded {
                if let Some(last) = state.history.iter().rev().find(|s| s.url == url) {
                    state.songs.push(last.clone());
                }
            }
        }

        state.play_index = backup.play_index.min(state.songs.len().saturating_sub(1));
        state
    }
}

/// One guild's session: state plus its coordinators
pub struct Session {
    pub guild: GuildId,
    pub state: RwLock<SessionState>,
    pub version: StateVersion,
    pub locks: NamedLocks,
    pub barrier: AudioOperationBarrier,
    pub commands: CommandQueue,
    pub mixer: Arc<MixerSlot>,
    pub bus: Arc<EventBus>,
    pub store: Arc<QueueStore>,
    pub stats: Arc<StatsStore>,

    signal_tx: mpsc::UnboundedSender<MixerSignal>,
    generation_counter: AtomicU64,
    preload_timer: StdMutex<Option<JoinHandle<()>>>,
    disconnect_timer: StdMutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Create a session and the receiving half of its mixer signal channel
    /// (consumed by the player's event loop).
    pub fn new(
        guild: GuildId,
        state: SessionState,
        bus: Arc<EventBus>,
        store: Arc<QueueStore>,
        stats: Arc<StatsStore>,
    ) -> (Arc<Session>, mpsc::UnboundedReceiver<MixerSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let mixer = Arc::new(MixerSlot::new());
        let commands = CommandQueue::new(guild, mixer.clone());
        let session = Arc::new(Session {
            guild,
            state: RwLock::new(state),
            version: StateVersion::new(),
            locks: NamedLocks::new(),
            barrier: AudioOperationBarrier::new(),
            commands,
            mixer,
            bus,
            store,
            stats,
            signal_tx,
            generation_counter: AtomicU64::new(0),
            preload_timer: StdMutex::new(None),
            disconnect_timer: StdMutex::new(None),
        });
        (session, signal_rx)
    }

    /// Name of this guild's skip lock
    pub fn skip_lock_name(&self) -> String {
        format!("skip_{}", self.guild)
    }

    /// Sender handed to every mixer instance this session spawns
    pub fn signal_sender(&self) -> mpsc::UnboundedSender<MixerSignal> {
        self.signal_tx.clone()
    }

    /// Allocate the generation for a new mixer instance
    pub fn next_generation(&self) -> u64 {
        self.generation_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current mixer link, if one is installed
    pub fn mixer_link(&self) -> Option<Arc<dyn MixerLink>> {
        self.mixer.current()
    }

    pub fn mixer_alive(&self) -> bool {
        self.mixer_link().map(|l| l.is_alive()).unwrap_or(false)
    }

    /// Persist the current state to the queue backup file
    pub async fn persist(&self) -> Result<()> {
        let backup = self.state.read().await.backup();
        self.store.save_guild(self.guild, backup).await
    }

    pub fn emit_dashboard_refresh(&self) {
        self.bus.emit_lossy(CoreEvent::DashboardRefresh {
            guild: self.guild,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Replace the armed preload timer, aborting the previous one
    pub fn set_preload_timer(&self, handle: Option<JoinHandle<()>>) {
        if let Ok(mut slot) = self.preload_timer.lock() {
            if let Some(old) = slot.take() {
                old.abort();
            }
            *slot = handle;
        }
    }

    /// Replace the armed disconnect timer, aborting the previous one
    pub fn set_disconnect_timer(&self, handle: Option<JoinHandle<()>>) {
        if let Ok(mut slot) = self.disconnect_timer.lock() {
            if let Some(old) = slot.take() {
                old.abort();
            }
            *slot = handle;
        }
    }

    pub fn has_disconnect_timer(&self) -> bool {
        self.disconnect_timer
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Cancel all timers (teardown, queue end)
    pub fn clear_timers(&self) {
        self.set_preload_timer(None);
        self.set_disconnect_timer(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(url: &str) -> Song {
        Song {
            title: format!("song {url}"),
            url: url.into(),
            thumbnail: None,
            is_live: false,
            duration_s: 180,
            requester_id: UserId(1),
            resolver_key: None,
        }
    }

    #[test]
    fn test_backup_restore_round_trip() {
        let mut state = SessionState::default();
        state.songs = vec![song("u1"), song("u2"), song("u3")];
        state.play_index = 1;
        state.loop_enabled = true;
        state.fade_enabled = true;
        state.current_deck_loaded = Some("u2".into());
        state.dashboard_message_id = Some("m".into());
        state.text_channel_id = Some("c".into());

        let restored = SessionState::restore(state.backup());
        assert_eq!(restored.songs.len(), 3);
        assert_eq!(restored.play_index, 1);
        assert!(restored.loop_enabled);
        assert!(restored.fade_enabled);
        assert!(restored.session_restored);
        // The loaded deck never survives a restart.
        assert!(restored.current_deck_loaded.is_none());
        assert!(restored.next_deck_loaded.is_none());
    }

    #[test]
    fn test_restore_synthesizes_last_played_from_history() {
        let mut state = SessionState::default();
        state.push_history(song("old"));
        state.push_history(song("last"));
        state.current_deck_loaded = Some("last".into());

        let restored = SessionState::restore(state.backup());
        assert_eq!(restored.songs.len(), 1);
        assert_eq!(restored.songs[0].url, "last");
        assert_eq!(restored.play_index, 0);
        assert!(restored.current_deck_loaded.is_none());
    }

    #[test]
    fn test_restore_clamps_play_index() {
        let mut state = SessionState::default();
        state.songs = vec![song("u1"), song("u2")];
        state.play_index = 1;
        let mut backup = state.backup();
        backup.play_index = 99;

        let restored = SessionState::restore(backup);
        assert_eq!(restored.play_index, 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = SessionState::default();
        let limit = params::get::history_limit();
        for i in 0..limit + 10 {
            state.push_history(song(&format!("u{i}")));
        }
        assert_eq!(state.history.len(), limit);
        assert_eq!(state.history.back().unwrap().url, format!("u{}", limit + 9));
    }

    #[test]
    fn test_crossfade_active_window() {
        let mut state = SessionState::default();
        assert!(!state.crossfade_active());

        state.is_crossfading = true;
        assert!(state.crossfade_active());

        // Recently finished crossfade still gates new transitions.
        state.is_crossfading = false;
        state.crossfade_start = Some(Instant::now());
        assert!(state.crossfade_active());

        state.crossfade_start = Some(Instant::now() - params::get::crossfade() * 2);
        assert!(!state.crossfade_active());
    }
}
