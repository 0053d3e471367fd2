//! Queue mutations
//!
//! Every operation takes the session write lock, bumps the state version,
//! and persists synchronously before reporting success. Persistence failures
//! roll the mutation back from a snapshot taken up front.

use super::core::Player;
use crate::error::{Error, Result};
use chorus_common::events::CoreEvent;
use chorus_common::params;
use chorus_common::types::{DeckId, Song};
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Read-only queue snapshot for dashboards and command handlers
#[derive(Debug, Clone)]
pub struct QueueView {
    pub songs: Vec<Song>,
    pub play_index: usize,
    pub is_paused: bool,
    pub loop_enabled: bool,
    pub fade_enabled: bool,
    pub current_deck: DeckId,
    pub now_playing: Option<Song>,
}

/// Rollback snapshot of the fields queue operations touch
struct QueueSnapshot {
    songs: Vec<Song>,
    play_index: usize,
    history: VecDeque<Song>,
    next_deck_loaded: Option<String>,
    next_deck_target: Option<DeckId>,
}

impl Player {
    pub async fn queue_view(&self) -> QueueView {
        let state = self.session.state.read().await;
        QueueView {
            songs: state.songs.clone(),
            play_index: state.play_index,
            is_paused: state.is_paused,
            loop_enabled: state.loop_enabled,
            fade_enabled: state.fade_enabled,
            current_deck: state.current_deck,
            now_playing: state
                .current_deck_loaded
                .is_some()
                .then(|| state.current_song().cloned())
                .flatten(),
        }
    }

    /// Append songs to the queue.
    ///
    /// A queue in the finished state (no loaded deck, only the historical
    /// last track retained) is cleared first so new songs start fresh.
    pub async fn enqueue(&self, songs: Vec<Song>) -> Result<()> {
        if songs.is_empty() {
            return Ok(());
        }
        self.ensure_no_transition()?;
        let snapshot = self.queue_snapshot().await;
        let added = songs.len();

        {
            let mut state = self.session.state.write().await;

            let finished_state = state.current_deck_loaded.is_none()
                && state.songs.len() == 1
                && state
                    .history
                    .back()
                    .map(|last| last.same_track(&state.songs[0]))
                    .unwrap_or(false);
            if finished_state {
                debug!(guild = %self.guild(), "clearing finished queue before enqueue");
                state.songs.clear();
                state.play_index = 0;
                state.clear_preload();
            }

            let max = params::get::max_queue_size();
            if state.songs.len() + added > max {
                return Err(Error::Queue(format!(
                    "queue full: {} + {added} exceeds {max}",
                    state.songs.len()
                )));
            }
            state.songs.extend(songs);
        }

        self.persist_or_rollback(snapshot).await?;
        self.session.version.bump("enqueue", format!("added={added}"));
        self.emit_queue_changed().await;
        Ok(())
    }

    /// Insert a song at `index` (`0 ≤ index ≤ len`), shifting the playing
    /// index when the insertion lands at or before it.
    pub async fn insert_at(&self, song: Song, index: usize) -> Result<()> {
        self.ensure_no_transition()?;
        let snapshot = self.queue_snapshot().await;

        {
            let mut state = self.session.state.write().await;
            if index > state.songs.len() {
                return Err(Error::Queue(format!(
                    "insert index {index} out of bounds (len {})",
                    state.songs.len()
                )));
            }
            if state.songs.len() + 1 > params::get::max_queue_size() {
                return Err(Error::Queue("queue full".into()));
            }

            let was_empty = state.songs.is_empty();
            state.songs.insert(index, song);
            if !was_empty && index <= state.play_index {
                state.play_index += 1;
            }
        }

        self.persist_or_rollback(snapshot).await?;
        self.session.version.bump("insert_at", format!("index={index}"));
        self.emit_queue_changed().await;
        Ok(())
    }

    /// Remove the song at `index`, keeping the playing index pointed at the
    /// same song where possible and invalidating a preload of the removed
    /// track.
    pub async fn remove_at(&self, index: usize) -> Result<Song> {
        self.ensure_no_transition()?;
        let snapshot = self.queue_snapshot().await;

        let removed = {
            let mut state = self.session.state.write().await;
            if index >= state.songs.len() {
                return Err(Error::Queue(format!(
                    "remove index {index} out of bounds (len {})",
                    state.songs.len()
                )));
            }

            let removed = state.songs.remove(index);
            if index < state.play_index {
                state.play_index -= 1;
            } else if index == state.play_index && !state.songs.is_empty() {
                state.play_index = state.play_index.min(state.songs.len() - 1);
            } else if state.songs.is_empty() {
                state.play_index = 0;
            }

            if state.next_deck_loaded.as_deref() == Some(removed.url.as_str()) {
                debug!(guild = %self.guild(), url = %removed.url, "removed song invalidates preload");
                if let Some(target) = state.next_deck_target {
                    state.buffer_ready[target.index()] = false;
                }
                state.clear_preload();
            }
            removed
        };

        self.persist_or_rollback(snapshot).await?;
        self.session
            .version
            .bump("remove_at", format!("index={index}, url={}", removed.url));
        self.emit_queue_changed().await;
        Ok(removed)
    }

    /// Shuffle the not-yet-played tail of the queue (everything after the
    /// playing index), Fisher-Yates, invalidating any preload.
    ///
    /// Public entry point; serialized by the barrier.
    pub async fn shuffle(&self) -> Result<()> {
        let player = self.clone();
        self.session
            .barrier
            .run("shuffle", async move { player.shuffle_upcoming().await })
            .await
    }

    pub(super) async fn shuffle_upcoming(&self) -> Result<()> {
        self.ensure_no_transition()?;
        let snapshot = self.queue_snapshot().await;

        {
            let mut state = self.session.state.write().await;
            let first_upcoming = state.play_index + 1;
            if first_upcoming >= state.songs.len() {
                return Ok(());
            }
            state.songs[first_upcoming..].shuffle(&mut rand::thread_rng());
            if let Some(target) = state.next_deck_target {
                state.buffer_ready[target.index()] = false;
            }
            state.clear_preload();
        }

        self.persist_or_rollback(snapshot).await?;
        self.session.version.bump("shuffle", "");
        info!(guild = %self.guild(), "upcoming queue shuffled");
        self.emit_queue_changed().await;
        Ok(())
    }

    /// Drop everything except the currently playing song
    pub async fn clear_queue_except_current(&self) -> Result<()> {
        self.ensure_no_transition()?;
        let snapshot = self.queue_snapshot().await;

        {
            let mut state = self.session.state.write().await;
            let current = state.current_song().cloned();
            state.songs = current.into_iter().collect();
            state.play_index = 0;
            state.clear_preload();
        }

        self.persist_or_rollback(snapshot).await?;
        self.session.version.bump("clear_queue", "");
        self.emit_queue_changed().await;
        Ok(())
    }

    async fn queue_snapshot(&self) -> QueueSnapshot {
        let state = self.session.state.read().await;
        QueueSnapshot {
            songs: state.songs.clone(),
            play_index: state.play_index,
            history: state.history.clone(),
            next_deck_loaded: state.next_deck_loaded.clone(),
            next_deck_target: state.next_deck_target,
        }
    }

    /// Persist the mutated state; restore the snapshot when the save fails
    async fn persist_or_rollback(&self, snapshot: QueueSnapshot) -> Result<()> {
        match self.session.persist().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(guild = %self.guild(), error = %e, "persist failed, rolling back queue mutation");
                let mut state = self.session.state.write().await;
                state.songs = snapshot.songs;
                state.play_index = snapshot.play_index;
                state.history = snapshot.history;
                state.next_deck_loaded = snapshot.next_deck_loaded;
                state.next_deck_target = snapshot.next_deck_target;
                Err(e)
            }
        }
    }

    async fn emit_queue_changed(&self) {
        let len = self.session.state.read().await.songs.len();
        self.emit(CoreEvent::QueueChanged {
            guild: self.guild(),
            len,
            timestamp: chrono::Utc::now(),
        });
        self.session.emit_dashboard_refresh();
    }
}
