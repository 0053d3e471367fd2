//! Queue backup store
//!
//! A single JSON file keyed by guild id holds every guild's queue, history,
//! and user toggles so playback can resume after a restart. A guild whose
//! songs and history are both empty is deleted from the file. The loaded
//! deck is deliberately not part of the persisted state: after a restart no
//! deck is loaded until playback begins.

use crate::error::{Error, Result};
use chorus_common::types::{GuildId, Song, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Wire form of one song in the backup file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSong {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    pub is_live: bool,
    pub requester: u64,
    pub duration: u32,
}

impl From<&Song> for PersistedSong {
    fn from(song: &Song) -> Self {
        Self {
            title: song.title.clone(),
            url: song.url.clone(),
            thumbnail: song.thumbnail.clone(),
            is_live: song.is_live,
            requester: song.requester_id.0,
            duration: song.duration_s,
        }
    }
}

impl From<PersistedSong> for Song {
    fn from(p: PersistedSong) -> Self {
        Song {
            title: p.title,
            url: p.url,
            thumbnail: p.thumbnail,
            is_live: p.is_live,
            duration_s: p.duration,
            requester_id: UserId(p.requester),
            // The resolver re-derives identity keys; they are not persisted.
            resolver_key: None,
        }
    }
}

/// One guild's persisted playback state
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GuildBackup {
    pub songs: Vec<PersistedSong>,
    pub history: Vec<PersistedSong>,
    pub play_index: usize,
    pub is_paused: bool,
    pub loop_enabled: bool,
    pub fade_enabled: bool,
    /// URL that was playing at save time. Never restored as loaded; only
    /// used to repopulate a synthetic last-played entry when the stored
    /// queue does not already contain it.
    pub current_deck_loaded: Option<String>,
    pub dashboard_message_id: Option<String>,
    pub text_channel_id: Option<String>,
}

impl GuildBackup {
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty() && self.history.is_empty()
    }
}

/// File-backed queue store; one instance shared by all sessions
pub struct QueueStore {
    path: PathBuf,
    /// Serializes the read-modify-write cycles across sessions
    io: Mutex<()>,
}

impl QueueStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            io: Mutex::new(()),
        }
    }

    /// Read the whole backup file; a missing file is an empty map
    pub async fn load_all(&self) -> Result<BTreeMap<GuildId, GuildBackup>> {
        let _io = self.io.lock().await;
        self.read_file().await
    }

    /// Load one guild's backup, if present
    pub async fn load_guild(&self, guild: GuildId) -> Result<Option<GuildBackup>> {
        let _io = self.io.lock().await;
        let mut all = self.read_file().await?;
        Ok(all.remove(&guild))
    }

    /// Write one guild's backup (or delete its entry when empty)
    pub async fn save_guild(&self, guild: GuildId, backup: GuildBackup) -> Result<()> {
        let _io = self.io.lock().await;
        let mut all = self.read_file().await?;
        if backup.is_empty() {
            all.remove(&guild);
        } else {
            all.insert(guild, backup);
        }
        self.write_file(&all).await
    }

    /// Remove a guild's entry entirely
    pub async fn remove_guild(&self, guild: GuildId) -> Result<()> {
        let _io = self.io.lock().await;
        let mut all = self.read_file().await?;
        if all.remove(&guild).is_some() {
            self.write_file(&all).await?;
        }
        Ok(())
    }

    async fn read_file(&self) -> Result<BTreeMap<GuildId, GuildBackup>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "reading {}: {e}",
                    self.path.display()
                )))
            }
        };

        // Keys are guild-id strings in the file.
        let raw: BTreeMap<String, GuildBackup> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Persistence(format!("parsing {}: {e}", self.path.display())))?;

        let mut map = BTreeMap::new();
        for (key, backup) in raw {
            match key.parse::<u64>() {
                Ok(id) => {
                    map.insert(GuildId(id), backup);
                }
                Err(_) => warn!(key = %key, "skipping backup entry with invalid guild id"),
            }
        }
        Ok(map)
    }

    async fn write_file(&self, all: &BTreeMap<GuildId, GuildBackup>) -> Result<()> {
        let raw: BTreeMap<String, &GuildBackup> =
            all.iter().map(|(id, b)| (id.to_string(), b)).collect();
        let bytes = serde_json::to_vec_pretty(&raw)
            .map_err(|e| Error::Persistence(format!("encoding queue backup: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::Persistence(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Persistence(format!("replacing {}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), guilds = all.len(), "queue backup written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_backup() -> GuildBackup {
        GuildBackup {
            songs: vec![PersistedSong {
                title: "First".into(),
                url: "https://example.test/1".into(),
                thumbnail: Some("https://example.test/1.jpg".into()),
                is_live: false,
                requester: 42,
                duration: 200,
            }],
            history: vec![],
            play_index: 0,
            is_paused: false,
            loop_enabled: true,
            fade_enabled: true,
            current_deck_loaded: Some("https://example.test/1".into()),
            dashboard_message_id: Some("9000".into()),
            text_channel_id: Some("9001".into()),
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queues.json"));

        store.save_guild(GuildId(1), sample_backup()).await.unwrap();
        let loaded = store.load_guild(GuildId(1)).await.unwrap().unwrap();
        assert_eq!(loaded, sample_backup());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queues.json"));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_backup_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queues.json"));

        store.save_guild(GuildId(1), sample_backup()).await.unwrap();
        store
            .save_guild(GuildId(1), GuildBackup::default())
            .await
            .unwrap();
        assert!(store.load_guild(GuildId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_guild_keys_are_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queues.json");
        let store = QueueStore::new(path.clone());

        store
            .save_guild(GuildId(123456789), sample_backup())
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(raw.get("123456789").is_some());
        assert_eq!(raw["123456789"]["playIndex"], 0);
        assert_eq!(raw["123456789"]["songs"][0]["isLive"], false);
        assert_eq!(raw["123456789"]["currentDeckLoaded"], "https://example.test/1");
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queues.json"));

        store.save_guild(GuildId(1), sample_backup()).await.unwrap();
        let mut other = sample_backup();
        other.play_index = 0;
        other.songs[0].title = "Other".into();
        store.save_guild(GuildId(2), other).await.unwrap();

        store.remove_guild(GuildId(1)).await.unwrap();
        assert!(store.load_guild(GuildId(1)).await.unwrap().is_none());
        assert!(store.load_guild(GuildId(2)).await.unwrap().is_some());
    }
}
