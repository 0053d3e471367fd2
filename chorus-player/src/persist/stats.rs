//! Listening-time and playback statistics
//!
//! Counters are buffered in memory and flushed to a JSON file on song
//! transitions, voice disconnects, and shutdown. Listening time below the
//! minimum play-time threshold is treated as noise and not credited.

use crate::error::{Error, Result};
use chorus_common::types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

/// Per-user counters
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub listening_time_ms: u64,
    pub server_playlist_adds: u64,
    pub personal_playlist_adds: u64,
}

/// Process-wide playback counters
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub songs_started: u64,
    pub songs_completed: u64,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct StatsFile {
    users: BTreeMap<String, UserStats>,
    global: GlobalStats,
    #[serde(rename = "lastUpdated")]
    last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

/// File-backed statistics store; one instance shared by all sessions
pub struct StatsStore {
    path: PathBuf,
    inner: Mutex<StatsFile>,
}

impl StatsStore {
    /// Open the store, loading existing counters when the file exists
    pub async fn open(path: PathBuf) -> Result<StatsStore> {
        let file = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Persistence(format!("parsing {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatsFile::default(),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "reading {}: {e}",
                    path.display()
                )))
            }
        };
        Ok(StatsStore {
            path,
            inner: Mutex::new(file),
        })
    }

    pub async fn song_started(&self) {
        self.inner.lock().await.global.songs_started += 1;
    }

    pub async fn song_completed(&self) {
        self.inner.lock().await.global.songs_completed += 1;
    }

    /// Credit listening time to each of the given users
    pub async fn add_listening_ms(&self, users: &[UserId], ms: u64) {
        if ms == 0 || users.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        for user in users {
            inner
                .users
                .entry(user.to_string())
                .or_default()
                .listening_time_ms += ms;
        }
    }

    pub async fn add_playlist_add(&self, user: UserId, personal: bool) {
        let mut inner = self.inner.lock().await;
        let entry = inner.users.entry(user.to_string()).or_default();
        if personal {
            entry.personal_playlist_adds += 1;
        } else {
            entry.server_playlist_adds += 1;
        }
    }

    pub async fn global(&self) -> GlobalStats {
        self.inner.lock().await.global.clone()
    }

    pub async fn user(&self, user: UserId) -> UserStats {
        self.inner
            .lock()
            .await
            .users
            .get(&user.to_string())
            .cloned()
            .unwrap_or_default()
    }

    /// Write the buffered counters to disk
    pub async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.last_updated = Some(chrono::Utc::now());
        let bytes = serde_json::to_vec_pretty(&*inner)
            .map_err(|e| Error::Persistence(format!("encoding stats: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::Persistence(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Persistence(format!("replacing {}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), "stats flushed");
        Ok(())
    }
}
