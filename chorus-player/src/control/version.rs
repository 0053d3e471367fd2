//! Session state versioning
//!
//! Every committed mutation bumps a monotonic version with a tag and a small
//! details record; readers use the version to detect stale snapshots. The
//! last 50 entries are retained for debugging.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Entries retained for debugging
const HISTORY_LIMIT: usize = 50;

/// One committed mutation
#[derive(Debug, Clone)]
pub struct VersionEntry {
    pub version: u64,
    pub tag: String,
    pub details: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Monotonic per-session state version
#[derive(Default)]
pub struct StateVersion {
    current: AtomicU64,
    history: Mutex<VecDeque<VersionEntry>>,
}

impl StateVersion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Record one acknowledged mutation; returns the new version
    pub fn bump(&self, tag: &str, details: impl Into<String>) -> u64 {
        let version = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        if let Ok(mut history) = self.history.lock() {
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(VersionEntry {
                version,
                tag: tag.to_string(),
                details: details.into(),
                at: chrono::Utc::now(),
            });
        }
        version
    }

    /// Most-recent-first copy of the retained history
    pub fn history(&self) -> Vec<VersionEntry> {
        self.history
            .lock()
            .map(|h| h.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}
