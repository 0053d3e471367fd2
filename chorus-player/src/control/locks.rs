//! Named exclusive locks with hard expiry
//!
//! Skip transitions hold `skip_<guild>` across several await points; the
//! expiry guarantees a crashed holder cannot wedge the session. A lock whose
//! expiry has passed counts as free and may be taken over.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

struct LockEntry {
    holder: u64,
    acquired_at: Instant,
    expires_at: Instant,
}

#[derive(Default)]
struct LockTable {
    entries: Mutex<HashMap<String, LockEntry>>,
    next_holder: AtomicU64,
}

/// Per-session named lock registry
#[derive(Clone, Default)]
pub struct NamedLocks {
    table: Arc<LockTable>,
}

/// Handle to a held lock; released on drop
pub struct LockGuard {
    table: Arc<LockTable>,
    name: String,
    holder: u64,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `name` if it is free or its previous holder expired; otherwise
    /// returns `None` immediately.
    pub fn try_acquire(&self, name: &str, expiry: Duration) -> Option<LockGuard> {
        let now = Instant::now();
        let mut entries = self.table.entries.lock().ok()?;

        if let Some(existing) = entries.get(name) {
            if existing.expires_at > now {
                return None;
            }
            warn!(
                lock = name,
                held_for_ms = now.duration_since(existing.acquired_at).as_millis() as u64,
                "taking over expired lock"
            );
        }

        let holder = self.table.next_holder.fetch_add(1, Ordering::Relaxed) + 1;
        entries.insert(
            name.to_string(),
            LockEntry {
                holder,
                acquired_at: now,
                expires_at: now + expiry,
            },
        );
        Some(LockGuard {
            table: self.table.clone(),
            name: name.to_string(),
            holder,
        })
    }

    /// Whether `name` is currently held (and not expired)
    pub fn has_active_lock(&self, name: &str) -> bool {
        let now = Instant::now();
        self.table
            .entries
            .lock()
            .map(|entries| {
                entries
                    .get(name)
                    .map(|e| e.expires_at > now)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Ok(mut entries) = self.table.entries.lock() {
            // Only remove the entry if we still own it; an expired lock may
            // have been taken over by a newer holder.
            if entries.get(&self.name).map(|e| e.holder) == Some(self.holder) {
                entries.remove(&self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_while_held() {
        let locks = NamedLocks::new();
        let guard = locks.try_acquire("skip_1", Duration::from_secs(30));
        assert!(guard.is_some());
        assert!(locks.has_active_lock("skip_1"));

        // A second acquisition fails while the first is held
        assert!(locks.try_acquire("skip_1", Duration::from_secs(30)).is_none());

        // Unrelated names are independent
        assert!(locks.try_acquire("skip_2", Duration::from_secs(30)).is_some());
    }

    #[test]
    fn test_released_on_drop() {
        let locks = NamedLocks::new();
        {
            let _guard = locks.try_acquire("skip_1", Duration::from_secs(30)).unwrap();
            assert!(locks.has_active_lock("skip_1"));
        }
        assert!(!locks.has_active_lock("skip_1"));
        assert!(locks.try_acquire("skip_1", Duration::from_secs(30)).is_some());
    }

    #[test]
    fn test_expired_lock_can_be_taken_over() {
        let locks = NamedLocks::new();
        let stale = locks
            .try_acquire("skip_1", Duration::from_millis(0))
            .unwrap();

        // Expiry already passed: not active, and a new holder may take it.
        assert!(!locks.has_active_lock("skip_1"));
        let fresh = locks.try_acquire("skip_1", Duration::from_secs(30));
        assert!(fresh.is_some());

        // The stale guard's drop must not release the new holder's lock.
        drop(stale);
        assert!(locks.has_active_lock("skip_1"));
        drop(fresh);
        assert!(!locks.has_active_lock("skip_1"));
    }
}
