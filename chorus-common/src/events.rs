//! Event types for the chorus event system
//!
//! The playback core communicates outward through a broadcast `EventBus`:
//! one-to-many fan-out to dashboard renderers, the gateway glue, and tests.
//! Command channels (tokio::mpsc) carry request-to-single-handler traffic and
//! are private to the player crate.

use crate::types::{DeckId, GuildId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events the playback core emits so a dashboard can reflect state.
///
/// These are the externally visible state changes only; sidecar protocol
/// events stay internal to the player crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CoreEvent {
    /// Something user-visible changed; re-render the guild dashboard
    DashboardRefresh {
        guild: GuildId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A song began playing
    SongStarted {
        guild: GuildId,
        index: usize,
        title: String,
        deck: DeckId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The queue ran out; only the last-played song is retained
    QueueFinished {
        guild: GuildId,
        last_title: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue contents changed (enqueue/insert/remove/shuffle/clear)
    QueueChanged {
        guild: GuildId,
        len: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback paused or resumed
    PauseStateChanged {
        guild: GuildId,
        paused: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A crossfade between decks began
    CrossfadeStarted {
        guild: GuildId,
        to_deck: DeckId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The mixer sidecar died
    MixerCrashed {
        guild: GuildId,
        reason: String,
        will_recover: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The guild session was torn down
    SessionDestroyed {
        guild: GuildId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl CoreEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            CoreEvent::DashboardRefresh { .. } => "DashboardRefresh",
            CoreEvent::SongStarted { .. } => "SongStarted",
            CoreEvent::QueueFinished { .. } => "QueueFinished",
            CoreEvent::QueueChanged { .. } => "QueueChanged",
            CoreEvent::PauseStateChanged { .. } => "PauseStateChanged",
            CoreEvent::CrossfadeStarted { .. } => "CrossfadeStarted",
            CoreEvent::MixerCrashed { .. } => "MixerCrashed",
            CoreEvent::SessionDestroyed { .. } => "SessionDestroyed",
        }
    }

    /// The guild this event belongs to
    pub fn guild(&self) -> GuildId {
        match self {
            CoreEvent::DashboardRefresh { guild, .. }
            | CoreEvent::SongStarted { guild, .. }
            | CoreEvent::QueueFinished { guild, .. }
            | CoreEvent::QueueChanged { guild, .. }
            | CoreEvent::PauseStateChanged { guild, .. }
            | CoreEvent::CrossfadeStarted { guild, .. }
            | CoreEvent::MixerCrashed { guild, .. }
            | CoreEvent::SessionDestroyed { guild, .. } => *guild,
        }
    }
}

/// One-to-many event broadcaster backed by tokio::broadcast.
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; errors when there are no subscribers
    pub fn emit(&self, event: CoreEvent) -> std::result::Result<usize, Box<CoreEvent>> {
        self.tx
            .send(event)
            .map_err(|broadcast::error::SendError(ev)| Box::new(ev))
    }

    /// Emit an event, ignoring the no-subscribers case
    pub fn emit_lossy(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GuildId;
    use std::sync::Arc;

    fn refresh(guild: u64) -> CoreEvent {
        CoreEvent::DashboardRefresh {
            guild: GuildId(guild),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_subscribe() {
        let bus = EventBus::new(100);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_eventbus_emit_no_subscribers() {
        let bus = EventBus::new(100);
        assert!(bus.emit(refresh(1)).is_err());
    }

    #[tokio::test]
    async fn test_eventbus_emit_with_subscriber() {
        let bus = Arc::new(EventBus::new(100));
        let mut rx = bus.subscribe();

        assert!(bus.emit(refresh(7)).is_ok());

        let received = rx.recv().await.unwrap();
        match received {
            CoreEvent::DashboardRefresh { guild, .. } => assert_eq!(guild, GuildId(7)),
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eventbus_emit_lossy() {
        let bus = EventBus::new(100);
        // Should not panic even without subscribers
        bus.emit_lossy(refresh(1));
    }

    #[test]
    fn test_event_type_and_guild() {
        let ev = refresh(42);
        assert_eq!(ev.event_type(), "DashboardRefresh");
        assert_eq!(ev.guild(), GuildId(42));
    }
}
