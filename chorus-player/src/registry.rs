//! Session registry
//!
//! Owning container of all guild sessions. Each session has its own
//! coordinators and event loop; there is no mutable state shared across
//! guilds. Sessions are created on first interaction (restoring any backup),
//! destroyed when the gateway reports the bot left the guild, and all
//! snapshotted on graceful shutdown.

use crate::error::Result;
use crate::mixer::MixerFactory;
use crate::persist::{QueueStore, StatsStore};
use crate::player::Player;
use crate::session::{Session, SessionState};
use crate::voice::{VoiceEvent, VoiceGateway};
use chorus_common::events::EventBus;
use chorus_common::types::GuildId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct SessionRegistry {
    players: RwLock<HashMap<GuildId, Player>>,
    bus: Arc<EventBus>,
    store: Arc<QueueStore>,
    stats: Arc<StatsStore>,
    gateway: Arc<dyn VoiceGateway>,
    factory: Arc<dyn MixerFactory>,
}

impl SessionRegistry {
    pub fn new(
        bus: Arc<EventBus>,
        store: Arc<QueueStore>,
        stats: Arc<StatsStore>,
        gateway: Arc<dyn VoiceGateway>,
        factory: Arc<dyn MixerFactory>,
    ) -> Self {
        Self {
            players: RwLock::new(HashMap::new()),
            bus,
            store,
            stats,
            gateway,
            factory,
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Existing session for the guild, if any
    pub async fn get(&self, guild: GuildId) -> Option<Player> {
        self.players.read().await.get(&guild).cloned()
    }

    /// Session for the guild, creating (and restoring) one on first use
    pub async fn get_or_create(&self, guild: GuildId) -> Result<Player> {
        if let Some(player) = self.get(guild).await {
            return Ok(player);
        }

        let mut players = self.players.write().await;
        // Raced creation: someone else may have inserted while we waited.
        if let Some(player) = players.get(&guild) {
            return Ok(player.clone());
        }

        let state = match self.store.load_guild(guild).await {
            Ok(Some(backup)) => {
                debug!(guild = %guild, "restoring session from backup");
                SessionState::restore(backup)
            }
            Ok(None) => SessionState::default(),
            Err(e) => {
                warn!(guild = %guild, error = %e, "backup unreadable, starting fresh");
                SessionState::default()
            }
        };

        let (session, signal_rx) = Session::new(
            guild,
            state,
            self.bus.clone(),
            self.store.clone(),
            self.stats.clone(),
        );
        let player = Player::new(session, self.gateway.clone(), self.factory.clone());
        player.start(signal_rx);
        players.insert(guild, player.clone());
        info!(guild = %guild, "session created");
        Ok(player)
    }

    /// Pre-create sessions for every guild with a backup entry, so restored
    /// queues show up on dashboards before anyone interacts.
    pub async fn restore_all(&self) -> Result<usize> {
        let backups = self.store.load_all().await?;
        let count = backups.len();
        for guild in backups.keys() {
            self.get_or_create(*guild).await?;
        }
        if count > 0 {
            info!(sessions = count, "restored sessions from backup");
        }
        Ok(count)
    }

    /// Route a gateway event to the owning session
    pub async fn handle_voice_event(&self, event: VoiceEvent) {
        match event {
            VoiceEvent::GuildRemoved { guild } => {
                if let Err(e) = self.destroy(guild).await {
                    warn!(guild = %guild, error = %e, "session destroy failed");
                }
            }
            VoiceEvent::MemberJoined { guild, .. }
            | VoiceEvent::MemberLeft { guild, .. }
            | VoiceEvent::ConnectionChanged { guild, .. } => {
                if let Some(player) = self.get(guild).await {
                    player.on_voice_event(&event).await;
                }
            }
        }
    }

    /// Full teardown for a guild the bot no longer belongs to
    pub async fn destroy(&self, guild: GuildId) -> Result<()> {
        let player = self.players.write().await.remove(&guild);
        let Some(player) = player else {
            return Ok(());
        };
        player.teardown("guild gone").await;
        // The bot cannot resume in a guild it left; drop the backup too.
        self.store.remove_guild(guild).await?;
        Ok(())
    }

    /// Graceful shutdown: snapshot every queue, flush stats, stop mixers
    pub async fn shutdown_all(&self) {
        let players: Vec<Player> = {
            let mut map = self.players.write().await;
            map.drain().map(|(_, p)| p).collect()
        };
        info!(sessions = players.len(), "shutting down all sessions");
        for player in players {
            player.teardown("shutdown").await;
        }
        if let Err(e) = self.stats.flush().await {
            warn!(error = %e, "final stats flush failed");
        }
    }
}
