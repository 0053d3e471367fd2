//! Voice gateway seam and membership events
//!
//! The chat/voice gateway is an external collaborator: it joins channels,
//! feeds PCM frames to participants, and reports membership changes. The
//! playback core only depends on this trait, so tests (and alternative
//! gateways) can stand in for the real client.

use crate::error::Result;
use crate::mixer::PcmStream;
use async_trait::async_trait;
use chorus_common::types::{GuildId, UserId};

/// Voice connection lifecycle as the gateway reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Ready,
    Disconnected,
    Destroyed,
}

/// Membership and connection events the core consumes from the gateway
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// A human member joined the bot's voice channel
    MemberJoined { guild: GuildId, user: UserId },
    /// A human member left the bot's voice channel
    MemberLeft { guild: GuildId, user: UserId },
    /// The bot's voice connection changed state
    ConnectionChanged {
        guild: GuildId,
        state: ConnectionState,
    },
    /// The bot was removed from the guild entirely
    GuildRemoved { guild: GuildId },
}

/// Operations the playback core needs from the voice gateway
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Hand the mixed PCM stream to the voice sender for this guild
    async fn attach_pcm(&self, guild: GuildId, stream: PcmStream) -> Result<()>;

    /// Pause the guild's voice player (audio stops being sent)
    async fn pause_player(&self, guild: GuildId) -> Result<()>;

    /// Resume the guild's voice player
    async fn resume_player(&self, guild: GuildId) -> Result<()>;

    /// Join the voice channel playback should happen in
    async fn connect(&self, guild: GuildId) -> Result<()>;

    /// Leave the guild's voice channel
    async fn disconnect(&self, guild: GuildId) -> Result<()>;

    /// Current connection state for the guild
    fn connection_state(&self, guild: GuildId) -> ConnectionState;

    /// Voice channel the bot occupies, if any
    fn voice_channel(&self, guild: GuildId) -> Option<u64>;

    /// Human (non-bot) members sharing the bot's voice channel
    fn human_count(&self, guild: GuildId) -> usize;
}
