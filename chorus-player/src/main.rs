//! Chorus Player (chorus-player)
//!
//! Playback-core service: restores persisted guild queues, owns mixer
//! sidecars, and serializes playback operations. The chat/voice gateway
//! embeds this crate and supplies the `VoiceGateway` implementation; run
//! standalone, the service restores sessions and persists them again on
//! shutdown.

use async_trait::async_trait;
use chorus_common::events::EventBus;
use chorus_common::types::GuildId;
use chorus_player::config::PlayerConfig;
use chorus_player::mixer::{MixerConfig, PcmStream, ProcessMixerFactory};
use chorus_player::persist::{QueueStore, StatsStore};
use chorus_player::voice::{ConnectionState, VoiceGateway};
use chorus_player::SessionRegistry;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Chorus Player - dual-deck playback core service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data folder path (overrides environment variable and default)
    #[arg(short, long, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Mixer sidecar binary path (overrides CHORUS_MIXER_BIN)
    #[arg(short, long, value_name = "FILE")]
    mixer_binary: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Gateway placeholder used when the service runs standalone. The real
/// client replaces this when it embeds the library; until then there is no
/// voice connection, so playback cannot start and restored sessions stay
/// parked.
struct DetachedGateway;

#[async_trait]
impl VoiceGateway for DetachedGateway {
    async fn attach_pcm(&self, _guild: GuildId, _stream: PcmStream) -> chorus_player::Result<()> {
        Err(chorus_player::Error::InvalidState(
            "no voice gateway attached".into(),
        ))
    }

    async fn pause_player(&self, _guild: GuildId) -> chorus_player::Result<()> {
        Ok(())
    }

    async fn resume_player(&self, _guild: GuildId) -> chorus_player::Result<()> {
        Ok(())
    }

    async fn connect(&self, _guild: GuildId) -> chorus_player::Result<()> {
        Err(chorus_player::Error::InvalidState(
            "no voice gateway attached".into(),
        ))
    }

    async fn disconnect(&self, _guild: GuildId) -> chorus_player::Result<()> {
        Ok(())
    }

    fn connection_state(&self, _guild: GuildId) -> ConnectionState {
        ConnectionState::Disconnected
    }

    fn voice_channel(&self, _guild: GuildId) -> Option<u64> {
        None
    }

    fn human_count(&self, _guild: GuildId) -> usize {
        0
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("chorus_player={log_level},chorus_common={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Chorus Player starting...");

    let config = PlayerConfig::resolve(
        args.data_dir.as_deref().and_then(|p| p.to_str()),
        args.mixer_binary.as_deref().and_then(|p| p.to_str()),
    )?;
    info!("Data folder: {}", config.data_dir.display());
    info!("Mixer binary: {}", config.mixer_binary.display());

    let bus = Arc::new(EventBus::new(256));
    let store = Arc::new(QueueStore::new(config.queue_backup_path()));
    let stats = Arc::new(StatsStore::open(config.stats_path()).await?);
    let factory = Arc::new(ProcessMixerFactory::new(MixerConfig {
        binary: config.mixer_binary.clone(),
        args: config.mixer_args.clone(),
    }));

    let registry = Arc::new(SessionRegistry::new(
        bus,
        store,
        stats,
        Arc::new(DetachedGateway),
        factory,
    ));

    match registry.restore_all().await {
        Ok(count) => info!("Restored {count} guild sessions"),
        Err(e) => warn!("Session restore failed: {e}"),
    }

    info!("Ready; waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    registry.shutdown_all().await;
    info!("Goodbye");
    Ok(())
}
