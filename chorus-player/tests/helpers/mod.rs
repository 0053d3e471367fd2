//! Shared test fixtures: fake mixer transport, fake voice gateway, and a
//! harness that wires a Player to in-memory collaborators plus tempdir
//! backed stores.

#![allow(dead_code)]

use async_trait::async_trait;
use chorus_common::events::EventBus;
use chorus_common::types::{GuildId, Song, UserId};
use chorus_player::error::{Error, Result};
use chorus_player::mixer::{MixerCommand, MixerFactory, MixerLink, MixerSignal, PcmStream};
use chorus_player::persist::{QueueStore, StatsStore};
use chorus_player::player::Player;
use chorus_player::session::{Session, SessionState};
use chorus_player::voice::{ConnectionState, VoiceGateway};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub const GUILD: GuildId = GuildId(1001);

/// Build a test song with a distinct URL
pub fn song(url: &str) -> Song {
    Song {
        title: format!("Track {url}"),
        url: url.to_string(),
        thumbnail: None,
        is_live: false,
        duration_s: 180,
        requester_id: UserId(7),
        resolver_key: None,
    }
}

/// In-memory mixer transport: records every command and can synthesize
/// sidecar events straight into the session's signal channel.
pub struct FakeMixer {
    generation: u64,
    alive: AtomicBool,
    commands: Mutex<Vec<MixerCommand>>,
    signal_tx: mpsc::UnboundedSender<MixerSignal>,
    /// Answer every `load` with an immediate `buffer_ready` for that deck
    auto_buffer_ready: AtomicBool,
}

impl FakeMixer {
    pub fn commands(&self) -> Vec<MixerCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        self.commands().iter().map(|c| c.name()).collect()
    }

    pub fn count_command(&self, name: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.name() == name)
            .count()
    }

    pub fn set_auto_buffer_ready(&self, enabled: bool) {
        self.auto_buffer_ready.store(enabled, Ordering::SeqCst);
    }

    /// Inject a sidecar event as if this instance emitted it
    pub fn emit(&self, event: chorus_player::mixer::MixerEvent) {
        let _ = self.signal_tx.send(MixerSignal::Event {
            generation: self.generation,
            event,
        });
    }

    /// Simulate this instance dying with the given reason
    pub fn crash(&self, reason: chorus_common::types::CrashReason) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.signal_tx.send(MixerSignal::Crashed {
            generation: self.generation,
            reason,
        });
    }
}

#[async_trait]
impl MixerLink for FakeMixer {
    async fn send(&self, cmd: MixerCommand) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::MixerDead);
        }
        if self.auto_buffer_ready.load(Ordering::SeqCst) {
            if let MixerCommand::Load { deck, .. } = &cmd {
                self.emit(chorus_player::mixer::MixerEvent::BufferReady(*deck));
            }
        }
        self.commands.lock().unwrap().push(cmd);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    async fn stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Factory handing out `FakeMixer` instances and remembering each one
pub struct FakeMixerFactory {
    pub spawned: Mutex<Vec<Arc<FakeMixer>>>,
    pub fail_spawn: AtomicBool,
    pub auto_buffer_ready: AtomicBool,
}

impl FakeMixerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            spawned: Mutex::new(Vec::new()),
            fail_spawn: AtomicBool::new(false),
            auto_buffer_ready: AtomicBool::new(true),
        })
    }

    pub fn latest(&self) -> Arc<FakeMixer> {
        self.spawned
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no mixer spawned yet")
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }
}

#[async_trait]
impl MixerFactory for FakeMixerFactory {
    async fn spawn_mixer(
        &self,
        _guild: GuildId,
        generation: u64,
        signal_tx: mpsc::UnboundedSender<MixerSignal>,
    ) -> Result<(Arc<dyn MixerLink>, PcmStream)> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(Error::MixerStartFailed("fake spawn failure".into()));
        }
        let mixer = Arc::new(FakeMixer {
            generation,
            alive: AtomicBool::new(true),
            commands: Mutex::new(Vec::new()),
            signal_tx,
            auto_buffer_ready: AtomicBool::new(self.auto_buffer_ready.load(Ordering::SeqCst)),
        });
        self.spawned.lock().unwrap().push(mixer.clone());
        let (_tx, stream) = PcmStream::channel();
        Ok((mixer, stream))
    }
}

/// Voice gateway double with configurable membership and connection state
pub struct FakeGateway {
    pub connection: Mutex<ConnectionState>,
    pub humans: AtomicUsize,
    pub channel: Mutex<Option<u64>>,
    pub pause_calls: AtomicUsize,
    pub resume_calls: AtomicUsize,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub attached_streams: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connection: Mutex::new(ConnectionState::Ready),
            humans: AtomicUsize::new(1),
            channel: Mutex::new(Some(42)),
            pause_calls: AtomicUsize::new(0),
            resume_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            attached_streams: AtomicUsize::new(0),
        })
    }

    pub fn set_connection(&self, state: ConnectionState) {
        *self.connection.lock().unwrap() = state;
    }

    pub fn set_humans(&self, count: usize) {
        self.humans.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn attach_pcm(&self, _guild: GuildId, _stream: PcmStream) -> Result<()> {
        self.attached_streams.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pause_player(&self, _guild: GuildId) -> Result<()> {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resume_player(&self, _guild: GuildId) -> Result<()> {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, _guild: GuildId) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.connection.lock().unwrap() = ConnectionState::Ready;
        Ok(())
    }

    async fn disconnect(&self, _guild: GuildId) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        *self.connection.lock().unwrap() = ConnectionState::Disconnected;
        Ok(())
    }

    fn connection_state(&self, _guild: GuildId) -> ConnectionState {
        *self.connection.lock().unwrap()
    }

    fn voice_channel(&self, _guild: GuildId) -> Option<u64> {
        *self.channel.lock().unwrap()
    }

    fn human_count(&self, _guild: GuildId) -> usize {
        self.humans.load(Ordering::SeqCst)
    }
}

/// A Player wired to fakes and tempdir-backed stores
pub struct Harness {
    pub player: Player,
    pub gateway: Arc<FakeGateway>,
    pub factory: Arc<FakeMixerFactory>,
    pub bus: Arc<EventBus>,
    pub store: Arc<QueueStore>,
    pub stats: Arc<StatsStore>,
    _tmp: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Harness {
        Self::with_state(SessionState::default()).await
    }

    pub async fn with_state(state: SessionState) -> Harness {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bus = Arc::new(EventBus::new(256));
        let store = Arc::new(QueueStore::new(tmp.path().join("queues.json")));
        let stats = Arc::new(
            StatsStore::open(tmp.path().join("stats.json"))
                .await
                .expect("stats store"),
        );
        let gateway = FakeGateway::new();
        let factory = FakeMixerFactory::new();

        let (session, signal_rx) =
            Session::new(GUILD, state, bus.clone(), store.clone(), stats.clone());
        let player = Player::new(session, gateway.clone(), factory.clone());
        player.start(signal_rx);

        Harness {
            player,
            gateway,
            factory,
            bus,
            store,
            stats,
            _tmp: tmp,
        }
    }

    /// Enqueue the given URLs and start playback of the first
    pub async fn playing(urls: &[&str]) -> Harness {
        let harness = Harness::new().await;
        harness
            .player
            .enqueue(urls.iter().map(|u| song(u)).collect())
            .await
            .expect("enqueue");
        harness.player.play_song().await.expect("play");
        harness
    }

    pub fn mixer(&self) -> Arc<FakeMixer> {
        self.factory.latest()
    }

    /// Poll the session state until the predicate holds
    pub async fn wait_for_state<F>(&self, what: &str, f: F)
    where
        F: Fn(&SessionState) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            {
                let state = self.player.session().state.read().await;
                if f(&state) {
                    return;
                }
            }
            if Instant::now() >= deadline {
                panic!("timed out waiting for state: {what}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Let spawned tasks and the event loop drain
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
