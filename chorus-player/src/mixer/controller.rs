//! Mixer sidecar process controller
//!
//! Owns the sidecar child process and its three pipes:
//! - stdin: newline-delimited JSON commands (written by a dedicated writer task)
//! - stderr: newline-delimited JSON events (parsed by a reader task and fanned
//!   out through the session's signal channel, tagged with this instance's
//!   generation)
//! - stdout: raw mixed PCM, exposed as a low-latency frame stream whose
//!   internal buffer never exceeds two frames
//!
//! Exactly one crash signal is delivered per controller instance; events that
//! arrive after the crash latch fires are discarded. Consumers compare the
//! signal's generation against the session's current one to drop stragglers
//! from an already-replaced mixer.

use crate::error::{Error, Result};
use crate::mixer::protocol::{BufferReadyDedupe, MixerCommand, MixerEvent};
use async_trait::async_trait;
use chorus_common::types::{CrashReason, GuildId};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// One Discord voice frame: 20 ms of 48 kHz stereo 16-bit PCM
pub const FRAME_BYTES: usize = 3840;

/// Internal PCM buffer depth in frames (40 ms), kept tiny so a deck switch
/// reaches the listener with minimal perceptual latency
const PCM_BUFFER_FRAMES: usize = 2;

/// Dedupe window for repeated `buffer_ready` announcements per deck
const BUFFER_READY_DEDUPE_MS: u64 = 100;

/// How the mixer binary is launched
#[derive(Debug, Clone)]
pub struct MixerConfig {
    pub binary: PathBuf,
    pub args: Vec<String>,
}

/// Signals delivered to the per-session event loop
#[derive(Debug)]
pub enum MixerSignal {
    /// A protocol event from the sidecar instance with the given generation
    Event { generation: u64, event: MixerEvent },
    /// The sidecar instance died; delivered at most once per instance
    Crashed {
        generation: u64,
        reason: CrashReason,
    },
}

/// Transport seam between the playback core and a mixer instance.
///
/// The real implementation is `MixerController`; tests substitute a fake
/// that records commands and feeds events straight into the signal channel.
#[async_trait]
pub trait MixerLink: Send + Sync {
    /// Queue one command line to the sidecar. Fails fast when the instance
    /// is no longer alive.
    async fn send(&self, cmd: MixerCommand) -> Result<()>;

    /// Process liveness: spawned, not crashed, stdout still open
    fn is_alive(&self) -> bool;

    /// Monotonic id of this instance
    fn generation(&self) -> u64;

    /// Terminate the instance (graceful stop, then kill)
    async fn stop(&self);
}

/// Shared slot holding the session's current mixer link.
///
/// The command queue worker and the playback facade both read it; only the
/// facade installs or clears it.
#[derive(Default)]
pub struct MixerSlot {
    inner: std::sync::RwLock<Option<Arc<dyn MixerLink>>>,
}

impl MixerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<dyn MixerLink>> {
        self.inner.read().ok().and_then(|g| g.clone())
    }

    pub fn install(&self, link: Arc<dyn MixerLink>) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(link);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }
}

/// Low-latency PCM frame stream from the sidecar's stdout
pub struct PcmStream {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl PcmStream {
    /// Create a stream plus its feeding half (used by the controller's pump
    /// task and by test doubles)
    pub fn channel() -> (mpsc::Sender<Vec<u8>>, PcmStream) {
        let (tx, rx) = mpsc::channel(PCM_BUFFER_FRAMES);
        (tx, PcmStream { rx })
    }

    /// Next PCM frame, or `None` once the stream has closed
    pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// Creates mixer links; the process-backed implementation spawns the sidecar
/// binary, test factories hand out fakes.
#[async_trait]
pub trait MixerFactory: Send + Sync {
    async fn spawn_mixer(
        &self,
        guild: GuildId,
        generation: u64,
        signal_tx: mpsc::UnboundedSender<MixerSignal>,
    ) -> Result<(Arc<dyn MixerLink>, PcmStream)>;
}

/// Production factory launching the sidecar binary from `MixerConfig`
pub struct ProcessMixerFactory {
    config: MixerConfig,
}

impl ProcessMixerFactory {
    pub fn new(config: MixerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MixerFactory for ProcessMixerFactory {
    async fn spawn_mixer(
        &self,
        guild: GuildId,
        generation: u64,
        signal_tx: mpsc::UnboundedSender<MixerSignal>,
    ) -> Result<(Arc<dyn MixerLink>, PcmStream)> {
        let (controller, pcm) = MixerController::spawn(guild, &self.config, generation, signal_tx)?;
        Ok((controller, pcm))
    }
}

/// Controller around one sidecar process instance
pub struct MixerController {
    guild: GuildId,
    generation: u64,
    pid: Option<u32>,
    alive: Arc<AtomicBool>,
    stdin_tx: mpsc::Sender<String>,
    kill_tx: mpsc::Sender<()>,
}

impl MixerController {
    /// Spawn the sidecar and wire up its pipes. Returns the controller and
    /// the PCM stream to hand to the voice sender.
    pub fn spawn(
        guild: GuildId,
        config: &MixerConfig,
        generation: u64,
        signal_tx: mpsc::UnboundedSender<MixerSignal>,
    ) -> Result<(Arc<MixerController>, PcmStream)> {
        let mut child = Command::new(&config.binary)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::MixerStartFailed(format!("{}: {e}", config.binary.display())))?;

        let pid = child.id();
        info!(guild = %guild, generation, pid, "mixer sidecar spawned");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::MixerStartFailed("stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::MixerStartFailed("stdout not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::MixerStartFailed("stderr not piped".into()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let crash_fired = Arc::new(AtomicBool::new(false));
        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(64);
        let (kill_tx, kill_rx) = mpsc::channel::<()>(1);
        let (pcm_tx, pcm_stream) = PcmStream::channel();

        let crash = CrashLatch {
            guild,
            generation,
            alive: alive.clone(),
            fired: crash_fired.clone(),
            signal_tx: signal_tx.clone(),
        };

        tokio::spawn(writer_task(guild, stdin, stdin_rx, crash.clone()));
        tokio::spawn(event_reader_task(
            guild,
            generation,
            stderr,
            signal_tx,
            crash_fired.clone(),
            crash.clone(),
        ));
        tokio::spawn(pcm_pump_task(guild, stdout, pcm_tx, crash.clone()));
        tokio::spawn(waiter_task(guild, child, kill_rx, crash));

        let controller = Arc::new(MixerController {
            guild,
            generation,
            pid,
            alive,
            stdin_tx,
            kill_tx,
        });
        Ok((controller, pcm_stream))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[async_trait]
impl MixerLink for MixerController {
    async fn send(&self, cmd: MixerCommand) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::MixerDead);
        }
        let line = cmd.to_line()?;
        trace!(guild = %self.guild, command = cmd.name(), "mixer command");
        self.stdin_tx
            .send(line)
            .await
            .map_err(|_| Error::MixerDead)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    async fn stop(&self) {
        // Graceful stop first so the sidecar can exit cleanly, then SIGKILL
        // via the waiter in case it is wedged.
        let _ = self.send(MixerCommand::Stop).await;
        let _ = self.kill_tx.send(()).await;
    }
}

/// Shared single-shot crash signaling
#[derive(Clone)]
struct CrashLatch {
    guild: GuildId,
    generation: u64,
    alive: Arc<AtomicBool>,
    fired: Arc<AtomicBool>,
    signal_tx: mpsc::UnboundedSender<MixerSignal>,
}

impl CrashLatch {
    fn fire(&self, reason: CrashReason) {
        self.alive.store(false, Ordering::Release);
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(
            guild = %self.guild,
            generation = self.generation,
            reason = %reason,
            "mixer instance died"
        );
        let _ = self.signal_tx.send(MixerSignal::Crashed {
            generation: self.generation,
            reason,
        });
    }

    /// Mark dead without a crash signal (clean zero-status exit)
    fn mark_dead_clean(&self) {
        self.alive.store(false, Ordering::Release);
        self.fired.store(true, Ordering::Release);
    }
}

async fn writer_task(
    guild: GuildId,
    mut stdin: tokio::process::ChildStdin,
    mut rx: mpsc::Receiver<String>,
    crash: CrashLatch,
) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            error!(guild = %guild, error = %e, "mixer stdin write failed");
            crash.fire(CrashReason::StdinError);
            return;
        }
        if let Err(e) = stdin.flush().await {
            error!(guild = %guild, error = %e, "mixer stdin flush failed");
            crash.fire(CrashReason::StdinError);
            return;
        }
    }
    debug!(guild = %guild, "mixer stdin writer finished");
}

async fn event_reader_task(
    guild: GuildId,
    generation: u64,
    stderr: tokio::process::ChildStderr,
    signal_tx: mpsc::UnboundedSender<MixerSignal>,
    crash_fired: Arc<AtomicBool>,
    crash: CrashLatch,
) {
    let mut lines = BufReader::new(stderr).lines();
    let mut dedupe = BufferReadyDedupe::new(Duration::from_millis(BUFFER_READY_DEDUPE_MS));

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(event) = MixerEvent::parse(&line) else {
                    if !line.trim().is_empty() {
                        debug!(guild = %guild, line = %line, "unparsed mixer line");
                    }
                    continue;
                };

                // Events from an instance that already crashed are discarded.
                if crash_fired.load(Ordering::Acquire) {
                    debug!(guild = %guild, ?event, "dropping event from crashed mixer");
                    continue;
                }

                if let MixerEvent::BufferReady(deck) = event {
                    if !dedupe.admit(deck, Instant::now()) {
                        trace!(guild = %guild, %deck, "duplicate buffer_ready suppressed");
                        continue;
                    }
                }

                if signal_tx
                    .send(MixerSignal::Event { generation, event })
                    .is_err()
                {
                    // Session event loop is gone; nothing left to do.
                    return;
                }
            }
            Ok(None) => {
                debug!(guild = %guild, "mixer stderr closed");
                crash.fire(CrashReason::StderrClosed);
                return;
            }
            Err(e) => {
                warn!(guild = %guild, error = %e, "mixer stderr read failed");
                crash.fire(CrashReason::StderrClosed);
                return;
            }
        }
    }
}

async fn pcm_pump_task(
    guild: GuildId,
    mut stdout: tokio::process::ChildStdout,
    pcm_tx: mpsc::Sender<Vec<u8>>,
    crash: CrashLatch,
) {
    let mut buf = vec![0u8; FRAME_BYTES];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => {
                debug!(guild = %guild, "mixer stdout closed");
                crash.fire(CrashReason::StdoutClosed);
                return;
            }
            Ok(n) => {
                if pcm_tx.send(buf[..n].to_vec()).await.is_err() {
                    // Voice sender dropped the stream; stop pumping but do
                    // not treat it as a mixer failure.
                    debug!(guild = %guild, "pcm consumer gone, pump stopping");
                    return;
                }
            }
            Err(e) => {
                warn!(guild = %guild, error = %e, "mixer stdout read failed");
                crash.fire(CrashReason::StdoutClosed);
                return;
            }
        }
    }
}

async fn waiter_task(
    guild: GuildId,
    mut child: tokio::process::Child,
    mut kill_rx: mpsc::Receiver<()>,
    crash: CrashLatch,
) {
    loop {
        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(st) if st.success() => {
                        debug!(guild = %guild, "mixer exited cleanly");
                        crash.mark_dead_clean();
                    }
                    Ok(st) => {
                        crash.fire(CrashReason::ProcessExit(st.code()));
                    }
                    Err(e) => {
                        warn!(guild = %guild, error = %e, "mixer wait failed");
                        crash.fire(CrashReason::ProcessExit(None));
                    }
                }
                return;
            }
            _ = kill_rx.recv() => {
                debug!(guild = %guild, "killing mixer process");
                let _ = child.start_kill();
                // Loop back around to reap the exit status.
            }
        }
    }
}
