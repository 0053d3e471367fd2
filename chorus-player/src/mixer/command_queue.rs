//! Per-session FIFO serializer for sidecar commands
//!
//! All writes to the mixer go through here: one worker task executes commands
//! strictly in submission order, except that `high` priority commands move to
//! the front of the pending list (never preempting the one currently
//! executing). Commands submitted while the mixer is down fail fast.

use crate::error::{Error, Result};
use crate::mixer::controller::MixerSlot;
use crate::mixer::protocol::MixerCommand;
use chorus_common::params;
use chorus_common::types::GuildId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Execution priority of a queued command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandPriority {
    #[default]
    Normal,
    /// Enqueued at the front of the pending list
    High,
}

/// Per-command execution options
#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub priority: CommandPriority,
    pub timeout: Duration,
    /// Re-queue at the front this many times on timeout before rejecting
    pub retries: u32,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            priority: CommandPriority::Normal,
            timeout: params::get::cmd_timeout(),
            retries: 0,
        }
    }
}

impl CommandOptions {
    pub fn high_priority() -> Self {
        Self {
            priority: CommandPriority::High,
            ..Self::default()
        }
    }
}

/// Observability counters
#[derive(Default)]
struct CommandStats {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    wait_ms_total: AtomicU64,
    executed: AtomicU64,
}

/// Point-in-time view of the queue's counters
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStatsSnapshot {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub average_wait_ms: f64,
}

struct PendingCommand {
    cmd: MixerCommand,
    opts: CommandOptions,
    resp: oneshot::Sender<Result<()>>,
    submitted: Instant,
}

enum QueueMsg {
    Submit(PendingCommand),
    Shutdown(String),
}

/// Handle to the per-session command worker
pub struct CommandQueue {
    guild: GuildId,
    tx: mpsc::UnboundedSender<QueueMsg>,
    stats: Arc<CommandStats>,
}

impl CommandQueue {
    /// Create the queue and spawn its worker. The worker reads the current
    /// mixer link from `slot` at each execution so a respawned mixer is
    /// picked up without re-creating the queue.
    pub fn new(guild: GuildId, slot: Arc<MixerSlot>) -> CommandQueue {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(CommandStats::default());
        tokio::spawn(worker(guild, slot, rx, stats.clone()));
        CommandQueue { guild, tx, stats }
    }

    /// Submit with default options and wait for completion
    pub async fn submit(&self, cmd: MixerCommand) -> Result<()> {
        self.submit_with(cmd, CommandOptions::default()).await
    }

    /// Submit with explicit options and wait for completion
    pub async fn submit_with(&self, cmd: MixerCommand, opts: CommandOptions) -> Result<()> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let pending = PendingCommand {
            cmd,
            opts,
            resp: resp_tx,
            submitted: Instant::now(),
        };
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(QueueMsg::Submit(pending))
            .map_err(|_| Error::CommandRejected("guild cleanup".into()))?;
        resp_rx
            .await
            .unwrap_or_else(|_| Err(Error::CommandRejected("guild cleanup".into())))
    }

    /// Reject everything pending and stop the worker
    pub fn shutdown(&self, reason: &str) {
        debug!(guild = %self.guild, reason, "command queue shutdown");
        let _ = self.tx.send(QueueMsg::Shutdown(reason.to_string()));
    }

    pub fn stats(&self) -> CommandStatsSnapshot {
        let executed = self.stats.executed.load(Ordering::Relaxed);
        let wait_total = self.stats.wait_ms_total.load(Ordering::Relaxed);
        CommandStatsSnapshot {
            total: self.stats.total.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            average_wait_ms: if executed == 0 {
                0.0
            } else {
                wait_total as f64 / executed as f64
            },
        }
    }
}

async fn worker(
    guild: GuildId,
    slot: Arc<MixerSlot>,
    mut rx: mpsc::UnboundedReceiver<QueueMsg>,
    stats: Arc<CommandStats>,
) {
    let mut pending: VecDeque<PendingCommand> = VecDeque::new();

    loop {
        // Block for work when idle; otherwise just drain whatever arrived
        // while the previous command executed.
        if pending.is_empty() {
            match rx.recv().await {
                Some(msg) => {
                    if enqueue(&mut pending, msg, guild) {
                        return;
                    }
                }
                None => return,
            }
        }
        while let Ok(msg) = rx.try_recv() {
            if enqueue(&mut pending, msg, guild) {
                return;
            }
        }

        let Some(entry) = pending.pop_front() else {
            continue;
        };
        execute(guild, &slot, entry, &mut pending, &stats).await;
    }
}

/// Returns true when the worker should stop (shutdown received)
fn enqueue(pending: &mut VecDeque<PendingCommand>, msg: QueueMsg, guild: GuildId) -> bool {
    match msg {
        QueueMsg::Submit(cmd) => {
            match cmd.opts.priority {
                CommandPriority::High => pending.push_front(cmd),
                CommandPriority::Normal => pending.push_back(cmd),
            }
            false
        }
        QueueMsg::Shutdown(reason) => {
            for entry in pending.drain(..) {
                let _ = entry.resp.send(Err(Error::CommandRejected(reason.clone())));
            }
            debug!(guild = %guild, reason, "command worker stopped");
            true
        }
    }
}

async fn execute(
    guild: GuildId,
    slot: &Arc<MixerSlot>,
    mut entry: PendingCommand,
    pending: &mut VecDeque<PendingCommand>,
    stats: &Arc<CommandStats>,
) {
    let waited_ms = entry.submitted.elapsed().as_millis() as u64;
    stats.wait_ms_total.fetch_add(waited_ms, Ordering::Relaxed);
    stats.executed.fetch_add(1, Ordering::Relaxed);

    let link = match slot.current() {
        Some(link) if link.is_alive() => link,
        _ => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            let _ = entry.resp.send(Err(Error::MixerDead));
            return;
        }
    };

    match timeout(entry.opts.timeout, link.send(entry.cmd.clone())).await {
        Ok(Ok(())) => {
            stats.succeeded.fetch_add(1, Ordering::Relaxed);
            let _ = entry.resp.send(Ok(()));
        }
        Ok(Err(e)) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            let _ = entry.resp.send(Err(e));
        }
        Err(_) => {
            if entry.opts.retries > 0 {
                entry.opts.retries -= 1;
                warn!(
                    guild = %guild,
                    command = entry.cmd.name(),
                    retries_left = entry.opts.retries,
                    "command timed out, re-queueing at front"
                );
                pending.push_front(entry);
            } else {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                let name = entry.cmd.name().to_string();
                warn!(guild = %guild, command = %name, "command timed out");
                let _ = entry.resp.send(Err(Error::CommandTimeout(name)));
            }
        }
    }
}
