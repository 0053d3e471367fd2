//! Mixer sidecar wire protocol
//!
//! Commands go to the sidecar's stdin as newline-terminated JSON objects
//! tagged by `op`; events come back on stderr as `{"event":…,"data":…}`
//! records, one per line. stdout carries the raw mixed PCM stream and never
//! carries protocol traffic.

use chorus_common::params;
use chorus_common::types::DeckId;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Commands sent to the sidecar's stdin
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MixerCommand {
    Load {
        url: String,
        deck: DeckId,
        autoplay: bool,
    },
    Play {
        deck: DeckId,
    },
    PauseAll,
    ResumeAll,
    StopDeck {
        deck: DeckId,
    },
    Crossfade {
        to_deck: DeckId,
        duration_ms: u64,
    },
    SkipTo {
        target_deck: DeckId,
    },
    RestartDeck {
        deck: DeckId,
    },
    SetProactiveCrossfade {
        enabled: bool,
    },
    SetLoop {
        enabled: bool,
    },
    Stop,
}

impl MixerCommand {
    /// Build a crossfade command, clamping the duration up to the minimum
    /// the sidecar accepts.
    pub fn crossfade(to_deck: DeckId, duration_ms: u64) -> MixerCommand {
        MixerCommand::Crossfade {
            to_deck,
            duration_ms: duration_ms.max(params::get::min_crossfade_ms()),
        }
    }

    /// Short command name for logs and stats
    pub fn name(&self) -> &'static str {
        match self {
            MixerCommand::Load { .. } => "load",
            MixerCommand::Play { .. } => "play",
            MixerCommand::PauseAll => "pause_all",
            MixerCommand::ResumeAll => "resume_all",
            MixerCommand::StopDeck { .. } => "stop_deck",
            MixerCommand::Crossfade { .. } => "crossfade",
            MixerCommand::SkipTo { .. } => "skip_to",
            MixerCommand::RestartDeck { .. } => "restart_deck",
            MixerCommand::SetProactiveCrossfade { .. } => "set_proactive_crossfade",
            MixerCommand::SetLoop { .. } => "set_loop",
            MixerCommand::Stop => "stop",
        }
    }

    /// Encode as one protocol line (newline included)
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Raw event record as emitted by the sidecar
#[derive(Debug, Deserialize)]
struct RawEvent {
    event: String,
    #[serde(default)]
    data: Option<String>,
}

/// Events received from the sidecar's stderr
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerEvent {
    /// Deck has buffered enough audio to begin immediately
    BufferReady(DeckId),
    /// A crossfade between decks began
    CrossfadeStarted,
    /// Current deck is within the announce window of its natural end
    ApproachingEnd,
    /// Current deck ran out with nothing to switch to
    End,
    /// The active deck changed (observational)
    DeckChanged(DeckId),
    /// Sidecar auto-switched to the preloaded deck at natural end
    AutoEndSwitch(DeckId),
    /// Sidecar restarted the current deck (loop mode)
    AutoLoopRestart(DeckId),
    /// A deck was rewound for replay
    DeckRestarted(DeckId),
    /// Decoder/stream pipeline error text
    StreamError(String),
    /// Source resolver (yt) failure
    YtError(String),
    /// Generic sidecar error text
    EngineError(String),
    /// A source stream opened (informational)
    StreamOpened(String),
    /// Informational/debug/latency chatter
    Info(String),
    Debug(String),
    Latency(String),
}

impl MixerEvent {
    /// Parse one stderr line. Returns `None` for blank lines, malformed
    /// JSON, and unknown event names (logged upstream at debug).
    pub fn parse(line: &str) -> Option<MixerEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let raw: RawEvent = serde_json::from_str(line).ok()?;
        let data = raw.data.unwrap_or_default();

        match raw.event.as_str() {
            "buffer_ready" => DeckId::parse(&data).map(MixerEvent::BufferReady),
            "crossfade_started" => Some(MixerEvent::CrossfadeStarted),
            "approaching_end" => Some(MixerEvent::ApproachingEnd),
            "end" => Some(MixerEvent::End),
            "deck_changed" => parse_deck_field(&data).map(MixerEvent::DeckChanged),
            "auto_end_switch" => DeckId::parse(&data).map(MixerEvent::AutoEndSwitch),
            "auto_loop_restart" => DeckId::parse(&data).map(MixerEvent::AutoLoopRestart),
            "deck_restarted" => parse_deck_field(&data).map(MixerEvent::DeckRestarted),
            "stream_error" => Some(MixerEvent::StreamError(data)),
            "yt_error" => Some(MixerEvent::YtError(data)),
            "error" => Some(MixerEvent::EngineError(data)),
            "stream_opened" => Some(MixerEvent::StreamOpened(data)),
            "info" => Some(MixerEvent::Info(data)),
            "debug" => Some(MixerEvent::Debug(data)),
            "latency" => Some(MixerEvent::Latency(data)),
            _ => None,
        }
    }

    /// Whether this event only carries log chatter (no state impact)
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            MixerEvent::Info(_)
                | MixerEvent::Debug(_)
                | MixerEvent::Latency(_)
                | MixerEvent::StreamOpened(_)
                | MixerEvent::DeckRestarted(_)
        )
    }
}

/// Parse a `deck=X, …` key-value payload (used by `deck_changed` and
/// `deck_restarted`).
fn parse_deck_field(data: &str) -> Option<DeckId> {
    data.split(',')
        .filter_map(|kv| kv.trim().strip_prefix("deck="))
        .next()
        .and_then(DeckId::parse)
}

/// Suppresses repeated `buffer_ready` announcements for the same deck
/// within a short window.
pub struct BufferReadyDedupe {
    window: Duration,
    last: [Option<Instant>; 2],
}

impl BufferReadyDedupe {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: [None, None],
        }
    }

    /// Returns true if this `buffer_ready` should be forwarded
    pub fn admit(&mut self, deck: DeckId, now: Instant) -> bool {
        let slot = &mut self.last[deck.index()];
        match slot {
            Some(prev) if now.duration_since(*prev) < self.window => false,
            _ => {
                *slot = Some(now);
                true
            }
        }
    }
}
