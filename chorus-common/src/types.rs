//! Core data types shared by the playback services

use serde::{Deserialize, Serialize};
use std::fmt;

/// Guild identifier (snowflake)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(pub u64);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for GuildId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<u64>().map(GuildId)
    }
}

/// User identifier (snowflake)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the two playback slots inside the audio mixer.
///
/// At any moment one deck is *current*; the other may hold a preloaded song
/// so that a skip or crossfade is instantaneous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    /// The complement deck
    pub fn other(self) -> DeckId {
        match self {
            DeckId::A => DeckId::B,
            DeckId::B => DeckId::A,
        }
    }

    /// Index into per-deck arrays
    pub fn index(self) -> usize {
        match self {
            DeckId::A => 0,
            DeckId::B => 1,
        }
    }

    /// Parse the wire form used by the mixer sidecar ("A"/"B")
    pub fn parse(s: &str) -> Option<DeckId> {
        match s.trim() {
            "A" => Some(DeckId::A),
            "B" => Some(DeckId::B),
            _ => None,
        }
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeckId::A => write!(f, "A"),
            DeckId::B => write!(f, "B"),
        }
    }
}

/// A resolved track in the playback queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub title: String,
    pub url: String,
    pub thumbnail: Option<String>,
    pub is_live: bool,
    /// Track duration in whole seconds (0 when unknown or live)
    pub duration_s: u32,
    pub requester_id: UserId,
    /// Identity key from the media resolver (e.g. extracted video id).
    /// When present, track equality uses this key instead of the URL.
    pub resolver_key: Option<String>,
}

impl Song {
    /// Whether two queue entries refer to the same track.
    ///
    /// Uses the resolver key when both sides carry one, otherwise exact URL
    /// equality.
    pub fn same_track(&self, other: &Song) -> bool {
        match (&self.resolver_key, &other.resolver_key) {
            (Some(a), Some(b)) => a == b,
            _ => self.url == other.url,
        }
    }
}

/// Why a skip transition was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    Manual,
    ManualPrev,
    ManualSelect,
    Auto,
}

impl TransitionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionReason::Manual => "manual",
            TransitionReason::ManualPrev => "manual-prev",
            TransitionReason::ManualSelect => "manual-select",
            TransitionReason::Auto => "auto",
        }
    }
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a mixer instance died
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrashReason {
    /// The PCM stdout stream closed or errored
    StdoutClosed,
    /// Writing a command to stdin failed
    StdinError,
    /// The event (stderr) stream closed while the process was still expected alive
    StderrClosed,
    /// The process exited with a non-zero (or unknown) status
    ProcessExit(Option<i32>),
}

impl fmt::Display for CrashReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashReason::StdoutClosed => write!(f, "stdout_error"),
            CrashReason::StdinError => write!(f, "stdin_error"),
            CrashReason::StderrClosed => write!(f, "stderr_closed"),
            CrashReason::ProcessExit(Some(code)) => write!(f, "process_exit({code})"),
            CrashReason::ProcessExit(None) => write!(f, "process_exit(signal)"),
        }
    }
}
