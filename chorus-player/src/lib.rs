//! # Chorus Player Library (chorus-player)
//!
//! Dual-deck playback core for the chorus voice-chat music player.
//!
//! **Purpose:** Own per-guild playback sessions, drive the external audio
//! mixer sidecar over its line-JSON protocol, keep audio continuous through
//! preloading and crossfades, and stay correct under rapid concurrent inputs,
//! mixer crashes, and stream failures.
//!
//! **Architecture:** One `Session` per guild holding queue state, a
//! `MixerController` around the sidecar process, a `CommandQueue` serializing
//! sidecar commands, an `AudioOperationBarrier` serializing user intents, and
//! the `Player` facade whose skip/engine/playback/recovery impls live in the
//! `player` module.

pub mod config;
pub mod control;
pub mod error;
pub mod mixer;
pub mod persist;
pub mod player;
pub mod registry;
pub mod session;
pub mod voice;

pub use error::{Error, Result};
pub use player::Player;
pub use registry::SessionRegistry;
