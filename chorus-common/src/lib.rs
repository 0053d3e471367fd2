//! # Chorus Common Library
//!
//! Shared code for the chorus playback services including:
//! - Core data types (songs, decks, guild/user ids)
//! - Event types (CoreEvent enum) and the broadcast EventBus
//! - Tunable runtime parameters
//! - Common error types

pub mod error;
pub mod events;
pub mod params;
pub mod types;

pub use error::{Error, Result};
