//! Mixer sidecar integration
//!
//! - `protocol`: the line-delimited JSON command/event vocabulary
//! - `controller`: sidecar process lifecycle, framed I/O, liveness, crash signaling
//! - `command_queue`: per-session FIFO serializer for sidecar commands

pub mod command_queue;
pub mod controller;
pub mod protocol;

pub use command_queue::{CommandOptions, CommandPriority, CommandQueue, CommandStatsSnapshot};
pub use controller::{
    MixerConfig, MixerController, MixerFactory, MixerLink, MixerSignal, MixerSlot, PcmStream,
    ProcessMixerFactory, FRAME_BYTES,
};
pub use protocol::{MixerCommand, MixerEvent};
