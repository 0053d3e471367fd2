//! Control-plane primitives for a session
//!
//! - `version`: monotonic state version with a bounded mutation history
//! - `locks`: named exclusive locks with hard expiry
//! - `barrier`: FIFO serializer for user-visible audio operations

pub mod barrier;
pub mod locks;
pub mod version;

pub use barrier::AudioOperationBarrier;
pub use locks::{LockGuard, NamedLocks};
pub use version::{StateVersion, VersionEntry};
