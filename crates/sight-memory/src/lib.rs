//! Buffer registry with transparent dump/restore eviction.
//!
//! The manager ([`manager::BufferManager`]) tracks every buffer an
//! application registers, lets callers pin ([`manager::BufferPin`]) one for
//! direct access, and — driven by a pluggable [`policy::EvictionPolicy`] —
//! transparently spills unlocked buffers to scratch files and restores them
//! on next access.

pub mod buffer;
pub mod byte_size;
pub mod error;
pub mod global;
pub mod manager;
pub mod policy;
pub mod probe;

pub use buffer::{BufferInfo, Handle};
pub use byte_size::{ByteSize, Family, Unit};
pub use error::{BadCast, MemoryError, Result};
pub use global::{default_manager, shutdown_default_manager};
pub use manager::{BufferManager, BufferPin, Stats};
pub use policy::{BarrierDump, EvictionPolicy, NeverDump, ValveDump};
pub use probe::{MemoryProbe, PlatformProbe};
