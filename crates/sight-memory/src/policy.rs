//! Eviction policy interface (spec §4.5, C5).
//!
//! Grounded in `original_source/SrcLib/core/fwMemory/include/fwMemory/IDumpPolicy.hpp`:
//! one abstract interface, notified synchronously on every registry event,
//! that may call back into the manager to `dump` (never `restore`, which
//! would recurse on access).
//!
//! Rust deviation from the original (recorded as an Open Question decision
//! in `DESIGN.md`): the manager releases its registry lock *before* invoking
//! any of these callbacks, rather than calling them while the lock is held.
//! A policy is therefore free to call [`crate::manager::BufferManager::dump`]
//! without deadlocking, without requiring a true reentrant mutex — the
//! callback no longer runs "under the same lock", but the effect (a policy
//! may dump from within a notification, may not restore) is identical.

use crate::buffer::{BufferInfo, Handle};
use crate::manager::BufferManager;

/// The decision module consulted on every registry event.
///
/// All default notification methods are no-ops so a policy only needs to
/// override the events it cares about (mirrors `NeverDumpPolicy`, which
/// overrides none of them).
pub trait EvictionPolicy: Send + Sync {
    /// A buffer is about to be created with `new_size` bytes.
    fn on_allocation_request(&self, _manager: &BufferManager, _handle: Handle, _info: &BufferInfo, _new_size: u64) {}

    /// `set_size` is about to change a buffer to `new_size` bytes.
    fn on_set_request(&self, _manager: &BufferManager, _handle: Handle, _info: &BufferInfo, _new_size: u64) {}

    /// An internal reallocation is about to change a buffer to `new_size` bytes.
    fn on_reallocate_request(&self, _manager: &BufferManager, _handle: Handle, _info: &BufferInfo, _new_size: u64) {}

    /// A buffer is about to be unregistered.
    fn on_destroy(&self, _manager: &BufferManager, _handle: Handle, _info: &BufferInfo) {}

    /// A buffer was just locked (pinned).
    fn on_lock(&self, _manager: &BufferManager, _handle: Handle, _info: &BufferInfo) {}

    /// A buffer was just unlocked.
    fn on_unlock(&self, _manager: &BufferManager, _handle: Handle, _info: &BufferInfo) {}

    /// A buffer was just dumped to scratch.
    fn on_dump_success(&self, _handle: Handle, _info: &BufferInfo) {}

    /// A buffer was just restored from scratch.
    fn on_restore_success(&self, _handle: Handle, _info: &BufferInfo) {}

    /// Re-evaluate the policy's trigger against the manager's current state,
    /// e.g. after an external change to available memory.
    fn refresh(&self, _manager: &BufferManager) {}

    /// Recognized parameter names.
    fn names(&self) -> &'static [&'static str] {
        &[]
    }

    /// Current value of a recognized parameter, if any.
    fn get(&self, _name: &str) -> Option<String> {
        None
    }

    /// Set a parameter. Returns `Ok(false)`/`Err` for an unrecognized name,
    /// per spec §7 `UNKNOWN_PARAM`.
    fn set(&self, name: &str, _value: &str) -> Result<(), crate::error::MemoryError> {
        Err(crate::error::MemoryError::UnknownParam(name.to_string()))
    }
}

pub mod barrier;
pub mod never;
pub mod valve;

pub use barrier::BarrierDump;
pub use never::NeverDump;
pub use valve::ValveDump;
