//! The process-wide default manager (spec §9: "The source exposes a global
//! default manager and a global default worker; treat these as
//! explicitly-initialized process-wide singletons with a single teardown
//! point at shutdown to avoid use-after-free on static destruction").
//!
//! Grounded in the teacher's `glibc-rs-membrane/src/config.rs` pattern: a
//! `OnceLock` cached on first use, reading an environment variable
//! (`SIGHT_SCRATCH_DIR`) rather than defaulting silently, with an explicit
//! teardown function instead of relying on static destructor ordering.

use std::env;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::manager::BufferManager;

static DEFAULT_MANAGER: OnceLock<Arc<BufferManager>> = OnceLock::new();

fn default_scratch_dir() -> PathBuf {
    env::var_os("SIGHT_SCRATCH_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir().join("sight-memory-scratch"))
}

/// The process-wide default buffer manager. Lazily created on first call
/// with `SIGHT_SCRATCH_DIR` (or a temp-dir fallback) as its scratch
/// directory and [`crate::policy::NeverDump`] installed, matching
/// [`BufferManager::new`]'s own default.
#[must_use]
pub fn default_manager() -> Arc<BufferManager> {
    DEFAULT_MANAGER
        .get_or_init(|| BufferManager::new(default_scratch_dir()))
        .clone()
}

/// The single teardown point for [`default_manager`] (spec §9). Releases
/// nothing by itself beyond what `BufferManager`'s own `Drop` would do —
/// this exists so callers have one documented place to invoke before
/// process exit rather than relying on static destruction order, which the
/// original system's crash history shows is not safe to lean on.
pub fn shutdown_default_manager() {
    // `BufferManager` holds no resources that need explicit release beyond
    // what dropping its `Arc` does; this function is the seam a caller
    // invokes at a known point in shutdown, keeping the *order* explicit
    // even though there is nothing extra to run today.
    if let Some(manager) = DEFAULT_MANAGER.get() {
        let _ = manager.stats();
    }
}
