//! Barrier policy (spec §4.6, C6).
//!
//! Grounded in `original_source/libs/core/core/memory/policy/BarrierDump.cpp`:
//! track `total_allocated`/`total_dumped` as events flow in, and whenever
//! `alive = total_allocated - total_dumped` crosses `barrier`, dump the
//! oldest unlocked candidates until it no longer does.

use parking_lot::Mutex;

use crate::buffer::{BufferInfo, Handle};
use crate::byte_size::ByteSize;
use crate::error::MemoryError;
use crate::manager::BufferManager;
use crate::policy::EvictionPolicy;

const DEFAULT_BARRIER_BYTES: u64 = 500 * 1024 * 1024;

struct State {
    total_allocated: u64,
    total_dumped: u64,
    barrier: u64,
}

/// Evict oldest unlocked buffers once alive bytes exceed a threshold.
pub struct BarrierDump {
    state: Mutex<State>,
}

impl BarrierDump {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                total_allocated: 0,
                total_dumped: 0,
                barrier: DEFAULT_BARRIER_BYTES,
            }),
        }
    }

    fn account(&self, old_info: &BufferInfo, new_size: u64) {
        let mut state = self.state.lock();
        debug_assert!(state.total_allocated >= old_info.size, "allocation accounting inconsistency");
        state.total_allocated = state.total_allocated.saturating_sub(old_info.size) + new_size;
        if !old_info.resident {
            debug_assert!(state.total_dumped >= old_info.size, "dump accounting inconsistency");
            state.total_dumped = state.total_dumped.saturating_sub(old_info.size);
        }
        debug_assert!(state.total_allocated >= state.total_dumped);
    }

    fn total_alive(&self) -> u64 {
        let state = self.state.lock();
        state.total_allocated.saturating_sub(state.total_dumped)
    }

    fn is_barrier_crossed(&self) -> bool {
        let state = self.state.lock();
        state.total_allocated.saturating_sub(state.total_dumped) > state.barrier
    }

    /// Dump candidates, oldest `last_access` first, until `nb_of_bytes` have
    /// been freed or no candidates remain.
    fn dump(&self, manager: &BufferManager, nb_of_bytes: u64) -> u64 {
        let mut dumped = 0_u64;
        while dumped < nb_of_bytes {
            let Some(handle) = manager.eviction_candidate() else {
                break;
            };
            let size = manager.info(handle).map_or(0, |info| info.size);
            if manager.dump(handle) {
                dumped += size;
            } else {
                break;
            }
        }
        dumped
    }

    fn apply(&self, manager: &BufferManager) {
        if self.is_barrier_crossed() {
            let over = self.total_alive().saturating_sub(self.state.lock().barrier);
            self.dump(manager, over);
        }
    }
}

impl Default for BarrierDump {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPolicy for BarrierDump {
    fn on_allocation_request(&self, manager: &BufferManager, _handle: Handle, info: &BufferInfo, new_size: u64) {
        self.account(info, new_size);
        self.apply(manager);
    }

    fn on_set_request(&self, manager: &BufferManager, _handle: Handle, info: &BufferInfo, new_size: u64) {
        self.account(info, new_size);
        self.apply(manager);
    }

    fn on_reallocate_request(&self, manager: &BufferManager, _handle: Handle, info: &BufferInfo, new_size: u64) {
        self.account(info, new_size);
        self.apply(manager);
    }

    fn on_destroy(&self, _manager: &BufferManager, _handle: Handle, info: &BufferInfo) {
        let mut state = self.state.lock();
        if !info.resident {
            state.total_dumped = state.total_dumped.saturating_sub(info.size);
        }
        state.total_allocated = state.total_allocated.saturating_sub(info.size);
    }

    fn on_unlock(&self, manager: &BufferManager, _handle: Handle, _info: &BufferInfo) {
        self.apply(manager);
    }

    fn on_dump_success(&self, _handle: Handle, info: &BufferInfo) {
        self.state.lock().total_dumped += info.size;
    }

    fn on_restore_success(&self, _handle: Handle, info: &BufferInfo) {
        let mut state = self.state.lock();
        state.total_dumped = state.total_dumped.saturating_sub(info.size);
    }

    fn refresh(&self, manager: &BufferManager) {
        let stats = manager.stats();
        {
            let mut state = self.state.lock();
            state.total_allocated = stats.total_managed;
            state.total_dumped = stats.total_dumped;
        }
        self.apply(manager);
    }

    fn names(&self) -> &'static [&'static str] {
        &["barrier"]
    }

    fn get(&self, name: &str) -> Option<String> {
        if name == "barrier" {
            Some(ByteSize::of(self.state.lock().barrier, crate::byte_size::Unit::Bytes)?.to_string())
        } else {
            None
        }
    }

    fn set(&self, name: &str, value: &str) -> Result<(), MemoryError> {
        if name != "barrier" {
            return Err(MemoryError::UnknownParam(name.to_string()));
        }
        let size = ByteSize::parse(value)?;
        self.state.lock().barrier = size.bytes();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::BufferManager;
    use std::sync::Arc;

    #[test]
    fn s2_locking_dumped_buffer_restores_and_dumps_another() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = BufferManager::new(dir.path());
        let policy = Arc::new(BarrierDump::new());
        policy.set("barrier", "250 MiB").unwrap();
        mgr.set_policy(policy);

        let mib = 1024 * 1024;
        let a = mgr.register_buffer(100 * mib).unwrap();
        let b = mgr.register_buffer(100 * mib).unwrap();
        let c = mgr.register_buffer(100 * mib).unwrap();
        assert!(!mgr.info(a).unwrap().resident);

        let pin = mgr.lock(a).unwrap();
        assert!(mgr.info(a).unwrap().resident);
        let still_dumped = [b, c].into_iter().filter(|h| !mgr.info(*h).unwrap().resident).count();
        assert_eq!(still_dumped, 1);
        assert_eq!(mgr.stats().total_dumped, 100 * mib);
        drop(pin);
    }

    #[test]
    fn s3_all_locked_means_no_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = BufferManager::new(dir.path());
        let policy = Arc::new(BarrierDump::new());
        policy.set("barrier", "250 MiB").unwrap();
        mgr.set_policy(policy);

        let mib = 1024 * 1024;
        let a = mgr.register_buffer(100 * mib).unwrap();
        let b = mgr.register_buffer(100 * mib).unwrap();
        let c = mgr.register_buffer(100 * mib).unwrap();
        let pins = [mgr.lock(a).unwrap(), mgr.lock(b).unwrap(), mgr.lock(c).unwrap()];

        let _d = mgr.register_buffer(100 * mib).unwrap();
        assert_eq!(mgr.stats().total_dumped, 0);
        assert!(mgr.stats().total_managed - mgr.stats().total_dumped > 250 * mib);
        drop(pins);
    }

    #[test]
    fn unknown_param_is_rejected() {
        let policy = BarrierDump::new();
        assert!(matches!(policy.set("bogus", "1"), Err(MemoryError::UnknownParam(_))));
    }
}
