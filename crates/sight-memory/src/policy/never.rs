//! `NeverDumpPolicy` equivalent (spec §2 supplemented policy, see SPEC_FULL.md §2).
//!
//! Grounded in `original_source/SrcLib/core/fwMemory/src/fwMemory/policy/NeverDumpPolicy.cpp`:
//! a policy that never evicts anything. Used as the manager's default
//! before `set_policy` is called.

use crate::policy::EvictionPolicy;

/// A policy that never dumps anything. All notification hooks are no-ops
/// (the trait's defaults), so this struct only needs to exist.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverDump;

impl EvictionPolicy for NeverDump {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::BufferManager;

    #[test]
    fn default_policy_never_evicts() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = BufferManager::new(dir.path());
        let mib = 1024 * 1024;
        for _ in 0..5 {
            mgr.register_buffer(100 * mib).unwrap();
        }
        assert_eq!(mgr.stats().total_dumped, 0);
    }
}
