//! Cross-module scenarios from the memory manager's testable-properties
//! section: byte-size parsing, barrier/valve eviction under the public
//! `BufferManager` API, and the round-trip invariant for dump/restore.

use std::sync::Arc;

use sight_memory::{BarrierDump, BufferManager, ByteSize, EvictionPolicy, Unit, ValveDump};

fn manager() -> (Arc<BufferManager>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    (BufferManager::new(dir.path()), dir)
}

#[test]
fn byte_size_parses_the_documented_literals() {
    assert_eq!(ByteSize::parse("1.5 MiB").unwrap(), ByteSize::of(1_572_864, Unit::Bytes).unwrap());
    assert_eq!(ByteSize::parse("1500 kb").unwrap(), ByteSize::of(1_500_000, Unit::Bytes).unwrap());
    assert!(ByteSize::parse("-1 B").is_err());
    assert!(ByteSize::parse("2 foo").is_err());
}

#[test]
fn s1_barrier_dumps_exactly_the_oldest_buffer() {
    let (mgr, _dir) = manager();
    let policy = Arc::new(BarrierDump::new());
    policy.set("barrier", "250 MiB").unwrap();
    mgr.set_policy(policy);

    let mib = 1024 * 1024;
    let a = mgr.register_buffer(100 * mib).unwrap();
    let b = mgr.register_buffer(100 * mib).unwrap();
    let c = mgr.register_buffer(100 * mib).unwrap();

    assert!(!mgr.info(a).unwrap().resident);
    assert!(mgr.info(b).unwrap().resident);
    assert!(mgr.info(c).unwrap().resident);
    assert_eq!(mgr.stats().total_dumped, 100 * mib);
}

#[test]
fn s2_locking_the_dumped_buffer_restores_it_and_evicts_another() {
    let (mgr, _dir) = manager();
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
    let dumped = [b, c].into_iter().filter(|h| !mgr.info(*h).unwrap().resident).count();
    assert_eq!(dumped, 1, "exactly one other buffer should now be non-resident");
    assert_eq!(mgr.stats().total_dumped, 100 * mib);
    drop(pin);
}

#[test]
fn s3_all_buffers_locked_blocks_eviction_entirely() {
    let (mgr, _dir) = manager();
    let policy = Arc::new(BarrierDump::new());
    policy.set("barrier", "250 MiB").unwrap();
    mgr.set_policy(policy);

    let mib = 1024 * 1024;
    let a = mgr.register_buffer(100 * mib).unwrap();
    let b = mgr.register_buffer(100 * mib).unwrap();
    let c = mgr.register_buffer(100 * mib).unwrap();
    let pins = [mgr.lock(a).unwrap(), mgr.lock(b).unwrap(), mgr.lock(c).unwrap()];

    let _d = mgr.register_buffer(100 * mib).unwrap();
    let stats = mgr.stats();
    assert_eq!(stats.total_dumped, 0);
    assert!(stats.total_managed - stats.total_dumped > 250 * mib);
    drop(pins);
}

#[test]
fn s5_valve_dumps_until_its_floor_is_met() {
    let (mgr, _dir) = manager();
    let policy = Arc::new(ValveDump::new());
    // A floor no real host clears lets every allocation act as "scarce".
    policy.set("min_free_mem", "900 PiB").unwrap();
    policy.set("hysteresis_offset", "1 MiB").unwrap();
    mgr.set_policy(policy);

    let a = mgr.register_buffer(4096).unwrap();
    let b = mgr.register_buffer(4096).unwrap();
    assert!(!mgr.info(a).unwrap().resident);
    assert!(!mgr.info(b).unwrap().resident);
}

#[test]
fn round_trip_dump_restore_preserves_bytes() {
    let (mgr, _dir) = manager();
    let handle = mgr.register_buffer(4096).unwrap();
    let pattern: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
    {
        let pin = mgr.lock(handle).unwrap();
        pin.with_bytes_mut(|bytes| bytes.copy_from_slice(&pattern));
    }
    assert!(mgr.dump(handle));
    assert!(mgr.restore(handle));
    let pin = mgr.lock(handle).unwrap();
    pin.with_bytes(|bytes| assert_eq!(bytes, pattern.as_slice()));
}

#[test]
fn never_dump_is_the_manager_default_until_set_policy() {
    let (mgr, _dir) = manager();
    let mib = 1024 * 1024;
    for _ in 0..8 {
        mgr.register_buffer(100 * mib).unwrap();
    }
    assert_eq!(mgr.stats().total_dumped, 0);
}
