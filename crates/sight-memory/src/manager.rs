//! Buffer manager — the process-wide registry (spec §4.4, C4).
//!
//! Grounded in `original_source/SrcLib/core/fwMemory/include/fwMemory/IMemoryService.hpp`
//! and `libs/core/core/memory/policy/{BarrierDump,ValveDump}.cpp` for the
//! dump/restore protocols and eviction bookkeeping they drive.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer::{BufferInfo, Handle};
use crate::error::{MemoryError, Result};
use crate::policy::{EvictionPolicy, NeverDump};

/// Where a resident buffer's bytes actually live.
enum Storage {
    /// The manager allocated this RAM and is responsible for freeing it.
    Owned(Vec<u8>),
    /// Caller-owned memory registered via [`BufferManager::register_external`].
    External(ExternalRef),
}

/// A raw pointer into caller-owned memory. The caller guarantees the pointer
/// stays valid and is not concurrently mutated from outside the manager for
/// as long as the handle is registered — the same trust contract the C ABI
/// original places on `register_external`.
#[derive(Clone, Copy)]
struct ExternalRef {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: callers of `register_external` guarantee the pointer is safe to
// share across threads for the handle's lifetime; the manager never
// dereferences it outside a registry-lock-protected operation.
unsafe impl Send for ExternalRef {}
unsafe impl Sync for ExternalRef {}

impl ExternalRef {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: see the struct-level contract.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    fn as_slice_mut(&mut self) -> &mut [u8] {
        // SAFETY: see the struct-level contract.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

enum Body {
    Resident(Storage),
    /// Non-resident. `external` carries the original caller-owned pointer
    /// forward when the dumped buffer was `Storage::External` — the manager
    /// never freed that memory (it doesn't own it), so restoring must hand
    /// the bytes back through the same pointer rather than conjure a fresh
    /// manager-owned buffer the caller never registered.
    Dumped { path: PathBuf, external: Option<ExternalRef> },
}

struct Record {
    size: u64,
    lock_count: u32,
    last_access: u64,
    owns_buffer: bool,
    body: Body,
}

impl Record {
    fn to_info(&self) -> BufferInfo {
        let (resident, scratch_path) = match &self.body {
            Body::Resident(_) => (true, None),
            Body::Dumped { path, .. } => (false, Some(path.clone())),
        };
        BufferInfo {
            size: self.size,
            resident,
            lock_count: self.lock_count,
            last_access: self.last_access,
            scratch_path,
            owns_buffer: self.owns_buffer,
        }
    }

    fn is_evictable(&self) -> bool {
        matches!(self.body, Body::Resident(_)) && self.lock_count == 0 && self.size > 0
    }
}

struct Registry {
    records: HashMap<Handle, Record>,
    scratch_dir: PathBuf,
}

/// Aggregate manager state (spec §4.4.1 `stats()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Stats {
    pub total_managed: u64,
    pub total_dumped: u64,
    pub num_buffers: usize,
}

/// A pin on a buffer. Dereferences to the buffer's bytes while held;
/// releasing (on `Drop`) decrements the lock count and notifies
/// `on_unlock`. Spec §4.4.1: "`lock(handle) -> pin`... the returned pin
/// releases on scope exit".
pub struct BufferPin {
    manager: Arc<BufferManager>,
    handle: Handle,
}

impl BufferPin {
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Read the buffer's bytes. Panics if the handle vanished out from under
    /// the pin, which cannot happen while the pin is held (a locked buffer
    /// cannot be unregistered, spec §4.4.5).
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let registry = self.manager.registry.read();
        let record = registry.records.get(&self.handle).expect("pinned buffer disappeared");
        match &record.body {
            Body::Resident(Storage::Owned(bytes)) => f(bytes),
            Body::Resident(Storage::External(ext)) => f(ext.as_slice()),
            Body::Dumped { .. } => unreachable!("locked buffer cannot be non-resident"),
        }
    }

    /// Write the buffer's bytes (only meaningful for manager-owned buffers;
    /// writing through an external pointer should go through the caller's
    /// own handle to that memory instead).
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut registry = self.manager.registry.write();
        let record = registry.records.get_mut(&self.handle).expect("pinned buffer disappeared");
        match &mut record.body {
            Body::Resident(Storage::Owned(bytes)) => f(bytes),
            Body::Resident(Storage::External(ext)) => {
                // SAFETY: see ExternalRef's struct-level contract.
                let slice = unsafe { std::slice::from_raw_parts_mut(ext.ptr, ext.len) };
                f(slice)
            }
            Body::Dumped { .. } => unreachable!("locked buffer cannot be non-resident"),
        }
    }
}

impl Drop for BufferPin {
    fn drop(&mut self) {
        self.manager.unlock(self.handle);
    }
}

/// The process-wide buffer registry (spec §4.4).
pub struct BufferManager {
    registry: RwLock<Registry>,
    policy: RwLock<Arc<dyn EvictionPolicy>>,
    next_handle: AtomicU64,
    last_access_counter: AtomicU64,
    scratch_counter: AtomicU64,
    /// Lets `lock()` hand out a `BufferPin` that owns an `Arc` back to this
    /// manager without every method needing an `Arc<Self>` receiver.
    self_ref: std::sync::Weak<BufferManager>,
}

impl BufferManager {
    /// Create a manager with a fresh scratch directory and the
    /// never-evict policy installed (matches the original's default of no
    /// active dump policy until one is attached).
    #[must_use]
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Arc<Self> {
        let scratch_dir = scratch_dir.into();
        if let Err(err) = fs::create_dir_all(&scratch_dir) {
            log::warn!("failed to create scratch dir {}: {err}", scratch_dir.display());
        }
        Arc::new_cyclic(|weak| Self {
            registry: RwLock::new(Registry {
                records: HashMap::new(),
                scratch_dir,
            }),
            policy: RwLock::new(Arc::new(NeverDump)),
            next_handle: AtomicU64::new(1),
            last_access_counter: AtomicU64::new(1),
            scratch_counter: AtomicU64::new(1),
            self_ref: weak.clone(),
        })
    }

    fn arc_self(&self) -> Arc<BufferManager> {
        self.self_ref.upgrade().expect("manager outlives its own handles")
    }

    fn stamp(&self) -> u64 {
        self.last_access_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn alloc_handle(&self) -> Handle {
        Handle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn current_policy(&self) -> Arc<dyn EvictionPolicy> {
        self.policy.read().clone()
    }

    // ---- public contract (spec §4.4.1) ----------------------------------

    /// Allocate `size` bytes in RAM, owned by the manager.
    pub fn register_buffer(&self, size: u64) -> Result<Handle> {
        let handle = self.alloc_handle();
        let record = Record {
            size,
            lock_count: 0,
            last_access: self.stamp(),
            owns_buffer: true,
            body: Body::Resident(Storage::Owned(vec![0_u8; size as usize])),
        };
        let not_yet = BufferInfo::new(0, true);
        self.registry.write().records.insert(handle, record);
        let policy = self.current_policy();
        policy.on_allocation_request(self, handle, &not_yet, size);
        Ok(handle)
    }

    /// Track a caller-owned buffer; the manager never frees `ptr`.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes for as long
    /// as the handle stays registered, and must not be mutated from outside
    /// the manager's operations while registered.
    pub unsafe fn register_external(&self, ptr: *mut u8, len: usize) -> Result<Handle> {
        let handle = self.alloc_handle();
        let record = Record {
            size: len as u64,
            lock_count: 0,
            last_access: self.stamp(),
            owns_buffer: false,
            body: Body::Resident(Storage::External(ExternalRef { ptr, len })),
        };
        let not_yet = BufferInfo::new(0, false);
        self.registry.write().records.insert(handle, record);
        let policy = self.current_policy();
        policy.on_allocation_request(self, handle, &not_yet, len as u64);
        Ok(handle)
    }

    /// Remove a buffer's record. Frees owned RAM if resident, deletes the
    /// scratch file if dumped. Forbidden while locked (spec §4.4.5).
    pub fn unregister(&self, handle: Handle) -> Result<()> {
        let (info, scratch_to_delete) = {
            let mut registry = self.registry.write();
            let record = registry
                .records
                .get(&handle)
                .ok_or(MemoryError::UnknownHandle(handle))?;
            if record.lock_count > 0 {
                return Err(MemoryError::InvalidState("cannot unregister a locked buffer"));
            }
            let info = record.to_info();
            let scratch = match &record.body {
                Body::Dumped { path, .. } => Some(path.clone()),
                Body::Resident(_) => None,
            };
            registry.records.remove(&handle);
            (info, scratch)
        };
        if let Some(path) = scratch_to_delete {
            if let Err(err) = fs::remove_file(&path) {
                log::warn!("failed to delete scratch file {}: {err}", path.display());
            }
        }
        let policy = self.current_policy();
        policy.on_destroy(self, handle, &info);
        Ok(())
    }

    /// Resize a buffer in place, restoring it first if necessary.
    pub fn set_size(&self, handle: Handle, new_size: u64) -> Result<()> {
        if !self.is_resident(handle)? {
            self.restore(handle);
        }
        let old_info = {
            let mut registry = self.registry.write();
            let record = registry
                .records
                .get_mut(&handle)
                .ok_or(MemoryError::UnknownHandle(handle))?;
            let old_info = record.to_info();
            match &mut record.body {
                Body::Resident(Storage::Owned(bytes)) => bytes.resize(new_size as usize, 0),
                Body::Resident(Storage::External(ext)) => {
                    // The manager cannot reallocate caller-owned memory; a
                    // tracked size that outran the real allocation would
                    // violate invariant 3 ("the scratch file holds exactly
                    // `size` bytes") the next time this buffer is dumped.
                    if new_size != ext.len as u64 {
                        return Err(MemoryError::InvalidState(
                            "cannot resize an externally-owned buffer",
                        ));
                    }
                }
                Body::Dumped { .. } => return Err(MemoryError::InvalidState("buffer failed to restore")),
            }
            record.size = new_size;
            old_info
        };
        let policy = self.current_policy();
        policy.on_set_request(self, handle, &old_info, new_size);
        Ok(())
    }

    /// Exchange two records' `size`/residency/scratch state. Both must be unlocked.
    pub fn swap(&self, a: Handle, b: Handle) -> Result<()> {
        if a == b {
            return Ok(());
        }
        let mut registry = self.registry.write();
        let mut rec_a = registry.records.remove(&a).ok_or(MemoryError::UnknownHandle(a))?;
        let mut rec_b = match registry.records.remove(&b) {
            Some(r) => r,
            None => {
                registry.records.insert(a, rec_a);
                return Err(MemoryError::UnknownHandle(b));
            }
        };
        if rec_a.lock_count > 0 || rec_b.lock_count > 0 {
            registry.records.insert(a, rec_a);
            registry.records.insert(b, rec_b);
            return Err(MemoryError::InvalidState("cannot swap a locked buffer"));
        }
        std::mem::swap(&mut rec_a.size, &mut rec_b.size);
        std::mem::swap(&mut rec_a.body, &mut rec_b.body);
        registry.records.insert(a, rec_a);
        registry.records.insert(b, rec_b);
        Ok(())
    }

    /// Pin a buffer, restoring it first if it is non-resident. Blocks on the
    /// restore's disk I/O; not interruptible (spec §5).
    pub fn lock(&self, handle: Handle) -> Result<BufferPin> {
        if !self.is_resident(handle)? && !self.restore(handle) {
            return Err(MemoryError::InvalidState("failed to restore buffer for lock"));
        }
        let info = {
            let mut registry = self.registry.write();
            let record = registry
                .records
                .get_mut(&handle)
                .ok_or(MemoryError::UnknownHandle(handle))?;
            record.lock_count += 1;
            record.last_access = self.stamp();
            record.to_info()
        };
        let policy = self.current_policy();
        policy.on_lock(self, handle, &info);
        Ok(BufferPin {
            manager: self.arc_self(),
            handle,
        })
    }

    fn unlock(&self, handle: Handle) {
        let info = {
            let mut registry = self.registry.write();
            let Some(record) = registry.records.get_mut(&handle) else {
                return;
            };
            record.lock_count = record.lock_count.saturating_sub(1);
            record.to_info()
        };
        self.current_policy().on_unlock(self, handle, &info);
    }

    /// Force-evict a buffer's bytes to scratch. Fails if locked, already
    /// dumped, or empty (spec §4.4.2); I/O failures are logged and also
    /// surface as `false`, leaving the record unchanged.
    pub fn dump(&self, handle: Handle) -> bool {
        let scratch_path = {
            let registry = self.registry.read();
            let Some(record) = registry.records.get(&handle) else {
                return false;
            };
            if record.lock_count > 0 || record.size == 0 || !matches!(record.body, Body::Resident(_)) {
                return false;
            }
            registry.scratch_dir.join(format!(
                "buf-{}-{}.dump",
                handle.id(),
                self.scratch_counter.fetch_add(1, Ordering::Relaxed)
            ))
        };

        let bytes_written = {
            let registry = self.registry.read();
            let record = registry.records.get(&handle).expect("checked above");
            match &record.body {
                Body::Resident(Storage::Owned(bytes)) => fs::write(&scratch_path, bytes),
                Body::Resident(Storage::External(ext)) => fs::write(&scratch_path, ext.as_slice()),
                Body::Dumped { .. } => unreachable!(),
            }
        };

        if let Err(err) = bytes_written {
            log::error!("failed to dump buffer {}: {err}", handle.id());
            let _ = fs::remove_file(&scratch_path);
            return false;
        }

        let info = {
            let mut registry = self.registry.write();
            let record = registry.records.get_mut(&handle).expect("checked above");
            // An external buffer's RAM was never freed (the manager doesn't
            // own it); carry the pointer forward so `restore` can hand the
            // bytes back through it instead of allocating a buffer the
            // caller never registered.
            let external = match std::mem::replace(&mut record.body, Body::Dumped { path: scratch_path.clone(), external: None }) {
                Body::Resident(Storage::External(ext)) => Some(ext),
                Body::Resident(Storage::Owned(_)) => None,
                Body::Dumped { .. } => unreachable!(),
            };
            record.body = Body::Dumped { path: scratch_path, external };
            record.to_info()
        };
        self.current_policy().on_dump_success(handle, &info);
        true
    }

    /// Force-load a dumped buffer back into RAM. Fails if already resident;
    /// a short read leaves the buffer non-resident so the caller may retry
    /// (spec §4.4.3).
    pub fn restore(&self, handle: Handle) -> bool {
        let (scratch_path, mut external) = {
            let registry = self.registry.read();
            let Some(record) = registry.records.get(&handle) else {
                return false;
            };
            match &record.body {
                Body::Dumped { path, external } => (path.clone(), *external),
                Body::Resident(_) => return false,
            }
        };

        let expected_size = match self.registry.read().records.get(&handle) {
            Some(record) => record.size,
            None => return false,
        };

        let bytes = match fs::read(&scratch_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("failed to restore buffer {}: {err}", handle.id());
                return false;
            }
        };

        if bytes.len() as u64 != expected_size {
            log::error!(
                "short read restoring buffer {}: expected {expected_size} bytes, got {}",
                handle.id(),
                bytes.len()
            );
            return false;
        }

        if let Err(err) = fs::remove_file(&scratch_path) {
            log::warn!("failed to delete scratch file {}: {err}", scratch_path.display());
        }

        let info = {
            let mut registry = self.registry.write();
            let Some(record) = registry.records.get_mut(&handle) else {
                return false;
            };
            record.body = match external.take() {
                // The caller's memory never moved; copy the dumped bytes
                // back into it rather than switching this handle over to a
                // manager-owned buffer it was never registered with.
                Some(mut ext) => {
                    ext.as_slice_mut().copy_from_slice(&bytes);
                    Body::Resident(Storage::External(ext))
                }
                None => Body::Resident(Storage::Owned(bytes)),
            };
            record.last_access = self.stamp();
            record.to_info()
        };
        self.current_policy().on_restore_success(handle, &info);
        true
    }

    fn is_resident(&self, handle: Handle) -> Result<bool> {
        let registry = self.registry.read();
        let record = registry.records.get(&handle).ok_or(MemoryError::UnknownHandle(handle))?;
        Ok(matches!(record.body, Body::Resident(_)))
    }

    /// Current aggregate totals (spec §4.4.1).
    #[must_use]
    pub fn stats(&self) -> Stats {
        let registry = self.registry.read();
        let mut total_managed = 0_u64;
        let mut total_dumped = 0_u64;
        for record in registry.records.values() {
            total_managed += record.size;
            if matches!(record.body, Body::Dumped { .. }) {
                total_dumped += record.size;
            }
        }
        Stats {
            total_managed,
            total_dumped,
            num_buffers: registry.records.len(),
        }
    }

    /// Snapshot a single buffer's metadata.
    #[must_use]
    pub fn info(&self, handle: Handle) -> Option<BufferInfo> {
        self.registry.read().records.get(&handle).map(Record::to_info)
    }

    /// The resident, unlocked, nonzero-size record with the smallest
    /// `last_access`, ties broken by handle id (spec §4.4.4). Used by
    /// policies to pick what to dump next.
    #[must_use]
    pub fn eviction_candidate(&self) -> Option<Handle> {
        let registry = self.registry.read();
        registry
            .records
            .iter()
            .filter(|(_, record)| record.is_evictable())
            .min_by_key(|(handle, record)| (record.last_access, handle.id()))
            .map(|(handle, _)| *handle)
    }

    /// Attach a new policy and ask it to re-evaluate immediately.
    pub fn set_policy(&self, policy: Arc<dyn EvictionPolicy>) {
        *self.policy.write() = policy;
        self.refresh();
    }

    /// Ask the installed policy to re-evaluate against current state.
    pub fn refresh(&self) {
        self.current_policy().refresh(self);
    }

    /// Change the scratch directory. Must be called while the registry is
    /// empty (spec §4.4.1).
    pub fn set_scratch_dir(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut registry = self.registry.write();
        if !registry.records.is_empty() {
            return Err(MemoryError::InvalidState(
                "scratch dir can only change while the registry is empty",
            ));
        }
        let path = path.as_ref();
        if let Err(err) = fs::create_dir_all(path) {
            log::warn!("failed to create scratch dir {}: {err}", path.display());
        }
        registry.scratch_dir = path.to_path_buf();
        Ok(())
    }
}
