//! Shared-memory registry
//!
//! Lets processes publish and join a single page of physical memory under a
//! 64-bit id. Every process holds at most one attachment at a time (its
//! `shm` field); joining the same id twice is a no-op, and releasing an id
//! the process never joined is a no-op too, rather than a hard failure.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::error::{Result, ShmError};
use crate::{
    arch,
    mm::{self, PageFlags, PhysicalAddress, VirtualAddress, PAGE_SIZE, SHARE_MEMORY},
    process,
};

/// Number of shared-memory slots the registry can hold. A host-kernel
/// tuning knob, not a process-table-wide limit (`process::MAX_PROCESSES`
/// would be a different, larger number).
pub const NPROC: usize = 64;

/// Multiplier for the `unique_id` splitmix-style mixer (spec.md §4.2).
const MIX_PRIME: u64 = 1_099_511_628_211;

/// Process-wide evolving mixer state, combined with each call's seed so that
/// successive allocations to the same physical address (after reuse) yield
/// different ids with high probability.
static ID_STATE: AtomicU64 = AtomicU64::new(0);

/// `unique_id(seed)`: mix `seed` (the physical address of the newly
/// allocated page) with the evolving `ID_STATE`, store the result back to
/// `ID_STATE`, and return it. Never returns 0 — that value is reserved to
/// mean "no attachment" in `Process::shm` and "empty slot" in `ShmSlot::id`.
/// `ID_STATE` is updated with a compare-exchange so concurrent callers each
/// observe a distinct prior state rather than racing a plain store. On the
/// astronomically unlikely `h == 0` outcome, the seed is perturbed before
/// re-mixing — re-reading the now-committed (zero) state alone would mix to
/// the same zero result every time.
fn unique_id(seed: u64) -> u64 {
    let mut seed = seed;
    loop {
        let state = ID_STATE.load(Ordering::Relaxed);
        let mut h = seed.wrapping_add(state);
        h ^= h >> 30;
        h = h.wrapping_mul(MIX_PRIME);
        h ^= h >> 27;
        h = h.wrapping_mul(MIX_PRIME);
        h ^= h >> 31;

        if ID_STATE
            .compare_exchange_weak(state, h, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            continue;
        }
        if h != 0 {
            return h;
        }
        seed = seed.wrapping_add(1);
    }
}

#[derive(Clone, Copy)]
struct ShmSlot {
    /// 0 means this slot is empty.
    id: u64,
    phys_addr: u64,
    refcount: u32,
}

impl ShmSlot {
    const EMPTY: Self = Self {
        id: 0,
        phys_addr: 0,
        refcount: 0,
    };
}

struct ShmRegistryInner {
    slots: [ShmSlot; NPROC],
}

impl ShmRegistryInner {
    const fn new() -> Self {
        Self {
            slots: [ShmSlot::EMPTY; NPROC],
        }
    }

    /// Locate the slot holding `id`. Returns `None` instead of an
    /// out-of-range index — panicking on a lookup miss would hand remote
    /// callers a crash for a routine "unknown id" condition.
    fn find(&self, id: u64) -> Option<usize> {
        self.slots.iter().position(|s| s.id == id)
    }
}

/// The shared-memory registry.
pub struct ShmRegistry {
    inner: Mutex<ShmRegistryInner>,
}

/// Global shared-memory registry instance.
pub static SHM_REGISTRY: ShmRegistry = ShmRegistry::new();

impl ShmRegistry {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(ShmRegistryInner::new()),
        }
    }

    /// Map `phys` at the well-known `SHARE_MEMORY` virtual address in the
    /// current process's page table. Every joiner sees the shared page at
    /// this same address, never at an address derived from the physical
    /// frame.
    fn map_into_current(&self, phys: PhysicalAddress) {
        arch::mmu::map_pages(
            process::current_page_table(),
            VirtualAddress::new(SHARE_MEMORY),
            PAGE_SIZE,
            phys,
            PageFlags::PRESENT | PageFlags::USER | PageFlags::WRITABLE,
        );
    }

    fn unmap_from_current(&self) {
        arch::mmu::unmap_pages(process::current_page_table(), VirtualAddress::new(SHARE_MEMORY), PAGE_SIZE);
    }

    /// Publish a new page of shared memory and attach the current process
    /// to it. Returns the new id.
    pub fn shm_get(&self) -> Result<u64> {
        if let Some(proc) = process::current_process() {
            if proc.shm_id() != 0 {
                return Err(ShmError::DoubleAttach);
            }
        }

        let frame = mm::frame_allocator::alloc_page();
        let id = unique_id(frame.as_u64());

        let mut inner = self.inner.lock();
        let Some(idx) = inner.slots.iter().position(|s| s.id == 0) else {
            drop(inner);
            mm::frame_allocator::free_page(frame);
            return Err(ShmError::Exhausted);
        };
        inner.slots[idx] = ShmSlot {
            id,
            phys_addr: frame.as_u64(),
            refcount: 1,
        };
        drop(inner);

        self.map_into_current(frame);
        if let Some(proc) = process::current_process() {
            proc.set_shm_id(id);
        }

        log::debug!("[SHM] shm_get: new id {id:#x} at {frame:?}");
        Ok(id)
    }

    /// Attach the current process to an existing shared-memory id.
    /// Idempotent: joining an id the process already holds just returns
    /// `SHARE_MEMORY` again without bumping the reference count. Always
    /// returns the same well-known virtual address; the physical frame
    /// behind it is an implementation detail callers never see.
    pub fn shm_join(&self, id: u64) -> Result<VirtualAddress> {
        if id == 0 {
            return Err(ShmError::UnknownId);
        }

        if let Some(proc) = process::current_process() {
            if proc.shm_id() == id {
                let inner = self.inner.lock();
                inner.find(id).ok_or(ShmError::UnknownId)?;
                return Ok(VirtualAddress::new(SHARE_MEMORY));
            }
            if proc.shm_id() != 0 {
                return Err(ShmError::DoubleAttach);
            }
        }

        let phys = {
            let mut inner = self.inner.lock();
            let idx = inner.find(id).ok_or(ShmError::UnknownId)?;
            inner.slots[idx].refcount += 1;
            PhysicalAddress::new(inner.slots[idx].phys_addr)
        };

        self.map_into_current(phys);
        if let Some(proc) = process::current_process() {
            proc.set_shm_id(id);
        }

        log::debug!("[SHM] shm_join: id {id:#x}");
        Ok(VirtualAddress::new(SHARE_MEMORY))
    }

    /// Release the current process's shared-memory attachment, if any.
    /// A process that holds none is a no-op, not an error.
    pub fn shm_free(&self) -> Result<()> {
        let Some(proc) = process::current_process() else {
            return Ok(());
        };
        let id = proc.shm_id();
        if id == 0 {
            return Ok(());
        }

        let (phys, last) = {
            let mut inner = self.inner.lock();
            let Some(idx) = inner.find(id) else {
                return Err(ShmError::UnknownId);
            };
            inner.slots[idx].refcount = inner.slots[idx]
                .refcount
                .checked_sub(1)
                .expect("shm: refcount underflow (double free)");
            let last = inner.slots[idx].refcount == 0;
            let phys = PhysicalAddress::new(inner.slots[idx].phys_addr);
            if last {
                inner.slots[idx] = ShmSlot::EMPTY;
            }
            (phys, last)
        };

        self.unmap_from_current();
        proc.set_shm_id(0);
        if last {
            mm::frame_allocator::free_page(phys);
        }

        log::debug!("[SHM] shm_free: id {id:#x}, last attachment={last}");
        Ok(())
    }
}

/// Initialize the shared-memory registry. A no-op beyond logging: the
/// registry's backing storage is a static array, already zeroed.
pub fn init() {
    log::debug!("[SHM] registry initialized: {NPROC} slots");
}

/// Publish a new page of shared memory (`shmget` syscall body).
pub fn shm_get() -> Result<u64> {
    SHM_REGISTRY.shm_get()
}

/// Attach to an existing page of shared memory (`shmjoin` syscall body).
/// Always resolves to the well-known `SHARE_MEMORY` virtual address.
pub fn shm_join(id: u64) -> Result<VirtualAddress> {
    SHM_REGISTRY.shm_join(id)
}

/// Release the current process's shared-memory attachment (`shmfree`
/// syscall body).
pub fn shm_free() -> Result<()> {
    SHM_REGISTRY.shm_free()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn setup() -> process::ProcessId {
        mm::frame_allocator::init();
        process::create_process(None).expect("process creation")
    }

    #[test]
    fn get_then_free_round_trip() {
        let pid = setup();
        process::set_current(pid);

        let id = SHM_REGISTRY.shm_get().unwrap();
        assert_ne!(id, 0);
        assert_eq!(process::current_process().unwrap().shm_id(), id);

        SHM_REGISTRY.shm_free().unwrap();
        assert_eq!(process::current_process().unwrap().shm_id(), 0);
    }

    #[test]
    fn double_attach_is_rejected() {
        let pid = setup();
        process::set_current(pid);

        SHM_REGISTRY.shm_get().unwrap();
        assert_eq!(SHM_REGISTRY.shm_get().unwrap_err(), ShmError::DoubleAttach);

        SHM_REGISTRY.shm_free().unwrap();
    }

    #[test]
    fn joining_unknown_id_is_an_error_not_a_panic() {
        let pid = setup();
        process::set_current(pid);

        assert_eq!(SHM_REGISTRY.shm_join(0xdead_beef).unwrap_err(), ShmError::UnknownId);
    }

    #[test]
    fn rejoining_the_same_id_is_idempotent() {
        let pid = setup();
        process::set_current(pid);

        let id = SHM_REGISTRY.shm_get().unwrap();
        let first = SHM_REGISTRY.shm_join(id).unwrap();
        let second = SHM_REGISTRY.shm_join(id).unwrap();
        assert_eq!(first, second);

        SHM_REGISTRY.shm_free().unwrap();
    }

    #[test]
    fn freeing_without_attachment_is_a_no_op() {
        let pid = setup();
        process::set_current(pid);
        assert!(SHM_REGISTRY.shm_free().is_ok());
    }

    /// Simulates the fork/exec producer-consumer pattern as two distinct
    /// processes joining the same id, since `fork()` itself is out of scope
    /// for this crate.
    #[test]
    fn two_processes_observe_each_others_writes_through_the_shared_page() {
        mm::frame_allocator::init();
        let producer = process::create_process(None).unwrap();
        let consumer = process::create_process(None).unwrap();

        process::set_current(producer);
        let id = SHM_REGISTRY.shm_get().unwrap();
        let va = SHM_REGISTRY.shm_join(id).unwrap();
        assert_eq!(va, VirtualAddress::new(SHARE_MEMORY));

        // The arch-layer page-table walk is a stub in this build (see
        // `arch::mmu`), so there is no real mapping from `SHARE_MEMORY` to
        // back it in a unit test; reach the slot's physical frame directly
        // to simulate the write/read a real mapped access would perform.
        let phys = {
            let inner = SHM_REGISTRY.inner.lock();
            let idx = inner.find(id).unwrap();
            inner.slots[idx].phys_addr
        };

        // SAFETY: `phys` is a page-aligned frame this test exclusively
        // controls; writing the first 8 bytes is within bounds.
        unsafe {
            core::ptr::write(phys as *mut u64, 0x1234_5678);
        }

        process::set_current(consumer);
        let joined_va = SHM_REGISTRY.shm_join(id).unwrap();
        assert_eq!(joined_va, VirtualAddress::new(SHARE_MEMORY));

        // SAFETY: same frame, now read back from the second process.
        let observed = unsafe { core::ptr::read(phys as *const u64) };
        assert_eq!(observed, 0x1234_5678);

        SHM_REGISTRY.shm_free().unwrap();
        process::set_current(producer);
        SHM_REGISTRY.shm_free().unwrap();
    }

    #[test]
    fn registry_exhaustion_is_recoverable() {
        mm::frame_allocator::init();
        let mut holders = [process::ProcessId(0); NPROC];
        for slot in holders.iter_mut() {
            let pid = process::create_process(None).unwrap();
            process::set_current(pid);
            SHM_REGISTRY.shm_get().unwrap();
            *slot = pid;
        }

        let extra = process::create_process(None).unwrap();
        process::set_current(extra);
        assert_eq!(SHM_REGISTRY.shm_get().unwrap_err(), ShmError::Exhausted);

        for pid in holders {
            process::set_current(pid);
            SHM_REGISTRY.shm_free().unwrap();
        }
    }
}
