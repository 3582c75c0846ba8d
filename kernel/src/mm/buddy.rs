//! Kernel heap allocator — buddy allocator
//!
//! Manages a fixed-size heap region and serves per-process allocations of
//! power-of-two-sized blocks to user processes via the `malloc`/`free`
//! system calls. Free blocks are kept on one singly linked list per scale;
//! the link is stored in the block's own first machine word (no separate
//! free-block header), so a free list never costs more memory than the
//! blocks on it.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::{PageFlags, PhysicalAddress, VirtualAddress, PAGE_SIZE};
use crate::{arch, process};

/// Size of the smallest block, in bytes.
pub const UNIT_SIZE: u64 = 32;

/// Number of block scales, from `UNIT_SIZE` up to `UNIT_SIZE * 2^(SCALE_NUMBER-1)`.
pub const SCALE_NUMBER: usize = 20;

/// Total heap size: `UNIT_SIZE * 2^(SCALE_NUMBER - 1)` = 16 MiB.
pub const HEAP_SIZE: usize = (UNIT_SIZE as usize) << (SCALE_NUMBER - 1);

/// Mask that extracts a block's offset within the heap. Valid only because
/// the heap region below is aligned to `HEAP_SIZE`.
pub const HEAP_MASK: u64 = HEAP_SIZE as u64 - 1;

/// Number of 4 KiB pages covered by the heap.
const NUM_HEAP_PAGES: usize = HEAP_SIZE / PAGE_SIZE;

/// The heap's backing storage. Aligned to its own size so that
/// `addr & HEAP_MASK` yields the in-heap offset directly.
#[repr(align(16777216))]
struct HeapStorage([u8; HEAP_SIZE]);

static mut HEAP_STORAGE: HeapStorage = HeapStorage([0; HEAP_SIZE]);

/// Allocated-object header. Every pointer handed back by `heap_alloc` is
/// preceded by one of these; `heap_free` walks back `HEADER_SIZE` bytes to
/// recover it. Free blocks carry no header — only the scale they were
/// allocated at needs remembering, and only while they're live.
#[repr(C)]
struct Header {
    scale: u64,
}

const HEADER_SIZE: usize = core::mem::size_of::<Header>();

/// Errors the heap manager can report to callers. `TooLarge` and
/// `OutOfMemory` are recoverable request-shape problems; anything else
/// (buddy-merge finding a wrongly sized block, a corrupt header) is an
/// internal consistency violation and panics instead of returning here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// Requested size exceeds the largest block the heap can produce.
    TooLarge,
    /// No block at any scale satisfies the caller's affinity.
    OutOfMemory,
}

pub type Result<T> = core::result::Result<T, HeapError>;

/// Mutable heap state, guarded by `HeapManager`'s single spinlock.
struct HeapInner {
    /// One free-list head per scale; 0 means empty. Heads are raw heap
    /// addresses, never 0 for a real block (the heap base is nonzero).
    free_lists: [u64; SCALE_NUMBER],
    /// Owner-affinity token per heap page; 0 means unowned.
    procs: [u8; NUM_HEAP_PAGES],
    /// Outstanding `wrap_alloc` count per heap page; drives VM map/unmap.
    reman: [u8; NUM_HEAP_PAGES],
}

impl HeapInner {
    const fn new() -> Self {
        Self {
            free_lists: [0; SCALE_NUMBER],
            procs: [0; NUM_HEAP_PAGES],
            reman: [0; NUM_HEAP_PAGES],
        }
    }
}

/// The buddy-allocated kernel heap.
pub struct HeapManager {
    inner: Mutex<HeapInner>,
    base: AtomicU64,
}

/// Global heap manager instance.
pub static HEAP_MANAGER: HeapManager = HeapManager::new();

impl HeapManager {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(HeapInner::new()),
            base: AtomicU64::new(0),
        }
    }

    fn base_addr(&self) -> u64 {
        self.base.load(Ordering::Relaxed)
    }

    const fn scale_to_size(scale: usize) -> u64 {
        UNIT_SIZE << scale
    }

    fn pages_of(scale: usize) -> usize {
        (Self::scale_to_size(scale) as usize).div_ceil(PAGE_SIZE).max(1)
    }

    /// Lowest set bit distinguishing a scale-`s` block from its buddy.
    /// Degenerates to 0 at the top scale — callers must not attempt to merge
    /// at `SCALE_NUMBER - 1`.
    fn block_bit(scale: usize) -> u64 {
        Self::scale_to_size(scale) & HEAP_MASK
    }

    fn page_index(&self, addr: u64) -> usize {
        ((addr & HEAP_MASK) / PAGE_SIZE as u64) as usize
    }

    /// Smallest scale whose block holds `units` allocation units. Computed
    /// directly from `units`, never inferred inside the scan loop — an
    /// inferred minscale drifts low when the scan starts from a stale
    /// cursor, handing back undersized blocks.
    fn min_scale_for(units: u64) -> usize {
        let mut s = 0;
        while (1u64 << s) < units {
            s += 1;
        }
        s
    }

    fn read_next(addr: u64) -> u64 {
        // SAFETY: `addr` is the address of a block currently on a free
        // list; its first machine word is reserved for this link by
        // construction (only free blocks' payloads are touched this way).
        unsafe { core::ptr::read(addr as *const u64) }
    }

    fn write_next(addr: u64, next: u64) {
        // SAFETY: see `read_next`.
        unsafe { core::ptr::write(addr as *mut u64, next) }
    }

    fn list_push(inner: &mut HeapInner, scale: usize, addr: u64) {
        Self::write_next(addr, inner.free_lists[scale]);
        inner.free_lists[scale] = addr;
    }

    /// Remove and return the first block in scale `scale`'s free list
    /// matching `predicate`, preserving the order of the rest.
    fn list_remove_matching(
        inner: &mut HeapInner,
        scale: usize,
        predicate: impl Fn(u64) -> bool,
    ) -> Option<u64> {
        let mut prev = 0u64;
        let mut cur = inner.free_lists[scale];
        while cur != 0 {
            let next = Self::read_next(cur);
            if predicate(cur) {
                if prev == 0 {
                    inner.free_lists[scale] = next;
                } else {
                    Self::write_next(prev, next);
                }
                return Some(cur);
            }
            prev = cur;
            cur = next;
        }
        None
    }

    /// Find a block at `scale` whose page is unowned or owned by `token`.
    fn list_find_index(inner: &mut HeapInner, scale: usize, token: u8, heap_mask: u64) -> Option<u64> {
        Self::list_remove_matching(inner, scale, |addr| {
            let page = ((addr & heap_mask) / PAGE_SIZE as u64) as usize;
            let owner = inner_procs_peek(inner, page);
            owner == token || owner == 0
        })
    }

    fn list_find_buddy(inner: &mut HeapInner, scale: usize, buddy: u64) -> Option<u64> {
        Self::list_remove_matching(inner, scale, |addr| addr == buddy)
    }

    fn clear_procs(inner: &mut HeapInner, addr: u64, scale: usize, page_index: usize) {
        let _ = addr;
        let npages = Self::pages_of(scale);
        for p in page_index..page_index + npages {
            inner.procs[p] = 0;
        }
    }

    /// Raw buddy allocation: returns `(block address, scale allocated at)`.
    /// Scans free lists from the smallest scale that fits up to the top,
    /// splitting the first hit down to size.
    fn raw_alloc(&self, size: usize, token: u8) -> Result<(u64, usize)> {
        let units = (size as u64).div_ceil(UNIT_SIZE).max(1);
        if units > (1u64 << (SCALE_NUMBER - 1)) {
            return Err(HeapError::TooLarge);
        }
        let min_scale = Self::min_scale_for(units);

        let mut inner = self.inner.lock();
        for scale in min_scale..SCALE_NUMBER {
            let Some(block) = Self::list_find_index(&mut inner, scale, token, HEAP_MASK) else {
                continue;
            };

            // Split down from `scale` to `min_scale`, pushing each upper
            // half onto its own free list.
            for i in (min_scale + 1..=scale).rev() {
                let upper = block + Self::scale_to_size(i - 1);
                Self::list_push(&mut inner, i - 1, upper);
            }

            let page = self.page_index(block);
            let npages = Self::pages_of(min_scale);
            for p in page..page + npages {
                inner.procs[p] = token;
            }

            log::trace!(
                "[HEAP] raw_alloc: scale {scale}->{min_scale}, block {block:#x}, token {token}"
            );
            return Ok((block, min_scale));
        }

        Err(HeapError::OutOfMemory)
    }

    /// Raw buddy free with iterative buddy coalescing: walks up from
    /// `scale_at_alloc` merging with the buddy block as long as it's free.
    fn raw_free(&self, addr: u64, scale_at_alloc: usize) {
        let mut inner = self.inner.lock();
        let orig_page = self.page_index(addr);
        let mut cur = addr;
        let mut scale = scale_at_alloc;

        // Bounded explicitly below SCALE_NUMBER - 1: the top scale's
        // buddy-bit calculation degenerates to 0, so merging must never be
        // attempted there.
        while scale < SCALE_NUMBER - 1 {
            let heap_offset = cur & HEAP_MASK;
            let heap_base = cur - heap_offset;
            let buddy = (heap_offset ^ Self::block_bit(scale)) + heap_base;

            if Self::list_find_buddy(&mut inner, scale, buddy).is_some() {
                let merged_offset = heap_offset & !Self::block_bit(scale);
                cur = merged_offset + heap_base;
                scale += 1;
            } else {
                Self::list_push(&mut inner, scale, cur);
                Self::clear_procs(&mut inner, addr, scale_at_alloc, orig_page);
                log::trace!("[HEAP] raw_free: settled at scale {scale}, block {cur:#x}");
                return;
            }
        }

        Self::list_push(&mut inner, SCALE_NUMBER - 1, cur);
        Self::clear_procs(&mut inner, addr, scale_at_alloc, orig_page);
        log::trace!("[HEAP] raw_free: coalesced to top scale, block {cur:#x}");
    }

    /// Allocate `size` bytes plus the allocated-object header, stamp
    /// `reman`, and map the block into the current process on the 0→1
    /// transition. Returns the user-visible pointer (past the header).
    fn wrap_alloc(&self, size: usize) -> Result<*mut u8> {
        let token = process::current_affinity_token();
        let total = size.checked_add(HEADER_SIZE).ok_or(HeapError::TooLarge)?;
        let (block, scale) = self.raw_alloc(total, token)?;

        // SAFETY: `block` is a freshly allocated, exclusively owned region
        // at least `HEADER_SIZE` bytes long.
        unsafe {
            (block as *mut Header).write(Header {
                scale: scale as u64,
            });
        }

        let page = self.page_index(block);
        let block_size = Self::scale_to_size(scale) as usize;
        let mut inner = self.inner.lock();
        let prev = inner.reman[page];
        inner.reman[page] = prev.wrapping_add(1);
        if prev == 0 {
            // Held across the VM mapper call: `arch::mmu::map_pages` is a
            // bounded, non-blocking page-table walk, not a reentrant call
            // back into the heap.
            arch::mmu::map_pages(
                process::current_page_table(),
                VirtualAddress::new(block),
                block_size,
                PhysicalAddress::new(block),
                PageFlags::PRESENT | PageFlags::USER | PageFlags::WRITABLE,
            );
        }
        drop(inner);

        Ok((block + HEADER_SIZE as u64) as *mut u8)
    }

    /// Recover the header preceding `ptr`, update `reman`, unmap on 1→0,
    /// then hand the block back to `raw_free`.
    fn wrap_free(&self, ptr: *mut u8) {
        let header_addr = ptr as u64 - HEADER_SIZE as u64;
        // SAFETY: `ptr` must have been returned by a prior `wrap_alloc`
        // call; the header immediately precedes it.
        let header = unsafe { (header_addr as *const Header).read() };
        let scale = header.scale as usize;
        let page = self.page_index(header_addr);
        let block_size = Self::scale_to_size(scale) as usize;

        let mut inner = self.inner.lock();
        let prev = inner.reman[page];
        let new = prev
            .checked_sub(1)
            .expect("heap: reman underflow (double free or corrupt header)");
        inner.reman[page] = new;
        if new == 0 {
            arch::mmu::unmap_pages(
                process::current_page_table(),
                VirtualAddress::new(header_addr),
                block_size,
            );
        }
        drop(inner);

        self.raw_free(header_addr, scale);
    }

    /// Allocate a zero-filled, user-mapped region of at least `size` bytes.
    pub fn heap_alloc(&self, size: usize) -> Result<*mut u8> {
        let ptr = self.wrap_alloc(size)?;
        // SAFETY: `ptr` is the fresh, exclusively owned region just
        // allocated; `size` is exactly the caller's requested length, the
        // only bytes the public contract promises to zero.
        unsafe {
            core::ptr::write_bytes(ptr, 0, size);
        }
        Ok(ptr)
    }

    /// Release a region previously returned by `heap_alloc`.
    pub fn heap_free(&self, ptr: *mut u8) {
        self.wrap_free(ptr);
    }

    /// Reset the heap to its post-boot state: one maximal free block at
    /// the top scale, `procs`/`reman` zeroed.
    pub fn init_heap(&self) {
        // SAFETY: run once, before any other thread can observe
        // `HEAP_STORAGE`; taking its address does not create an alias.
        let base = unsafe { core::ptr::addr_of_mut!(HEAP_STORAGE) as u64 };
        self.base.store(base, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        *inner = HeapInner::new();
        inner.free_lists[SCALE_NUMBER - 1] = base;
        Self::write_next(base, 0);

        log::debug!(
            "[HEAP] initialized: {} MiB at {base:#x}",
            HEAP_SIZE / (1024 * 1024)
        );
    }
}

/// Read a `procs` entry without re-borrowing `inner` mutably; used inside
/// `list_find_index`'s closure, which only needs read access.
fn inner_procs_peek(inner: &HeapInner, page: usize) -> u8 {
    inner.procs[page]
}

/// Initialize the kernel heap. Called once at boot.
pub fn init_heap() {
    HEAP_MANAGER.init_heap();
}

/// Allocate `size` bytes for the current process (`malloc` syscall body).
pub fn heap_alloc(size: usize) -> Result<*mut u8> {
    HEAP_MANAGER.heap_alloc(size)
}

/// Free a region previously returned by `heap_alloc` (`free` syscall body).
pub fn heap_free(ptr: *mut u8) {
    HEAP_MANAGER.heap_free(ptr)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn fresh_heap() -> &'static HeapManager {
        HEAP_MANAGER.init_heap();
        &HEAP_MANAGER
    }

    fn free_list_snapshot(mgr: &HeapManager) -> [u64; SCALE_NUMBER] {
        let inner = mgr.inner.lock();
        let mut counts = [0u64; SCALE_NUMBER];
        for (scale, count) in counts.iter_mut().enumerate() {
            let mut cur = inner.free_lists[scale];
            while cur != 0 {
                *count += 1;
                cur = HeapManager::read_next(cur);
            }
        }
        counts
    }

    fn procs_all_zero(mgr: &HeapManager) -> bool {
        mgr.inner.lock().procs.iter().all(|&b| b == 0)
    }

    fn reman_all_zero(mgr: &HeapManager) -> bool {
        mgr.inner.lock().reman.iter().all(|&b| b == 0)
    }

    #[test]
    fn fresh_heap_has_single_top_scale_block() {
        let mgr = fresh_heap();
        let counts = free_list_snapshot(mgr);
        for (scale, &count) in counts.iter().enumerate() {
            if scale == SCALE_NUMBER - 1 {
                assert_eq!(count, 1, "top scale must hold exactly one block");
            } else {
                assert_eq!(count, 0, "scale {scale} must start empty");
            }
        }
        assert!(procs_all_zero(mgr));
        assert!(reman_all_zero(mgr));
    }

    #[test]
    fn small_alloc_round_trip_restores_fresh_state() {
        let mgr = fresh_heap();
        let p = mgr.heap_alloc(200).unwrap();
        // SAFETY: p..p+200 was just allocated and zero-filled for us.
        unsafe {
            core::ptr::write_bytes(p, 10, 200);
        }
        mgr.heap_free(p);

        assert_eq!(free_list_snapshot(mgr), free_list_snapshot(&HeapManager::new_for_comparison()));
        assert!(procs_all_zero(mgr));
        assert!(reman_all_zero(mgr));
    }

    #[test]
    fn split_cascade_then_coalesce() {
        let mgr = fresh_heap();
        let before = free_list_snapshot(mgr);

        let a = mgr.heap_alloc(1000).unwrap();
        let after_alloc = free_list_snapshot(mgr);
        assert_eq!(after_alloc[SCALE_NUMBER - 1], 0, "top scale must be drained by the split");
        let populated: usize = after_alloc[..SCALE_NUMBER - 1].iter().filter(|&&c| c > 0).count();
        assert!(populated > 0, "splitting must leave buddies on intermediate scales");

        mgr.heap_free(a);
        assert_eq!(free_list_snapshot(mgr), before);
    }

    #[test]
    fn multiple_sizes_then_free_all_restores_fresh_state() {
        let mgr = fresh_heap();
        let before = free_list_snapshot(mgr);

        let a = mgr.heap_alloc(1000).unwrap();
        let b = mgr.heap_alloc(500).unwrap();
        let c = mgr.heap_alloc(1000).unwrap();
        let d = mgr.heap_alloc(2000).unwrap();
        let e = mgr.heap_alloc(8 * 1024 * 1024 - 8).unwrap();

        mgr.heap_free(a);
        mgr.heap_free(b);
        mgr.heap_free(c);
        mgr.heap_free(d);
        mgr.heap_free(e);

        assert_eq!(free_list_snapshot(mgr), before);
        assert!(procs_all_zero(mgr));
        assert!(reman_all_zero(mgr));
    }

    #[test]
    fn too_large_request_is_recoverable() {
        let mgr = fresh_heap();
        let err = mgr.heap_alloc(HEAP_SIZE * 2).unwrap_err();
        assert_eq!(err, HeapError::TooLarge);
    }

    #[test]
    fn exhaustion_is_recoverable_out_of_memory() {
        let mgr = fresh_heap();
        // The whole heap, minus the header, as one allocation leaves
        // nothing for a second one of any size.
        let _a = mgr.heap_alloc(HEAP_SIZE - 64).unwrap();
        let err = mgr.heap_alloc(UNIT_SIZE as usize).unwrap_err();
        assert_eq!(err, HeapError::OutOfMemory);
    }

    impl HeapManager {
        /// Test helper: a second, freshly initialized heap manager purely
        /// to compare free-list shapes against. Never installed globally.
        fn new_for_comparison() -> Self {
            let mgr = Self::new();
            mgr.base.store(HEAP_MANAGER.base_addr(), Ordering::Relaxed);
            let mut inner = mgr.inner.lock();
            inner.free_lists[SCALE_NUMBER - 1] = HEAP_MANAGER.base_addr();
            drop(inner);
            mgr
        }
    }
}
