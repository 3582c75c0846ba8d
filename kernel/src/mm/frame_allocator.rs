//! Physical frame allocator
//!
//! Backs the shared-memory registry's one-page-per-slot allocations with a
//! simple bitmap over a fixed, statically reserved pool of physical frames.
//! The kernel heap itself (`mm::buddy`) does not use this allocator: its
//! backing store is one contiguous static region, sized and mapped once at
//! boot.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use super::{PhysicalAddress, PAGE_SIZE};

/// Number of frames carved out for shared-memory pages. One per possible
/// shared-memory slot (`ipc::shared_memory::NPROC`) is the minimum a
/// correct implementation needs; double it for headroom.
const NUM_FRAMES: usize = 128;

/// Backing storage for the frame pool. Page-aligned by construction: a
/// `[[u8; PAGE_SIZE]; NUM_FRAMES]` array is aligned to its element type's
/// alignment, but we need page alignment, so force it explicitly.
#[repr(align(4096))]
struct FramePool([[u8; PAGE_SIZE]; NUM_FRAMES]);

static mut FRAME_POOL: FramePool = FramePool([[0; PAGE_SIZE]; NUM_FRAMES]);

/// A physical frame number within the frame pool (not a system-wide PFN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(usize);

impl FrameNumber {
    pub const fn new(n: usize) -> Self {
        Self(n)
    }

    pub const fn as_usize(&self) -> usize {
        self.0
    }
}

/// Frame allocator failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Frame pool exhausted. `alloc_page` panics on exhaustion rather than
    /// propagating this variant, so callers never observe it directly (it
    /// is converted to a panic at the seam below).
    Exhausted,
    /// `free_page` called with an address outside the pool, or a frame
    /// that is not currently allocated.
    InvalidFrame,
}

pub type Result<T> = core::result::Result<T, FrameError>;

struct Bitmap {
    words: [AtomicU64; NUM_FRAMES.div_ceil(64)],
    free_count: AtomicUsize,
}

impl Bitmap {
    const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            words: [ZERO; NUM_FRAMES.div_ceil(64)],
            free_count: AtomicUsize::new(NUM_FRAMES),
        }
    }

    /// Find and claim the first clear bit. Returns `None` if the pool is
    /// full.
    fn alloc(&self) -> Option<usize> {
        for (word_idx, word) in self.words.iter().enumerate() {
            let mut current = word.load(Ordering::Relaxed);
            loop {
                if current == u64::MAX {
                    break;
                }
                let bit = current.trailing_ones();
                let mask = 1u64 << bit;
                match word.compare_exchange_weak(
                    current,
                    current | mask,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        self.free_count.fetch_sub(1, Ordering::Relaxed);
                        return Some(word_idx * 64 + bit as usize);
                    }
                    Err(observed) => current = observed,
                }
            }
        }
        None
    }

    fn free(&self, index: usize) -> Result<()> {
        let word_idx = index / 64;
        let bit = index % 64;
        let mask = 1u64 << bit;
        let prev = self.words[word_idx].fetch_and(!mask, Ordering::AcqRel);
        if prev & mask == 0 {
            return Err(FrameError::InvalidFrame);
        }
        self.free_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Bitmap frame allocator over the static frame pool.
pub struct BitmapFrameAllocator {
    bitmap: Bitmap,
    base: AtomicU64,
}

impl BitmapFrameAllocator {
    pub const fn new() -> Self {
        Self {
            bitmap: Bitmap::new(),
            base: AtomicU64::new(0),
        }
    }

    fn base_addr(&self) -> u64 {
        self.base.load(Ordering::Relaxed)
    }

    /// Allocate a single physical frame. Panics on exhaustion: callers own
    /// keeping pool sizing ahead of demand.
    pub fn alloc_page(&self) -> PhysicalAddress {
        match self.bitmap.alloc() {
            Some(index) => {
                let addr = self.base_addr() + (index * PAGE_SIZE) as u64;
                log::trace!("[FRAME] allocated frame {index} at {addr:#x}");
                PhysicalAddress::new(addr)
            }
            None => panic!("frame_allocator: out of physical frames"),
        }
    }

    /// Release a single physical frame previously returned by `alloc_page`.
    pub fn free_page(&self, pa: PhysicalAddress) {
        let offset = pa.as_u64().wrapping_sub(self.base_addr());
        let index = (offset / PAGE_SIZE as u64) as usize;
        if index >= NUM_FRAMES || offset % PAGE_SIZE as u64 != 0 {
            panic!("frame_allocator: free_page of address not owned by this pool");
        }
        self.bitmap
            .free(index)
            .expect("frame_allocator: double free of physical frame");
        log::trace!("[FRAME] freed frame {index}");
    }

    pub fn free_frames(&self) -> usize {
        self.bitmap.free_count.load(Ordering::Relaxed)
    }
}

/// Global physical frame allocator.
pub static FRAME_ALLOCATOR: Mutex<BitmapFrameAllocator> = Mutex::new(BitmapFrameAllocator::new());

/// Initialize the frame allocator's backing pool. Must run once at boot,
/// before `ipc::shared_memory` or `mm::buddy` can be used.
pub fn init() {
    // SAFETY: taking the address of the static frame pool for use as the
    // allocator's base. No aliasing occurs: all access thereafter happens
    // through frames handed out by `alloc_page`/`free_page`, one at a time.
    let base = unsafe { core::ptr::addr_of!(FRAME_POOL) as u64 };
    FRAME_ALLOCATOR.lock().base.store(base, Ordering::Relaxed);
    log::debug!("[FRAME] pool initialized: {NUM_FRAMES} frames at {base:#x}");
}

/// Allocate one physical page. Panics if the pool is exhausted.
pub fn alloc_page() -> PhysicalAddress {
    FRAME_ALLOCATOR.lock().alloc_page()
}

/// Free one physical page previously returned by `alloc_page`.
pub fn free_page(pa: PhysicalAddress) {
    FRAME_ALLOCATOR.lock().free_page(pa)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_roundtrip() {
        init();
        let a = alloc_page();
        let b = alloc_page();
        assert_ne!(a, b);
        free_page(a);
        free_page(b);
    }

    #[test]
    fn reuses_freed_frames() {
        init();
        let before = FRAME_ALLOCATOR.lock().free_frames();
        let a = alloc_page();
        free_page(a);
        let after = FRAME_ALLOCATOR.lock().free_frames();
        assert_eq!(before, after);
    }
}
