//! Memory management module
//!
//! Hosts the kernel heap manager (buddy allocator) and the physical frame
//! allocator that backs shared-memory pages.

#![allow(dead_code)]

pub mod buddy;
pub mod frame_allocator;

pub use buddy::{HeapError, HeapManager, HEAP_MANAGER};
pub use frame_allocator::{FrameError, FRAME_ALLOCATOR};

/// Physical memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

/// Virtual memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }
}

/// Page size in bytes. This subsystem only deals in one page size; huge
/// pages are out of scope.
pub const PAGE_SIZE: usize = 4096;

/// Fixed virtual address where a process's attached shared-memory page (if
/// any) is mapped. Every process that joins a shared page sees it here,
/// regardless of the underlying physical frame — callers never learn or
/// depend on the physical address.
pub const SHARE_MEMORY: u64 = 0x0000_7000_0000_0000;

/// Page table handle (external collaborator; see `arch::mmu`).
#[derive(Debug, Clone, Copy)]
pub struct PageTable {
    pub root_phys: PhysicalAddress,
}

impl PageTable {
    pub const fn new(root_phys: PhysicalAddress) -> Self {
        Self { root_phys }
    }
}

bitflags::bitflags! {
    /// Page table entry flags passed to `map_pages`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT    = 1 << 0;
        const WRITABLE   = 1 << 1;
        const USER       = 1 << 2;
        const NO_EXECUTE = 1 << 63;
    }
}

/// Initialize memory management: frame allocator, then the heap manager.
pub fn init() {
    println!("[MM] Initializing memory management...");
    frame_allocator::init();
    buddy::init_heap();
    println!("[MM] Memory management initialized");
}
