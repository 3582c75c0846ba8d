//! Process Control Block (PCB) implementation
//!
//! The PCB is the data structure representing a process in the kernel. It
//! carries only what the memory subsystem needs: an identity, the small
//! affinity token the heap manager stamps into `procs`, the one
//! shared-memory id the process currently holds, and its page table handle.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::mm::PageTable;

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process Control Block
pub struct Process {
    /// Process ID
    pub pid: ProcessId,

    /// Parent process ID (None for init)
    pub parent: Option<ProcessId>,

    /// Heap-owner affinity token the buddy allocator stamps into `procs`.
    /// Never 0 for a live process — 0 is reserved to mean "unowned".
    pub affinity_token: u8,

    /// The one shared-memory id this process currently holds, 0 if none.
    /// Matches `struct proc.shm` in the reference kernel.
    pub shm: AtomicU64,

    /// This process's page table, installed by `arch::mmu::map_pages` on
    /// the heap manager's and shared-memory registry's 0→1 transitions.
    pub page_table: PageTable,
}

impl Process {
    /// Create a new process. `pid.0` (mod 255, skipping 0) becomes the
    /// affinity token, matching the reference kernel's small nonzero
    /// per-slot process index.
    pub fn new(pid: ProcessId, parent: Option<ProcessId>, page_table: PageTable) -> Self {
        let affinity_token = (pid.0 % 255) as u8 + 1;
        Self {
            pid,
            parent,
            affinity_token,
            shm: AtomicU64::new(0),
            page_table,
        }
    }

    /// The shared-memory id this process currently holds, 0 if none.
    pub fn shm_id(&self) -> u64 {
        self.shm.load(Ordering::Acquire)
    }

    /// Record the shared-memory id this process just joined.
    pub fn set_shm_id(&self, id: u64) {
        self.shm.store(id, Ordering::Release);
    }
}
