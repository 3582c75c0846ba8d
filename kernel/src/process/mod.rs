//! Process management module
//!
//! Tracks the processes that can hold heap allocations and shared-memory
//! attachments. There is no scheduler in this crate (see DESIGN.md); "the
//! current process" is whichever process last called `set_current`, which
//! the syscall entry points do before dispatching.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

use crate::{
    mm::{PageTable, PhysicalAddress},
    println,
};

pub mod pcb;
pub mod table;

pub use pcb::{Process, ProcessId};

/// Maximum number of processes
pub const MAX_PROCESSES: usize = 256;

/// Process ID allocator
static NEXT_PID: AtomicU64 = AtomicU64::new(1);

/// PID of whichever process is "current" on this CPU. 0 means none.
static CURRENT_PID: AtomicU64 = AtomicU64::new(0);

/// Placeholder page table handed to allocations made outside any process
/// context (e.g. kernel-internal callers, or tests that never register one).
static DEFAULT_PAGE_TABLE: PageTable = PageTable::new(PhysicalAddress::new(0));

/// Allocate a new process ID
pub fn alloc_pid() -> ProcessId {
    ProcessId(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

/// Initialize process management subsystem
pub fn init() {
    println!("[PROCESS] Initializing process management...");
    table::init();
    println!("[PROCESS] Process management initialized");
}

/// Create and register a process, returning its id.
pub fn create_process(parent: Option<ProcessId>) -> Result<ProcessId, crate::error::KernelError> {
    let pid = alloc_pid();
    let process = Process::new(pid, parent, DEFAULT_PAGE_TABLE);
    table::add_process(process)
}

/// Mark `pid` as the current process on this CPU.
pub fn set_current(pid: ProcessId) {
    CURRENT_PID.store(pid.0, Ordering::Release);
}

/// Look up a process by id.
pub fn find_process(pid: ProcessId) -> Option<&'static Process> {
    table::get_process(pid)
}

/// Get the current process, if one has been set and still exists.
pub fn current_process() -> Option<&'static Process> {
    let pid = CURRENT_PID.load(Ordering::Acquire);
    if pid == 0 {
        return None;
    }
    table::get_process(ProcessId(pid))
}

/// The current process's heap-owner affinity token, or 0 (unowned) if no
/// process is current.
pub fn current_affinity_token() -> u8 {
    current_process().map(|p| p.affinity_token).unwrap_or(0)
}

/// The current process's page table, or a placeholder if none is current.
pub fn current_page_table() -> &'static PageTable {
    match current_process() {
        Some(p) => &p.page_table,
        None => &DEFAULT_PAGE_TABLE,
    }
}
