//! Global process table implementation
//!
//! The process table maintains a global view of all processes in the system
//! and provides efficient lookup operations. Fixed-size array storage only —
//! this crate carries no `alloc` feature (see DESIGN.md).

use spin::Mutex;

use super::{Process, ProcessId};
use crate::{error::KernelError, println};

/// Fixed-size process array.
pub struct ProcessArray {
    processes: [Option<Process>; super::MAX_PROCESSES],
    count: usize,
}

impl ProcessArray {
    const fn new() -> Self {
        Self {
            processes: [const { None }; super::MAX_PROCESSES],
            count: 0,
        }
    }
}

/// Global process table
pub struct ProcessTable {
    entries: Mutex<ProcessArray>,
    /// Number of active processes
    pub process_count: core::sync::atomic::AtomicUsize,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// Create a new process table
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(ProcessArray::new()),
            process_count: core::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Add a process to the table
    pub fn add_process(&self, process: Process) -> Result<ProcessId, KernelError> {
        let pid = process.pid;
        let mut entries = self.entries.lock();

        if entries.count >= super::MAX_PROCESSES {
            return Err(KernelError::ResourceExhausted {
                resource: "process table",
            });
        }

        for slot in entries.processes.iter_mut() {
            if slot.is_none() {
                *slot = Some(process);
                entries.count += 1;
                self.process_count
                    .fetch_add(1, core::sync::atomic::Ordering::Relaxed);
                return Ok(pid);
            }
        }

        Err(KernelError::ResourceExhausted {
            resource: "process table",
        })
    }

    /// Remove a process from the table
    pub fn remove_process(&self, pid: ProcessId) -> Option<Process> {
        let mut entries = self.entries.lock();

        for slot in entries.processes.iter_mut() {
            if matches!(slot, Some(process) if process.pid == pid) {
                let process = slot.take();
                entries.count -= 1;
                self.process_count
                    .fetch_sub(1, core::sync::atomic::Ordering::Relaxed);
                return process;
            }
        }

        None
    }

    /// Get a process by PID
    pub fn get_process(&self, pid: ProcessId) -> Option<&'static Process> {
        let entries = self.entries.lock();

        for process in entries.processes.iter().flatten() {
            if process.pid == pid {
                // SAFETY: The process is stored in a fixed-size array behind a
                // Mutex. Casting to *const and back to &'static extends the
                // borrow lifetime beyond the lock. Sound because processes are
                // not moved or deallocated while references exist.
                return Some(unsafe { &*(process as *const Process) });
            }
        }

        None
    }

    /// Check if a process exists
    pub fn exists(&self, pid: ProcessId) -> bool {
        let entries = self.entries.lock();
        entries.processes.iter().flatten().any(|p| p.pid == pid)
    }

    /// Get total number of processes
    pub fn count(&self) -> usize {
        self.process_count
            .load(core::sync::atomic::Ordering::Relaxed)
    }
}

/// Global process table instance
pub static PROCESS_TABLE: ProcessTable = ProcessTable::new();

/// Initialize the process table
pub fn init() {
    println!("[PROCESS] Process table initialized");
}

/// Get a process by PID
pub fn get_process(pid: ProcessId) -> Option<&'static Process> {
    PROCESS_TABLE.get_process(pid)
}

/// Add a process to the table
pub fn add_process(process: Process) -> Result<ProcessId, KernelError> {
    PROCESS_TABLE.add_process(process)
}

/// Remove a process from the table
pub fn remove_process(pid: ProcessId) -> Option<Process> {
    PROCESS_TABLE.remove_process(pid)
}

/// Check if a process exists
pub fn process_exists(pid: ProcessId) -> bool {
    PROCESS_TABLE.exists(pid)
}

/// Get total number of processes
pub fn process_count() -> usize {
    PROCESS_TABLE.count()
}
