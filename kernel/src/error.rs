//! Crate-wide kernel error type
//!
//! Most of this crate's errors are component-local (`mm::buddy::HeapError`,
//! `ipc::shared_memory::ShmError`, `syscall::SyscallError`) and convert into
//! one another at the relevant seam. `KernelError` exists only for the
//! handful of callers above those seams — today, just the process table —
//! that need a crate-wide error to return instead of a component-specific
//! one.

use core::fmt;

/// Crate-wide kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A fixed-capacity table (process table, shared-memory registry) has
    /// no free slot left.
    ResourceExhausted { resource: &'static str },
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {resource}"),
        }
    }
}
