//! Memory and shared-memory system calls
//!
//! Thin syscall-boundary wrappers over `mm::buddy` and `ipc::shared_memory`.
//! Every recoverable error from those subsystems is converted to a
//! `SyscallError` here; the subsystems themselves never know about the
//! syscall ABI.

use super::{validate_user_pointer, SyscallError, SyscallResult};
use crate::{ipc, mm};

/// Allocate `size` bytes from the process heap.
///
/// # Arguments
/// - `size`: requested allocation size in bytes
///
/// # Returns
/// The allocated pointer, as a `usize`.
pub fn sys_malloc(size: usize) -> SyscallResult {
    if size == 0 {
        return Err(SyscallError::InvalidArgument);
    }

    let ptr = mm::buddy::heap_alloc(size)?;
    Ok(ptr as usize)
}

/// Free a pointer previously returned by `sys_malloc`.
///
/// # Arguments
/// - `ptr`: pointer to release
pub fn sys_free(ptr: usize) -> SyscallResult {
    validate_user_pointer(ptr, 1)?;
    mm::buddy::heap_free(ptr as *mut u8);
    Ok(0)
}

/// Publish a new page of shared memory and attach the caller to it.
///
/// # Returns
/// The new shared-memory id.
pub fn sys_shmget() -> SyscallResult {
    let id = ipc::shm_get()?;
    Ok(id as usize)
}

/// Attach the caller to an existing shared-memory id.
///
/// # Arguments
/// - `id`: shared-memory id returned by an earlier `sys_shmget`
///
/// # Returns
/// The well-known `SHARE_MEMORY` virtual address the shared page is mapped
/// at in the caller's address space.
pub fn sys_shmjoin(id: usize) -> SyscallResult {
    let va = ipc::shm_join(id as u64)?;
    Ok(va.as_usize())
}

/// Release the caller's shared-memory attachment, if any.
pub fn sys_shmfree() -> SyscallResult {
    ipc::shm_free()?;
    Ok(0)
}
