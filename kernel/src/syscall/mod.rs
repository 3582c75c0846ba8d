//! System call interface
//!
//! The kernel-side dispatch for the five syscalls this subsystem exposes:
//! `malloc`, `free`, `shmget`, `shmjoin`, `shmfree`.

#![allow(dead_code)]

pub mod memory;

use crate::ipc::ShmError;

/// System call numbers.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Malloc = 20,
    Free = 21,
    ShmGet = 22,
    ShmJoin = 23,
    ShmFree = 24,
}

/// System call result type.
pub type SyscallResult = Result<usize, SyscallError>;

/// System call error codes.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall = -1,
    InvalidArgument = -2,
    PermissionDenied = -3,
    ResourceNotFound = -4,
    OutOfMemory = -5,
    WouldBlock = -6,
    Interrupted = -7,
}

impl From<ShmError> for SyscallError {
    fn from(err: ShmError) -> Self {
        match err {
            ShmError::Exhausted => SyscallError::OutOfMemory,
            ShmError::DoubleAttach => SyscallError::PermissionDenied,
            ShmError::UnknownId => SyscallError::ResourceNotFound,
        }
    }
}

impl From<crate::mm::HeapError> for SyscallError {
    fn from(err: crate::mm::HeapError) -> Self {
        match err {
            crate::mm::HeapError::TooLarge => SyscallError::InvalidArgument,
            crate::mm::HeapError::OutOfMemory => SyscallError::OutOfMemory,
        }
    }
}

/// Reject a user-space pointer/length pair that is null or would overflow
/// the address space. This subsystem has no notion of per-process address
/// space layout yet (see DESIGN.md), so this is the full extent of the
/// validation a syscall entry point can do today.
fn validate_user_pointer(ptr: usize, len: usize) -> SyscallResult {
    if ptr == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    ptr.checked_add(len).ok_or(SyscallError::InvalidArgument)?;
    Ok(0)
}

/// System call handler entry point.
#[no_mangle]
pub extern "C" fn syscall_handler(syscall_num: usize, arg1: usize, arg2: usize, arg3: usize) -> isize {
    let result = match Syscall::try_from(syscall_num) {
        Ok(syscall) => handle_syscall(syscall, arg1, arg2, arg3),
        Err(_) => Err(SyscallError::InvalidSyscall),
    };

    match result {
        Ok(value) => value as isize,
        Err(error) => error as i32 as isize,
    }
}

/// Dispatch a decoded system call.
fn handle_syscall(syscall: Syscall, arg1: usize, _arg2: usize, _arg3: usize) -> SyscallResult {
    match syscall {
        Syscall::Malloc => memory::sys_malloc(arg1),
        Syscall::Free => memory::sys_free(arg1),
        Syscall::ShmGet => memory::sys_shmget(),
        Syscall::ShmJoin => memory::sys_shmjoin(arg1),
        Syscall::ShmFree => memory::sys_shmfree(),
    }
}

impl TryFrom<usize> for Syscall {
    type Error = ();

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            20 => Ok(Syscall::Malloc),
            21 => Ok(Syscall::Free),
            22 => Ok(Syscall::ShmGet),
            23 => Ok(Syscall::ShmJoin),
            24 => Ok(Syscall::ShmFree),
            _ => Err(()),
        }
    }
}
