//! Shared-memory IPC
//!
//! The only inter-process communication primitive this kernel offers: a
//! single page of shared physical memory processes can publish and join.

pub mod error;
pub mod shared_memory;

pub use error::{Result, ShmError};
pub use shared_memory::{shm_free, shm_get, shm_join, ShmRegistry, NPROC, SHM_REGISTRY};

use crate::println;

/// IPC system initialization.
pub fn init() {
    println!("[IPC] Initializing IPC system...");
    shared_memory::init();
    println!("[IPC] IPC system initialized");
}
