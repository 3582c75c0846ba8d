//! Kernel dynamic memory subsystem
//!
//! A `no_std` library covering the pieces of a microkernel that own dynamic
//! memory: the buddy heap allocator (`mm::buddy`), the physical frame
//! allocator it sits on (`mm::frame_allocator`), and the shared-memory
//! registry built on top of both (`ipc::shared_memory`). Everything above
//! those subsystems (scheduling, capabilities, drivers, filesystems) is out
//! of scope; see `DESIGN.md`.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
// Custom test runner only for bare-metal; host target uses the standard
// `#[test]` harness.
#![cfg_attr(target_os = "none", test_runner(crate::test_runner::run))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare-metal target: a real buddy-backed heap. Host target (running unit
// tests and tools): delegate to the system allocator so std-using test code
// compiles and runs unmodified.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

/// Get a reference to the global allocator.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn get_allocator() -> &'static LockedHeap {
    &ALLOCATOR
}

#[macro_use]
pub mod print;

pub mod arch;
pub mod error;
pub mod ipc;
pub mod logger;
pub mod mm;
pub mod process;
mod syscall;

/// Bare-metal test/bench harness. Not gated on `cfg(test)`: the `tests/`
/// integration binaries link this library without `--test`, so they need
/// `exit_qemu`/`QemuExitCode` available unconditionally on this target.
#[cfg(target_os = "none")]
pub mod test_runner;

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_runner::test_panic_handler(info)
}

/// Heap allocation error handler.
///
/// Panic is intentional: a failure from the *underlying* allocator crate
/// (distinct from `mm::buddy::HeapError`, which this kernel always handles
/// as a `Result`) means the global allocator itself is broken, which is
/// unrecoverable. The `alloc_error_handler` ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
