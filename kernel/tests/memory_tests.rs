//! End-to-end exercise of the heap manager and shared-memory registry on
//! real bare-metal state (the in-process allocator, the real `arch::init`
//! path), complementing the host-run `#[cfg(test)]` unit tests colocated in
//! `mm::buddy` and `ipc::shared_memory`.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use veridian_kernel::{
    arch, ipc, logger, mm, process, serial_println,
    test_runner::{exit_qemu, test_panic_handler, QemuExitCode},
};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    logger::init();
    arch::init();
    mm::init();
    process::init();
    ipc::init();

    let pid = process::create_process(None).expect("process creation");
    process::set_current(pid);

    small_alloc_round_trip();
    multiple_sizes_then_free_all();
    double_attach_is_rejected();

    serial_println!("memory_tests: all scenarios passed");
    exit_qemu(QemuExitCode::Success)
}

/// A single allocate/write/free round trip at a small, common size.
fn small_alloc_round_trip() {
    let p = mm::buddy::heap_alloc(200).expect("malloc(200)");
    // SAFETY: p..p+200 was just allocated and zero-filled for us.
    unsafe {
        core::ptr::write_bytes(p, 10, 200);
    }
    mm::buddy::heap_free(p);
    serial_println!("small_alloc_round_trip: ok");
}

/// A mix of sizes up to the full heap, allocated then freed in the same
/// order, should hand the heap back to its single top-scale free block.
fn multiple_sizes_then_free_all() {
    let a = mm::buddy::heap_alloc(1000).expect("malloc(1000)");
    let b = mm::buddy::heap_alloc(500).expect("malloc(500)");
    let c = mm::buddy::heap_alloc(1000).expect("malloc(1000)");
    let d = mm::buddy::heap_alloc(2000).expect("malloc(2000)");
    let e = mm::buddy::heap_alloc(8 * 1024 * 1024 - 8).expect("malloc(8MiB - 8)");

    mm::buddy::heap_free(a);
    mm::buddy::heap_free(b);
    mm::buddy::heap_free(c);
    mm::buddy::heap_free(d);
    mm::buddy::heap_free(e);
    serial_println!("multiple_sizes_then_free_all: ok");
}

/// A process holding one shared-memory attachment must be rejected when it
/// asks for a second.
fn double_attach_is_rejected() {
    let id = ipc::shm_get().expect("first shmget");
    assert_ne!(id, 0);
    assert_eq!(ipc::shm_get().unwrap_err(), ipc::ShmError::DoubleAttach);
    ipc::shm_free().expect("shmfree");
    serial_println!("double_attach_is_rejected: ok");
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}
