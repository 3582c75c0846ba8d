//! Heap allocator timing, `harness = false` like the rest of this crate's
//! `benches/` — no criterion (not `no_std`-compatible, see the workspace
//! `Cargo.toml` comment), just a manual TSC-timed loop over `mm::buddy`.

#![no_std]
#![no_main]

use core::{arch::x86_64::_rdtsc, panic::PanicInfo};

use veridian_kernel::{
    arch, logger, mm, process, serial_println,
    test_runner::{exit_qemu, test_panic_handler, QemuExitCode},
};

const ITERATIONS: u64 = 1000;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    logger::init();
    arch::init();
    mm::init();
    process::init();

    let pid = process::create_process(None).expect("process creation");
    process::set_current(pid);

    serial_println!("Heap Allocation Benchmark");
    serial_println!("=========================");

    bench_small_allocations();
    bench_alloc_free_pairs();

    exit_qemu(QemuExitCode::Success)
}

/// Allocate `ITERATIONS` scale-0 blocks back to back, without freeing —
/// exercises `raw_alloc`'s free-list scan and down-split path on a heap
/// that only gets emptier as the loop runs.
fn bench_small_allocations() {
    // SAFETY: rdtsc has no memory side effects; reading it around a pure
    // compute loop is safe on any x86_64 target.
    let start = unsafe { _rdtsc() };
    for _ in 0..ITERATIONS {
        let _ = mm::buddy::heap_alloc(32).expect("malloc(32)");
    }
    // SAFETY: see above.
    let elapsed = unsafe { _rdtsc() } - start;

    serial_println!(
        "small allocations: {} cycles/op over {ITERATIONS} ops",
        elapsed / ITERATIONS
    );
}

/// Allocate-then-immediately-free in a loop, so the heap returns to its
/// fresh-state free list between iterations and the timing reflects the
/// split/coalesce pair rather than cumulative fragmentation.
fn bench_alloc_free_pairs() {
    // SAFETY: rdtsc has no memory side effects; reading it around a pure
    // compute loop is safe on any x86_64 target.
    let start = unsafe { _rdtsc() };
    for _ in 0..ITERATIONS {
        let p = mm::buddy::heap_alloc(1000).expect("malloc(1000)");
        mm::buddy::heap_free(p);
    }
    // SAFETY: see above.
    let elapsed = unsafe { _rdtsc() } - start;

    serial_println!(
        "alloc/free pairs: {} cycles/op over {ITERATIONS} ops",
        elapsed / ITERATIONS
    );
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}
