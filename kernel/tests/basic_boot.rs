//! Basic boot test: brings every subsystem up in the same order `main.rs`
//! does and confirms the kernel doesn't panic along the way.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use veridian_kernel::{
    arch, ipc, logger, mm, process, serial_println,
    test_runner::{exit_qemu, test_panic_handler, QemuExitCode},
};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("basic_boot: starting...");

    logger::init();
    arch::init();
    mm::init();
    process::init();
    ipc::init();

    serial_println!("basic_boot: all subsystems initialized");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}
