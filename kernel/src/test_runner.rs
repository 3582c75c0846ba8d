//! Bare-metal test harness
//!
//! On `target_os = "none"` there is no host `#[test]` harness, so
//! `custom_test_frameworks` wires this module in as the runner: each test
//! function runs in turn, progress goes out over the serial port, and the
//! whole kernel exits through the QEMU `isa-debug-exit` device so CI can
//! read a real pass/fail status instead of parsing console output.

use core::panic::PanicInfo;

use crate::serial_println;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    use x86_64::instructions::port::Port;

    // SAFETY: 0xf4 is the `isa-debug-exit` port configured for this kernel's
    // QEMU invocation; writing to it is how the bare-metal test binary
    // reports its result and terminates the emulator.
    unsafe {
        let mut port = Port::new(0xf4);
        port.write(exit_code as u32);
    }
    unreachable!("QEMU should have exited");
}

pub trait Testable {
    fn run(&self);
}

impl<T: Fn()> Testable for T {
    fn run(&self) {
        serial_println!("{}...", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

pub fn run(tests: &[&dyn Testable]) {
    serial_println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("error: {}\n", info);
    exit_qemu(QemuExitCode::Failed);
}
