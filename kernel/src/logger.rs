//! Kernel logging
//!
//! Wires the `log` facade (already in the workspace dependency table) onto
//! the serial port so the `log::debug!`/`log::trace!` call sites already
//! present in `mm::buddy`, `mm::frame_allocator` and `ipc::shared_memory`
//! produce real output instead of being dropped by the default no-op
//! logger. VGA text output (`println!`) stays reserved for the handful of
//! user-visible boot messages in `main.rs`.

use log::{LevelFilter, Metadata, Record};

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl log::Log for SerialLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        crate::serial_println!(
            "[{:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Must run once at boot, before `mm::init`.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Trace))
        .expect("logger: init called more than once");
}
