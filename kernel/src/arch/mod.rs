//! Architecture-specific support
//!
//! Only x86_64 is implemented. The memory subsystem's contract with this
//! module is `mmu::{init, map_pages, unmap_pages, walk_page_table}` plus
//! `serial`/`vga` for the ambient logging stack.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use x86_64::*;
