//! Architecture-specific implementations for memory management.
//!
//! The page table format is always Sv39. What changes between builds is the machine
//! underneath: real RISC-V hardware, or a software emulation for tests and host tools.

mod sv39;

pub use sv39::*;

// Use the RISC-V hardware backend when we're on riscv64.
#[cfg(target_arch = "riscv64")]
mod riscv64;
#[cfg(target_arch = "riscv64")]
pub use riscv64::Satp;

// Use software emulation ONLY when:
// - Running tests, OR
// - software-emulation feature is explicitly enabled
#[cfg(any(test, feature = "software-emulation"))]
mod software;
#[cfg(any(test, feature = "software-emulation"))]
pub use software::{EMULATED_BASE, EmulatedMemory, EmulatedMmu, Privilege};

/// Control over the translation-root register and the translation cache.
pub trait TranslationControl {
    /// Writes the translation-root register (`satp`).
    fn write_root(&mut self, satp: usize);

    /// Discards every cached translation.
    fn invalidate_all(&mut self);
}
