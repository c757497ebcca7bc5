//! RISC-V hardware backend.

use core::arch::asm;

use super::TranslationControl;

/// The hart's `satp` register and its translation cache.
pub struct Satp;

impl TranslationControl for Satp {
    fn write_root(&mut self, satp: usize) {
        // SAFETY: Switching the root is only sound if the new table maps the code
        // currently running; `install` documents that requirement for its callers.
        unsafe { asm!("csrw satp, {}", in(reg) satp) };
    }

    fn invalidate_all(&mut self) {
        // SAFETY: Flushing the TLB has no memory-safety impact.
        unsafe { asm!("sfence.vma zero, zero") };
    }
}
