#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Sv39 Virtual Memory Manager (VMM)
//!
//! The virtual memory manager builds and maintains RISC-V Sv39 page tables for a
//! small teaching kernel on the QEMU `virt` machine. It provides:
//!
//! - A three-level page table walker, mapper and unmapper.
//! - Per-process address spaces: a user table plus a kernel mirror of it, kept in
//!   step, with grow, shrink, duplicate and teardown.
//! - The kernel direct map, both system-wide and per process.
//! - Software emulation of physical memory and the MMU for testing in non-kernel
//!   environments.
//!
//! Broken page-table invariants are reported through [`fault`] and never return.
//! Running out of memory, or mapping above the mirror limit, is a [`MapError`] and
//! leaves everything as it was.

extern crate alloc;

mod address;
mod address_space;
mod arch;
mod dual_table;
mod dump;
mod error;
pub mod fault;
pub mod kernel_map;
pub mod layout;
mod memory;
mod numbers;
mod page_directory;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use dual_table::DualTable;
pub use dump::TableDump;
pub use error::MapError;
pub use memory::{DirectMap, FrameSource, PageFrame, PhysicalMemory};
pub use numbers::FrameNumber;
pub use page_directory::{EntrySlot, PageDirectory};

pub use arch::{
    ENTRY_COUNT, MAX_VA, PAGE_SIZE, PAGE_TABLE_LEVELS, PageEntry, PageFlags, PageTable,
    TranslationControl,
};

#[cfg(target_arch = "riscv64")]
pub use arch::Satp;

#[cfg(any(test, feature = "software-emulation"))]
pub use arch::{EMULATED_BASE, EmulatedMemory, EmulatedMmu, Privilege};
