//! Fatal page-table faults.
//!
//! A fault means an internal invariant of the page tables was violated: a remap, an
//! unmap of something that was never mapped, an address out of range. Continuing
//! past a corrupted page table is unsafe, so faults never return. The host kernel
//! decides what "never returns" means by installing a handler; without one, a fault
//! panics with its message.

use core::fmt;

use spin::Once;

use crate::{FrameNumber, VirtualAddress};

/// A violated page-table invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// An operation that requires a page-aligned address got an unaligned one.
    Unaligned(VirtualAddress),
    /// A virtual address at or above [`MAX_VA`](crate::MAX_VA) reached the walker.
    AddressOutOfRange(VirtualAddress),
    /// A leaf that is already valid was mapped again.
    Remap(VirtualAddress),
    /// A zero-sized range was mapped.
    EmptyMapping(VirtualAddress),
    /// An unmap found no page table covering the address.
    MissingTable(VirtualAddress),
    /// An address expected to be mapped has no valid leaf.
    NotMapped(VirtualAddress),
    /// An entry expected to be a leaf points at another table.
    NotLeaf(VirtualAddress),
    /// A table being freed still holds a leaf.
    LiveLeaf {
        /// The table holding the leaf.
        table: FrameNumber,
        /// Index of the leaf inside the table.
        index: usize,
    },
    /// The first process image does not fit in one page.
    ImageTooLarge(usize),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Unaligned(va) => write!(f, "unmap: address {va} not page-aligned"),
            Fault::AddressOutOfRange(va) => write!(f, "walk: virtual address {va} beyond MAX_VA"),
            Fault::Remap(va) => write!(f, "remap: {va} already mapped"),
            Fault::EmptyMapping(va) => write!(f, "map: empty range at {va}"),
            Fault::MissingTable(va) => write!(f, "unmap: no page table for {va}"),
            Fault::NotMapped(va) => write!(f, "not mapped: {va}"),
            Fault::NotLeaf(va) => write!(f, "not a leaf: {va}"),
            Fault::LiveLeaf { table, index } => {
                write!(f, "free: live leaf in table {table} at index {index}")
            }
            Fault::ImageTooLarge(size) => {
                write!(f, "init: first process image of {size} bytes exceeds one page")
            }
        }
    }
}

static FAULT_HANDLER: Once<fn(Fault) -> !> = Once::new();

/// Installs the handler that every fault is routed to.
///
/// This function must be called at most once, during initialization.
///
/// # Panics
///
/// Panics if a handler has already been installed.
pub fn set_fault_handler(handler: fn(Fault) -> !) {
    let mut installed = false;
    FAULT_HANDLER.call_once(|| {
        installed = true;
        handler
    });
    if !installed {
        panic!("fault handler already set");
    }
}

/// Reports a fault. Never returns.
#[cold]
#[track_caller]
pub fn raise(fault: Fault) -> ! {
    log::error!("page table fault: {fault}");
    match FAULT_HANDLER.get() {
        Some(handler) => handler(fault),
        None => panic!("{fault}"),
    }
}
