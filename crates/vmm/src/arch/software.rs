//! Software emulation for testing and development.
//!
//! This module provides an emulated machine that can run on any host:
//! - [`EmulatedMemory`] is a pool of heap-allocated frames with an allocator that
//!   tracks every frame it hands out and can be told to run dry on purpose.
//! - [`EmulatedMmu`] walks Sv39 tables the way the hardware does and keeps its own
//!   translation cache, so a missing invalidation is observable in tests.

use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};

use crate::{FrameNumber, PhysicalAddress, PhysicalMemory, memory::PageFrame};

use super::{
    PAGE_SHIFT, PAGE_SIZE, PAGE_TABLE_LEVELS, PageEntry, PageFlags, TranslationControl,
    page_index, validate_virtual,
};

/// Physical address of the first emulated frame.
///
/// Chosen inside the RAM window of the QEMU `virt` layout so that dumps look like
/// the real thing.
pub const EMULATED_BASE: usize = 0x8700_0000;

/// Emulated physical memory with an instrumented frame allocator.
pub struct EmulatedMemory {
    base: FrameNumber,
    frames: Vec<Box<PageFrame>>,
    allocated: Vec<bool>,
    /// Free frame indices; the next allocation pops from the end.
    free: Vec<usize>,
    /// Number of allocations that may still succeed, if limited.
    budget: Option<usize>,
    allocations: usize,
}

impl EmulatedMemory {
    /// Creates an emulated memory of `frame_count` frames, all free.
    pub fn new(frame_count: usize) -> Self {
        Self {
            base: PhysicalAddress::new(EMULATED_BASE).frame_number(),
            frames: (0..frame_count)
                .map(|_| Box::new(PageFrame::zeroed()))
                .collect(),
            allocated: alloc::vec![false; frame_count],
            free: (0..frame_count).rev().collect(),
            budget: None,
            allocations: 0,
        }
    }

    /// Lets the next `successes` allocations succeed and fails every one after that.
    pub fn fail_after(&mut self, successes: usize) {
        self.budget = Some(successes);
    }

    /// Removes any limit set by [`fail_after`](Self::fail_after).
    pub fn clear_failure(&mut self) {
        self.budget = None;
    }

    /// Returns the number of frames currently allocated.
    pub fn in_use(&self) -> usize {
        self.allocated.iter().filter(|&&used| used).count()
    }

    /// Returns the number of successful allocations since creation.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Returns whether `frame` is currently allocated.
    pub fn is_allocated(&self, frame: FrameNumber) -> bool {
        self.index(frame)
            .is_some_and(|index| self.allocated[index])
    }

    fn index(&self, frame: FrameNumber) -> Option<usize> {
        let index = frame.as_usize().checked_sub(self.base.as_usize())?;
        (index < self.frames.len()).then_some(index)
    }

    fn expect_index(&self, frame: FrameNumber) -> usize {
        match self.index(frame) {
            Some(index) => index,
            None => panic!("frame {frame:?} outside emulated memory"),
        }
    }
}

impl PhysicalMemory for EmulatedMemory {
    fn allocate_frame(&mut self) -> Option<FrameNumber> {
        match self.budget {
            Some(0) => {
                log::trace!("emulated allocator: injected failure");
                return None;
            }
            Some(ref mut remaining) => *remaining -= 1,
            None => {}
        }

        let index = self.free.pop()?;
        self.allocated[index] = true;
        self.allocations += 1;

        // Stale contents make missing zero-fills visible.
        self.frames[index].bytes_mut().fill(0xA5);
        Some(self.base + index)
    }

    fn release_frame(&mut self, frame: FrameNumber) {
        let index = self.expect_index(frame);
        assert!(self.allocated[index], "frame {frame:?} released twice");
        self.allocated[index] = false;
        self.free.push(index);
    }

    fn frame(&self, frame: FrameNumber) -> &PageFrame {
        &self.frames[self.expect_index(frame)]
    }

    fn frame_mut(&mut self, frame: FrameNumber) -> &mut PageFrame {
        let index = self.expect_index(frame);
        &mut self.frames[index]
    }

    fn copy_frame(&mut self, dst: FrameNumber, src: FrameNumber) {
        let dst = self.expect_index(dst);
        let src = self.expect_index(src);
        if dst == src {
            return;
        }

        let (low, high) = self.frames.split_at_mut(dst.max(src));
        let (dst_frame, src_frame) = if dst < src {
            (&mut low[dst], &high[0])
        } else {
            (&mut high[0], &low[src])
        };
        dst_frame.bytes_mut().copy_from_slice(src_frame.bytes());
    }
}

/// The privilege level of an emulated access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// User mode: only entries with the U bit are reachable.
    User,
    /// Supervisor mode without SUM: entries with the U bit fault.
    Supervisor,
}

/// An emulated Sv39 MMU with a translation cache.
///
/// Like real hardware, the cache is only flushed on
/// [`invalidate_all`](TranslationControl::invalidate_all); writing the root alone keeps
/// serving old translations.
#[derive(Default)]
pub struct EmulatedMmu {
    satp: usize,
    tlb: BTreeMap<usize, PageEntry>,
}

impl EmulatedMmu {
    /// Creates an MMU with paging off and an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value of the translation-root register.
    pub fn satp(&self) -> usize {
        self.satp
    }

    /// Returns the number of cached translations.
    pub fn cached(&self) -> usize {
        self.tlb.len()
    }

    /// Translates `va` for an access with the given privilege and required permission.
    ///
    /// Returns None where the hardware would raise a page fault.
    pub fn translate(
        &mut self,
        mem: &impl PhysicalMemory,
        va: usize,
        privilege: Privilege,
        access: PageFlags,
    ) -> Option<PhysicalAddress> {
        if !validate_virtual(va) {
            return None;
        }

        let vpn = va >> PAGE_SHIFT;
        let leaf = match self.tlb.get(&vpn) {
            Some(&cached) => cached,
            None => {
                let leaf = self.walk(mem, va)?;
                self.tlb.insert(vpn, leaf);
                leaf
            }
        };

        let flags = leaf.flags();
        let user_ok = match privilege {
            Privilege::User => flags.is_user(),
            Privilege::Supervisor => !flags.is_user(),
        };
        if !user_ok || !flags.contains(access) {
            return None;
        }

        Some(leaf.frame().start() + (va & (PAGE_SIZE - 1)))
    }

    /// Reads one byte as the CPU would.
    pub fn load(&mut self, mem: &impl PhysicalMemory, va: usize, privilege: Privilege) -> Option<u8> {
        let pa = self.translate(mem, va, privilege, PageFlags::READ)?;
        Some(mem.frame(pa.frame_number()).bytes()[pa.as_usize() & (PAGE_SIZE - 1)])
    }

    /// Writes one byte as the CPU would. Returns false on a page fault.
    pub fn store(
        &mut self,
        mem: &mut impl PhysicalMemory,
        va: usize,
        privilege: Privilege,
        value: u8,
    ) -> bool {
        let Some(pa) = self.translate(mem, va, privilege, PageFlags::WRITE) else {
            return false;
        };
        mem.frame_mut(pa.frame_number()).bytes_mut()[pa.as_usize() & (PAGE_SIZE - 1)] = value;
        true
    }

    fn walk(&self, mem: &impl PhysicalMemory, va: usize) -> Option<PageEntry> {
        if self.satp == 0 {
            return None;
        }

        let mut table = FrameNumber::new(self.satp & ((1 << 44) - 1));
        for level in (0..PAGE_TABLE_LEVELS).rev() {
            let entry = mem.table(table).entry(page_index(va, level));
            if !entry.is_valid() {
                return None;
            }
            if entry.is_leaf() {
                // Superpages are never created by this crate.
                return (level == 0).then_some(entry);
            }
            table = entry.frame();
        }
        None
    }
}

impl TranslationControl for EmulatedMmu {
    fn write_root(&mut self, satp: usize) {
        self.satp = satp;
    }

    fn invalidate_all(&mut self) {
        self.tlb.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_frame_first() {
        let mut mem = EmulatedMemory::new(4);
        let first = mem.allocate_frame().unwrap();
        assert_eq!(first.start(), PhysicalAddress::new(EMULATED_BASE));
        assert_eq!(mem.in_use(), 1);
    }

    #[test]
    fn exhaustion() {
        let mut mem = EmulatedMemory::new(2);
        assert!(mem.allocate_frame().is_some());
        assert!(mem.allocate_frame().is_some());
        assert!(mem.allocate_frame().is_none());
    }

    #[test]
    fn injected_failure() {
        let mut mem = EmulatedMemory::new(8);
        mem.fail_after(2);
        assert!(mem.allocate_frame().is_some());
        assert!(mem.allocate_frame().is_some());
        assert!(mem.allocate_frame().is_none());

        mem.clear_failure();
        assert!(mem.allocate_frame().is_some());
        assert_eq!(mem.allocations(), 3);
    }

    #[test]
    fn release_makes_frame_reusable() {
        let mut mem = EmulatedMemory::new(1);
        let frame = mem.allocate_frame().unwrap();
        mem.release_frame(frame);
        assert_eq!(mem.in_use(), 0);
        assert_eq!(mem.allocate_frame(), Some(frame));
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_panics() {
        let mut mem = EmulatedMemory::new(1);
        let frame = mem.allocate_frame().unwrap();
        mem.release_frame(frame);
        mem.release_frame(frame);
    }

    #[test]
    fn allocated_frames_are_dirty_until_zeroed() {
        let mut mem = EmulatedMemory::new(1);
        let frame = mem.allocate_frame().unwrap();
        assert!(mem.frame(frame).bytes().iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn copy_frame_both_directions() {
        let mut mem = EmulatedMemory::new(3);
        let a = mem.allocate_zeroed().unwrap();
        let b = mem.allocate_zeroed().unwrap();

        mem.frame_mut(b).bytes_mut()[0] = 1;
        mem.copy_frame(a, b);
        assert_eq!(mem.frame(a).bytes()[0], 1);

        mem.frame_mut(a).bytes_mut()[1] = 2;
        mem.copy_frame(b, a);
        assert_eq!(mem.frame(b).bytes()[1], 2);
    }

    #[test]
    fn mmu_without_root_faults() {
        let mem = EmulatedMemory::new(1);
        let mut mmu = EmulatedMmu::new();
        assert_eq!(mmu.load(&mem, 0, Privilege::Supervisor), None);
    }
}
