//! Access to physical memory frames.
//!
//! The page-table code never dereferences physical addresses itself. Everything goes
//! through [`PhysicalMemory`], which hands out frames by [`FrameNumber`] and gives
//! typed access to their contents. Two backends exist:
//!
//! - [`DirectMap`] for the real kernel, where every physical frame is reachable at a
//!   fixed offset (identity mapped on QEMU `virt`, so the offset is normally zero).
//! - `EmulatedMemory` for tests and host tools, backed by ordinary heap allocations.

use crate::{
    FrameNumber, PhysicalAddress,
    arch::{PAGE_SIZE, PageTable},
};

/// The contents of one physical frame.
#[derive(Clone)]
#[repr(C, align(4096))]
pub struct PageFrame([u8; PAGE_SIZE]);

const _: () = assert!(core::mem::size_of::<PageFrame>() == core::mem::size_of::<PageTable>());
const _: () = assert!(core::mem::align_of::<PageFrame>() == core::mem::align_of::<PageTable>());

impl PageFrame {
    /// Creates a zero-filled frame.
    pub const fn zeroed() -> Self {
        Self([0; PAGE_SIZE])
    }

    /// Returns the bytes of this frame.
    pub fn bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.0
    }

    /// Returns the bytes of this frame mutably.
    pub fn bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.0
    }

    /// Fills the frame with zeroes.
    pub fn zero(&mut self) {
        self.0.fill(0);
    }

    /// Views this frame as a page table.
    pub fn as_table(&self) -> &PageTable {
        // SAFETY: PageFrame and PageTable have identical size and alignment, and every
        // bit pattern is a valid PageTable (its entries are plain integers).
        unsafe { &*(self as *const PageFrame as *const PageTable) }
    }

    /// Views this frame as a mutable page table.
    pub fn as_table_mut(&mut self) -> &mut PageTable {
        // SAFETY: See `as_table`; the exclusive borrow carries over unchanged.
        unsafe { &mut *(self as *mut PageFrame as *mut PageTable) }
    }
}

/// Physical memory as seen by the page-table code: a frame allocator plus access to
/// frame contents.
///
/// Implementations must hand out frames that are not in use anywhere else, and must
/// accept every frame they handed out back through [`release_frame`](Self::release_frame).
pub trait PhysicalMemory {
    /// Allocates one frame. The contents are unspecified.
    ///
    /// Returns None when physical memory is exhausted.
    fn allocate_frame(&mut self) -> Option<FrameNumber>;

    /// Returns a frame to the allocator.
    fn release_frame(&mut self, frame: FrameNumber);

    /// Returns the contents of a frame.
    fn frame(&self, frame: FrameNumber) -> &PageFrame;

    /// Returns the contents of a frame mutably.
    fn frame_mut(&mut self, frame: FrameNumber) -> &mut PageFrame;

    /// Copies the whole contents of `src` into `dst`.
    fn copy_frame(&mut self, dst: FrameNumber, src: FrameNumber);

    /// Allocates a frame and fills it with zeroes.
    fn allocate_zeroed(&mut self) -> Option<FrameNumber> {
        let frame = self.allocate_frame()?;
        self.frame_mut(frame).zero();
        Some(frame)
    }

    /// Returns a frame viewed as a page table.
    fn table(&self, frame: FrameNumber) -> &PageTable {
        self.frame(frame).as_table()
    }

    /// Returns a frame viewed as a mutable page table.
    fn table_mut(&mut self, frame: FrameNumber) -> &mut PageTable {
        self.frame_mut(frame).as_table_mut()
    }
}

/// The kernel's physical frame allocator, as consumed by [`DirectMap`].
pub trait FrameSource {
    /// Allocates one page-aligned physical frame, or None when memory is exhausted.
    fn allocate(&mut self) -> Option<PhysicalAddress>;

    /// Returns a frame previously handed out by [`allocate`](Self::allocate).
    fn release(&mut self, frame: PhysicalAddress);
}

/// Physical memory reached through a direct map at a fixed offset.
pub struct DirectMap<S> {
    source: S,
    offset: usize,
}

impl<S: FrameSource> DirectMap<S> {
    /// Creates a direct-mapped view of physical memory.
    ///
    /// # Safety
    /// Every frame `source` hands out, and every frame later referenced by the page
    /// tables built through this view, must be mapped readable and writable at
    /// `physical address + offset` for as long as this value is used, and must not be
    /// accessed through any other path while borrowed from it.
    pub const unsafe fn new(source: S, offset: usize) -> Self {
        Self { source, offset }
    }

    /// Returns the underlying frame source.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn ptr(&self, frame: FrameNumber) -> *mut PageFrame {
        frame.start().as_usize().wrapping_add(self.offset) as *mut PageFrame
    }
}

impl<S: FrameSource> PhysicalMemory for DirectMap<S> {
    fn allocate_frame(&mut self) -> Option<FrameNumber> {
        let frame = self.source.allocate()?;
        debug_assert!(
            frame.is_aligned(PAGE_SIZE),
            "frame source returned an unaligned frame"
        );
        Some(frame.frame_number())
    }

    fn release_frame(&mut self, frame: FrameNumber) {
        self.source.release(frame.start());
    }

    fn frame(&self, frame: FrameNumber) -> &PageFrame {
        // SAFETY: The constructor's contract guarantees the frame is mapped at this
        // offset and not aliased mutably elsewhere.
        unsafe { &*self.ptr(frame) }
    }

    fn frame_mut(&mut self, frame: FrameNumber) -> &mut PageFrame {
        // SAFETY: As above; `&mut self` keeps the access exclusive.
        unsafe { &mut *self.ptr(frame) }
    }

    fn copy_frame(&mut self, dst: FrameNumber, src: FrameNumber) {
        if dst == src {
            return;
        }
        // SAFETY: Both frames are mapped per the constructor's contract, and distinct
        // frames never overlap.
        unsafe { core::ptr::copy_nonoverlapping(self.ptr(src), self.ptr(dst), 1) };
    }
}
