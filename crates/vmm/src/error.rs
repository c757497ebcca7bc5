use core::fmt;

/// Recoverable failures of page-table operations.
///
/// Whenever one of these is returned, the operation has already undone everything
/// it did, so the address space looks exactly as it did before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// No physical frame was available for a page or a page table.
    OutOfMemory,
    /// The mapping starts at or above the mirror limit and cannot be mirrored.
    MirrorLimit,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::OutOfMemory => f.write_str("out of physical memory"),
            MapError::MirrorLimit => f.write_str("address above the kernel mirror limit"),
        }
    }
}

impl core::error::Error for MapError {}
