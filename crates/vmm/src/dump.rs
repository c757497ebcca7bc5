//! Human-readable rendering of a page table tree.

use core::fmt;

use crate::{
    FrameNumber, PhysicalMemory,
    arch::{PAGE_TABLE_LEVELS, PageEntry},
};

/// Renders every valid entry of a table tree, depth first.
///
/// The first line names the root table. Each entry gets one line, prefixed with one
/// `..` per level from the root down to the entry's own table:
///
/// ```text
/// page table 0x87000000
/// ..0: pte: 0x21c00401 pa: 0x87001000
/// .. ..0: pte: 0x21c00801 pa: 0x87002000
/// .. .. ..0: pte: 0x21c00c1f pa: 0x87003000
/// ```
pub struct TableDump<'a, M> {
    mem: &'a M,
    root: FrameNumber,
}

impl<'a, M: PhysicalMemory> TableDump<'a, M> {
    pub(crate) fn new(mem: &'a M, root: FrameNumber) -> Self {
        Self { mem, root }
    }

    fn write_table(&self, f: &mut fmt::Formatter<'_>, table: FrameNumber, level: usize) -> fmt::Result {
        for (index, entry) in self.mem.table(table).valid_entries() {
            self.write_entry(f, index, entry, level)?;
            if level > 0 && entry.is_table() {
                self.write_table(f, entry.frame(), level - 1)?;
            }
        }
        Ok(())
    }

    fn write_entry(
        &self,
        f: &mut fmt::Formatter<'_>,
        index: usize,
        entry: PageEntry,
        level: usize,
    ) -> fmt::Result {
        for _ in level + 1..PAGE_TABLE_LEVELS {
            f.write_str(".. ")?;
        }
        writeln!(
            f,
            "..{index}: pte: {:#x} pa: {}",
            entry.as_usize(),
            entry.frame().start()
        )
    }
}

impl<M: PhysicalMemory> fmt::Display for TableDump<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "page table {}", self.root.start())?;
        self.write_table(f, self.root, PAGE_TABLE_LEVELS - 1)
    }
}
