//! The kernel direct map and the system-wide kernel page table.

use spin::Once;

use crate::{
    MapError, PageDirectory, PhysicalAddress, PhysicalMemory, VirtualAddress,
    arch::TranslationControl,
    layout::MemoryLayout,
};

/// Which table a kernel map is being built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapScope {
    /// The single table the kernel runs on before any process exists.
    SystemWide,
    /// A process's kernel mirror. The CLINT is left out: only machine mode touches it.
    Process,
}

/// Installs the kernel direct map into `table`.
///
/// Devices, kernel text and kernel data are identity mapped; the trampoline goes at
/// the top of the address space. On `Err` the regions mapped so far are left in
/// place and the caller is expected to discard the table with
/// [`PageDirectory::destroy_mirror`].
pub fn build_kernel_map(
    table: &PageDirectory,
    mem: &mut impl PhysicalMemory,
    layout: &MemoryLayout,
    scope: MapScope,
) -> Result<(), MapError> {
    for region in layout.kernel_regions() {
        if region.system_wide_only && scope == MapScope::Process {
            continue;
        }
        table.map_range(mem, region.va, region.size, region.pa, region.flags)?;
        log::trace!("kernel map: {} {}+{:#x}", region.name, region.va, region.size);
    }
    Ok(())
}

/// Switches the hart to `table` and discards every cached translation.
///
/// The write comes first, then the invalidation, so no translation from the
/// previous table survives.
///
/// # Safety considerations
/// On hardware the new table must map the code currently executing, which holds
/// for every table built by [`build_kernel_map`].
pub fn install(table: &PageDirectory, mmu: &mut impl TranslationControl) {
    mmu.write_root(table.satp());
    mmu.invalidate_all();
}

static KERNEL_TABLE: Once<PageDirectory> = Once::new();

/// Builds the system-wide kernel table.
///
/// This function must be called exactly once, during initialization.
///
/// # Panics
///
/// Panics if the kernel table has already been initialized.
pub fn init_kernel_table(
    mem: &mut impl PhysicalMemory,
    layout: &MemoryLayout,
) -> Result<&'static PageDirectory, MapError> {
    let mut built = false;
    let table = KERNEL_TABLE.try_call_once(|| {
        built = true;
        build_system_table(mem, layout)
    })?;
    if !built {
        panic!("kernel page table already initialized");
    }
    Ok(table)
}

fn build_system_table(
    mem: &mut impl PhysicalMemory,
    layout: &MemoryLayout,
) -> Result<PageDirectory, MapError> {
    let table = PageDirectory::create_empty(mem)?;
    if let Err(err) = build_kernel_map(&table, mem, layout, MapScope::SystemWide) {
        table.destroy_mirror(mem);
        return Err(err);
    }

    log::info!(
        "kernel page table at {} ({} pages mapped)",
        table.root().start(),
        table.mapped_pages(mem)
    );
    Ok(table)
}

/// Returns the system-wide kernel table, if it has been built.
pub fn kernel_table() -> Option<&'static PageDirectory> {
    KERNEL_TABLE.get()
}

/// Switches the calling hart to the system-wide kernel table.
///
/// # Panics
///
/// Panics if the kernel table has not been initialized.
pub fn init_hart(mmu: &mut impl TranslationControl) {
    install(expect_kernel_table(), mmu);
}

/// Translates a kernel virtual address through the system-wide table.
///
/// # Panics
///
/// Panics if the kernel table has not been initialized. Raises
/// [`Fault::NotMapped`](crate::fault::Fault::NotMapped) if `va` is not mapped.
pub fn kernel_translate(mem: &impl PhysicalMemory, va: VirtualAddress) -> PhysicalAddress {
    expect_kernel_table().resolve_kernel(mem, va)
}

fn expect_kernel_table() -> &'static PageDirectory {
    match KERNEL_TABLE.get() {
        Some(table) => table,
        None => panic!("kernel page table not initialized"),
    }
}
