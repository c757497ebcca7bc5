//! Physical memory layout of the QEMU `virt` machine.
//!
//! The kernel's direct map is built from a [`MemoryLayout`]. Device and RAM addresses
//! are fixed by the board; the end of the kernel text and the trampoline page come
//! from the linker, so the host passes them in.

use crate::{
    MAX_VA, PAGE_SIZE, PhysicalAddress, VirtualAddress,
    arch::PageFlags,
};

/// UART0 registers.
pub const UART0: usize = 0x1000_0000;

/// The first virtio MMIO disk interface.
pub const VIRTIO0: usize = 0x1000_1000;

/// Core-local interruptor (timer).
pub const CLINT: usize = 0x0200_0000;
pub const CLINT_SIZE: usize = 0x1_0000;

/// Platform-level interrupt controller.
pub const PLIC: usize = 0x0c00_0000;
pub const PLIC_SIZE: usize = 0x40_0000;

/// Start of RAM; the kernel image is loaded here.
pub const KERNBASE: usize = 0x8000_0000;

/// End of the RAM the kernel uses.
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;

/// The trampoline page sits at the highest virtual page in every address space.
pub const TRAMPOLINE: usize = MAX_VA - PAGE_SIZE;

/// One identity (or trampoline) mapping of the kernel direct map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub name: &'static str,
    pub va: VirtualAddress,
    pub pa: PhysicalAddress,
    pub size: usize,
    pub flags: PageFlags,
    /// Only present in the system-wide kernel table, never in per-process mirrors.
    pub system_wide_only: bool,
}

/// Addresses the kernel direct map is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    pub uart0: PhysicalAddress,
    pub virtio0: PhysicalAddress,
    pub clint: PhysicalAddress,
    pub clint_size: usize,
    pub plic: PhysicalAddress,
    pub plic_size: usize,
    pub kernel_base: PhysicalAddress,
    /// End of the kernel text (`etext`), page-aligned.
    pub kernel_text_end: PhysicalAddress,
    pub phys_top: PhysicalAddress,
    /// Physical page holding the trampoline code.
    pub trampoline: PhysicalAddress,
    /// Virtual addresses at or above this are never mirrored into per-process
    /// kernel tables, so user memory cannot shadow the device mappings.
    pub mirror_limit: VirtualAddress,
}

impl MemoryLayout {
    /// The QEMU `virt` layout, with the mirror limit at the PLIC base.
    pub const fn qemu_virt(kernel_text_end: PhysicalAddress, trampoline: PhysicalAddress) -> Self {
        Self {
            uart0: PhysicalAddress::new(UART0),
            virtio0: PhysicalAddress::new(VIRTIO0),
            clint: PhysicalAddress::new(CLINT),
            clint_size: CLINT_SIZE,
            plic: PhysicalAddress::new(PLIC),
            plic_size: PLIC_SIZE,
            kernel_base: PhysicalAddress::new(KERNBASE),
            kernel_text_end,
            phys_top: PhysicalAddress::new(PHYSTOP),
            trampoline,
            mirror_limit: VirtualAddress::new(PLIC),
        }
    }

    /// Replaces the mirror limit.
    ///
    /// A limit above the lowest region of the per-process kernel map is clipped to
    /// that region's start, so user pages can never be mirrored onto it.
    pub fn with_mirror_limit(mut self, limit: VirtualAddress) -> Self {
        self.mirror_limit = limit;
        let clipped = self.effective_mirror_limit();
        if clipped != limit {
            log::warn!("mirror limit {limit} clipped to {clipped}");
        }
        self.mirror_limit = clipped;
        self
    }

    /// Returns the mirror limit, clipped to the lowest region mapped into every
    /// process's kernel mirror.
    pub fn effective_mirror_limit(&self) -> VirtualAddress {
        self.kernel_regions()
            .iter()
            .filter(|region| !region.system_wide_only)
            .map(|region| region.va)
            .fold(self.mirror_limit, |limit, start| limit.min(start))
    }

    /// Returns the regions of the kernel direct map, in mapping order.
    pub fn kernel_regions(&self) -> [Region; 7] {
        let identity = |name: &'static str,
                        pa: PhysicalAddress,
                        size: usize,
                        flags: PageFlags,
                        system_wide_only: bool| Region {
            name,
            va: VirtualAddress::new(pa.as_usize()),
            pa,
            size,
            flags,
            system_wide_only,
        };

        [
            identity("uart0", self.uart0, PAGE_SIZE, PageFlags::READ_WRITE, false),
            identity("virtio0", self.virtio0, PAGE_SIZE, PageFlags::READ_WRITE, false),
            identity("clint", self.clint, self.clint_size, PageFlags::READ_WRITE, true),
            identity("plic", self.plic, self.plic_size, PageFlags::READ_WRITE, false),
            identity(
                "kernel text",
                self.kernel_base,
                self.kernel_text_end - self.kernel_base,
                PageFlags::READ_EXECUTE,
                false,
            ),
            identity(
                "kernel data",
                self.kernel_text_end,
                self.phys_top - self.kernel_text_end,
                PageFlags::READ_WRITE,
                false,
            ),
            Region {
                name: "trampoline",
                va: VirtualAddress::new(TRAMPOLINE),
                pa: self.trampoline,
                size: PAGE_SIZE,
                flags: PageFlags::READ_EXECUTE,
                system_wide_only: false,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> MemoryLayout {
        MemoryLayout::qemu_virt(
            PhysicalAddress::new(0x8000_8000),
            PhysicalAddress::new(0x8000_7000),
        )
    }

    #[test]
    fn constants() {
        assert_eq!(PHYSTOP, 0x8800_0000);
        assert_eq!(TRAMPOLINE, 0x3f_ffff_f000);
    }

    #[test]
    fn mirror_limit_defaults_to_plic() {
        assert_eq!(layout().mirror_limit, VirtualAddress::new(PLIC));
        assert_eq!(layout().effective_mirror_limit(), VirtualAddress::new(PLIC));
    }

    #[test]
    fn mirror_limit_can_move_down() {
        let lowered = layout().with_mirror_limit(VirtualAddress::new(0x100_0000));
        assert_eq!(lowered.mirror_limit, VirtualAddress::new(0x100_0000));
    }

    #[test]
    fn mirror_limit_stops_below_device_regions() {
        let raised = layout().with_mirror_limit(VirtualAddress::new(0x4000_0000));
        assert_eq!(raised.mirror_limit, VirtualAddress::new(PLIC));

        // Setting the field directly is caught by the effective limit.
        let mut direct = layout();
        direct.mirror_limit = VirtualAddress::new(0x4000_0000);
        assert_eq!(direct.effective_mirror_limit(), VirtualAddress::new(PLIC));
    }

    #[test]
    fn kernel_regions_split_text_and_data() {
        let regions = layout().kernel_regions();
        let text = regions.iter().find(|r| r.name == "kernel text").unwrap();
        let data = regions.iter().find(|r| r.name == "kernel data").unwrap();

        assert_eq!(text.size, 0x8000);
        assert_eq!(text.flags, PageFlags::READ_EXECUTE);
        assert_eq!(data.va, VirtualAddress::new(0x8000_8000));
        assert_eq!(data.pa.as_usize() + data.size, PHYSTOP);

        let only_system: Vec<_> = regions
            .iter()
            .filter(|r| r.system_wide_only)
            .map(|r| r.name)
            .collect();
        assert_eq!(only_system, ["clint"]);
    }
}
