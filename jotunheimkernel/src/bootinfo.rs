// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemoryKind {
    Usable = 1,
    Reserved = 2,
    AcpiReclaimable = 3,
    AcpiNvs = 4,
    Mmio = 5,
    Bootloader = 6,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryKind,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct BootInfo {
    pub rsdp_addr: u64,
    pub memory_map: *const MemoryRegion,
    pub memory_map_len: usize,
    /// VA = PA + hhdm_base for every physical address the kernel touches.
    pub hhdm_base: u64,
    pub kernel_phys_base: u64,
    pub kernel_virt_base: u64,
}

impl BootInfo {
    pub fn memory_map(&self) -> &[MemoryRegion] {
        if self.memory_map.is_null() || self.memory_map_len == 0 {
            return &[];
        }
        // SAFETY: the loader hands over a live array of `memory_map_len`
        // entries that stays mapped for the kernel's lifetime.
        unsafe { core::slice::from_raw_parts(self.memory_map, self.memory_map_len) }
    }

    /// Free RAM as `(base, size)`, in the order the loader reported it.
    pub fn usable_regions(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.memory_map()
            .iter()
            .filter(|r| r.kind == MemoryKind::Usable)
            .map(|r| (r.base, r.length))
    }
}
