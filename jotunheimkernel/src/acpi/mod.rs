// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
pub mod madt;

use heapless::Vec as HVec;

use crate::smp::topology::{MAX_PLATFORM_IDS, PlatformCpuId};

pub const MAX_IOAPICS: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CpuEntry {
    pub apic_id: u32,    // LAPIC ID (8-bit for xAPIC, 32-bit for x2APIC)
    pub enabled: bool,   // ACPI "enabled" flag
    pub is_x2apic: bool, // true if came from x2APIC (type 9) entry
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IoApic {
    pub id: u8,
    pub mmio_base_phys: u64,
    pub gsi_base: u32,
}

#[derive(Debug, Clone)]
pub struct MadtInfo {
    pub lapic_phys: u64, // Local APIC MMIO (may be overridden)
    pub cpus: HVec<CpuEntry, MAX_PLATFORM_IDS>,
    pub ioapics: HVec<IoApic, MAX_IOAPICS>,
}

impl MadtInfo {
    /// Enabled processors in table order, as the startup protocol can
    /// address them.
    pub fn processor_ids(&self) -> impl Iterator<Item = PlatformCpuId> + '_ {
        self.cpus
            .iter()
            .filter(|c| c.enabled)
            .filter_map(|c| PlatformCpuId::new(c.apic_id))
    }
}
