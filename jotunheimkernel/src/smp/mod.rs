// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Secondary processor bring-up.
//!
//! The BSP discovers the other processors, drops the real-mode boot stub in
//! low memory and wakes each AP in turn with INIT/SIPI, waiting on a single
//! [`ReadinessSlot`] until the AP reports in or the per-target timer runs
//! out. Anything that goes wrong before the first IPI leaves the machine
//! uniprocessor with legacy interrupt routing.

pub mod ap;
pub mod hal;
pub mod handshake;
pub mod params;
pub mod relocator;
pub mod sequencer;
pub mod topology;
pub mod warm_reset;

#[cfg(test)]
pub(crate) mod testing;

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use spin::Once;

pub use handshake::{CpuSet, ReadinessSlot};
pub use sequencer::{BringUpReport, Outcome, Sequencer};
pub use topology::{LogicalCpuId, PlatformCpuId, Topology};

pub const MAX_CPUS: usize = 64;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BringUpConfig {
    /// Per-target handshake window.
    pub ap_timeout_us: u64,
    /// The boot stub must start below this (real-mode reach).
    pub low_memory_limit: u64,
    /// Power of two; also the SIPI page granularity.
    pub stub_alignment: u64,
}

impl Default for BringUpConfig {
    fn default() -> Self {
        Self {
            ap_timeout_us: 5_000_000,
            low_memory_limit: 1 << 20,
            stub_alignment: 4096,
        }
    }
}

/// Bring-up state shared between the BSP and the APs it starts.
pub struct SmpState {
    topology: Once<Topology>,
    slot: ReadinessSlot,
    ready: AtomicU64,
    ready_count: AtomicUsize,
}

impl SmpState {
    pub const fn new() -> Self {
        Self {
            topology: Once::new(),
            slot: ReadinessSlot::new(),
            ready: AtomicU64::new(0),
            ready_count: AtomicUsize::new(1),
        }
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topology.get()
    }

    pub fn slot(&self) -> &ReadinessSlot {
        &self.slot
    }

    pub fn ready_set(&self) -> CpuSet {
        CpuSet::from_bits(self.ready.load(Ordering::Acquire))
    }

    /// Number of processors running kernel code; 1 until bring-up says otherwise.
    pub fn ready_count(&self) -> usize {
        self.ready_count.load(Ordering::Acquire)
    }

    /// First caller wins; later topologies are dropped.
    pub(crate) fn publish_topology(&self, topology: Topology) -> &Topology {
        self.topology.call_once(|| topology)
    }

    pub(crate) fn publish_ready(&self, ready: CpuSet) {
        self.ready.store(ready.bits(), Ordering::Release);
        self.ready_count.store(ready.len(), Ordering::Release);
    }
}

impl Default for SmpState {
    fn default() -> Self {
        Self::new()
    }
}

pub static STATE: SmpState = SmpState::new();

pub fn topology() -> Option<&'static Topology> {
    STATE.topology()
}

pub fn cpu_count() -> usize {
    STATE.ready_count()
}

/// Stop this processor for good.
pub fn halt() -> ! {
    #[cfg(target_arch = "x86_64")]
    x86_64::instructions::interrupts::disable();
    loop {
        #[cfg(target_arch = "x86_64")]
        x86_64::instructions::hlt();
        #[cfg(not(target_arch = "x86_64"))]
        core::hint::spin_loop();
    }
}

/// Kernel entry for bring-up on the BSP. Paging, GDT and IDT must be live.
///
/// APs that report in park until the kernel calls
/// [`ap::mark_paging_enabled`], normally from its `bsp` entry.
#[cfg(target_os = "none")]
pub fn init(boot: &crate::bootinfo::BootInfo, entry: crate::arch::x86_64::platform::KernelEntry) -> ! {
    use crate::acpi::madt;
    use crate::arch::x86_64::platform::{self, ApStacks, DirectMap};
    use crate::arch::x86_64::{ap_trampoline, apic::Apic, cmos::PortCmos, tables::CurrentTables};
    use hal::BootCompletion;

    let entry = platform::install_entry(entry);
    let mut memory = DirectMap::new(boot.hhdm_base);
    let madt = madt::discover(&memory, boot.rsdp_addr);
    let mut controller = platform::install_controller(Apic::new(boot.hhdm_base, madt.as_ref())).clone();
    let mut cmos = PortCmos::new();

    let source = madt.iter().flat_map(|m| m.processor_ids());
    let report = Sequencer::new(&mut controller, &mut memory, &mut cmos, &CurrentTables, &ApStacks, &STATE)
        .run(source, boot.usable_regions(), &ap_trampoline::boot_stub());

    entry.bsp_finish_booting(&report.ready)
}
