// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Local APIC / x2APIC and IO APIC, as the bring-up sequencer drives them.
//!
//! xAPIC registers are reached through the higher-half direct map, x2APIC
//! through MSRs. The one-shot timer is the LAPIC timer with its LVT masked;
//! expiry is polled from the current-count register, never delivered.

use core::arch::x86_64::__cpuid_count;
use core::hint::spin_loop;
use core::ptr::NonNull;

use bitflags::bitflags;
use heapless::Vec as HVec;
use log::{debug, error, warn};
use volatile::VolatilePtr;
use x86_64::registers::model_specific::Msr;

use crate::acpi::{MAX_IOAPICS, MadtInfo};
use crate::arch::x86_64::{pic, tables, tsc};
use crate::smp::hal::{ControllerError, InterruptController, VectorMode};
use crate::smp::topology::{LogicalCpuId, PlatformCpuId};

pub const SPURIOUS_VECTOR: u8 = 0xFF;

// MSRs
const IA32_APIC_BASE: u32 = 0x1B;

// IA32_APIC_BASE bits
const APIC_GLOBAL_ENABLE: u64 = 1 << 11;
const APIC_X2_ENABLE: u64 = 1 << 10;

const DEFAULT_LAPIC_PHYS: u64 = 0xFEE0_0000;

// xAPIC register offsets
const REG_ID: u32 = 0x020;
const REG_TPR: u32 = 0x080;
const REG_SVR: u32 = 0x0F0;
const REG_ICR_LOW: u32 = 0x300;
const REG_ICR_HIGH: u32 = 0x310;
const REG_LVT_TIMER: u32 = 0x320;
const REG_LVT_LINT0: u32 = 0x350;
const REG_LVT_LINT1: u32 = 0x360;
const REG_LVT_ERROR: u32 = 0x370;
const REG_INIT_CNT: u32 = 0x380;
const REG_CURR_CNT: u32 = 0x390;
const REG_DIVIDE: u32 = 0x3E0;

// x2APIC MSR mapping base helper (index = offset >> 4)
const X2_BASE: u32 = 0x800;
const X2_ICR: u32 = 0x830;

const fn x2(reg: u32) -> u32 {
    X2_BASE + (reg >> 4)
}

// IO APIC
const IOREGSEL: u64 = 0x00;
const IOWIN: u64 = 0x10;
const IOAPICVER: u32 = 0x01;
const IOREDTBL: u32 = 0x10;

const DIVIDE_BY_16: u32 = 0x3;
const CALIBRATION_US: u64 = 10_000;
const INIT_DELAY_US: u64 = 10_000;
const SIPI_DELAY_US: u64 = 200;
const ICR_SPINS: u32 = 1_000_000;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    struct Icr: u32 {
        const DELIVERY_INIT = 0b101 << 8;
        const DELIVERY_STARTUP = 0b110 << 8;
        const SEND_PENDING = 1 << 12;
        const LEVEL_ASSERT = 1 << 14;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    struct Lvt: u32 {
        const MASKED = 1 << 16;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    struct Svr: u32 {
        const APIC_ENABLE = 1 << 8;
    }
}

#[derive(Copy, Clone, Debug)]
enum Mode {
    /// Register page mapped at this virtual address.
    XApic { base: u64 },
    /// MSR path only
    X2Apic,
}

/* ---------- helpers ---------- */

fn has_x2apic() -> bool {
    unsafe { (__cpuid_count(1, 0).ecx & (1 << 21)) != 0 }
}

fn apic_base_from_msr() -> u64 {
    let msr = unsafe { Msr::new(IA32_APIC_BASE).read() };
    let base = msr & 0xFFFF_F000;
    if base != 0 { base } else { DEFAULT_LAPIC_PHYS }
}

/// # Safety
/// `virt` must be a mapped device register.
unsafe fn mmio<'a>(virt: u64) -> VolatilePtr<'a, u32> {
    unsafe { VolatilePtr::new(NonNull::new_unchecked(virt as *mut u32)) }
}

#[derive(Clone)]
pub struct Apic {
    mode: Mode,
    hhdm: u64,
    ioapics: HVec<u64, MAX_IOAPICS>,
    ticks_per_us: u64,
    // Set once IA32_APIC_BASE is programmed; x2APIC MSRs fault before that.
    enabled: bool,
}

impl Apic {
    /// x2APIC when the CPU has it, else xAPIC at the MADT's (or the MSR's)
    /// physical address.
    pub fn new(hhdm: u64, madt: Option<&MadtInfo>) -> Self {
        let mode = if has_x2apic() {
            Mode::X2Apic
        } else {
            let phys = madt.map_or_else(apic_base_from_msr, |m| m.lapic_phys);
            Mode::XApic { base: hhdm + phys }
        };
        let ioapics = madt
            .map(|m| m.ioapics.iter().map(|io| hhdm + io.mmio_base_phys).collect())
            .unwrap_or_default();
        debug!("local APIC mode {:?}", mode);
        Self {
            mode,
            hhdm,
            ioapics,
            ticks_per_us: 0,
            enabled: false,
        }
    }

    /* ---------- unified accessors ---------- */

    fn read(&self, reg: u32) -> u32 {
        match self.mode {
            Mode::XApic { base } => unsafe { mmio(base + reg as u64).read() },
            Mode::X2Apic => unsafe { Msr::new(x2(reg)).read() as u32 },
        }
    }

    fn write(&mut self, reg: u32, val: u32) {
        match self.mode {
            Mode::XApic { base } => unsafe { mmio(base + reg as u64).write(val) },
            Mode::X2Apic => unsafe { Msr::new(x2(reg)).write(val as u64) },
        }
    }

    pub fn lapic_id(&self) -> u32 {
        match self.mode {
            Mode::X2Apic if self.enabled => self.read(REG_ID),
            // x2APIC id from CPUID.0BH
            Mode::X2Apic => unsafe { __cpuid_count(0x0B, 0).edx },
            Mode::XApic { .. } => self.read(REG_ID) >> 24,
        }
    }

    fn icr_write(&mut self, dest: PlatformCpuId, low: Icr) -> Result<(), ControllerError> {
        match self.mode {
            Mode::X2Apic => {
                let val = ((dest.raw() as u64) << 32) | (low.bits() as u64);
                unsafe { Msr::new(X2_ICR).write(val) };
                Ok(())
            }
            Mode::XApic { .. } => {
                self.write(REG_ICR_HIGH, (dest.raw() as u32) << 24);
                self.write(REG_ICR_LOW, low.bits());
                for _ in 0..ICR_SPINS {
                    if !Icr::from_bits_retain(self.read(REG_ICR_LOW)).contains(Icr::SEND_PENDING) {
                        return Ok(());
                    }
                    spin_loop();
                }
                Err(ControllerError::DeliveryTimeout)
            }
        }
    }

    /// LAPIC timer ticks per microsecond at divide-by-16, measured against
    /// the TSC.
    fn calibrate_timer(&mut self) {
        self.write(REG_DIVIDE, DIVIDE_BY_16);
        self.write(REG_LVT_TIMER, Lvt::MASKED.bits());
        self.write(REG_INIT_CNT, u32::MAX);
        tsc::delay_us(CALIBRATION_US);
        let elapsed = u32::MAX - self.read(REG_CURR_CNT);
        self.write(REG_INIT_CNT, 0);
        self.ticks_per_us = core::cmp::max(1, elapsed as u64 / CALIBRATION_US);
        debug!("LAPIC timer: {} ticks/us", self.ticks_per_us);
    }

    /* ---------- IO APIC ---------- */

    unsafe fn io_read(base: u64, reg: u32) -> u32 {
        unsafe {
            mmio(base + IOREGSEL).write(reg);
            mmio(base + IOWIN).read()
        }
    }

    unsafe fn io_write(base: u64, reg: u32, val: u32) {
        unsafe {
            mmio(base + IOREGSEL).write(reg);
            mmio(base + IOWIN).write(val);
        }
    }

    /// Mask every redirection entry; returns false if nothing answers.
    unsafe fn io_mask_all(base: u64) -> bool {
        let ver = unsafe { Self::io_read(base, IOAPICVER) };
        if ver == u32::MAX {
            return false;
        }
        let max_redir = (ver >> 16) & 0xFF;
        for i in 0..=max_redir {
            let lo = IOREDTBL + i * 2;
            unsafe {
                let v = Self::io_read(base, lo);
                Self::io_write(base, lo, v | Lvt::MASKED.bits());
            }
        }
        true
    }
}

impl InterruptController for Apic {
    fn current_platform_id(&self) -> PlatformCpuId {
        let raw = self.lapic_id();
        match PlatformCpuId::new(raw) {
            Some(id) => id,
            None => {
                error!("running on APIC id {}, beyond what SIPI can address", raw);
                crate::smp::halt()
            }
        }
    }

    fn enable_local_unit(&mut self, cpu: LogicalCpuId) -> Result<(), ControllerError> {
        unsafe {
            let msr = Msr::new(IA32_APIC_BASE);
            let mut base = msr.read() | APIC_GLOBAL_ENABLE;
            if let Mode::X2Apic = self.mode {
                base |= APIC_X2_ENABLE;
            }
            Msr::new(IA32_APIC_BASE).write(base);
        }
        self.enabled = true;

        self.write(REG_SVR, SPURIOUS_VECTOR as u32 | Svr::APIC_ENABLE.bits());
        self.write(REG_TPR, 0);
        for lvt in [REG_LVT_TIMER, REG_LVT_LINT0, REG_LVT_LINT1, REG_LVT_ERROR] {
            self.write(lvt, Lvt::MASKED.bits());
        }

        if !Svr::from_bits_retain(self.read(REG_SVR)).contains(Svr::APIC_ENABLE) {
            return Err(ControllerError::LocalUnitDisabled);
        }
        if self.ticks_per_us == 0 {
            self.calibrate_timer();
        }
        debug!("CPU {}: local APIC {} enabled", cpu, self.lapic_id());
        Ok(())
    }

    fn detect_io_units(&mut self) -> usize {
        let bases = self.ioapics.clone();
        self.ioapics = bases
            .into_iter()
            .filter(|&base| {
                let alive = unsafe { Self::io_mask_all(base) };
                if !alive {
                    warn!("IO APIC at {:#x} does not respond", base - self.hhdm);
                }
                alive
            })
            .collect();
        self.ioapics.len()
    }

    fn send_init(&mut self, target: PlatformCpuId) -> Result<(), ControllerError> {
        self.icr_write(target, Icr::DELIVERY_INIT | Icr::LEVEL_ASSERT)?;
        tsc::delay_us(INIT_DELAY_US);
        Ok(())
    }

    /// Two SIPIs, as the MP spec asks; the second is ignored by an AP that
    /// already started.
    fn send_startup(&mut self, target: PlatformCpuId, page: u8) -> Result<(), ControllerError> {
        let icr = Icr::DELIVERY_STARTUP | Icr::from_bits_retain(page as u32);
        self.icr_write(target, icr)?;
        tsc::delay_us(SIPI_DELAY_US);
        self.icr_write(target, icr)
    }

    fn arm_one_shot_timer(&mut self, micros: u64) {
        let ticks = micros.saturating_mul(self.ticks_per_us.max(1));
        let count = u32::try_from(ticks).unwrap_or(u32::MAX);
        self.write(REG_DIVIDE, DIVIDE_BY_16);
        self.write(REG_LVT_TIMER, Lvt::MASKED.bits());
        self.write(REG_INIT_CNT, count.max(1));
    }

    fn timer_expired(&mut self) -> bool {
        self.read(REG_CURR_CNT) == 0
    }

    fn configure_vector_table(&mut self, mode: VectorMode) {
        match mode {
            VectorMode::Multiprocessor => {
                pic::disable();
                self.write(REG_TPR, 0);
            }
            VectorMode::Legacy => {
                if self.enabled {
                    for lvt in [REG_LVT_TIMER, REG_LVT_LINT0, REG_LVT_LINT1] {
                        self.write(lvt, Lvt::MASKED.bits());
                    }
                }
                pic::init_legacy();
            }
        }
    }

    fn reload_vector_table(&mut self) {
        tables::reload_idt();
    }

    fn reset_local_state(&mut self) {
        self.ioapics.clear();
        self.ticks_per_us = 0;
    }
}
