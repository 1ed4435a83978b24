// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Seams between the bring-up logic and the machine.
//!
//! The sequencer only ever talks to hardware through these traits; the
//! x86_64 implementations live in `arch::x86_64`, the host tests use
//! `smp::testing`.

use core::fmt;

use x86_64::structures::DescriptorTablePointer;
use x86_64::{PhysAddr, VirtAddr};

use super::handshake::CpuSet;
use super::topology::{LogicalCpuId, PlatformCpuId};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VectorMode {
    /// Local/IO APIC routing.
    Multiprocessor,
    /// 8259 PIC routing, one processor.
    Legacy,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// The local unit could not be software-enabled.
    LocalUnitDisabled,
    /// The ICR never reported the IPI as delivered.
    DeliveryTimeout,
    /// The target id is not addressable in the current APIC mode.
    InvalidTarget(PlatformCpuId),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::LocalUnitDisabled => f.write_str("local APIC did not enable"),
            ControllerError::DeliveryTimeout => f.write_str("IPI delivery timed out"),
            ControllerError::InvalidTarget(id) => write!(f, "APIC id {} is not addressable", id),
        }
    }
}

pub trait InterruptController {
    /// Platform id of the processor executing this call.
    fn current_platform_id(&self) -> PlatformCpuId;

    fn enable_local_unit(&mut self, cpu: LogicalCpuId) -> Result<(), ControllerError>;

    /// Number of IO units found; zero means no multiprocessor routing.
    fn detect_io_units(&mut self) -> usize;

    fn send_init(&mut self, target: PlatformCpuId) -> Result<(), ControllerError>;

    /// `page` is the physical page number of the boot stub (the SIPI vector).
    fn send_startup(&mut self, target: PlatformCpuId, page: u8) -> Result<(), ControllerError>;

    fn arm_one_shot_timer(&mut self, micros: u64);

    fn timer_expired(&mut self) -> bool;

    fn configure_vector_table(&mut self, mode: VectorMode);

    fn reload_vector_table(&mut self);

    /// Forget local/IO unit state; the machine is uniprocessor from here on.
    fn reset_local_state(&mut self);
}

/// Copies to and from physical memory, independent of the caller's mappings.
pub trait PhysicalMemory {
    fn read(&self, src: PhysAddr, dst: &mut [u8]);
    fn write(&mut self, dst: PhysAddr, src: &[u8]);
}

/// CMOS/RTC register file.
pub trait Cmos {
    fn read(&mut self, register: u8) -> u8;
    fn write(&mut self, register: u8, value: u8);
}

/// What an AP needs to rebuild the BSP's execution environment.
pub trait DescriptorTables {
    fn gdt(&self) -> DescriptorTablePointer;
    fn idt(&self) -> DescriptorTablePointer;
    fn code_selector(&self) -> u16;
    fn page_table_root(&self) -> PhysAddr;
}

/// Top of the stack reserved for each AP, 16-byte aligned.
pub trait StackProvider {
    fn stack_top(&self, cpu: LogicalCpuId) -> VirtAddr;
}

/// The generic kernel entry points bring-up hands control to.
pub trait BootCompletion {
    /// BSP: called exactly once, after success or fallback.
    fn bsp_finish_booting(&self, ready: &CpuSet) -> !;

    /// AP: start running user-level work on this processor.
    fn enter_user_work(&self, cpu: LogicalCpuId) -> !;
}
