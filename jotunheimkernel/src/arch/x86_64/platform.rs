// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Machine-side glue for bring-up: physical memory through the direct map,
//! the AP stacks, and the kernel entry points APs continue into.

use core::ptr;

use spin::Once;
use x86_64::{PhysAddr, VirtAddr};

use crate::arch::x86_64::apic::Apic;
use crate::smp::hal::{BootCompletion, PhysicalMemory, StackProvider};
use crate::smp::{CpuSet, LogicalCpuId, MAX_CPUS};

/// Physical memory seen through the higher-half direct map.
#[derive(Copy, Clone)]
pub struct DirectMap {
    hhdm: u64,
}

impl DirectMap {
    pub const fn new(hhdm: u64) -> Self {
        Self { hhdm }
    }

    fn virt(&self, phys: PhysAddr) -> *mut u8 {
        (self.hhdm + phys.as_u64()) as *mut u8
    }
}

impl PhysicalMemory for DirectMap {
    fn read(&self, src: PhysAddr, dst: &mut [u8]) {
        unsafe { ptr::copy_nonoverlapping(self.virt(src), dst.as_mut_ptr(), dst.len()) }
    }

    fn write(&mut self, dst: PhysAddr, src: &[u8]) {
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.virt(dst), src.len()) }
    }
}

pub const AP_STACK_SIZE: usize = 16 * 1024;

#[repr(C, align(16))]
struct Stack([u8; AP_STACK_SIZE]);

// Only ever touched through the stack pointer of the AP it belongs to.
static mut AP_STACKS: [Stack; MAX_CPUS] = [const { Stack([0; AP_STACK_SIZE]) }; MAX_CPUS];

/// One static stack per logical id.
pub struct ApStacks;

impl StackProvider for ApStacks {
    fn stack_top(&self, cpu: LogicalCpuId) -> VirtAddr {
        let base = &raw mut AP_STACKS as *mut Stack as u64;
        VirtAddr::new(base + ((cpu.index() + 1) * AP_STACK_SIZE) as u64)
    }
}

/// Where the kernel continues once bring-up is over.
#[derive(Copy, Clone)]
pub struct KernelEntry {
    pub bsp: fn(&CpuSet) -> !,
    pub ap: fn(LogicalCpuId) -> !,
}

impl BootCompletion for KernelEntry {
    fn bsp_finish_booting(&self, ready: &CpuSet) -> ! {
        (self.bsp)(ready)
    }

    fn enter_user_work(&self, cpu: LogicalCpuId) -> ! {
        (self.ap)(cpu)
    }
}

static ENTRY: Once<KernelEntry> = Once::new();
static CONTROLLER: Once<Apic> = Once::new();

pub fn install_entry(entry: KernelEntry) -> &'static KernelEntry {
    ENTRY.call_once(|| entry)
}

pub fn entry() -> Option<&'static KernelEntry> {
    ENTRY.get()
}

/// The BSP's controller setup; each AP works on its own copy.
pub fn install_controller(apic: Apic) -> &'static Apic {
    CONTROLLER.call_once(|| apic)
}

pub fn controller() -> Option<&'static Apic> {
    CONTROLLER.get()
}
