// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! The BSP's live descriptor tables and address space, as APs must load them.

use x86_64::instructions::segmentation::{CS, Segment};
use x86_64::instructions::tables::{lidt, sgdt, sidt};
use x86_64::registers::control::Cr3;
use x86_64::structures::DescriptorTablePointer;
use x86_64::PhysAddr;

use crate::smp::hal::DescriptorTables;

/// Reads whatever GDTR, IDTR, CS and CR3 hold on the calling processor.
pub struct CurrentTables;

impl DescriptorTables for CurrentTables {
    fn gdt(&self) -> DescriptorTablePointer {
        sgdt()
    }

    fn idt(&self) -> DescriptorTablePointer {
        sidt()
    }

    fn code_selector(&self) -> u16 {
        CS::get_reg().0
    }

    fn page_table_root(&self) -> PhysAddr {
        Cr3::read().0.start_address()
    }
}

/// Load IDTR again from its current value, so the processor re-fetches
/// gates that were rewritten in place.
pub fn reload_idt() {
    let idt = sidt();
    unsafe { lidt(&idt) };
}
