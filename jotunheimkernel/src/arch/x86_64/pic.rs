// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! The 8259 pair, used only when the machine stays uniprocessor.

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC_1_OFFSET: u8 = 0x20;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub static PICS: Mutex<ChainedPics> = Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// Remap to 0x20/0x28 and route IRQs through the PICs again.
pub fn init_legacy() {
    unsafe { PICS.lock().initialize() };
}

/// Mask every line; the IO APIC owns external interrupts.
pub fn disable() {
    unsafe { PICS.lock().disable() };
}
