// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! CMOS/RTC register file through ports 0x70/0x71.

use x86_64::instructions::interrupts::without_interrupts;
use x86_64::instructions::port::Port;

use crate::smp::hal::Cmos;

const INDEX: u16 = 0x70;
const DATA: u16 = 0x71;
// Keep NMIs off while an index is selected.
const NMI_DISABLE: u8 = 0x80;

pub struct PortCmos {
    index: Port<u8>,
    data: Port<u8>,
}

impl PortCmos {
    pub const fn new() -> Self {
        Self {
            index: Port::new(INDEX),
            data: Port::new(DATA),
        }
    }
}

impl Default for PortCmos {
    fn default() -> Self {
        Self::new()
    }
}

impl Cmos for PortCmos {
    fn read(&mut self, register: u8) -> u8 {
        without_interrupts(|| unsafe {
            self.index.write(NMI_DISABLE | register);
            let value = self.data.read();
            self.index.write(0);
            value
        })
    }

    fn write(&mut self, register: u8, value: u8) {
        without_interrupts(|| unsafe {
            self.index.write(NMI_DISABLE | register);
            self.data.write(value);
            self.index.write(0);
        })
    }
}
