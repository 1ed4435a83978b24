// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use core::fmt::Write;
use spin::Mutex;
use uart_16550::SerialPort;
use x86_64::instructions::interrupts::without_interrupts;

const COM1_BASE: u16 = 0x3F8;

static COM1: Mutex<Option<SerialPort>> = Mutex::new(None);

pub unsafe fn init_com1() {
    without_interrupts(|| {
        let mut com1 = COM1.lock();
        if com1.is_some() {
            return;
        }
        let mut port = unsafe { SerialPort::new(COM1_BASE) };
        port.init();
        *com1 = Some(port);
    });
}

/// Run `f` with exclusive use of COM1. APs log while the BSP is still
/// printing, so whole lines are written under the lock.
pub fn with_port<F: FnOnce(&mut Serial)>(f: F) {
    without_interrupts(|| {
        let mut com1 = COM1.lock();
        if let Some(port) = com1.as_mut() {
            f(&mut Serial(port));
        }
    });
}

pub struct Serial<'a>(&'a mut SerialPort);

impl Write for Serial<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for &b in s.as_bytes() {
            let _ = self.0.send(b);
        }
        Ok(())
    }
}
