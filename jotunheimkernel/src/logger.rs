// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! `log` backend: one `[LEVEL] target: message` line per record on COM1.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record};

use crate::arch::x86_64::serial;

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        serial::with_port(|port| {
            let _ = write_record(port, record);
        });
    }

    fn flush(&self) {}
}

fn write_record<W: Write>(out: &mut W, record: &Record) -> core::fmt::Result {
    writeln!(
        out,
        "[{:<5}] {}: {}",
        record.level(),
        record.target(),
        record.args()
    )
}

/// Bring up COM1 and route `log` records to it. Later calls only adjust the
/// level.
pub fn init(level: LevelFilter) {
    unsafe {
        serial::init_com1();
    }
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
