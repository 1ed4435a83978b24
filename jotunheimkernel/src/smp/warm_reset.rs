// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Warm-reset vector at 0x467 and the CMOS shutdown-status byte.
//!
//! With the shutdown status set to [`SHUTDOWN_WARM_RESET`], firmware that
//! sees an INIT-reset jumps through the 32-bit vector instead of running
//! POST. Whatever was there before is put back by [`WarmResetVector::disarm`].

use log::debug;
use x86_64::PhysAddr;

use super::hal::{Cmos, PhysicalMemory};

pub const WARM_RESET_VECTOR: u64 = 0x467;
pub const CMOS_SHUTDOWN_STATUS: u8 = 0x0F;
pub const SHUTDOWN_WARM_RESET: u8 = 0x0A;
pub const SHUTDOWN_NORMAL: u8 = 0x00;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SavedWarmReset {
    pub vector: u32,
    pub shutdown_status: u8,
}

impl SavedWarmReset {
    pub fn capture<M: PhysicalMemory, R: Cmos>(memory: &M, cmos: &mut R) -> Self {
        Self {
            vector: read_vector(memory),
            shutdown_status: cmos.read(CMOS_SHUTDOWN_STATUS),
        }
    }
}

/// Holds the captured firmware state while armed.
#[derive(Debug, Default)]
pub struct WarmResetVector {
    saved: Option<SavedWarmReset>,
}

impl WarmResetVector {
    pub const fn new() -> Self {
        Self { saved: None }
    }

    pub fn is_armed(&self) -> bool {
        self.saved.is_some()
    }

    pub fn saved(&self) -> Option<SavedWarmReset> {
        self.saved
    }

    /// Point the warm-reset path at `stub_base`. A second call while armed
    /// does nothing, so the first capture is the one restored.
    pub fn arm<M: PhysicalMemory, R: Cmos>(&mut self, memory: &mut M, cmos: &mut R, stub_base: PhysAddr) {
        if self.saved.is_some() {
            return;
        }
        let saved = SavedWarmReset::capture(memory, cmos);
        self.saved = Some(saved);

        cmos.write(CMOS_SHUTDOWN_STATUS, SHUTDOWN_WARM_RESET);
        write_vector(memory, stub_base.as_u64() as u32);
        debug!(
            "warm reset armed: vector {:#010x} -> {:#010x}, status {:#04x}",
            saved.vector,
            stub_base.as_u64(),
            saved.shutdown_status
        );
    }

    /// Put back what `arm` captured. No-op unless armed.
    pub fn disarm<M: PhysicalMemory, R: Cmos>(&mut self, memory: &mut M, cmos: &mut R) {
        let Some(saved) = self.saved.take() else {
            return;
        };
        write_vector(memory, saved.vector);
        cmos.write(CMOS_SHUTDOWN_STATUS, saved.shutdown_status);
        debug!("warm reset disarmed");
    }
}

fn read_vector<M: PhysicalMemory>(memory: &M) -> u32 {
    let mut raw = [0u8; 4];
    memory.read(PhysAddr::new(WARM_RESET_VECTOR), &mut raw);
    u32::from_le_bytes(raw)
}

fn write_vector<M: PhysicalMemory>(memory: &mut M, value: u32) {
    memory.write(PhysAddr::new(WARM_RESET_VECTOR), &value.to_le_bytes());
}
