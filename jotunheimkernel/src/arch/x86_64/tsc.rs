// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use core::arch::x86_64::{__cpuid_count, _rdtsc};

use spin::Once;

static TSC_HZ: Once<u64> = Once::new();

#[inline]
pub fn rdtsc() -> u64 {
    // Safe to call on x86_64; serializing/ordering handled by callers.
    unsafe { _rdtsc() }
}

pub fn tsc_hz_estimate() -> u64 {
    *TSC_HZ.call_once(|| {
        // Try CPUID.15H (TSC/core crystal ratio)
        let leaf15 = unsafe { __cpuid_count(0x15, 0) };
        let (den, num) = (leaf15.eax, leaf15.ebx);
        let crystal = leaf15.ecx; // Hz
        if den != 0 && num != 0 && crystal != 0 {
            return (crystal as u64) * (num as u64) / (den as u64);
        }
        // Fallback: CPUID.16H base freq in MHz
        let leaf16 = unsafe { __cpuid_count(0x16, 0) };
        let mhz = leaf16.eax & 0xFFFF;
        if mhz != 0 {
            return (mhz as u64) * 1_000_000;
        }
        // Worst-case default
        3_000_000_000
    })
}

/// Busy-wait for at least `us` microseconds.
pub fn delay_us(us: u64) {
    let cycles = (tsc_hz_estimate() / 1_000_000).saturating_mul(us);
    let t0 = rdtsc();
    while rdtsc().wrapping_sub(t0) < cycles {
        core::hint::spin_loop();
    }
}
