// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use crate::arch::x86_64::platform;
use crate::smp::{self, LogicalCpuId, ap};

/// Where the boot stub jumps, already on this CPU's own stack.
#[unsafe(no_mangle)]
pub extern "C" fn smp_ap_boot(cpu: u32) -> ! {
    let cpu = LogicalCpuId::new(cpu);
    let (Some(entry), Some(apic)) = (platform::entry(), platform::controller()) else {
        smp::halt()
    };
    let mut apic = apic.clone();
    ap::finish_booting(cpu, smp::STATE.slot(), &mut apic, entry)
}
