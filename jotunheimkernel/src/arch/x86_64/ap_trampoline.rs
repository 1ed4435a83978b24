// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
// Symbols from asm/x86_64/ap_trampoline.asm.
use crate::smp::relocator::BootStub;

#[allow(improper_ctypes)]
unsafe extern "C" {
    unsafe static _ap_tramp_start: u8;
    unsafe static _ap_tramp_params: u8;
    unsafe static _ap_tramp_end: u8;
}

pub fn boot_stub() -> BootStub<'static> {
    unsafe {
        let start = &raw const _ap_tramp_start as usize;
        let params = &raw const _ap_tramp_params as usize - start;
        let len = &raw const _ap_tramp_end as usize - start;
        BootStub::new(core::slice::from_raw_parts(start as *const u8, len), params)
    }
}
