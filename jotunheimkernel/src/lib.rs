// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! SMP bring-up for the Jotunheim kernel.
//!
//! The bootstrap processor discovers the application processors from the
//! MADT, relocates the real-mode boot stub below 1 MiB, arms the warm-reset
//! vector and starts the APs one at a time with INIT/SIPI, waiting on a
//! single readiness slot for each. See [`smp::init`].
#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod acpi;
pub mod arch;
pub mod bootinfo;
pub mod logger;
pub mod smp;

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("*** KERNEL PANIC ***\n{}", info);
    smp::halt()
}
