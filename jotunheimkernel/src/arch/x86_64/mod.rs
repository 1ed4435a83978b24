// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
#[cfg(target_os = "none")]
pub mod ap_entry;
#[cfg(target_os = "none")]
pub mod ap_trampoline;
pub mod apic;
pub mod cmos;
pub mod pic;
pub mod platform;
pub mod serial;
pub mod tables;
pub mod tsc;
