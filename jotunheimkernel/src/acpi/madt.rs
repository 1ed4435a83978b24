// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! RSDP -> XSDT/RSDT -> MADT walk.
//!
//! Tables are read through [`PhysicalMemory`], so nothing here needs the
//! firmware tables to be mapped. Checksums are not verified.

use log::{debug, warn};
use x86_64::PhysAddr;

use crate::acpi::{CpuEntry, IoApic, MadtInfo};
use crate::smp::hal::PhysicalMemory;
use crate::smp::topology::MAX_PLATFORM_IDS;

// ───────────────────── layout ─────────────────────

const RSDP_SIG: &[u8; 8] = b"RSD PTR ";
const RSDP_REV: u64 = 15;
const RSDP_RSDT: u64 = 16;
const RSDP_XSDT: u64 = 24;

const SDT_LENGTH: u64 = 4;
const SDT_HEADER_LEN: u64 = 36;

const MADT_LAPIC_ADDR: u64 = 36;
const MADT_ENTRIES: u64 = 44;

// Entry types we care about
const PLAPIC: u8 = 0;
const IOAPIC: u8 = 1;
const LAPIC_ADDR_OVERRIDE: u8 = 5;
const PLX2APIC: u8 = 9;

const ENABLED: u32 = 1;

// ─────────────────────────── helpers ───────────────────────────

fn read<const N: usize, M: PhysicalMemory>(memory: &M, phys: u64) -> [u8; N] {
    let mut out = [0u8; N];
    memory.read(PhysAddr::new(phys), &mut out);
    out
}

fn read_u32<M: PhysicalMemory>(memory: &M, phys: u64) -> u32 {
    u32::from_le_bytes(read(memory, phys))
}

fn read_u64<M: PhysicalMemory>(memory: &M, phys: u64) -> u64 {
    u64::from_le_bytes(read(memory, phys))
}

fn le32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn le64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// Scan a root table whose entries are `entry_size`-byte physical pointers.
fn find_table<M: PhysicalMemory>(memory: &M, root: u64, entry_size: u64, want: &[u8; 4]) -> Option<u64> {
    let len = read_u32(memory, root + SDT_LENGTH) as u64;
    let entries = len.checked_sub(SDT_HEADER_LEN)? / entry_size;
    (0..entries)
        .map(|i| {
            let at = root + SDT_HEADER_LEN + i * entry_size;
            if entry_size == 8 {
                read_u64(memory, at)
            } else {
                read_u32(memory, at) as u64
            }
        })
        .filter(|&table| table != 0)
        .find(|&table| {
            let sig: [u8; 4] = read(memory, table);
            &sig == want
        })
}

// ───────────────────────── MADT discovery ─────────────────────────

pub fn discover<M: PhysicalMemory>(memory: &M, rsdp_addr: u64) -> Option<MadtInfo> {
    if rsdp_addr == 0 {
        warn!("RSDP address is 0");
        return None;
    }
    let sig: [u8; 8] = read(memory, rsdp_addr);
    if &sig != RSDP_SIG {
        warn!("bad RSDP signature at {:#x}", rsdp_addr);
        return None;
    }

    let [rev]: [u8; 1] = read(memory, rsdp_addr + RSDP_REV);
    let rsdt = read_u32(memory, rsdp_addr + RSDP_RSDT) as u64;
    let xsdt = if rev >= 2 {
        read_u64(memory, rsdp_addr + RSDP_XSDT)
    } else {
        0
    };

    // Prefer XSDT if present; else use RSDT
    let madt = Some(xsdt)
        .filter(|&x| x != 0)
        .and_then(|x| find_table(memory, x, 8, b"APIC"))
        .or_else(|| Some(rsdt).filter(|&r| r != 0).and_then(|r| find_table(memory, r, 4, b"APIC")));

    let Some(madt) = madt else {
        warn!("MADT not found via XSDT/RSDT");
        return None;
    };
    debug!("MADT at {:#x}", madt);
    Some(parse(memory, madt))
}

fn parse<M: PhysicalMemory>(memory: &M, madt: u64) -> MadtInfo {
    let len = read_u32(memory, madt + SDT_LENGTH) as u64;
    let mut info = MadtInfo {
        lapic_phys: read_u32(memory, madt + MADT_LAPIC_ADDR) as u64,
        cpus: heapless::Vec::new(),
        ioapics: heapless::Vec::new(),
    };

    let mut p = MADT_ENTRIES;
    while p + 2 <= len {
        let [typ, elen]: [u8; 2] = read(memory, madt + p);
        let elen = elen as u64;
        if elen < 2 || p + elen > len {
            break;
        }
        let mut e = [0u8; 16];
        let take = elen.min(16) as usize;
        memory.read(PhysAddr::new(madt + p), &mut e[..take]);

        let cpu = match typ {
            PLAPIC if elen >= 8 => Some(CpuEntry {
                apic_id: e[3] as u32,
                enabled: le32(&e, 4) & ENABLED != 0,
                is_x2apic: false,
            }),
            PLX2APIC if elen >= 16 => Some(CpuEntry {
                apic_id: le32(&e, 4),
                enabled: le32(&e, 8) & ENABLED != 0,
                is_x2apic: true,
            }),
            IOAPIC if elen >= 12 => {
                let io = IoApic {
                    id: e[2],
                    mmio_base_phys: le32(&e, 4) as u64,
                    gsi_base: le32(&e, 8),
                };
                if info.ioapics.push(io).is_err() {
                    warn!("too many IO APICs, ignoring id {}", io.id);
                }
                None
            }
            LAPIC_ADDR_OVERRIDE if elen >= 12 => {
                info.lapic_phys = le64(&e, 4);
                None
            }
            _ => None,
        };

        if let Some(cpu) = cpu {
            if cpu.enabled && cpu.apic_id as usize >= MAX_PLATFORM_IDS {
                warn!("APIC id {} cannot be started with SIPI, skipping", cpu.apic_id);
            }
            if info.cpus.push(cpu).is_err() {
                warn!("MADT lists more than {} processors", MAX_PLATFORM_IDS);
            }
        }
        p += elen;
    }

    info
}
