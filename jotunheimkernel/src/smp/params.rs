// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Parameter block the boot stub reads with absolute addressing.
//!
//! Byte layout (little endian), shared with `asm/x86_64/ap_trampoline.asm`:
//!
//! | off | size | field                 |
//! |-----|------|-----------------------|
//! | 0   | 4    | logical cpu id        |
//! | 4   | 2    | kernel code selector  |
//! | 6   | 2    | pad                   |
//! | 8   | 8    | cr3                   |
//! | 16  | 10   | gdt limit, base       |
//! | 26  | 10   | idt limit, base       |
//! | 36  | 4    | pad                   |
//! | 40  | 8    | stack top             |

use core::sync::atomic::{Ordering, fence};

use x86_64::structures::DescriptorTablePointer;
use x86_64::{PhysAddr, VirtAddr};

use super::hal::{DescriptorTables, PhysicalMemory, StackProvider};
use super::relocator::RelocatedStub;
use super::topology::LogicalCpuId;

pub const PARAMS_SIZE: usize = 48;

const OFF_CPU: usize = 0;
const OFF_CS: usize = 4;
const OFF_CR3: usize = 8;
const OFF_GDT: usize = 16;
const OFF_IDT: usize = 26;
const OFF_STACK: usize = 40;

#[derive(Debug, Copy, Clone)]
pub struct BootParameters {
    pub cpu: LogicalCpuId,
    pub code_selector: u16,
    pub page_table_root: PhysAddr,
    pub gdt: DescriptorTablePointer,
    pub idt: DescriptorTablePointer,
    pub stack_top: VirtAddr,
}

impl BootParameters {
    /// Snapshot the running processor's tables for `cpu`, plus the stack
    /// reserved for it.
    pub fn capture<D: DescriptorTables, S: StackProvider>(cpu: LogicalCpuId, tables: &D, stacks: &S) -> Self {
        Self {
            cpu,
            code_selector: tables.code_selector(),
            page_table_root: tables.page_table_root(),
            gdt: tables.gdt(),
            idt: tables.idt(),
            stack_top: stacks.stack_top(cpu),
        }
    }

    pub fn encode(&self) -> [u8; PARAMS_SIZE] {
        let mut out = [0u8; PARAMS_SIZE];
        out[OFF_CPU..OFF_CPU + 4].copy_from_slice(&self.cpu.raw().to_le_bytes());
        out[OFF_CS..OFF_CS + 2].copy_from_slice(&self.code_selector.to_le_bytes());
        out[OFF_CR3..OFF_CR3 + 8].copy_from_slice(&self.page_table_root.as_u64().to_le_bytes());
        encode_table(&mut out[OFF_GDT..OFF_GDT + 10], &self.gdt);
        encode_table(&mut out[OFF_IDT..OFF_IDT + 10], &self.idt);
        out[OFF_STACK..OFF_STACK + 8].copy_from_slice(&self.stack_top.as_u64().to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; PARAMS_SIZE]) -> Self {
        Self {
            cpu: LogicalCpuId::new(u32::from_le_bytes(field(bytes, OFF_CPU))),
            code_selector: u16::from_le_bytes(field(bytes, OFF_CS)),
            page_table_root: PhysAddr::new_truncate(u64::from_le_bytes(field(bytes, OFF_CR3))),
            gdt: decode_table(bytes, OFF_GDT),
            idt: decode_table(bytes, OFF_IDT),
            stack_top: VirtAddr::new_truncate(u64::from_le_bytes(field(bytes, OFF_STACK))),
        }
    }

    /// Store the record into the relocated stub and fence, so the target
    /// never sees a partial record once the SIPI goes out.
    pub fn write_to<M: PhysicalMemory>(&self, memory: &mut M, stub: &RelocatedStub) {
        memory.write(stub.params(), &self.encode());
        fence(Ordering::SeqCst);
    }

    pub fn read_from<M: PhysicalMemory>(memory: &M, stub: &RelocatedStub) -> Self {
        let mut raw = [0u8; PARAMS_SIZE];
        memory.read(stub.params(), &mut raw);
        Self::decode(&raw)
    }
}

fn field<const N: usize>(bytes: &[u8; PARAMS_SIZE], off: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[off..off + N]);
    out
}

fn encode_table(out: &mut [u8], table: &DescriptorTablePointer) {
    // Packed struct: copy the fields out before touching them.
    let (limit, base) = (table.limit, table.base);
    out[0..2].copy_from_slice(&limit.to_le_bytes());
    out[2..10].copy_from_slice(&base.as_u64().to_le_bytes());
}

fn decode_table(bytes: &[u8; PARAMS_SIZE], off: usize) -> DescriptorTablePointer {
    DescriptorTablePointer {
        limit: u16::from_le_bytes(field(bytes, off)),
        base: VirtAddr::new_truncate(u64::from_le_bytes(field(bytes, off + 2))),
    }
}
