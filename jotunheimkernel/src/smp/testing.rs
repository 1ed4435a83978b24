// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Host-side stand-ins for the hardware traits. Every interaction is
//! recorded so tests can assert on the trace.

use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use x86_64::structures::DescriptorTablePointer;
use x86_64::{PhysAddr, VirtAddr};

use super::handshake::ReadinessSlot;
use super::hal::{
    Cmos, ControllerError, DescriptorTables, InterruptController, PhysicalMemory, StackProvider, VectorMode,
};
use super::topology::{LogicalCpuId, PlatformCpuId};

pub const MEMORY_SIZE: usize = 0x11_0000;

pub fn pid(raw: u32) -> PlatformCpuId {
    PlatformCpuId::new(raw).unwrap()
}

pub fn cpu(raw: u32) -> LogicalCpuId {
    LogicalCpuId::new(raw)
}

/// The first 1 MiB and a bit, byte addressed.
pub struct MockMemory {
    bytes: Vec<u8>,
    writes: Vec<(u64, usize)>,
}

impl MockMemory {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; MEMORY_SIZE],
            writes: Vec::new(),
        }
    }

    /// Set bytes without recording a write.
    pub fn poke(&mut self, addr: u64, src: &[u8]) {
        let at = addr as usize;
        self.bytes[at..at + src.len()].copy_from_slice(src);
    }

    pub fn bytes(&self, addr: u64, len: usize) -> &[u8] {
        let at = addr as usize;
        &self.bytes[at..at + len]
    }

    pub fn writes(&self) -> &[(u64, usize)] {
        &self.writes
    }

    pub fn wrote_to(&self, addr: u64) -> bool {
        self.writes
            .iter()
            .any(|&(at, len)| at <= addr && addr < at + len as u64)
    }
}

impl PhysicalMemory for MockMemory {
    fn read(&self, src: PhysAddr, dst: &mut [u8]) {
        dst.copy_from_slice(self.bytes(src.as_u64(), dst.len()));
    }

    fn write(&mut self, dst: PhysAddr, src: &[u8]) {
        self.poke(dst.as_u64(), src);
        self.writes.push((dst.as_u64(), src.len()));
    }
}

pub struct MockCmos {
    regs: [u8; 128],
    writes: Vec<(u8, u8)>,
}

impl MockCmos {
    pub fn new() -> Self {
        Self {
            regs: [0; 128],
            writes: Vec::new(),
        }
    }

    pub fn poke(&mut self, register: u8, value: u8) {
        self.regs[register as usize] = value;
    }

    pub fn peek(&self, register: u8) -> u8 {
        self.regs[register as usize]
    }

    pub fn writes(&self) -> &[(u8, u8)] {
        &self.writes
    }
}

impl Cmos for MockCmos {
    fn read(&mut self, register: u8) -> u8 {
        self.peek(register)
    }

    fn write(&mut self, register: u8, value: u8) {
        self.regs[register as usize] = value;
        self.writes.push((register, value));
    }
}

pub struct MockTables;

pub const KERNEL_CS: u16 = 0x08;
pub const KERNEL_CR3: u64 = 0x0010_3000;

impl DescriptorTables for MockTables {
    fn gdt(&self) -> DescriptorTablePointer {
        DescriptorTablePointer {
            limit: 0x37,
            base: VirtAddr::new(0xffff_8000_0012_3000),
        }
    }

    fn idt(&self) -> DescriptorTablePointer {
        DescriptorTablePointer {
            limit: 0xfff,
            base: VirtAddr::new(0xffff_8000_0045_6000),
        }
    }

    fn code_selector(&self) -> u16 {
        KERNEL_CS
    }

    fn page_table_root(&self) -> PhysAddr {
        PhysAddr::new(KERNEL_CR3)
    }
}

pub struct MockStacks;

pub const STACK_SIZE: u64 = 0x4000;

impl StackProvider for MockStacks {
    fn stack_top(&self, cpu: LogicalCpuId) -> VirtAddr {
        VirtAddr::new(0xffff_8000_0100_0000 + (cpu.raw() as u64 + 1) * STACK_SIZE)
    }
}

/// What a simulated processor does when it gets its SIPI.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Announces its own logical id straight away.
    Responds,
    /// Never runs.
    Silent,
    RejectInit,
    RejectStartup,
    /// Announces somebody else's id.
    AnnouncesAs(LogicalCpuId),
    /// Announces after the BSP has polled the timer this many times.
    AfterPolls(u32),
    /// Hands its logical id to another thread, which does the announcing.
    Deferred(Sender<LogicalCpuId>),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    EnableLocal(LogicalCpuId),
    DetectIoUnits,
    Init(PlatformCpuId),
    Startup(PlatformCpuId, u8),
    ArmTimer(u64),
    Configure(VectorMode),
    Reload,
    ResetLocal,
}

enum Clock {
    /// Expires after a fixed number of polls.
    Polls(u32),
    /// Expires after `micros / divisor` of wall time.
    Wall { divisor: u64 },
}

/// Local APIC plus the processors it can reach. Logical ids follow the
/// order the processors were listed in, as discovery would assign them.
pub struct MockController<'a> {
    slot: &'a ReadinessSlot,
    bsp: PlatformCpuId,
    cpus: Vec<(PlatformCpuId, LogicalCpuId, Behavior)>,
    events: Vec<Event>,
    io_units: usize,
    local_unit: Result<(), ControllerError>,
    clock: Clock,
    polls: u32,
    deadline: Option<Instant>,
    pending: Option<(u32, LogicalCpuId)>,
}

impl<'a> MockController<'a> {
    pub fn new(slot: &'a ReadinessSlot, bsp: u32, cpus: &[(u32, Behavior)]) -> Self {
        Self {
            slot,
            bsp: pid(bsp),
            cpus: cpus
                .iter()
                .enumerate()
                .map(|(i, (p, b))| (pid(*p), cpu(i as u32), b.clone()))
                .collect(),
            events: Vec::new(),
            io_units: 1,
            local_unit: Ok(()),
            clock: Clock::Polls(1_000),
            polls: 0,
            deadline: None,
            pending: None,
        }
    }

    pub fn with_io_units(mut self, count: usize) -> Self {
        self.io_units = count;
        self
    }

    pub fn with_local_unit(mut self, result: Result<(), ControllerError>) -> Self {
        self.local_unit = result;
        self
    }

    pub fn with_poll_budget(mut self, polls: u32) -> Self {
        self.clock = Clock::Polls(polls);
        self
    }

    pub fn with_wall_clock(mut self, divisor: u64) -> Self {
        self.clock = Clock::Wall { divisor };
        self
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    fn behavior(&self, target: PlatformCpuId) -> Option<(LogicalCpuId, Behavior)> {
        self.cpus
            .iter()
            .find(|(p, _, _)| *p == target)
            .map(|(_, l, b)| (*l, b.clone()))
    }
}

impl InterruptController for MockController<'_> {
    fn current_platform_id(&self) -> PlatformCpuId {
        self.bsp
    }

    fn enable_local_unit(&mut self, cpu: LogicalCpuId) -> Result<(), ControllerError> {
        self.events.push(Event::EnableLocal(cpu));
        self.local_unit
    }

    fn detect_io_units(&mut self) -> usize {
        self.events.push(Event::DetectIoUnits);
        self.io_units
    }

    fn send_init(&mut self, target: PlatformCpuId) -> Result<(), ControllerError> {
        self.events.push(Event::Init(target));
        match self.behavior(target) {
            Some((_, Behavior::RejectInit)) => Err(ControllerError::DeliveryTimeout),
            _ => Ok(()),
        }
    }

    fn send_startup(&mut self, target: PlatformCpuId, page: u8) -> Result<(), ControllerError> {
        self.events.push(Event::Startup(target, page));
        match self.behavior(target) {
            Some((id, Behavior::Responds)) => self.slot.announce(id),
            Some((_, Behavior::AnnouncesAs(other))) => self.slot.announce(other),
            Some((id, Behavior::AfterPolls(n))) => self.pending = Some((n, id)),
            Some((id, Behavior::Deferred(tx))) => {
                let _ = tx.send(id);
            }
            Some((_, Behavior::RejectStartup)) => return Err(ControllerError::DeliveryTimeout),
            Some((_, Behavior::Silent | Behavior::RejectInit)) | None => {}
        }
        Ok(())
    }

    fn arm_one_shot_timer(&mut self, micros: u64) {
        self.events.push(Event::ArmTimer(micros));
        self.polls = 0;
        self.deadline = match self.clock {
            Clock::Polls(_) => None,
            Clock::Wall { divisor } => Some(Instant::now() + Duration::from_micros(micros / divisor)),
        };
    }

    fn timer_expired(&mut self) -> bool {
        self.polls += 1;
        if let Some((at, id)) = self.pending {
            if self.polls >= at {
                self.slot.announce(id);
                self.pending = None;
            }
        }
        match self.clock {
            Clock::Polls(budget) => self.polls >= budget,
            Clock::Wall { .. } => self.deadline.is_none_or(|d| Instant::now() >= d),
        }
    }

    fn configure_vector_table(&mut self, mode: VectorMode) {
        self.events.push(Event::Configure(mode));
    }

    fn reload_vector_table(&mut self) {
        self.events.push(Event::Reload);
    }

    fn reset_local_state(&mut self) {
        self.events.push(Event::ResetLocal);
    }
}
