// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! BSP side of bring-up.
//!
//! ```text
//! Idle -> Discovering -> ConfiguringController -> Relocating -> Arming
//!      -> PerTargetLoop -> Disarming -> Done
//! ```
//!
//! Any failure up to and including `Relocating` goes straight to
//! `UniprocessorFallback`. Nothing on those paths has touched the warm-reset
//! state, so there is nothing to undo. Once armed, every path goes through
//! `Disarming`.
//!
//! The topology is published only when bring-up settles. A fallback publishes
//! one holding just the running processor, as logical 0.

use core::fmt;
use core::hint::spin_loop;

use heapless::Vec as HVec;
use log::{info, warn};
use x86_64::PhysAddr;

use super::hal::{
    Cmos, ControllerError, DescriptorTables, InterruptController, PhysicalMemory, StackProvider, VectorMode,
};
use super::handshake::CpuSet;
use super::params::BootParameters;
use super::relocator::{self, BootStub, RelocatedStub, RelocationError};
use super::topology::{LogicalCpuId, PlatformCpuId, Topology};
use super::warm_reset::WarmResetVector;
use super::{BringUpConfig, MAX_CPUS, SmpState};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Discovering,
    ConfiguringController,
    Relocating,
    Arming,
    PerTargetLoop,
    Disarming,
    Done,
    UniprocessorFallback,
}

/// Why bring-up settled for one processor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    NoProcessors,
    UnknownBootProcessor(PlatformCpuId),
    LocalUnit(ControllerError),
    NoIoUnits,
    Relocation(RelocationError),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NoProcessors => f.write_str("firmware reported no processors"),
            FallbackReason::UnknownBootProcessor(id) => {
                write!(f, "boot processor (APIC id {}) missing from topology", id)
            }
            FallbackReason::LocalUnit(e) => write!(f, "local APIC: {}", e),
            FallbackReason::NoIoUnits => f.write_str("no IO APIC"),
            FallbackReason::Relocation(e) => write!(f, "boot stub: {}", e),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    UniprocessorFallback(FallbackReason),
}

/// Why one AP was skipped. None of these stop the loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TargetFailure {
    InitRejected(ControllerError),
    StartupRejected(ControllerError),
    Timeout,
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetFailure::InitRejected(e) => write!(f, "INIT rejected: {}", e),
            TargetFailure::StartupRejected(e) => write!(f, "SIPI rejected: {}", e),
            TargetFailure::Timeout => f.write_str("no response"),
        }
    }
}

const PATH_LEN: usize = 9;

#[derive(Debug, Clone)]
pub struct BringUpReport {
    pub outcome: Outcome,
    pub ready: CpuSet,
    pub failures: HVec<(LogicalCpuId, TargetFailure), MAX_CPUS>,
    pub stub_base: Option<PhysAddr>,
    /// Stages visited, in order.
    pub path: HVec<Stage, PATH_LEN>,
}

impl BringUpReport {
    fn new() -> Self {
        let mut path = HVec::new();
        let _ = path.push(Stage::Idle);
        Self {
            outcome: Outcome::Done,
            ready: CpuSet::empty(),
            failures: HVec::new(),
            stub_base: None,
            path,
        }
    }

    fn enter(&mut self, stage: Stage) {
        // Each stage is entered at most once.
        let _ = self.path.push(stage);
    }

    pub fn visited(&self, stage: Stage) -> bool {
        self.path.contains(&stage)
    }

    pub fn failure_of(&self, cpu: LogicalCpuId) -> Option<TargetFailure> {
        self.failures.iter().find(|(c, _)| *c == cpu).map(|(_, f)| *f)
    }
}

pub struct Sequencer<'a, C, M, R, D, S> {
    controller: &'a mut C,
    memory: &'a mut M,
    cmos: &'a mut R,
    tables: &'a D,
    stacks: &'a S,
    state: &'a SmpState,
    config: BringUpConfig,
    warm_reset: WarmResetVector,
}

impl<'a, C, M, R, D, S> Sequencer<'a, C, M, R, D, S>
where
    C: InterruptController,
    M: PhysicalMemory,
    R: Cmos,
    D: DescriptorTables,
    S: StackProvider,
{
    pub fn new(
        controller: &'a mut C,
        memory: &'a mut M,
        cmos: &'a mut R,
        tables: &'a D,
        stacks: &'a S,
        state: &'a SmpState,
    ) -> Self {
        Self {
            controller,
            memory,
            cmos,
            tables,
            stacks,
            state,
            config: BringUpConfig::default(),
            warm_reset: WarmResetVector::new(),
        }
    }

    pub fn with_config(mut self, config: BringUpConfig) -> Self {
        self.config = config;
        self
    }

    /// Bring up every processor `source` reports. Always returns; the
    /// topology, ready set and count are published to `state` before it does.
    pub fn run<I, G>(mut self, source: I, regions: G, stub: &BootStub<'_>) -> BringUpReport
    where
        I: IntoIterator<Item = PlatformCpuId>,
        G: IntoIterator<Item = (u64, u64)>,
    {
        let mut report = BringUpReport::new();

        report.enter(Stage::Discovering);
        let topology = Topology::discover(source);
        if topology.is_empty() {
            return self.fallback(report, FallbackReason::NoProcessors);
        }
        let me = self.controller.current_platform_id();
        let Some(bsp) = topology.logical_id(me) else {
            return self.fallback(report, FallbackReason::UnknownBootProcessor(me));
        };

        report.enter(Stage::ConfiguringController);
        if let Err(e) = self.controller.enable_local_unit(bsp) {
            return self.fallback(report, FallbackReason::LocalUnit(e));
        }
        if self.controller.detect_io_units() == 0 {
            return self.fallback(report, FallbackReason::NoIoUnits);
        }
        self.controller.configure_vector_table(VectorMode::Multiprocessor);
        self.controller.reload_vector_table();

        report.ready.insert(bsp);
        if topology.len() == 1 {
            return self.done(report, topology);
        }

        report.enter(Stage::Relocating);
        let placed = match relocator::relocate(stub, regions, self.memory, &self.config) {
            Ok(placed) => placed,
            Err(e) => {
                warn!("copying boot stub failed, cannot boot SMP: {}", e);
                return self.fallback(report, FallbackReason::Relocation(e));
            }
        };
        report.stub_base = Some(placed.base());

        report.enter(Stage::Arming);
        self.warm_reset.arm(self.memory, self.cmos, placed.base());

        report.enter(Stage::PerTargetLoop);
        for (cpu, target) in topology.iter() {
            if target == me {
                info!("Skipping BSP (CPU {})", cpu);
                continue;
            }
            info!("Booting CPU {}", cpu);
            match self.boot_one(&placed, cpu, target) {
                Ok(()) => {
                    report.ready.insert(cpu);
                    info!("CPU {} is up", cpu);
                }
                Err(failure) => {
                    warn!("CPU {} didn't boot: {}", cpu, failure);
                    // Bounded by the topology size.
                    let _ = report.failures.push((cpu, failure));
                }
            }
        }

        report.enter(Stage::Disarming);
        self.warm_reset.disarm(self.memory, self.cmos);

        self.done(report, topology)
    }

    fn boot_one(&mut self, stub: &RelocatedStub, cpu: LogicalCpuId, target: PlatformCpuId) -> Result<(), TargetFailure> {
        let slot = self.state.slot();
        slot.reset();
        BootParameters::capture(cpu, self.tables, self.stacks).write_to(self.memory, stub);

        self.controller
            .send_init(target)
            .map_err(TargetFailure::InitRejected)?;
        self.controller
            .send_startup(target, stub.startup_page())
            .map_err(TargetFailure::StartupRejected)?;

        self.controller.arm_one_shot_timer(self.config.ap_timeout_us);
        loop {
            if slot.observe() == Some(cpu) {
                return Ok(());
            }
            if self.controller.timer_expired() {
                return Err(TargetFailure::Timeout);
            }
            spin_loop();
        }
    }

    fn done(&mut self, mut report: BringUpReport, topology: Topology) -> BringUpReport {
        report.enter(Stage::Done);
        let topology = self.state.publish_topology(topology);
        self.state.publish_ready(report.ready);
        info!("{} of {} CPUs running", report.ready.len(), topology.len());
        report
    }

    fn fallback(&mut self, mut report: BringUpReport, reason: FallbackReason) -> BringUpReport {
        warn!("SMP initialization failed ({}), continuing with one CPU", reason);
        report.enter(Stage::UniprocessorFallback);
        let me = self.controller.current_platform_id();

        self.controller.reset_local_state();
        self.controller.configure_vector_table(VectorMode::Legacy);
        self.controller.reload_vector_table();

        let topology = self.state.publish_topology(Topology::uniprocessor(me));
        let bsp = topology.logical_id(me).unwrap_or(LogicalCpuId::new(0));

        report.outcome = Outcome::UniprocessorFallback(reason);
        report.ready = CpuSet::single(bsp);
        report.failures.clear();
        report.stub_base = None;
        self.state.publish_ready(report.ready);
        report
    }
}
