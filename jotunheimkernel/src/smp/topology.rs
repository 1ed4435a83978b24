// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Logical ↔ platform (APIC) processor id registry.

use core::fmt;

use heapless::Vec as HVec;
use log::{info, warn};

use super::MAX_CPUS;

/// APIC ids 0..=254; 255 is the xAPIC broadcast id.
pub const MAX_PLATFORM_IDS: usize = 255;

/// Dense kernel processor index, assigned in discovery order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalCpuId(u32);

impl LogicalCpuId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LogicalCpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Interrupt-controller identity of a processor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlatformCpuId(u8);

impl PlatformCpuId {
    /// `None` for ids the 8-bit startup protocol cannot address.
    pub const fn new(raw: u32) -> Option<Self> {
        if raw < MAX_PLATFORM_IDS as u32 {
            Some(Self(raw as u8))
        } else {
            None
        }
    }

    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PlatformCpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Populated once by [`Topology::discover`], read-only afterwards.
pub struct Topology {
    platform_of: HVec<PlatformCpuId, MAX_CPUS>,
    logical_of: [Option<LogicalCpuId>; MAX_PLATFORM_IDS],
}

impl Topology {
    /// Assign logical ids in arrival order, up to `MAX_CPUS` processors.
    pub fn discover<I>(source: I) -> Self
    where
        I: IntoIterator<Item = PlatformCpuId>,
    {
        let mut topo = Topology {
            platform_of: HVec::new(),
            logical_of: [None; MAX_PLATFORM_IDS],
        };

        for platform in source {
            if topo.platform_of.is_full() {
                warn!("more than {} processors reported, ignoring the rest", MAX_CPUS);
                break;
            }
            let slot = &mut topo.logical_of[platform.raw() as usize];
            if let Some(existing) = slot {
                warn!(
                    "local APIC id {} reported twice, keeping CPU {}",
                    platform, existing
                );
                continue;
            }
            let logical = LogicalCpuId::new(topo.platform_of.len() as u32);
            *slot = Some(logical);
            // Capacity checked above.
            let _ = topo.platform_of.push(platform);
            info!("CPU {:3} local APIC id {:3}", logical, platform);
        }

        topo
    }

    /// Just `platform`, as logical 0.
    pub fn uniprocessor(platform: PlatformCpuId) -> Self {
        let mut logical_of = [None; MAX_PLATFORM_IDS];
        logical_of[platform.raw() as usize] = Some(LogicalCpuId::new(0));
        let mut platform_of = HVec::new();
        let _ = platform_of.push(platform);
        Topology { platform_of, logical_of }
    }

    pub fn len(&self) -> usize {
        self.platform_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platform_of.is_empty()
    }

    pub fn platform_id(&self, cpu: LogicalCpuId) -> Option<PlatformCpuId> {
        self.platform_of.get(cpu.index()).copied()
    }

    /// `None` means "no such logical processor".
    pub fn logical_id(&self, platform: PlatformCpuId) -> Option<LogicalCpuId> {
        self.logical_of[platform.raw() as usize]
    }

    /// `(logical, platform)` pairs in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (LogicalCpuId, PlatformCpuId)> + '_ {
        self.platform_of
            .iter()
            .enumerate()
            .map(|(i, &p)| (LogicalCpuId::new(i as u32), p))
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
