// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! BSP ⇄ AP bring-up handshake.
//!
//! Exactly one AP is in flight at a time, so the slot has one writer (the AP
//! being started) and one reader (the BSP). No lock: release on write,
//! acquire on read, and a full fence after the AP's write so nothing the AP
//! reads afterwards can be reordered ahead of its announcement.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering, fence};

use super::MAX_CPUS;
use super::topology::LogicalCpuId;

const NO_CPU: u32 = u32::MAX;

pub struct ReadinessSlot(AtomicU32);

impl ReadinessSlot {
    pub const fn new() -> Self {
        Self(AtomicU32::new(NO_CPU))
    }

    /// BSP, before signalling the next target.
    pub fn reset(&self) {
        self.0.store(NO_CPU, Ordering::Release);
    }

    /// AP: "I am now executing as `cpu`".
    pub fn announce(&self, cpu: LogicalCpuId) {
        self.0.store(cpu.raw(), Ordering::Release);
        fence(Ordering::SeqCst);
    }

    /// BSP: one fresh load per call, never cached across a wait loop.
    pub fn observe(&self) -> Option<LogicalCpuId> {
        match self.0.load(Ordering::Acquire) {
            NO_CPU => None,
            raw => Some(LogicalCpuId::new(raw)),
        }
    }
}

impl Default for ReadinessSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// One bit per logical processor.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct CpuSet(u64);

const _: () = assert!(MAX_CPUS <= 64);

impl CpuSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn single(cpu: LogicalCpuId) -> Self {
        Self(1 << cpu.raw())
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn insert(&mut self, cpu: LogicalCpuId) {
        debug_assert!(cpu.index() < MAX_CPUS);
        self.0 |= 1 << cpu.raw();
    }

    pub const fn contains(self, cpu: LogicalCpuId) -> bool {
        cpu.index() < MAX_CPUS && self.0 & (1 << cpu.raw()) != 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = LogicalCpuId> {
        (0..MAX_CPUS as u32)
            .map(LogicalCpuId::new)
            .filter(move |&cpu| self.contains(cpu))
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|c| c.raw())).finish()
    }
}

impl FromIterator<LogicalCpuId> for CpuSet {
    fn from_iter<T: IntoIterator<Item = LogicalCpuId>>(iter: T) -> Self {
        let mut set = CpuSet::empty();
        for cpu in iter {
            set.insert(cpu);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn slot_starts_and_resets_to_sentinel() {
        let slot = ReadinessSlot::new();
        assert_eq!(slot.observe(), None);
        slot.announce(LogicalCpuId::new(3));
        assert_eq!(slot.observe(), Some(LogicalCpuId::new(3)));
        slot.reset();
        assert_eq!(slot.observe(), None);
    }

    #[test]
    fn logical_zero_is_distinct_from_no_cpu() {
        let slot = ReadinessSlot::new();
        slot.announce(LogicalCpuId::new(0));
        assert_eq!(slot.observe(), Some(LogicalCpuId::new(0)));
    }

    #[test]
    fn announcement_from_another_thread_publishes_prior_writes() {
        let slot = ReadinessSlot::new();
        let payload = AtomicBool::new(false);
        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(5));
                payload.store(true, Ordering::Relaxed);
                slot.announce(LogicalCpuId::new(1));
            });
            while slot.observe() != Some(LogicalCpuId::new(1)) {
                core::hint::spin_loop();
            }
            assert!(payload.load(Ordering::Relaxed));
        });
    }

    #[test]
    fn cpu_set_basics() {
        let mut set = CpuSet::single(LogicalCpuId::new(0));
        set.insert(LogicalCpuId::new(3));
        set.insert(LogicalCpuId::new(63));
        assert_eq!(set.len(), 3);
        assert!(set.contains(LogicalCpuId::new(3)));
        assert!(!set.contains(LogicalCpuId::new(2)));
        assert!(!set.contains(LogicalCpuId::new(64)));
        let raw: Vec<u32> = set.iter().map(|c| c.raw()).collect();
        assert_eq!(raw, vec![0, 3, 63]);
        assert_eq!(format!("{:?}", set), "{0, 3, 63}");
    }
}
