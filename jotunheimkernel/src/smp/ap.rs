// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! What an AP runs once the boot stub has dropped it into long mode, on the
//! stack reserved for its logical id.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{error, info};

use super::hal::{BootCompletion, ControllerError, InterruptController};
use super::handshake::ReadinessSlot;
use super::topology::LogicalCpuId;

/// Set by the kernel once its address space is final. APs park until then.
static PAGING_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn mark_paging_enabled() {
    PAGING_ENABLED.store(true, Ordering::Release);
}

/// Report in as `cpu`, wait for `paging`, then enable this processor's
/// local APIC.
pub fn rendezvous<C: InterruptController>(
    cpu: LogicalCpuId,
    slot: &ReadinessSlot,
    paging: &AtomicBool,
    controller: &mut C,
) -> Result<(), ControllerError> {
    slot.announce(cpu);
    while !paging.load(Ordering::Acquire) {
        spin_loop();
    }
    controller.enable_local_unit(cpu)
}

pub fn finish_booting<C, B>(cpu: LogicalCpuId, slot: &ReadinessSlot, controller: &mut C, completion: &B) -> !
where
    C: InterruptController,
    B: BootCompletion,
{
    if let Err(e) = rendezvous(cpu, slot, &PAGING_ENABLED, controller) {
        error!("CPU {}: {}", cpu, e);
        super::halt();
    }
    info!("CPU {} says hello world!", cpu);
    completion.enter_user_work(cpu)
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::smp::testing::{Event, MockController, cpu};

    #[test]
    fn announces_before_waiting_for_paging() {
        let slot = ReadinessSlot::new();
        let paging = AtomicBool::new(false);

        thread::scope(|s| {
            let ap = s.spawn(|| {
                let mut c = MockController::new(&slot, 3, &[]);
                let r = rendezvous(cpu(2), &slot, &paging, &mut c);
                (r, c.events().to_vec())
            });

            while slot.observe() != Some(cpu(2)) {
                spin_loop();
            }
            thread::sleep(Duration::from_millis(5));
            assert!(!ap.is_finished());
            paging.store(true, Ordering::Release);

            let (r, events) = ap.join().unwrap();
            assert_eq!(r, Ok(()));
            assert_eq!(events, [Event::EnableLocal(cpu(2))]);
        });
    }

    #[test]
    fn local_unit_failure_is_reported() {
        let slot = ReadinessSlot::new();
        let paging = AtomicBool::new(true);
        let mut c = MockController::new(&slot, 1, &[]).with_local_unit(Err(ControllerError::LocalUnitDisabled));

        assert_eq!(
            rendezvous(cpu(1), &slot, &paging, &mut c),
            Err(ControllerError::LocalUnitDisabled)
        );
        assert_eq!(slot.observe(), Some(cpu(1)));
    }
}
