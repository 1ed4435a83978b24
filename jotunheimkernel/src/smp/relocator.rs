// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Places the real-mode boot stub in low memory.
//!
//! First fit, in the order the loader reported the regions: bring-up runs
//! once, before anything could have fragmented low memory.
//! A region that aligns to page 0 is skipped: it holds the real-mode IVT and
//! the warm-reset vector at 0x467.

use core::fmt;

use log::debug;
use x86_64::PhysAddr;

use super::BringUpConfig;
use super::hal::PhysicalMemory;
use super::params::PARAMS_SIZE;

/// The assembled stub plus where its parameter block sits inside it.
#[derive(Copy, Clone)]
pub struct BootStub<'a> {
    image: &'a [u8],
    params_offset: usize,
}

impl<'a> BootStub<'a> {
    pub const fn new(image: &'a [u8], params_offset: usize) -> Self {
        assert!(params_offset + PARAMS_SIZE <= image.len());
        Self {
            image,
            params_offset,
        }
    }

    pub const fn image(&self) -> &'a [u8] {
        self.image
    }

    pub const fn len(&self) -> usize {
        self.image.len()
    }

    pub const fn params_offset(&self) -> usize {
        self.params_offset
    }
}

/// Where the stub landed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RelocatedStub {
    base: PhysAddr,
    params: PhysAddr,
    len: usize,
}

impl RelocatedStub {
    pub fn base(&self) -> PhysAddr {
        self.base
    }

    pub fn params(&self) -> PhysAddr {
        self.params
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// SIPI vector: the physical page the AP starts executing at.
    pub fn startup_page(&self) -> u8 {
        (self.base.as_u64() >> 12) as u8
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RelocationError {
    NoSuitableRegion { needed: usize },
}

impl fmt::Display for RelocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelocationError::NoSuitableRegion { needed } => write!(
                f,
                "no aligned region below the real-mode limit holds {} bytes",
                needed
            ),
        }
    }
}

/// First region whose aligned base is below the limit and which still holds
/// `size` bytes after alignment.
pub fn find_region<I>(regions: I, size: usize, config: &BringUpConfig) -> Result<PhysAddr, RelocationError>
where
    I: IntoIterator<Item = (u64, u64)>,
{
    let align = config.stub_alignment;
    for (base, len) in regions {
        let Some(aligned) = base.checked_add(align - 1).map(|b| b & !(align - 1)) else {
            continue;
        };
        // Page 0 holds the IVT/BDA, including the warm-reset vector itself.
        if aligned == 0 || aligned >= config.low_memory_limit {
            continue;
        }
        let Some(room) = len.checked_sub(aligned - base) else {
            continue;
        };
        if room < size as u64 {
            continue;
        }
        return Ok(PhysAddr::new(aligned));
    }
    Err(RelocationError::NoSuitableRegion { needed: size })
}

/// Copy `stub` byte for byte into the first suitable region.
pub fn relocate<I, M>(
    stub: &BootStub<'_>,
    regions: I,
    memory: &mut M,
    config: &BringUpConfig,
) -> Result<RelocatedStub, RelocationError>
where
    I: IntoIterator<Item = (u64, u64)>,
    M: PhysicalMemory,
{
    let base = find_region(regions, stub.len(), config)?;
    memory.write(base, stub.image());
    debug!("boot stub: {} bytes at {:#x}", stub.len(), base.as_u64());
    Ok(RelocatedStub {
        base,
        params: base + stub.params_offset() as u64,
        len: stub.len(),
    })
}
