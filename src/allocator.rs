//! Finds the largest power-of-two transfer unit for which both the write
//! and the read buffer fit in memory, and hands out the dual buffer.

use aligned_vec::{AVec, RuntimeAlign};
use sysinfo::System;

use crate::error::{FatalError, Result};
use crate::geometry::DeviceGeometry;

pub const DIRECT_IO_ALIGNMENT: usize = 4096;
/// Share of the currently available memory left to the host.
const SAFETY_FACTOR: f64 = 0.10;

pub type AlignedVec = AVec<u8, RuntimeAlign>;

/// A fallible allocation primitive.
pub trait Allocate {
    /// Returns `None` when `len` bytes cannot be provided.
    fn try_allocate(&mut self, len: usize) -> Option<AlignedVec>;
}

fn zeroed(len: usize, alignment: usize) -> AlignedVec {
    AlignedVec::from_iter(alignment, std::iter::repeat(0u8).take(len))
}

/// Allocates from the heap, refusing anything above the memory currently
/// available on the host (less a safety margin) or the operator's ceiling,
/// whichever is lower.
#[derive(Debug, Clone)]
pub struct SystemAllocator {
    pub alignment: usize,
    pub ceiling: Option<u64>,
    available: u64,
}

impl SystemAllocator {
    pub fn new(direct_io: bool, ceiling: Option<u64>) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            alignment: if direct_io { DIRECT_IO_ALIGNMENT } else { 1 },
            ceiling,
            available: (sys.available_memory() as f64 * (1.0 - SAFETY_FACTOR)) as u64,
        }
    }

    pub fn limit(&self) -> u64 {
        match self.ceiling {
            Some(c) => c.min(self.available),
            None => self.available,
        }
    }
}

impl Allocate for SystemAllocator {
    fn try_allocate(&mut self, len: usize) -> Option<AlignedVec> {
        if len as u64 > self.limit() {
            return None;
        }
        Some(zeroed(len, self.alignment))
    }
}

/// Fixed byte ceiling, independent of the host.
#[derive(Debug, Clone, Copy)]
pub struct CeilingAllocator {
    pub ceiling: u64,
}

impl Allocate for CeilingAllocator {
    fn try_allocate(&mut self, len: usize) -> Option<AlignedVec> {
        (len as u64 <= self.ceiling).then(|| zeroed(len, 1))
    }
}

/// Write-source and read-destination regions carved out of one allocation.
pub struct DualBuffer {
    storage: AlignedVec,
    half: usize,
}

impl DualBuffer {
    pub fn buffer_bytes(&self) -> usize {
        self.half
    }

    pub fn split(&mut self) -> (&mut [u8], &mut [u8]) {
        self.storage.as_mut_slice().split_at_mut(self.half)
    }
}

impl std::fmt::Debug for DualBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualBuffer")
            .field("write", &self.storage.as_ptr())
            .field("read", &self.storage.as_ptr().wrapping_add(self.half))
            .field("buffer_bytes", &self.half)
            .finish()
    }
}

/// Immutable run parameters derived once from geometry and memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    pub sector_size: u32,
    pub max_chunk_sectors: u64,
    pub buffer_bytes: u64,
    pub start_sector: u64,
    pub end_sector: u64,
}

impl RunPlan {
    pub fn new(geometry: &DeviceGeometry, max_chunk_sectors: u64) -> Self {
        let total = geometry.total_sectors;
        Self {
            sector_size: geometry.sector_size,
            max_chunk_sectors,
            buffer_bytes: max_chunk_sectors * u64::from(geometry.sector_size),
            start_sector: geometry.data_start_sector,
            end_sector: geometry.data_start_sector + total - total % max_chunk_sectors,
        }
    }

    pub fn chunk_count(&self) -> u64 {
        (self.end_sector - self.start_sector) / self.max_chunk_sectors
    }

    /// `log2(max_chunk_sectors) + 1`
    pub fn ramp_steps(&self) -> u32 {
        self.max_chunk_sectors.trailing_zeros() + 1
    }

    /// Sector counts of one ramp: 1, 2, 4, ... max_chunk_sectors.
    pub fn ramp(&self) -> impl Iterator<Item = u64> {
        let max = self.max_chunk_sectors;
        std::iter::successors(Some(1u64), move |&n| (n < max).then_some(n * 2))
    }

    pub fn chunk_starts(&self) -> impl Iterator<Item = u64> {
        (self.start_sector..self.end_sector).step_by(self.max_chunk_sectors as usize)
    }
}

/// Largest power of two reached by doubling from 1 while twice the value
/// stays below `total_sectors`.
pub fn initial_chunk_sectors(total_sectors: u64) -> u64 {
    let mut p = 1u64;
    while p * 2 < total_sectors {
        p *= 2;
    }
    p
}

/// Secure the dual buffer, halving the chunk on every refused allocation.
pub fn allocate_plan<A: Allocate>(
    geometry: &DeviceGeometry,
    alloc: &mut A,
) -> Result<(RunPlan, DualBuffer)> {
    allocate_plan_with(geometry, alloc, |_| {})
}

/// Like [`allocate_plan`], calling `on_refused` with the byte size of every
/// dual buffer the allocator turned down.
pub fn allocate_plan_with<A: Allocate, F: FnMut(u64)>(
    geometry: &DeviceGeometry,
    alloc: &mut A,
    mut on_refused: F,
) -> Result<(RunPlan, DualBuffer)> {
    let sector_size = u64::from(geometry.sector_size);
    let mut chunk = initial_chunk_sectors(geometry.total_sectors);
    loop {
        let half = chunk * sector_size;
        let attempt = usize::try_from(half * 2)
            .ok()
            .and_then(|len| alloc.try_allocate(len));
        if let Some(storage) = attempt {
            let buffer = DualBuffer {
                storage,
                half: half as usize,
            };
            return Ok((RunPlan::new(geometry, chunk), buffer));
        }
        on_refused(half * 2);
        if chunk == 1 {
            return Err(FatalError::Allocation { min_bytes: half * 2 });
        }
        chunk /= 2;
    }
}
