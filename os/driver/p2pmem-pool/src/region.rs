//! Physical regions and the block-index map across them.

use alloc::vec::Vec;
use bitfield_struct::bitfield;
use core::fmt;
use p2pmem_addresses::PhysicalAddress;

/// PCI function address (`domain:bus:device.function`) of the endpoint that
/// exposes a region.
///
/// Packed the way the bus encodes it: function in bits 0–2, device in 3–7,
/// bus in 8–15, segment/domain in 16–31.
#[bitfield(u32)]
#[derive(PartialEq, Eq, Hash)]
pub struct PciAddress {
    #[bits(3)]
    pub function: u8,
    #[bits(5)]
    pub device: u8,
    pub bus: u8,
    pub domain: u16,
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain(),
            self.bus(),
            self.device(),
            self.function()
        )
    }
}

/// A contiguous range of device memory. Immutable once handed to a pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PhysicalRegion {
    pub base: PhysicalAddress,
    pub length: u64,
    pub owner: PciAddress,
}

impl PhysicalRegion {
    #[must_use]
    pub const fn new(base: PhysicalAddress, length: u64, owner: PciAddress) -> Self {
        Self {
            base,
            length,
            owner,
        }
    }

    /// One past the last byte, or `None` if the range wraps.
    #[must_use]
    pub const fn end(&self) -> Option<PhysicalAddress> {
        self.base.checked_add(self.length)
    }

    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let a0 = self.base.as_u64();
        let b0 = other.base.as_u64();
        let a1 = a0.saturating_add(self.length);
        let b1 = b0.saturating_add(other.length);
        a0 < b1 && b0 < a1
    }
}

/// Index of a region inside its pool, in the order regions were added.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionHandle(pub(crate) usize);

impl RegionHandle {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A region together with its slice of the pool's block index space.
#[derive(Debug, Copy, Clone)]
pub struct RegionEntry {
    pub region: PhysicalRegion,
    pub first_block: usize,
    pub blocks: usize,
}

impl RegionEntry {
    /// One past the last global block index of this region.
    #[must_use]
    pub const fn end_block(&self) -> usize {
        self.first_block + self.blocks
    }

    #[must_use]
    pub const fn contains_block(&self, index: usize) -> bool {
        index >= self.first_block && index < self.end_block()
    }
}

/// Regions of a pool laid end to end in block-index space.
#[derive(Debug, Default)]
pub struct RegionMap {
    entries: Vec<RegionEntry>,
    total_blocks: usize,
}

impl RegionMap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            total_blocks: 0,
        }
    }

    pub(crate) fn push(&mut self, region: PhysicalRegion, blocks: usize) -> RegionHandle {
        let handle = RegionHandle(self.entries.len());
        self.entries.push(RegionEntry {
            region,
            first_block: self.total_blocks,
            blocks,
        });
        self.total_blocks += blocks;
        handle
    }

    #[must_use]
    pub const fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn get(&self, handle: RegionHandle) -> Option<&RegionEntry> {
        self.entries.get(handle.0)
    }

    /// The region that contains global block `index`.
    #[must_use]
    pub fn locate(&self, index: usize) -> Option<&RegionEntry> {
        let pos = self
            .entries
            .partition_point(|e| e.end_block() <= index);
        self.entries.get(pos).filter(|e| e.contains_block(index))
    }

    /// `true` if `[start, start + count)` lies inside a single region.
    #[must_use]
    pub fn run_in_one_region(&self, start: usize, count: usize) -> bool {
        self.locate(start)
            .is_some_and(|e| start.checked_add(count).is_some_and(|end| end <= e.end_block()))
    }

    pub(crate) fn overlapping(&self, region: &PhysicalRegion) -> Option<&RegionEntry> {
        self.entries.iter().find(|e| e.region.overlaps(region))
    }
}
