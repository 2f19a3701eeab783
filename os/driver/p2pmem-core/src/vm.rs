//! The slice of the platform's virtual-memory model the driver works with.

use bitfield_struct::bitfield;
use core::fmt;
use p2pmem_addresses::{PhysicalAddress, VirtualAddress};

/// Flags of a virtual memory area, as far as the driver looks at them.
///
/// | Bit | Name        | Meaning |
/// |-----|-------------|---------|
/// | 0   | `read`      | Currently readable |
/// | 1   | `write`     | Currently writable |
/// | 2   | `exec`      | Currently executable |
/// | 3   | `shared`    | Writes are visible to other mappers |
/// | 4–6 | `may_*`     | Permissions `mprotect` may grant later |
/// | 7   | `may_share` | Area may be shared; private mappings have it clear |
/// | 8   | `mixed_map` | Area holds device PFNs without `struct page` refcounting |
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct VmFlags {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub shared: bool,
    pub may_read: bool,
    pub may_write: bool,
    pub may_exec: bool,
    pub may_share: bool,
    pub mixed_map: bool,
    #[bits(23)]
    __: u32,
}

impl VmFlags {
    /// Flags of a read/write `MAP_SHARED` mapping.
    #[must_use]
    pub const fn shared_rw() -> Self {
        Self::new()
            .with_read(true)
            .with_write(true)
            .with_shared(true)
            .with_may_read(true)
            .with_may_write(true)
            .with_may_share(true)
    }

    /// Flags of a read/write `MAP_PRIVATE` mapping.
    #[must_use]
    pub const fn private_rw() -> Self {
        Self::new()
            .with_read(true)
            .with_write(true)
            .with_may_read(true)
            .with_may_write(true)
    }
}

/// Caching attributes a translation is installed with.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum CacheMode {
    WriteBack,
    WriteCombining,
    #[default]
    Uncached,
}

/// A consumer's virtual memory area `[start, start + length)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VmArea {
    pub start: VirtualAddress,
    pub length: u64,
    pub flags: VmFlags,
    pub caching: CacheMode,
}

impl VmArea {
    #[must_use]
    pub const fn new(start: VirtualAddress, length: u64, flags: VmFlags) -> Self {
        Self {
            start,
            length,
            flags,
            caching: CacheMode::Uncached,
        }
    }

    #[must_use]
    pub const fn with_caching(mut self, caching: CacheMode) -> Self {
        self.caching = caching;
        self
    }

    /// One past the last address, or `None` if the area wraps.
    #[must_use]
    pub const fn end(&self) -> Option<VirtualAddress> {
        self.start.checked_add(self.length)
    }

    /// Byte offset of `address` inside the area.
    #[must_use]
    pub const fn offset_of(&self, address: VirtualAddress) -> Option<u64> {
        match address.offset_from(self.start) {
            Some(offset) if offset < self.length => Some(offset),
            _ => None,
        }
    }
}

/// Flags carried by a page frame number.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct PfnFlags {
    /// Frame is device memory.
    pub dev: bool,
    /// Frame has a memory map entry.
    pub map: bool,
    #[bits(6)]
    __: u8,
}

/// A page frame number with its flags.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Pfn {
    frame: u64,
    flags: PfnFlags,
}

impl Pfn {
    #[must_use]
    pub const fn from_phys(address: PhysicalAddress, flags: PfnFlags) -> Self {
        Self {
            frame: address.pfn(),
            flags,
        }
    }

    /// Device-memory frame as the driver installs it.
    #[must_use]
    pub const fn device(address: PhysicalAddress) -> Self {
        Self::from_phys(address, PfnFlags::new().with_dev(true).with_map(true))
    }

    #[must_use]
    pub const fn frame(self) -> u64 {
        self.frame
    }

    #[must_use]
    pub const fn flags(self) -> PfnFlags {
        self.flags
    }

    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame << p2pmem_addresses::PAGE_SHIFT)
    }
}

impl fmt::Debug for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pfn({:#x}", self.frame)?;
        if self.flags.dev() {
            f.write_str(" dev")?;
        }
        if self.flags.map() {
            f.write_str(" map")?;
        }
        f.write_str(")")
    }
}

/// What the platform has to install for a resolved fault.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Translation {
    pub pfn: Pfn,
    pub caching: CacheMode,
}

impl Translation {
    #[must_use]
    pub const fn address(&self) -> PhysicalAddress {
        self.pfn.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_and_private_flags() {
        assert!(VmFlags::shared_rw().may_share());
        assert!(!VmFlags::private_rw().may_share());
        assert!(!VmFlags::shared_rw().mixed_map());
        assert_eq!(VmFlags::new().with_may_share(true).into_bits(), 1 << 7);
        assert_eq!(VmFlags::new().with_mixed_map(true).into_bits(), 1 << 8);
    }

    #[test]
    fn offsets_inside_area() {
        let area = VmArea::new(VirtualAddress::new(0x7000_0000), 3 * 4096, VmFlags::shared_rw());
        assert_eq!(area.offset_of(VirtualAddress::new(0x7000_1234)), Some(0x1234));
        assert_eq!(area.offset_of(VirtualAddress::new(0x7000_3000)), None);
        assert_eq!(area.offset_of(VirtualAddress::new(0x6fff_ffff)), None);
        assert_eq!(area.end(), Some(VirtualAddress::new(0x7000_3000)));
    }

    #[test]
    fn device_pfn_round_trips_address() {
        let pfn = Pfn::device(PhysicalAddress::new(0x38_0000_5000));
        assert_eq!(pfn.frame(), 0x380_0005);
        assert!(pfn.flags().dev() && pfn.flags().map());
        assert_eq!(pfn.address(), PhysicalAddress::new(0x38_0000_5000));
        assert_eq!(format!("{pfn:?}"), "Pfn(0x3800005 dev map)");
    }
}
