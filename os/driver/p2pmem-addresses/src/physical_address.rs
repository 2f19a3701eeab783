use crate::{BlockSize, PAGE_SHIFT};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Physical (bus) address of device memory.
///
/// Denotes an address inside a PCI BAR window that backs peer-to-peer memory.
/// Keeping it apart from [`VirtualAddress`](crate::VirtualAddress) prevents a
/// consumer-side address from ever being handed to the pool, or a pool block
/// from being treated as a user pointer.
///
/// ### Examples
/// ```rust
/// # use p2pmem_addresses::*;
/// let base = PhysicalAddress::new(0xf000_0000);
/// let third = base + 2 * BlockSize::PAGE.bytes();
/// assert_eq!(third.as_u64(), 0xf000_2000);
/// assert_eq!(third.pfn(), 0xf0002);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Page frame number of the page containing this address.
    #[inline]
    #[must_use]
    pub const fn pfn(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, block: BlockSize) -> bool {
        block.is_multiple(self.0)
    }

    /// Add `rhs` bytes, returning `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}
