//! # Device Memory Address Types
//!
//! Strongly typed wrappers for the addresses and sizes the p2pmem core passes
//! around: physical addresses inside a device's BAR window, virtual addresses
//! inside a consumer mapping, and the block size a pool carves its regions
//! into.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A bus/physical address of device memory. |
//! | [`VirtualAddress`] | An address inside a consumer's virtual mapping. |
//! | [`BlockSize`] | A power-of-two, page-granular allocation unit. |
//!
//! All types are `#[repr(transparent)]` over their integer and `Copy`, so they
//! cost nothing over a raw `u64` while keeping physical and virtual values
//! from being mixed up.
//!
//! ```rust
//! # use p2pmem_addresses::*;
//! let block = BlockSize::PAGE;
//! let pa = PhysicalAddress::new(0x1_0000_2000);
//! assert!(pa.is_aligned(block));
//! assert_eq!(pa.pfn(), 0x1_0000_2000 >> 12);
//!
//! let va = VirtualAddress::new(0x7f00_0000_1234);
//! assert_eq!(va.align_down(block).as_u64(), 0x7f00_0000_1000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod block_size;
mod physical_address;
mod virtual_address;

pub use block_size::BlockSize;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Size of a CPU page; the smallest block size a pool accepts.
pub const PAGE_SIZE: u64 = 4096;

/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 12;

/// Round `value` up to the next multiple of `align` (power of two).
#[inline]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + (align - 1)) & !(align - 1)
}

/// Round `value` down to a multiple of `align` (power of two).
#[inline]
#[must_use]
pub const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
};
