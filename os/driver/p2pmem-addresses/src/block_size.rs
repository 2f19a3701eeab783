use crate::PAGE_SIZE;
use core::fmt;

/// Allocation unit of a block pool.
///
/// A block size is always a power of two and at least [`PAGE_SIZE`] bytes, so
/// every block can be installed as one or more whole pages.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockSize(u64);

impl BlockSize {
    /// One 4 KiB page per block.
    pub const PAGE: Self = Self(PAGE_SIZE);

    /// Validate `bytes` as a block size.
    ///
    /// Returns `None` unless `bytes` is a power of two no smaller than a page.
    #[inline]
    #[must_use]
    pub const fn new(bytes: u64) -> Option<Self> {
        if bytes >= PAGE_SIZE && bytes.is_power_of_two() {
            Some(Self(bytes))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn bytes(self) -> u64 {
        self.0
    }

    /// log2 of the block size.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        self.0.trailing_zeros()
    }

    /// Number of whole blocks in `length` bytes (any tail is dropped).
    #[inline]
    #[must_use]
    pub const fn blocks_in(self, length: u64) -> u64 {
        length >> self.shift()
    }

    /// Byte length of `count` blocks.
    #[inline]
    #[must_use]
    pub const fn length_of(self, count: u64) -> u64 {
        count << self.shift()
    }

    #[inline]
    #[must_use]
    pub const fn is_multiple(self, value: u64) -> bool {
        value & (self.0 - 1) == 0
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self::PAGE
    }
}

impl fmt::Debug for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockSize({})", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1 << 20 && self.0 % (1 << 20) == 0 {
            write!(f, "{}M", self.0 >> 20)
        } else {
            write!(f, "{}K", self.0 >> 10)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_sub_page_and_odd_sizes() {
        assert!(BlockSize::new(0).is_none());
        assert!(BlockSize::new(512).is_none());
        assert!(BlockSize::new(3 * PAGE_SIZE).is_none());
        assert_eq!(BlockSize::new(PAGE_SIZE), Some(BlockSize::PAGE));
    }

    #[test]
    fn block_arithmetic() {
        let bs = BlockSize::new(64 * 1024).unwrap();
        assert_eq!(bs.shift(), 16);
        assert_eq!(bs.blocks_in(3 * 64 * 1024 + 5), 3);
        assert_eq!(bs.length_of(2), 128 * 1024);
        assert!(bs.is_multiple(128 * 1024));
        assert!(!bs.is_multiple(4096));
    }

    #[test]
    fn display_units() {
        assert_eq!(BlockSize::PAGE.to_string(), "4K");
        assert_eq!(BlockSize::new(2 << 20).unwrap().to_string(), "2M");
    }
}
