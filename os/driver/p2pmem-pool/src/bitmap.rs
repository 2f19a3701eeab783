//! Occupancy bitmap over a pool's blocks.

use alloc::vec::Vec;

const BITS_PER_WORD: usize = 64;

/// One bit per block: 0 = free, 1 = allocated.
///
/// Not synchronized on its own; the pool keeps it behind its lock so that a
/// search and the marking of the found run happen as one step.
#[derive(Debug, Default, Clone)]
pub struct BlockBitmap {
    words: Vec<u64>,
    len: usize,
}

impl BlockBitmap {
    #[must_use]
    pub fn new(len: usize) -> Self {
        let mut bitmap = Self::default();
        bitmap.grow(len);
        bitmap
    }

    /// Append `additional` free bits.
    pub fn grow(&mut self, additional: usize) {
        self.len += additional;
        self.words.resize(self.len.div_ceil(BITS_PER_WORD), 0);
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn test(&self, index: usize) -> bool {
        index < self.len && self.words[index / BITS_PER_WORD] & bit(index) != 0
    }

    pub fn set_run(&mut self, start: usize, count: usize) {
        debug_assert!(start + count <= self.len);
        for i in start..start + count {
            self.words[i / BITS_PER_WORD] |= bit(i);
        }
    }

    pub fn clear_run(&mut self, start: usize, count: usize) {
        debug_assert!(start + count <= self.len);
        for i in start..start + count {
            self.words[i / BITS_PER_WORD] &= !bit(i);
        }
    }

    /// Number of allocated blocks.
    #[must_use]
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// First clear bit in `[from, to)`.
    #[must_use]
    pub fn next_clear(&self, from: usize, to: usize) -> Option<usize> {
        self.next_matching(from, to, true)
    }

    /// First set bit in `[from, to)`.
    #[must_use]
    pub fn next_set(&self, from: usize, to: usize) -> Option<usize> {
        self.next_matching(from, to, false)
    }

    /// Lowest `start >= from` with `[start, start + count)` clear and
    /// `start + count <= to`. Never wraps.
    #[must_use]
    pub fn find_clear_run(&self, from: usize, to: usize, count: usize) -> Option<usize> {
        let to = to.min(self.len);
        if count == 0 {
            return None;
        }

        let mut start = from;
        loop {
            start = self.next_clear(start, to)?;
            let end = start.checked_add(count)?;
            if end > to {
                return None;
            }
            match self.next_set(start, end) {
                None => return Some(start),
                Some(blocker) => start = blocker + 1,
            }
        }
    }

    fn next_matching(&self, from: usize, to: usize, want_clear: bool) -> Option<usize> {
        let to = to.min(self.len);
        let mut i = from;
        while i < to {
            let w = i / BITS_PER_WORD;
            let b = i % BITS_PER_WORD;
            let word = if want_clear { !self.words[w] } else { self.words[w] };
            let rest = word >> b;
            if rest != 0 {
                let idx = i + rest.trailing_zeros() as usize;
                return (idx < to).then_some(idx);
            }
            i = (w + 1) * BITS_PER_WORD;
        }
        None
    }
}

#[inline]
const fn bit(index: usize) -> u64 {
    1u64 << (index % BITS_PER_WORD)
}
