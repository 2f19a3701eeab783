//! Placement policies: which free run satisfies an allocation.

use crate::{BlockBitmap, RegionMap};
use alloc::boxed::Box;
use p2pmem_info::limits::{DEFAULT_RANDOM_SEED, RANDOM_FIT_ATTEMPTS};

/// Chooses the start of a free run of `count` blocks.
///
/// Called with the pool lock held; the pool marks the returned run itself.
/// Implementations must return a run that is clear in `bitmap` and lies
/// within one region, or `None`.
pub trait Placement: Send {
    fn name(&self) -> &'static str;

    fn place(&mut self, regions: &RegionMap, bitmap: &BlockBitmap, count: usize) -> Option<usize>;
}

/// Policy selector used when a pool is created.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlacementPolicy {
    FirstFit,
    RandomFit { seed: u64 },
}

impl PlacementPolicy {
    /// Pick the policy from the driver's random-fit switch.
    #[must_use]
    pub const fn from_switch(random_fit: bool, seed: u64) -> Self {
        if random_fit {
            Self::RandomFit { seed }
        } else {
            Self::FirstFit
        }
    }

    #[must_use]
    pub fn build(self) -> Box<dyn Placement> {
        match self {
            Self::FirstFit => Box::new(FirstFit),
            Self::RandomFit { seed } => Box::new(RandomFit::new(seed)),
        }
    }
}

/// First run at or after block `start`, never wrapping and never crossing a
/// region boundary.
#[must_use]
pub fn first_run_from(
    regions: &RegionMap,
    bitmap: &BlockBitmap,
    start: usize,
    count: usize,
) -> Option<usize> {
    regions
        .iter()
        .filter(|e| e.end_block() > start)
        .find_map(|e| bitmap.find_clear_run(start.max(e.first_block), e.end_block(), count))
}

/// Lowest-addressed free run.
#[derive(Debug, Default, Copy, Clone)]
pub struct FirstFit;

impl Placement for FirstFit {
    fn name(&self) -> &'static str {
        "first-fit"
    }

    fn place(&mut self, regions: &RegionMap, bitmap: &BlockBitmap, count: usize) -> Option<usize> {
        first_run_from(regions, bitmap, 0, count)
    }
}

/// Random start, first fit from there; a bounded number of tries.
///
/// Spreads allocations over the device window instead of packing them at the
/// low end.
#[derive(Debug, Clone)]
pub struct RandomFit {
    state: u64,
    attempts: u32,
}

impl RandomFit {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            // xorshift has a fixed point at zero
            state: if seed == 0 { DEFAULT_RANDOM_SEED } else { seed },
            attempts: RANDOM_FIT_ATTEMPTS,
        }
    }

    /// Override the attempt bound (at least one attempt is always made).
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = if attempts == 0 { 1 } else { attempts };
        self
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// xorshift64
    const fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

impl Placement for RandomFit {
    fn name(&self) -> &'static str {
        "random-fit"
    }

    fn place(&mut self, regions: &RegionMap, bitmap: &BlockBitmap, count: usize) -> Option<usize> {
        let total = regions.total_blocks();
        if total == 0 || count > total {
            return None;
        }
        for _ in 0..self.attempts {
            let start = self.below(total);
            if let Some(found) = first_run_from(regions, bitmap, start, count) {
                return Some(found);
            }
        }
        None
    }
}
