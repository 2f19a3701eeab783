use crate::{
    BlockBitmap, PhysicalRegion, Placement, PlacementPolicy, PoolError, RegionHandle, RegionMap,
};
use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{debug, error, info, trace, warn};
use p2pmem_addresses::{BlockSize, PhysicalAddress};
use p2pmem_sync::SpinMutex;

/// Global index of a block within its pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One allocated block and where it lives on the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub address: PhysicalAddress,
}

/// A contiguous run of allocated blocks inside one region.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockRun {
    pub first: BlockId,
    pub count: usize,
    pub address: PhysicalAddress,
}

/// Point-in-time occupancy of a pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub regions: usize,
    pub total_blocks: usize,
    pub free_blocks: usize,
    pub outstanding: usize,
}

struct PoolInner {
    regions: RegionMap,
    bitmap: BlockBitmap,
    placement: Box<dyn Placement>,
}

fn block_address(regions: &RegionMap, block_size: BlockSize, index: usize) -> Option<PhysicalAddress> {
    let entry = regions.locate(index)?;
    let offset = block_size.length_of((index - entry.first_block) as u64);
    Some(entry.region.base + offset)
}

/// Fixed-size block allocator over one or more device memory regions.
///
/// All methods take `&self`; the pool is meant to be shared (behind an `Arc`)
/// by every mapping of the device that owns it.
pub struct BlockPool {
    block_size: BlockSize,
    inner: SpinMutex<PoolInner>,
    poisoned: AtomicBool,
}

impl BlockPool {
    /// An empty pool; capacity comes from [`add_region`](Self::add_region).
    #[must_use]
    pub fn new(block_size: BlockSize, policy: PlacementPolicy) -> Self {
        Self::with_placement(block_size, policy.build())
    }

    /// An empty pool driven by a caller-supplied placement.
    #[must_use]
    pub fn with_placement(block_size: BlockSize, placement: Box<dyn Placement>) -> Self {
        Self {
            block_size,
            inner: SpinMutex::new(PoolInner {
                regions: RegionMap::new(),
                bitmap: BlockBitmap::default(),
                placement,
            }),
            poisoned: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn block_size(&self) -> BlockSize {
        self.block_size
    }

    /// Add a region of device memory to the pool.
    ///
    /// Trailing bytes that do not fill a whole block are left unused.
    ///
    /// # Errors
    /// * [`PoolError::Misaligned`] if the base is not block aligned.
    /// * [`PoolError::RegionTooSmall`] if not even one block fits.
    /// * [`PoolError::RegionOverlap`] if the range wraps or intersects a
    ///   region the pool already owns.
    pub fn add_region(&self, region: PhysicalRegion) -> Result<RegionHandle, PoolError> {
        let bs = self.block_size;
        if !region.base.is_aligned(bs) {
            return Err(PoolError::Misaligned {
                base: region.base,
                block_size: bs,
            });
        }
        let blocks = usize::try_from(bs.blocks_in(region.length)).unwrap_or(usize::MAX);
        if blocks == 0 {
            return Err(PoolError::RegionTooSmall {
                length: region.length,
                block_size: bs,
            });
        }
        let overlap = PoolError::RegionOverlap {
            base: region.base,
            length: region.length,
        };
        if region.end().is_none() {
            return Err(overlap);
        }

        let handle = self.inner.with_lock(|inner| {
            if inner.regions.overlapping(&region).is_some() {
                return Err(overlap);
            }
            inner.bitmap.grow(blocks);
            Ok(inner.regions.push(region, blocks))
        })?;

        let tail = region.length - bs.length_of(blocks as u64);
        if tail != 0 {
            warn!("region {}: ignoring {tail:#x} trailing bytes", region.base);
        }
        info!(
            "added region {}+{:#x} from {}: {blocks} x {bs} blocks",
            region.base, region.length, region.owner
        );
        Ok(handle)
    }

    /// Allocate one block.
    ///
    /// # Errors
    /// [`PoolError::AllocationExhausted`] when no block is free,
    /// [`PoolError::PoisonedPool`] after [`poison`](Self::poison).
    pub fn allocate(&self) -> Result<Block, PoolError> {
        let run = self.allocate_run(1)?;
        Ok(Block {
            id: run.first,
            address: run.address,
        })
    }

    /// Allocate `count` contiguous blocks from a single region.
    ///
    /// # Errors
    /// [`PoolError::EmptyRun`] for `count == 0`, otherwise as
    /// [`allocate`](Self::allocate).
    pub fn allocate_run(&self, count: usize) -> Result<BlockRun, PoolError> {
        if count == 0 {
            return Err(PoolError::EmptyRun);
        }
        if self.is_poisoned() {
            return Err(PoolError::PoisonedPool);
        }

        let bs = self.block_size;
        let run = self.inner.with_lock(|inner| {
            let PoolInner {
                regions,
                bitmap,
                placement,
            } = inner;
            let start = placement.place(regions, bitmap, count)?;
            if !regions.run_in_one_region(start, count) || bitmap.next_set(start, start + count).is_some() {
                error!(
                    "{} placement returned unusable run {start}+{count}",
                    placement.name()
                );
                return None;
            }
            let address = block_address(regions, bs, start)?;
            bitmap.set_run(start, count);
            Some(BlockRun {
                first: BlockId(start),
                count,
                address,
            })
        });

        match run {
            Some(run) => {
                trace!("allocated {}+{} at {}", run.first, run.count, run.address);
                Ok(run)
            }
            None => {
                debug!("no free run of {count} block(s)");
                Err(PoolError::AllocationExhausted { requested: count })
            }
        }
    }

    /// Return one block to the pool.
    ///
    /// # Errors
    /// [`PoolError::DoubleFree`] if the block is not allocated,
    /// [`PoolError::InvalidBlock`] if it is not part of this pool. Both are
    /// caller bugs and abort debug builds.
    pub fn free(&self, block: BlockId) -> Result<(), PoolError> {
        self.free_run(block, 1)
    }

    /// Return a run previously obtained from
    /// [`allocate_run`](Self::allocate_run).
    ///
    /// Either the whole run is released or, on error, nothing is.
    ///
    /// # Errors
    /// As [`free`](Self::free); [`PoolError::EmptyRun`] for `count == 0`.
    pub fn free_run(&self, first: BlockId, count: usize) -> Result<(), PoolError> {
        if count == 0 {
            return Err(PoolError::EmptyRun);
        }

        let result = self.inner.with_lock(|inner| {
            let start = first.0;
            let end = match start.checked_add(count) {
                Some(end) if end <= inner.bitmap.len() => end,
                _ => return Err(PoolError::InvalidBlock { block: first }),
            };
            if let Some(free) = inner.bitmap.next_clear(start, end) {
                return Err(PoolError::DoubleFree {
                    block: BlockId(free),
                });
            }
            inner.bitmap.clear_run(start, count);
            Ok(())
        });

        if let Err(err) = result {
            error!("free of {first}+{count} rejected: {err}");
            debug_assert!(false, "{err}");
            return Err(err);
        }
        trace!("freed {first}+{count}");
        Ok(())
    }

    /// Physical address of `block`, if it belongs to this pool.
    #[must_use]
    pub fn address_of(&self, block: BlockId) -> Option<PhysicalAddress> {
        let bs = self.block_size;
        self.inner.with_lock(|inner| block_address(&inner.regions, bs, block.0))
    }

    #[must_use]
    pub fn is_allocated(&self, block: BlockId) -> bool {
        self.inner.with_lock(|inner| inner.bitmap.test(block.0))
    }

    /// Refuse all further allocations. Frees keep working so outstanding
    /// blocks can still drain back.
    pub fn poison(&self) {
        if !self.poisoned.swap(true, Ordering::AcqRel) {
            info!("pool poisoned with {} block(s) outstanding", self.outstanding());
        }
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.with_lock(|inner| {
            let total = inner.bitmap.len();
            let outstanding = inner.bitmap.count_set();
            PoolStats {
                regions: inner.regions.len(),
                total_blocks: total,
                free_blocks: total - outstanding,
                outstanding,
            }
        })
    }

    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.stats().free_blocks
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.stats().outstanding
    }

    #[must_use]
    pub fn total_blocks(&self) -> usize {
        self.inner.with_lock(|inner| inner.bitmap.len())
    }

    #[must_use]
    pub fn policy_name(&self) -> &'static str {
        self.inner.with_lock(|inner| inner.placement.name())
    }

    /// Regions currently owned by the pool, in the order they were added.
    pub fn for_each_region(&self, mut f: impl FnMut(RegionHandle, &PhysicalRegion)) {
        self.inner.with_lock(|inner| {
            for (i, entry) in inner.regions.iter().enumerate() {
                f(RegionHandle(i), &entry.region);
            }
        });
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("block_size", &self.block_size)
            .field("stats", &self.stats())
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        let outstanding = self.inner.get_mut().bitmap.count_set();
        if outstanding != 0 {
            error!("pool released with {outstanding} block(s) still allocated");
        }
    }
}
