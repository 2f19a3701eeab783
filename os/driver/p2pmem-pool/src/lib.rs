//! # Peer-to-Peer Memory Block Pool
//!
//! A [`BlockPool`] owns one or more physical regions of device memory (BAR
//! windows of PCI endpoints), cuts each into fixed-size blocks and hands them
//! out under a replaceable [`Placement`] policy.
//!
//! ```text
//!   region 0 (bus 01:00.0)            region 1 (bus 02:00.0)
//! ┌───┬───┬───┬───┬───┬───┐       ┌───┬───┬───┬───┐
//! │ 0 │ 1 │ 2 │ 3 │ 4 │ 5 │       │ 6 │ 7 │ 8 │ 9 │   global block indices
//! └───┴───┴───┴───┴───┴───┘       └───┴───┴───┴───┘
//!   1   1   0   1   0   0           0   0   1   0     one bitmap, 1 = in use
//! ```
//!
//! ## Invariants
//! * The bitmap is the only record of occupancy: the number of set bits equals
//!   the number of blocks handed out and not yet freed.
//! * A run is always contained in one region; searches never wrap around the
//!   end of the bitmap or spill into the next region.
//! * Scan-and-mark happens under one lock, so two allocations never overlap.
//! * Freeing a block that is not allocated is reported as
//!   [`PoolError::DoubleFree`] and leaves the bitmap untouched; debug builds
//!   additionally abort on it.
//!
//! ## Placement
//! * [`FirstFit`]: the lowest free run.
//! * [`RandomFit`]: the first free run at or after a random start, retried a
//!   bounded number of times.
//!
//! ## Example
//! ```rust
//! use p2pmem_addresses::{BlockSize, PhysicalAddress};
//! use p2pmem_pool::{BlockPool, PciAddress, PhysicalRegion, PlacementPolicy};
//!
//! let pool = BlockPool::new(BlockSize::PAGE, PlacementPolicy::FirstFit);
//! let owner = PciAddress::new().with_bus(1);
//! pool.add_region(PhysicalRegion::new(PhysicalAddress::new(0xf000_0000), 8 * 4096, owner))?;
//!
//! let block = pool.allocate()?;
//! assert_eq!(block.address, PhysicalAddress::new(0xf000_0000));
//! pool.free(block.id)?;
//! # Ok::<(), p2pmem_pool::PoolError>(())
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod bitmap;
mod error;
mod placement;
mod pool;
mod region;

pub use bitmap::BlockBitmap;
pub use error::PoolError;
pub use placement::{FirstFit, Placement, PlacementPolicy, RandomFit, first_run_from};
pub use pool::{Block, BlockId, BlockPool, BlockRun, PoolStats};
pub use region::{PciAddress, PhysicalRegion, RegionEntry, RegionHandle, RegionMap};
