use crate::BlockId;
use p2pmem_addresses::{BlockSize, PhysicalAddress};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("no free run of {requested} block(s)")]
    AllocationExhausted { requested: usize },
    #[error("double free of block {block}")]
    DoubleFree { block: BlockId },
    #[error("block {block} is outside the pool")]
    InvalidBlock { block: BlockId },
    #[error("pool is poisoned")]
    PoisonedPool,
    #[error("zero-length run requested")]
    EmptyRun,
    #[error("region base {base} is not aligned to {block_size}")]
    Misaligned {
        base: PhysicalAddress,
        block_size: BlockSize,
    },
    #[error("region of {length:#x} bytes holds no {block_size} block")]
    RegionTooSmall { length: u64, block_size: BlockSize },
    #[error("region {base}+{length:#x} overlaps another region or wraps the address space")]
    RegionOverlap { base: PhysicalAddress, length: u64 },
}
