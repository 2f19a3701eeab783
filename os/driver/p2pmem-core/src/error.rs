use crate::DeviceIdentity;
use p2pmem_addresses::BlockSize;
use p2pmem_pool::PoolError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("all {max} device identities are in use")]
    IdentityExhausted { max: u32 },
}

/// Why a page of a mapping could not be backed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    #[error("device pool has no free block")]
    AllocationExhausted,
    #[error("offset {offset:#x} is not a block-aligned offset below {length:#x}")]
    InvalidOffset { offset: u64, length: u64 },
    #[error("device was removed")]
    PoisonedPool,
    #[error("mapping was already released")]
    MappingReleased,
    #[error(transparent)]
    Pool(PoolError),
}

impl From<PoolError> for FaultError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::AllocationExhausted { .. } => Self::AllocationExhausted,
            PoolError::PoisonedPool => Self::PoisonedPool,
            other => Self::Pool(other),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("can't create private mapping")]
    PrivateMapping,
    #[error("mapping length {length:#x} is not a non-zero multiple of {block_size}")]
    InvalidLength { length: u64, block_size: BlockSize },
    #[error("device was removed")]
    PoisonedPool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReleaseError {
    #[error("mapping released more often than it was shared")]
    AlreadyReleased,
}

/// Failure reported by a [`NodePublisher`](crate::NodePublisher).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("device node already exists")]
    AlreadyExists,
    #[error("device node could not be created")]
    Unavailable,
}

/// Failure reported by a [`PageInstaller`](crate::PageInstaller).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InsertError {
    #[error("out of memory for page tables")]
    OutOfMemory,
    #[error("address already mapped")]
    Busy,
    #[error("page insertion failed")]
    Fault,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("publishing device node failed: {0}")]
    Publish(#[from] PublishError),
    #[error("no device with identity {identity}")]
    UnknownDevice { identity: DeviceIdentity },
    #[error("device exposes no usable memory region")]
    NoRegions,
}
