use crate::{DeviceIdentity, DeviceRegistry, FaultStats, FaultStatsSnapshot, RegistryError};
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use p2pmem_info::limits::DEVICE_NAME_PREFIX;
use p2pmem_pool::{BlockPool, PciAddress, PhysicalRegion, PoolError, RegionHandle};

/// Char-device number `major:minor`; the minor is the device identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeviceNumber {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// A reserved identity that goes back to its registry when dropped.
pub(crate) struct IdentityLease {
    registry: Arc<DeviceRegistry>,
    identity: DeviceIdentity,
}

impl IdentityLease {
    pub(crate) fn acquire(registry: &Arc<DeviceRegistry>) -> Result<Self, RegistryError> {
        let identity = registry.register()?;
        Ok(Self {
            registry: Arc::clone(registry),
            identity,
        })
    }
}

impl Drop for IdentityLease {
    fn drop(&mut self) {
        self.registry.unregister(self.identity);
    }
}

/// One registered p2pmem device: its pool, name and counters.
///
/// Shared through `Arc` by the registry, open files and every mapping. The
/// identity is returned to the registry only when the last of them lets go,
/// so a name is never reused while anything still refers to the old pool.
pub struct Device {
    name: String,
    devt: DeviceNumber,
    owner: PciAddress,
    pool: BlockPool,
    stats: FaultStats,
    // Dropped last: the identity is free only once the pool is gone.
    lease: IdentityLease,
}

impl Device {
    pub(crate) fn new(lease: IdentityLease, major: u32, owner: PciAddress, pool: BlockPool) -> Self {
        let identity = lease.identity;
        Self {
            name: format!("{DEVICE_NAME_PREFIX}{identity}"),
            devt: DeviceNumber {
                major,
                minor: identity.as_u32(),
            },
            lease,
            owner,
            pool,
            stats: FaultStats::new(),
        }
    }

    #[must_use]
    pub const fn identity(&self) -> DeviceIdentity {
        self.lease.identity
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn devt(&self) -> DeviceNumber {
        self.devt
    }

    /// The PCI function that exposes the device memory.
    #[must_use]
    pub const fn owner(&self) -> PciAddress {
        self.owner
    }

    #[must_use]
    pub const fn pool(&self) -> &BlockPool {
        &self.pool
    }

    #[must_use]
    pub fn stats(&self) -> FaultStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) const fn fault_stats(&self) -> &FaultStats {
        &self.stats
    }

    /// Hand another memory region to the device's pool.
    ///
    /// # Errors
    /// See [`BlockPool::add_region`].
    pub fn add_region(&self, region: PhysicalRegion) -> Result<RegionHandle, PoolError> {
        self.pool.add_region(region)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("devt", &self.devt)
            .field("owner", &self.owner)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        crate::dev_dbg!(self, "released");
    }
}
