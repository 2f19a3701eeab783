//! Device creation and removal, open files and mmap.

use crate::device::IdentityLease;
use crate::vm::VmArea;
use crate::{
    Device, DeviceIdentity, DeviceNumber, DeviceRegistry, LifecycleError, MapError,
    MappingInstance, PublishError,
};
use alloc::sync::Arc;
use log::{info, warn};
use p2pmem_info::DriverConfig;
use p2pmem_info::limits::CLASS_NAME;
use p2pmem_pool::{BlockPool, PciAddress, PhysicalRegion, PlacementPolicy};

/// Creates and removes the externally visible device node.
pub trait NodePublisher: Send + Sync {
    /// Create the node `name` for `devt`.
    ///
    /// # Errors
    /// Any [`PublishError`] aborts the probe.
    fn publish(&self, name: &str, devt: DeviceNumber) -> Result<(), PublishError>;

    fn retract(&self, name: &str, devt: DeviceNumber);
}

/// Orders device creation and teardown.
///
/// Probe builds the pool first, then takes an identity, then publishes the
/// node; any failure unwinds what was built so far. Remove unpublishes and
/// poisons the pool but leaves the device itself to its last user: open
/// files and mappings keep pool and identity alive until they are gone.
pub struct LifecycleManager {
    config: DriverConfig,
    registry: Arc<DeviceRegistry>,
    publisher: Arc<dyn NodePublisher>,
}

impl LifecycleManager {
    pub fn new(
        config: DriverConfig,
        registry: Arc<DeviceRegistry>,
        publisher: Arc<dyn NodePublisher>,
    ) -> Self {
        info!(
            target: "p2pmem",
            "module loaded: class {CLASS_NAME}, {} device(s) max, {} blocks, {}",
            registry.max_devices(),
            config.block_size,
            if config.random_fit { "random-fit" } else { "first-fit" }
        );
        Self {
            config,
            registry,
            publisher,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Bring up a device for the PCI function `owner` exposing `regions`.
    ///
    /// # Errors
    /// * [`LifecycleError::NoRegions`] if `regions` is empty.
    /// * [`LifecycleError::Pool`] if a region is rejected by the pool.
    /// * [`LifecycleError::Registry`] if no identity is free.
    /// * [`LifecycleError::Publish`] if the node cannot be created; the
    ///   identity is returned before the error is reported.
    pub fn probe(
        &self,
        owner: PciAddress,
        regions: &[PhysicalRegion],
    ) -> Result<Arc<Device>, LifecycleError> {
        if regions.is_empty() {
            return Err(LifecycleError::NoRegions);
        }

        let seed = self.config.random_seed ^ u64::from(owner.into_bits());
        let policy = PlacementPolicy::from_switch(self.config.random_fit, seed);
        let pool = BlockPool::new(self.config.block_size, policy);
        for region in regions {
            pool.add_region(*region)?;
        }

        let lease = IdentityLease::acquire(&self.registry)?;
        let device = Arc::new(Device::new(lease, self.config.chrdev_major, owner, pool));

        if let Err(err) = self.publisher.publish(device.name(), device.devt()) {
            crate::dev_err!(device, "publishing node failed: {err}");
            return Err(err.into());
        }

        self.registry.attach(Arc::clone(&device));
        crate::dev_info!(
            device,
            "registered ({owner}, {} blocks)",
            device.pool().stats().total_blocks
        );
        Ok(device)
    }

    /// Tear down the device `identity`.
    ///
    /// Mappings that are still live keep their filled pages; any further
    /// fault on them fails with [`FaultError::PoisonedPool`](crate::FaultError::PoisonedPool).
    ///
    /// # Errors
    /// [`LifecycleError::UnknownDevice`] if no such device is attached.
    pub fn remove(&self, identity: DeviceIdentity) -> Result<(), LifecycleError> {
        let device = self
            .registry
            .detach(identity)
            .ok_or(LifecycleError::UnknownDevice { identity })?;
        self.publisher.retract(device.name(), device.devt());
        device.pool().poison();

        let users = Arc::strong_count(&device) - 1;
        if users == 0 {
            crate::dev_info!(device, "unregistered");
        } else {
            crate::dev_info!(device, "unregistered, {users} user(s) still attached");
        }
        Ok(())
    }

    /// Open the device node of `identity`.
    ///
    /// # Errors
    /// [`LifecycleError::UnknownDevice`] if no such device is attached.
    pub fn open(&self, identity: DeviceIdentity) -> Result<DeviceFile, LifecycleError> {
        self.device(identity)
            .map(|device| DeviceFile { device })
            .ok_or(LifecycleError::UnknownDevice { identity })
    }

    #[must_use]
    pub fn device(&self, identity: DeviceIdentity) -> Option<Arc<Device>> {
        self.registry.lookup(identity)
    }

    /// Remove every attached device.
    ///
    /// Dropping the manager does the same; this only makes the point of
    /// teardown explicit.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        // Attached devices hold the registry through their identity lease,
        // so they must be detached here or neither is ever freed.
        for identity in self.registry.live_identities() {
            if let Err(err) = self.remove(identity) {
                warn!(target: "p2pmem", "unload: device {identity}: {err}");
            }
        }
        info!(target: "p2pmem", "module unloaded");
    }
}

/// An open handle on a device node.
#[derive(Debug, Clone)]
pub struct DeviceFile {
    device: Arc<Device>,
}

impl DeviceFile {
    #[must_use]
    pub const fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Set up a demand-paged mapping for `area`.
    ///
    /// Only shared mappings are supported. On success the area is marked
    /// `mixed_map` and the returned instance holds one reference, which the
    /// platform gives back on unmap.
    ///
    /// # Errors
    /// * [`MapError::PrivateMapping`] if the area may not be shared.
    /// * [`MapError::PoisonedPool`] if the device has been removed.
    /// * [`MapError::InvalidLength`] if the area is not a whole number of blocks.
    pub fn mmap(&self, area: &mut VmArea) -> Result<Arc<MappingInstance>, MapError> {
        if !area.flags.may_share() {
            crate::dev_warn!(self.device, "mmap failed: can't create private mapping");
            return Err(MapError::PrivateMapping);
        }
        if self.device.pool().is_poisoned() {
            return Err(MapError::PoisonedPool);
        }

        let pages = self.device.pool().block_size().blocks_in(area.length);
        crate::dev_dbg!(self.device, "Allocating mmap with {pages} pages.");
        let instance = MappingInstance::new(Arc::clone(&self.device), area.length, area.caching)?;
        area.flags.set_mixed_map(true);
        Ok(instance)
    }
}
