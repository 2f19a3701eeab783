//! # p2pmem Device Core
//!
//! Exposes peer-to-peer device memory as mappable char devices: devices are
//! probed with their memory regions, consumers open and `mmap` them, and
//! every page of a mapping is backed by a pool block on first touch.
//!
//! ```text
//!  LifecycleManager ──probe──▶ Device ◀──Arc── DeviceRegistry (identity → device)
//!         │                      │
//!        open                    ├── BlockPool (regions, bitmap, placement)
//!         ▼                      └── FaultStats
//!     DeviceFile ──mmap──▶ MappingInstance ──slots──▶ Block, Block, ∅, …
//!                                 ▲
//!                  FaultHandler ──┘ resolve / install via PageInstaller
//! ```
//!
//! ## Lifetimes
//! * A mapping holds its device, and through it the pool and the identity.
//! * Removing a device poisons its pool: pages already backed stay valid,
//!   new faults fail. The identity is reused only after the last mapping and
//!   open file are gone.
//! * The last [`MappingInstance::release`] returns every block of the mapping.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use p2pmem_addresses::{PhysicalAddress, VirtualAddress};
//! use p2pmem_core::{
//!     DeviceNumber, DeviceRegistry, LifecycleManager, NodePublisher, PublishError, VmArea, VmFlags,
//! };
//! use p2pmem_info::DriverConfig;
//! use p2pmem_pool::{PciAddress, PhysicalRegion};
//!
//! struct NoNodes;
//! impl NodePublisher for NoNodes {
//!     fn publish(&self, _: &str, _: DeviceNumber) -> Result<(), PublishError> { Ok(()) }
//!     fn retract(&self, _: &str, _: DeviceNumber) {}
//! }
//!
//! let config = DriverConfig::new();
//! let registry = Arc::new(DeviceRegistry::new(config.max_devices));
//! let manager = LifecycleManager::new(config, registry, Arc::new(NoNodes));
//!
//! let owner = PciAddress::new().with_bus(0x3b);
//! let region = PhysicalRegion::new(PhysicalAddress::new(0x38_0000_0000), 16 * 4096, owner);
//! let device = manager.probe(owner, &[region])?;
//! assert_eq!(device.name(), "p2pmem0");
//!
//! let file = manager.open(device.identity())?;
//! let mut area = VmArea::new(VirtualAddress::new(0x7f00_0000_0000), 2 * 4096, VmFlags::shared_rw());
//! let mapping = file.mmap(&mut area).expect("shared mapping");
//! let t = mapping.resolve(4096).expect("free block");
//! assert_eq!(t.address(), PhysicalAddress::new(0x38_0000_0000));
//! assert!(mapping.release().expect("one reference"));
//! # Ok::<(), p2pmem_core::LifecycleError>(())
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

#[macro_use]
mod macros;

mod device;
mod error;
mod fault;
mod lifecycle;
mod mapping;
mod registry;
mod stats;
pub mod vm;

pub use device::{Device, DeviceNumber};
pub use error::{
    FaultError, InsertError, LifecycleError, MapError, PublishError, RegistryError, ReleaseError,
};
pub use fault::{FaultHandler, PageInstaller, VmFault};
pub use lifecycle::{DeviceFile, LifecycleManager, NodePublisher};
pub use mapping::{MappingInstance, MappingState};
pub use registry::{DeviceIdentity, DeviceRegistry};
pub use stats::{FaultStats, FaultStatsSnapshot};
pub use vm::{CacheMode, Pfn, PfnFlags, Translation, VmArea, VmFlags};
