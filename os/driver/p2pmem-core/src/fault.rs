//! Demand paging: turning a fault on a mapping into an installed page.

use crate::vm::{Pfn, Translation, VmArea};
use crate::{FaultError, InsertError, MappingInstance};
use alloc::sync::Arc;
use log::error;
use p2pmem_addresses::{PAGE_SIZE, VirtualAddress, align_down};

/// Outcome reported back to the platform's fault path.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VmFault {
    /// The translation is in place (or was put there concurrently); retry
    /// the access.
    NoPage,
    /// Out of memory: the pool is exhausted or the page tables could not
    /// grow.
    Oom,
    /// The access cannot be satisfied; the consumer gets a bus error.
    SigBus,
}

/// Installs device frames into a consumer's page tables.
pub trait PageInstaller: Send + Sync {
    /// Map `translation` at `address` inside `area`.
    ///
    /// # Errors
    /// [`InsertError::Busy`] if another context installed a page there first,
    /// [`InsertError::OutOfMemory`] if page tables cannot be allocated,
    /// [`InsertError::Fault`] for anything else.
    fn insert_mixed(
        &self,
        area: &VmArea,
        address: VirtualAddress,
        translation: &Translation,
    ) -> Result<(), InsertError>;
}

/// Entry point the platform calls on a miss in a p2pmem mapping.
pub struct FaultHandler {
    installer: Arc<dyn PageInstaller>,
}

impl FaultHandler {
    #[must_use]
    pub fn new(installer: Arc<dyn PageInstaller>) -> Self {
        Self { installer }
    }

    /// Back `offset` of `instance` without installing anything.
    ///
    /// # Errors
    /// See [`MappingInstance::resolve`].
    pub fn resolve(&self, instance: &MappingInstance, offset: u64) -> Result<Translation, FaultError> {
        instance.resolve(offset)
    }

    /// Handle a fault at `address` inside `area`, which `instance` maps.
    ///
    /// The slot is filled and the page installed under the mapping's slot
    /// lock. A block stays recorded in its slot even if installation fails,
    /// so a retry installs the same block.
    pub fn handle_fault(
        &self,
        area: &VmArea,
        instance: &MappingInstance,
        address: VirtualAddress,
    ) -> VmFault {
        let device = instance.device();
        let block_size = device.pool().block_size();
        let Some(offset) = area.offset_of(address) else {
            error!("fault at {address} outside area at {}", area.start);
            device.fault_stats().incr_bus_errors();
            return VmFault::SigBus;
        };
        // The slot is chosen by block; the page installed is the faulting
        // page of the area, backed by the matching page inside the block.
        let within = align_down(offset % block_size.bytes(), PAGE_SIZE);
        let page = VirtualAddress::new(area.start.as_u64() + align_down(offset, PAGE_SIZE));

        let installed = instance.resolve_with(offset - offset % block_size.bytes(), |block| {
            let translation = Translation {
                pfn: Pfn::device(block.address() + within),
                caching: block.caching,
            };
            self.installer.insert_mixed(area, page, &translation)
        });

        let outcome = match installed {
            Ok(Ok(()) | Err(InsertError::Busy)) => VmFault::NoPage,
            Ok(Err(InsertError::OutOfMemory)) => {
                device.fault_stats().incr_out_of_memory();
                VmFault::Oom
            }
            // counted by the mapping
            Err(FaultError::AllocationExhausted) => VmFault::Oom,
            Ok(Err(InsertError::Fault)) => VmFault::SigBus,
            Err(err) => {
                crate::dev_dbg!(device, "fault at {address} failed: {err}");
                VmFault::SigBus
            }
        };
        if outcome == VmFault::SigBus {
            device.fault_stats().incr_bus_errors();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::IdentityLease;
    use crate::vm::{CacheMode, VmFlags};
    use crate::{Device, DeviceRegistry};
    use p2pmem_addresses::{BlockSize, PhysicalAddress};
    use p2pmem_pool::{BlockPool, PciAddress, PhysicalRegion, PlacementPolicy};
    use std::sync::Mutex;

    /// Records installs; fails with a scripted error when asked to.
    #[derive(Default)]
    struct Recorder {
        installed: Mutex<Vec<(VirtualAddress, Translation)>>,
        fail_with: Mutex<Option<InsertError>>,
    }

    impl PageInstaller for Recorder {
        fn insert_mixed(
            &self,
            _area: &VmArea,
            address: VirtualAddress,
            translation: &Translation,
        ) -> Result<(), InsertError> {
            if let Some(err) = *self.fail_with.lock().unwrap() {
                return Err(err);
            }
            self.installed.lock().unwrap().push((address, *translation));
            Ok(())
        }
    }

    fn setup(blocks: u64) -> (Arc<Device>, Arc<MappingInstance>, VmArea) {
        setup_with(BlockSize::PAGE, blocks, VirtualAddress::new(0x7f00_0000_0000), 2)
    }

    /// A device of `blocks` blocks and a mapping of `mapped` blocks at `start`.
    fn setup_with(
        block_size: BlockSize,
        blocks: u64,
        start: VirtualAddress,
        mapped: u64,
    ) -> (Arc<Device>, Arc<MappingInstance>, VmArea) {
        let registry = Arc::new(DeviceRegistry::new(2));
        let pool = BlockPool::new(block_size, PlacementPolicy::FirstFit);
        pool.add_region(PhysicalRegion::new(
            PhysicalAddress::new(0xe000_0000),
            block_size.length_of(blocks),
            PciAddress::new(),
        ))
        .unwrap();
        let lease = IdentityLease::acquire(&registry).unwrap();
        let device = Arc::new(Device::new(lease, 240, PciAddress::new(), pool));
        let area = VmArea::new(start, block_size.length_of(mapped), VmFlags::shared_rw());
        let mapping = MappingInstance::new(Arc::clone(&device), area.length, CacheMode::Uncached).unwrap();
        (device, mapping, area)
    }

    #[test]
    fn fault_installs_page_aligned_translation() {
        let (device, mapping, area) = setup(4);
        let recorder = Arc::new(Recorder::default());
        let handler = FaultHandler::new(recorder.clone());

        let addr = VirtualAddress::new(0x7f00_0000_1abc);
        assert_eq!(handler.handle_fault(&area, &mapping, addr), VmFault::NoPage);

        let installed = recorder.installed.lock().unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].0, VirtualAddress::new(0x7f00_0000_1000));
        assert_eq!(installed[0].1.address(), PhysicalAddress::new(0xe000_0000));
        assert_eq!(mapping.block_at(1).map(|b| b.address), Some(PhysicalAddress::new(0xe000_0000)));
        drop(installed);

        mapping.release().unwrap();
        assert_eq!(device.pool().outstanding(), 0);
    }

    #[test]
    fn every_page_of_a_large_block_is_installed_where_it_faulted() {
        let block = BlockSize::new(4 * 4096).unwrap();
        let (device, mapping, area) = setup_with(block, 4, VirtualAddress::new(0x7f00_0000_0000), 2);
        let recorder = Arc::new(Recorder::default());
        let handler = FaultHandler::new(recorder.clone());

        for page in [1, 0, 3, 5] {
            let addr = VirtualAddress::new(area.start.as_u64() + page * 4096 + 0x10);
            assert_eq!(handler.handle_fault(&area, &mapping, addr), VmFault::NoPage);
        }

        let installed: Vec<_> = recorder
            .installed
            .lock()
            .unwrap()
            .iter()
            .map(|(va, t)| (va.as_u64(), t.address().as_u64()))
            .collect();
        assert_eq!(
            installed,
            vec![
                (0x7f00_0000_1000, 0xe000_1000),
                (0x7f00_0000_0000, 0xe000_0000),
                (0x7f00_0000_3000, 0xe000_3000),
                (0x7f00_0000_5000, 0xe000_5000),
            ]
        );
        // Two blocks back the four faults.
        assert_eq!(mapping.filled_slots(), 2);
        assert_eq!(device.stats().allocations, 2);
        assert_eq!(device.stats().refaults, 2);

        mapping.release().unwrap();
        assert_eq!(device.pool().outstanding(), 0);
    }

    #[test]
    fn area_not_aligned_to_the_block_stays_inside_itself() {
        let block = BlockSize::new(4 * 4096).unwrap();
        let start = VirtualAddress::new(0x7f00_0000_1000);
        let (_device, mapping, area) = setup_with(block, 4, start, 1);
        let recorder = Arc::new(Recorder::default());
        let handler = FaultHandler::new(recorder.clone());

        assert_eq!(handler.handle_fault(&area, &mapping, start), VmFault::NoPage);
        let last = VirtualAddress::new(start.as_u64() + 3 * 4096 + 0xfff);
        assert_eq!(handler.handle_fault(&area, &mapping, last), VmFault::NoPage);

        let installed = recorder.installed.lock().unwrap();
        assert_eq!(installed.len(), 2);
        assert_eq!(installed[0].0, start);
        assert_eq!(installed[0].1.address(), PhysicalAddress::new(0xe000_0000));
        assert_eq!(installed[1].0, VirtualAddress::new(0x7f00_0000_4000));
        assert_eq!(installed[1].1.address(), PhysicalAddress::new(0xe000_3000));
        assert!(installed.iter().all(|(va, _)| area.offset_of(*va).is_some()));
        drop(installed);
        mapping.release().unwrap();
    }

    #[test]
    fn installer_errors_map_to_fault_codes() {
        let (device, mapping, area) = setup(4);
        let recorder = Arc::new(Recorder::default());
        let handler = FaultHandler::new(recorder.clone());
        let addr = area.start;

        *recorder.fail_with.lock().unwrap() = Some(InsertError::Busy);
        assert_eq!(handler.handle_fault(&area, &mapping, addr), VmFault::NoPage);
        *recorder.fail_with.lock().unwrap() = Some(InsertError::OutOfMemory);
        assert_eq!(handler.handle_fault(&area, &mapping, addr), VmFault::Oom);
        *recorder.fail_with.lock().unwrap() = Some(InsertError::Fault);
        assert_eq!(handler.handle_fault(&area, &mapping, addr), VmFault::SigBus);

        // The block stayed in its slot through every failed install.
        assert_eq!(mapping.filled_slots(), 1);
        assert_eq!(device.pool().outstanding(), 1);
        assert_eq!(device.stats().bus_errors, 1);
        mapping.release().unwrap();
    }

    #[test]
    fn exhaustion_and_removal() {
        let (device, mapping, area) = setup(1);
        let handler = FaultHandler::new(Arc::new(Recorder::default()));

        assert_eq!(handler.handle_fault(&area, &mapping, area.start), VmFault::NoPage);
        let second = VirtualAddress::new(area.start.as_u64() + 4096);
        assert_eq!(handler.handle_fault(&area, &mapping, second), VmFault::Oom);

        device.pool().poison();
        assert_eq!(handler.handle_fault(&area, &mapping, second), VmFault::SigBus);
        // Already-backed pages keep resolving after removal.
        assert_eq!(handler.handle_fault(&area, &mapping, area.start), VmFault::NoPage);
        assert_eq!(handler.resolve(&mapping, 4096), Err(FaultError::PoisonedPool));
        mapping.release().unwrap();
    }

    #[test]
    fn address_outside_area_is_a_bus_error() {
        let (_device, mapping, area) = setup(2);
        let handler = FaultHandler::new(Arc::new(Recorder::default()));
        let outside = VirtualAddress::new(area.start.as_u64() + area.length);
        assert_eq!(handler.handle_fault(&area, &mapping, outside), VmFault::SigBus);
        assert_eq!(mapping.filled_slots(), 0);
        mapping.release().unwrap();
    }
}
