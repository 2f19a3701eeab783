use p2pmem_addresses::{PhysicalAddress, VirtualAddress};
use p2pmem_core::{
    DeviceIdentity, DeviceNumber, DeviceRegistry, FaultError, FaultHandler, InsertError,
    LifecycleError, LifecycleManager, MapError, MappingState, NodePublisher, PageInstaller,
    PublishError, Translation, VmArea, VmFault, VmFlags,
};
use p2pmem_info::DriverConfig;
use p2pmem_pool::{PciAddress, PhysicalRegion, PoolError};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

const BAR: u64 = 0x38_0000_0000;
const VM_START: u64 = 0x7f00_0000_0000;

/// Keeps the set of published node names.
#[derive(Default)]
struct Nodes {
    live: Mutex<BTreeSet<String>>,
    refuse: Mutex<bool>,
}

impl NodePublisher for Nodes {
    fn publish(&self, name: &str, _devt: DeviceNumber) -> Result<(), PublishError> {
        if *self.refuse.lock().unwrap() {
            return Err(PublishError::Unavailable);
        }
        if self.live.lock().unwrap().insert(name.to_owned()) {
            Ok(())
        } else {
            Err(PublishError::AlreadyExists)
        }
    }

    fn retract(&self, name: &str, _devt: DeviceNumber) {
        assert!(self.live.lock().unwrap().remove(name), "{name} was not published");
    }
}

struct AcceptAll;

impl PageInstaller for AcceptAll {
    fn insert_mixed(&self, _: &VmArea, _: VirtualAddress, _: &Translation) -> Result<(), InsertError> {
        Ok(())
    }
}

fn init_logging() {
    let _ = p2pmem_log::StderrLogger::new(log::LevelFilter::Debug).init();
}

fn manager(config: DriverConfig) -> (LifecycleManager, Arc<Nodes>) {
    init_logging();
    let nodes = Arc::new(Nodes::default());
    let registry = Arc::new(DeviceRegistry::new(config.max_devices));
    let manager = LifecycleManager::new(config, registry, nodes.clone());
    (manager, nodes)
}

fn region(index: u64, blocks: u64) -> PhysicalRegion {
    PhysicalRegion::new(
        PhysicalAddress::new(BAR + index * 0x1000_0000),
        blocks * 4096,
        PciAddress::new().with_bus(0x3b),
    )
}

fn shared_area(pages: u64) -> VmArea {
    VmArea::new(VirtualAddress::new(VM_START), pages * 4096, VmFlags::shared_rw())
}

#[test]
fn three_block_mapping_returns_everything_on_release() {
    let (manager, _nodes) = manager(DriverConfig::new());
    let device = manager.probe(PciAddress::new(), &[region(0, 8)]).unwrap();
    let before = device.pool().free_blocks();

    let file = manager.open(device.identity()).unwrap();
    let mut area = shared_area(3);
    let mapping = file.mmap(&mut area).unwrap();
    assert!(area.flags.mixed_map());
    assert_eq!(mapping.state(), MappingState::Active);

    let a = mapping.resolve(0).unwrap();
    let b = mapping.resolve(4096).unwrap();
    assert_ne!(a.address(), b.address());
    assert_eq!(mapping.state(), MappingState::PartiallyBacked);
    assert_eq!(device.pool().free_blocks(), before - 2);

    assert!(mapping.release().unwrap());
    assert_eq!(mapping.state(), MappingState::Destroyed);
    assert_eq!(device.pool().free_blocks(), before);
}

#[test]
fn shared_mapping_releases_once_after_last_reference() {
    const SHARES: usize = 4;
    let (manager, _nodes) = manager(DriverConfig::new());
    let device = manager.probe(PciAddress::new(), &[region(0, 8)]).unwrap();
    let mapping = manager
        .open(device.identity())
        .unwrap()
        .mmap(&mut shared_area(4))
        .unwrap();
    for page in 0..4 {
        mapping.resolve(page * 4096).unwrap();
    }
    for n in 2..=SHARES {
        assert_eq!(mapping.share().unwrap(), n);
    }

    for _ in 1..SHARES {
        assert!(!mapping.release().unwrap());
        assert_eq!(device.pool().outstanding(), 4);
    }
    assert!(mapping.release().unwrap());
    assert_eq!(device.pool().outstanding(), 0);
    assert_eq!(mapping.duplication_count(), 0);
}

#[test]
fn removal_poisons_but_keeps_backed_pages() {
    let (manager, nodes) = manager(DriverConfig::new());
    let device = manager.probe(PciAddress::new(), &[region(0, 8)]).unwrap();
    let identity = device.identity();
    let file = manager.open(identity).unwrap();
    let mut area = shared_area(2);
    let mapping = file.mmap(&mut area).unwrap();
    let first = mapping.resolve(0).unwrap();

    manager.remove(identity).unwrap();
    assert!(nodes.live.lock().unwrap().is_empty());
    assert!(manager.device(identity).is_none());

    assert_eq!(mapping.resolve(0).unwrap(), first);
    assert_eq!(mapping.resolve(4096), Err(FaultError::PoisonedPool));
    assert_eq!(file.mmap(&mut shared_area(1)).unwrap_err(), MapError::PoisonedPool);

    let handler = FaultHandler::new(Arc::new(AcceptAll));
    let second = VirtualAddress::new(VM_START + 4096);
    assert_eq!(handler.handle_fault(&area, &mapping, second), VmFault::SigBus);

    assert!(mapping.release().unwrap());
    assert_eq!(device.pool().outstanding(), 0);
    assert!(matches!(
        manager.remove(identity),
        Err(LifecycleError::UnknownDevice { .. })
    ));
}

#[test]
fn identity_is_not_reused_while_a_mapping_lives() {
    let (manager, _nodes) = manager(DriverConfig::new().with_max_devices(1));
    let device = manager.probe(PciAddress::new(), &[region(0, 4)]).unwrap();
    let identity = device.identity();
    let mapping = manager
        .open(identity)
        .unwrap()
        .mmap(&mut shared_area(1))
        .unwrap();
    mapping.resolve(0).unwrap();
    drop(device);

    manager.remove(identity).unwrap();
    assert!(matches!(
        manager.probe(PciAddress::new(), &[region(1, 4)]),
        Err(LifecycleError::Registry(_))
    ));

    assert!(mapping.release().unwrap());
    drop(mapping);

    let again = manager.probe(PciAddress::new(), &[region(1, 4)]).unwrap();
    assert_eq!(again.identity(), identity);
    assert_eq!(again.name(), "p2pmem0");
}

#[test]
fn failed_publish_returns_the_identity() {
    let (manager, nodes) = manager(DriverConfig::new());
    *nodes.refuse.lock().unwrap() = true;
    assert!(matches!(
        manager.probe(PciAddress::new(), &[region(0, 4)]),
        Err(LifecycleError::Publish(PublishError::Unavailable))
    ));
    assert_eq!(manager.registry().allocated(), 0);

    *nodes.refuse.lock().unwrap() = false;
    let device = manager.probe(PciAddress::new(), &[region(0, 4)]).unwrap();
    assert_eq!(device.identity(), DeviceIdentity::new(0));
}

#[test]
fn probe_rejects_unusable_regions() {
    let (manager, _nodes) = manager(DriverConfig::new());
    assert!(matches!(
        manager.probe(PciAddress::new(), &[]),
        Err(LifecycleError::NoRegions)
    ));
    let overlapping = [region(0, 4), region(0, 2)];
    assert!(matches!(
        manager.probe(PciAddress::new(), &overlapping),
        Err(LifecycleError::Pool(PoolError::RegionOverlap { .. }))
    ));
    assert_eq!(manager.registry().allocated(), 0);
}

#[test]
fn private_mappings_are_refused() {
    let (manager, _nodes) = manager(DriverConfig::new());
    let device = manager.probe(PciAddress::new(), &[region(0, 4)]).unwrap();
    let file = manager.open(device.identity()).unwrap();
    let mut area = VmArea::new(VirtualAddress::new(VM_START), 4096, VmFlags::private_rw());
    assert_eq!(file.mmap(&mut area).unwrap_err(), MapError::PrivateMapping);
    assert!(!area.flags.mixed_map());
}

#[test]
fn names_are_unique_among_live_devices() {
    let (manager, nodes) = manager(DriverConfig::new().with_max_devices(3));
    let devices: Vec<_> = (0..3)
        .map(|i| manager.probe(PciAddress::new(), &[region(i, 2)]).unwrap())
        .collect();
    let names: BTreeSet<_> = devices.iter().map(|d| d.name().to_owned()).collect();
    assert_eq!(names.len(), 3);
    assert_eq!(*nodes.live.lock().unwrap(), names);
    assert_eq!(
        manager.registry().live_identities(),
        vec![DeviceIdentity::new(0), DeviceIdentity::new(1), DeviceIdentity::new(2)]
    );
}

#[test]
fn concurrent_faults_on_one_mapping_fill_each_slot_once() {
    const PAGES: u64 = 16;
    const THREADS: usize = 8;

    let (manager, _nodes) = manager(DriverConfig::new().with_random_fit(true));
    let device = manager.probe(PciAddress::new(), &[region(0, 64)]).unwrap();
    let area = shared_area(PAGES);
    let mapping = manager
        .open(device.identity())
        .unwrap()
        .mmap(&mut area.clone())
        .unwrap();
    let handler = Arc::new(FaultHandler::new(Arc::new(AcceptAll)));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let mapping = Arc::clone(&mapping);
            let handler = Arc::clone(&handler);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for page in 0..PAGES {
                    let addr = VirtualAddress::new(VM_START + page * 4096 + 8);
                    assert_eq!(handler.handle_fault(&area, &mapping, addr), VmFault::NoPage);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(mapping.filled_slots(), PAGES as usize);
    assert_eq!(device.pool().outstanding(), PAGES as usize);
    let stats = device.stats();
    assert_eq!(stats.allocations, PAGES);
    assert_eq!(stats.faults, PAGES * THREADS as u64);
    assert_eq!(stats.refaults, stats.faults - stats.allocations);

    let distinct: BTreeSet<_> = (0..PAGES as usize)
        .filter_map(|i| mapping.block_at(i))
        .map(|b| b.address)
        .collect();
    assert_eq!(distinct.len(), PAGES as usize);

    assert!(mapping.release().unwrap());
    assert_eq!(device.pool().outstanding(), 0);
}

#[test]
fn shutdown_removes_every_device() {
    let (manager, nodes) = manager(DriverConfig::new());
    let a = manager.probe(PciAddress::new(), &[region(0, 2)]).unwrap();
    let _b = manager.probe(PciAddress::new(), &[region(1, 2)]).unwrap();
    let registry = Arc::clone(manager.registry());

    manager.shutdown();
    assert!(nodes.live.lock().unwrap().is_empty());
    assert!(registry.live_identities().is_empty());
    assert!(a.pool().is_poisoned());
}

#[test]
fn dropping_the_manager_releases_devices_and_identities() {
    let (manager, nodes) = manager(DriverConfig::new());
    let device = manager.probe(PciAddress::new(), &[region(0, 2)]).unwrap();
    let weak = Arc::downgrade(&device);
    let registry = Arc::clone(manager.registry());
    drop(device);

    drop(manager);
    assert!(weak.upgrade().is_none());
    assert_eq!(registry.allocated(), 0);
    assert_eq!(Arc::strong_count(&registry), 1);
    assert!(nodes.live.lock().unwrap().is_empty());
}

#[test]
fn dropping_the_manager_leaves_open_mappings_usable_until_released() {
    let (manager, _nodes) = manager(DriverConfig::new());
    let device = manager.probe(PciAddress::new(), &[region(0, 4)]).unwrap();
    let registry = Arc::clone(manager.registry());
    let mapping = manager
        .open(device.identity())
        .unwrap()
        .mmap(&mut shared_area(2))
        .unwrap();
    let first = mapping.resolve(0).unwrap();
    drop(device);

    drop(manager);
    assert_eq!(mapping.resolve(0).unwrap(), first);
    assert_eq!(mapping.resolve(4096), Err(FaultError::PoisonedPool));
    assert_eq!(registry.allocated(), 1);

    assert!(mapping.release().unwrap());
    drop(mapping);
    assert_eq!(registry.allocated(), 0);
}
