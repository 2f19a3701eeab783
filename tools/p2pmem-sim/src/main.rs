use log::LevelFilter;
use p2pmem_addresses::{PhysicalAddress, VirtualAddress};
use p2pmem_core::{
    DeviceNumber, DeviceRegistry, FaultHandler, InsertError, LifecycleError, LifecycleManager,
    MapError, NodePublisher, PageInstaller, PublishError, ReleaseError, Translation, VmArea,
    VmFault, VmFlags,
};
use p2pmem_info::DriverConfig;
use p2pmem_log::StderrLogger;
use p2pmem_pool::{PciAddress, PhysicalRegion};
use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};

const BAR_BASE: u64 = 0x38_0000_0000;
const BAR_STRIDE: u64 = 0x1_0000_0000;
const VM_BASE: u64 = 0x7f00_0000_0000;

#[derive(Debug, thiserror::Error)]
enum SimError {
    #[error("usage: p2pmem-sim [--blocks N] [--map N] [--devices N] [--random-fit] [--log LEVEL]\n{0}")]
    Usage(String),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Release(#[from] ReleaseError),
}

struct Options {
    blocks: u64,
    map: u64,
    devices: u32,
    random_fit: bool,
    level: LevelFilter,
}

impl Options {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, SimError> {
        let mut opts = Self {
            blocks: 64,
            map: 16,
            devices: 1,
            random_fit: false,
            level: LevelFilter::Info,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--blocks" => opts.blocks = number(&arg, args.next())?,
                "--map" => opts.map = number(&arg, args.next())?,
                "--devices" => opts.devices = number(&arg, args.next())?,
                "--random-fit" => opts.random_fit = true,
                "--log" => {
                    let value = args.next().unwrap_or_default();
                    opts.level = StderrLogger::parse_level(&value)
                        .ok_or_else(|| SimError::Usage(format!("bad log level {value:?}")))?;
                }
                other => return Err(SimError::Usage(format!("unknown argument {other:?}"))),
            }
        }
        if opts.blocks == 0 || opts.map == 0 || opts.devices == 0 {
            return Err(SimError::Usage("counts must be non-zero".into()));
        }
        Ok(opts)
    }
}

fn number<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, SimError> {
    value
        .as_deref()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| SimError::Usage(format!("{flag} needs a number")))
}

/// Prints node creation the way udev would see it.
struct ConsoleNodes;

impl NodePublisher for ConsoleNodes {
    fn publish(&self, name: &str, devt: DeviceNumber) -> Result<(), PublishError> {
        println!("+ /dev/{name} ({devt})");
        Ok(())
    }

    fn retract(&self, name: &str, devt: DeviceNumber) {
        println!("- /dev/{name} ({devt})");
    }
}

/// A flat page table: virtual page → physical frame.
#[derive(Default)]
struct PageTable {
    entries: Mutex<HashMap<VirtualAddress, PhysicalAddress>>,
}

impl PageInstaller for PageTable {
    fn insert_mixed(
        &self,
        _area: &VmArea,
        address: VirtualAddress,
        translation: &Translation,
    ) -> Result<(), InsertError> {
        let mut entries = self.entries.lock().map_err(|_| InsertError::Fault)?;
        if entries.contains_key(&address) {
            return Err(InsertError::Busy);
        }
        entries.insert(address, translation.address());
        Ok(())
    }
}

fn main() -> Result<(), SimError> {
    let opts = Options::parse(env::args().skip(1))?;
    let _ = StderrLogger::new(opts.level).init();

    let config = DriverConfig::new()
        .with_max_devices(opts.devices)
        .with_random_fit(opts.random_fit);
    let block = config.block_size.bytes();
    let registry = Arc::new(DeviceRegistry::new(config.max_devices));
    let manager = LifecycleManager::new(config, Arc::clone(&registry), Arc::new(ConsoleNodes));

    let mut devices = Vec::new();
    for i in 0..opts.devices {
        let owner = PciAddress::new().with_bus(u8::try_from(i + 1).unwrap_or(u8::MAX));
        let base = BAR_BASE + u64::from(i) * BAR_STRIDE;
        let region = PhysicalRegion::new(PhysicalAddress::new(base), opts.blocks * block, owner);
        devices.push(manager.probe(owner, &[region])?);
    }

    let page_table = Arc::new(PageTable::default());
    let handler = FaultHandler::new(Arc::clone(&page_table) as Arc<dyn PageInstaller>);

    for (i, device) in devices.iter().enumerate() {
        let file = manager.open(device.identity())?;
        let start = VM_BASE + i as u64 * (opts.map * block);
        let mut area = VmArea::new(VirtualAddress::new(start), opts.map * block, VmFlags::shared_rw());
        let mapping = file.mmap(&mut area)?;

        let mut outcomes: HashMap<VmFault, u64> = HashMap::new();
        for page in 0..opts.map {
            let address = VirtualAddress::new(start + page * block);
            *outcomes.entry(handler.handle_fault(&area, &mapping, address)).or_default() += 1;
        }
        // Touch the first page again, as a second thread of the process would.
        handler.handle_fault(&area, &mapping, area.start);

        // fork: the child inherits the mapping, then both unmap.
        mapping.share()?;
        let pool = device.pool().stats();
        println!(
            "{}: mapped {} page(s), {} backed, pool {}/{} free, outcomes {outcomes:?}",
            device.name(),
            opts.map,
            mapping.filled_slots(),
            pool.free_blocks,
            pool.total_blocks,
        );
        mapping.release()?;
        mapping.release()?;
        println!("{}: {:?}", device.name(), device.stats());
    }

    drop(devices);
    manager.shutdown();
    println!("{} identities still reserved", registry.allocated());
    Ok(())
}
