use core::sync::atomic::{AtomicU64, Ordering};

/// Per-device fault counters.
#[derive(Debug, Default)]
pub struct FaultStats {
    faults: AtomicU64,
    refaults: AtomicU64,
    allocations: AtomicU64,
    out_of_memory: AtomicU64,
    bus_errors: AtomicU64,
}

/// Copy of [`FaultStats`] at one point in time.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FaultStatsSnapshot {
    /// Every call into the fault path.
    pub faults: u64,
    /// Faults on a page that was already backed.
    pub refaults: u64,
    /// Faults that took a fresh block from the pool.
    pub allocations: u64,
    pub out_of_memory: u64,
    pub bus_errors: u64,
}

impl FaultStats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            faults: AtomicU64::new(0),
            refaults: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            out_of_memory: AtomicU64::new(0),
            bus_errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn incr_faults(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_refaults(&self) {
        self.refaults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_allocations(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_out_of_memory(&self) {
        self.out_of_memory.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_bus_errors(&self) {
        self.bus_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> FaultStatsSnapshot {
        FaultStatsSnapshot {
            faults: self.faults.load(Ordering::Relaxed),
            refaults: self.refaults.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            out_of_memory: self.out_of_memory.load(Ordering::Relaxed),
            bus_errors: self.bus_errors.load(Ordering::Relaxed),
        }
    }
}
