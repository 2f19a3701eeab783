//! One consumer mapping of a device, backed page by page on first touch.

use crate::vm::{CacheMode, Pfn, Translation};
use crate::{Device, FaultError, MapError, ReleaseError};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use p2pmem_pool::Block;
use p2pmem_sync::TicketMutex;

/// Where a mapping is in its life.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MappingState {
    /// No slot backed yet.
    Active,
    /// At least one slot holds a block.
    PartiallyBacked,
    /// Last reference dropped; blocks are going back to the pool.
    Closing,
    /// All blocks returned.
    Destroyed,
}

struct SlotTable {
    slots: Vec<Option<Block>>,
    filled: usize,
    state: MappingState,
}

impl SlotTable {
    /// Return every held block and clear the table.
    fn drain(&mut self, device: &Device) -> usize {
        self.state = MappingState::Closing;
        let mut freed = 0;
        for slot in &mut self.slots {
            if let Some(block) = slot.take() {
                // A failure here was already logged by the pool.
                if device.pool().free(block.id).is_ok() {
                    freed += 1;
                }
            }
        }
        self.filled = 0;
        self.state = MappingState::Destroyed;
        freed
    }
}

/// A mapping of `slot_count()` blocks onto a device's pool.
///
/// Shared by every context that inherited the mapping (fork, split). Each of
/// them holds one count taken with [`share`](Self::share) and gives it back
/// with [`release`](Self::release); the final release returns all blocks.
///
/// Slot mutation, including the platform's page installation, runs under a
/// per-mapping FIFO lock so faults on the same mapping serialize and
/// destruction waits for faults already in flight.
pub struct MappingInstance {
    device: Arc<Device>,
    length: u64,
    caching: CacheMode,
    dup: AtomicUsize,
    table: TicketMutex<SlotTable>,
}

impl MappingInstance {
    /// A fully unbacked mapping of `length` bytes with a duplication count of 1.
    ///
    /// # Errors
    /// [`MapError::InvalidLength`] unless `length` is a non-zero multiple of
    /// the device block size.
    pub fn new(device: Arc<Device>, length: u64, caching: CacheMode) -> Result<Arc<Self>, MapError> {
        let block_size = device.pool().block_size();
        if length == 0 || !block_size.is_multiple(length) {
            return Err(MapError::InvalidLength { length, block_size });
        }
        let slots = usize::try_from(block_size.blocks_in(length))
            .map_err(|_| MapError::InvalidLength { length, block_size })?;

        Ok(Arc::new(Self {
            device,
            length,
            caching,
            dup: AtomicUsize::new(1),
            table: TicketMutex::new(SlotTable {
                slots: vec![None; slots],
                filled: 0,
                state: MappingState::Active,
            }),
        }))
    }

    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Mapped length in bytes.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Take another reference for a derived context.
    ///
    /// # Errors
    /// [`ReleaseError::AlreadyReleased`] if the mapping is already gone.
    pub fn share(&self) -> Result<usize, ReleaseError> {
        self.dup
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n == 0 { None } else { n.checked_add(1) }
            })
            .map(|prev| prev + 1)
            .map_err(|_| self.violation(ReleaseError::AlreadyReleased))
    }

    /// Drop one reference. Returns `true` if this was the last one and the
    /// mapping released its blocks.
    ///
    /// # Errors
    /// [`ReleaseError::AlreadyReleased`] if called more often than the
    /// mapping was shared.
    pub fn release(&self) -> Result<bool, ReleaseError> {
        let prev = self
            .dup
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| self.violation(ReleaseError::AlreadyReleased))?;
        if prev != 1 {
            return Ok(false);
        }

        let freed = self.table.with_lock(|table| table.drain(&self.device));
        crate::dev_dbg!(self.device, "vma close, {freed} block(s) returned");
        Ok(true)
    }

    /// Back the block at `offset`, allocating on first touch.
    ///
    /// A second fault on the same offset returns the block the first one
    /// installed.
    ///
    /// # Errors
    /// * [`FaultError::AllocationExhausted`] if the pool has no free block;
    ///   the slot stays empty and a later retry may succeed.
    /// * [`FaultError::PoisonedPool`] if the device was removed.
    /// * [`FaultError::MappingReleased`] after the final release.
    /// * [`FaultError::InvalidOffset`] for an unaligned or out-of-range
    ///   offset; debug builds abort on it.
    pub fn resolve(&self, offset: u64) -> Result<Translation, FaultError> {
        self.resolve_with(offset, |t| *t)
    }

    /// Resolve `offset` and run `install` on the translation while the slot
    /// lock is still held.
    pub(crate) fn resolve_with<U>(
        &self,
        offset: u64,
        install: impl FnOnce(&Translation) -> U,
    ) -> Result<U, FaultError> {
        let block_size = self.device.pool().block_size();
        if offset >= self.length || !block_size.is_multiple(offset) {
            return Err(self.violation(FaultError::InvalidOffset {
                offset,
                length: self.length,
            }));
        }
        let index = usize::try_from(offset >> block_size.shift()).map_err(|_| {
            FaultError::InvalidOffset {
                offset,
                length: self.length,
            }
        })?;

        let stats = self.device.fault_stats();
        stats.incr_faults();

        let mut table = self.table.lock();
        if matches!(table.state, MappingState::Closing | MappingState::Destroyed) {
            return Err(FaultError::MappingReleased);
        }

        let block = if let Some(block) = table.slots[index] {
            stats.incr_refaults();
            block
        } else {
            let block = self.device.pool().allocate().map_err(|err| {
                let err = FaultError::from(err);
                if err == FaultError::AllocationExhausted {
                    stats.incr_out_of_memory();
                }
                err
            })?;
            table.slots[index] = Some(block);
            table.filled += 1;
            table.state = MappingState::PartiallyBacked;
            stats.incr_allocations();
            block
        };

        let translation = Translation {
            pfn: Pfn::device(block.address),
            caching: self.caching,
        };
        Ok(install(&translation))
    }

    #[must_use]
    pub fn state(&self) -> MappingState {
        self.table.with_lock(|table| table.state)
    }

    /// Number of slots currently holding a block.
    #[must_use]
    pub fn filled_slots(&self) -> usize {
        self.table.with_lock(|table| table.filled)
    }

    #[must_use]
    pub fn duplication_count(&self) -> usize {
        self.dup.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.table.with_lock(|table| table.slots.len())
    }

    /// Block backing slot `index`, if any.
    #[must_use]
    pub fn block_at(&self, index: usize) -> Option<Block> {
        self.table
            .with_lock(|table| table.slots.get(index).copied().flatten())
    }

    fn violation<E: fmt::Display + Copy>(&self, err: E) -> E {
        crate::dev_err!(self.device, "mapping contract violated: {err}");
        debug_assert!(false, "{err}");
        err
    }
}

impl fmt::Debug for MappingInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingInstance")
            .field("device", &self.device.name())
            .field("length", &self.length)
            .field("dup", &self.duplication_count())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for MappingInstance {
    fn drop(&mut self) {
        let table = self.table.get_mut();
        if table.filled != 0 {
            crate::dev_warn!(
                self.device,
                "mapping dropped without final release, returning {} block(s)",
                table.filled
            );
            table.drain(&self.device);
        }
        table.state = MappingState::Destroyed;
    }
}
