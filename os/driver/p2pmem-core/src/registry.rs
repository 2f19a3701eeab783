//! Device identities and the table of live devices.

use crate::{Device, RegistryError};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use log::{trace, warn};
use p2pmem_pool::BlockBitmap;
use p2pmem_sync::SpinMutex;

/// Small integer naming a device (`p2pmem<id>`, char-device minor `id`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceIdentity(u32);

impl DeviceIdentity {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

struct RegistryInner {
    ids: BlockBitmap,
    attached: BTreeMap<DeviceIdentity, Arc<Device>>,
}

/// Hands out device identities and keeps the identity → device table.
///
/// Identities are bits in a bitmap below `max_devices`; the lowest free one
/// is handed out first. A device stays in the table from
/// [`attach`](Self::attach) until [`detach`](Self::detach); its identity is
/// held for as long as the [`Device`] itself lives.
pub struct DeviceRegistry {
    max_devices: u32,
    inner: SpinMutex<RegistryInner>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new(max_devices: u32) -> Self {
        Self {
            max_devices,
            inner: SpinMutex::new(RegistryInner {
                ids: BlockBitmap::new(max_devices as usize),
                attached: BTreeMap::new(),
            }),
        }
    }

    #[must_use]
    pub const fn max_devices(&self) -> u32 {
        self.max_devices
    }

    /// Reserve the smallest free identity.
    ///
    /// # Errors
    /// [`RegistryError::IdentityExhausted`] if all identities are taken.
    pub fn register(&self) -> Result<DeviceIdentity, RegistryError> {
        let id = self.inner.with_lock(|inner| {
            let bits = inner.ids.len();
            let free = inner.ids.next_clear(0, bits)?;
            inner.ids.set_run(free, 1);
            u32::try_from(free).ok()
        });
        let id = id.ok_or(RegistryError::IdentityExhausted {
            max: self.max_devices,
        })?;
        trace!("identity {id} reserved");
        Ok(DeviceIdentity(id))
    }

    /// Return an identity reserved by [`register`](Self::register).
    pub fn unregister(&self, identity: DeviceIdentity) {
        let index = identity.0 as usize;
        let known = self.inner.with_lock(|inner| {
            if inner.ids.test(index) {
                inner.ids.clear_run(index, 1);
                true
            } else {
                false
            }
        });
        if known {
            trace!("identity {identity} returned");
        } else {
            warn!("identity {identity} returned but was never reserved");
        }
    }

    /// Make a device reachable through [`lookup`](Self::lookup).
    pub fn attach(&self, device: Arc<Device>) {
        let identity = device.identity();
        let previous = self
            .inner
            .with_lock(|inner| inner.attached.insert(identity, device));
        if previous.is_some() {
            warn!("identity {identity} attached twice");
        }
    }

    /// Take a device out of the table. Its identity stays reserved until the
    /// last reference to the device is gone.
    pub fn detach(&self, identity: DeviceIdentity) -> Option<Arc<Device>> {
        self.inner.with_lock(|inner| inner.attached.remove(&identity))
    }

    #[must_use]
    pub fn lookup(&self, identity: DeviceIdentity) -> Option<Arc<Device>> {
        self.inner
            .with_lock(|inner| inner.attached.get(&identity).cloned())
    }

    /// Identities of attached devices, ascending.
    #[must_use]
    pub fn live_identities(&self) -> Vec<DeviceIdentity> {
        self.inner
            .with_lock(|inner| inner.attached.keys().copied().collect())
    }

    /// Number of reserved identities, attached or not.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.inner.with_lock(|inner| inner.ids.count_set())
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("max_devices", &self.max_devices)
            .field("allocated", &self.allocated())
            .field("live", &self.live_identities())
            .finish()
    }
}
