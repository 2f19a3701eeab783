use crate::limits::{
    DEFAULT_CHRDEV_MAJOR, DEFAULT_MAX_DEVICES, DEFAULT_RANDOM_SEED, MAX_DEVICES_LIMIT,
};
use p2pmem_addresses::BlockSize;

/// Load-time driver configuration.
///
/// Provided once when the lifecycle manager is created and applied to every
/// device probed afterwards.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DriverConfig {
    /// Number of identities the registry may hand out (`0..max_devices`).
    pub max_devices: u32,
    /// Use random-fit instead of first-fit placement for new pools.
    pub random_fit: bool,
    /// Block size new pools carve their regions into.
    pub block_size: BlockSize,
    /// Char-device major number device nodes are created with.
    pub chrdev_major: u32,
    /// Seed for random-fit placement; mixed with the owning PCI address.
    pub random_seed: u64,
}

impl DriverConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_devices: DEFAULT_MAX_DEVICES,
            random_fit: false,
            block_size: BlockSize::PAGE,
            chrdev_major: DEFAULT_CHRDEV_MAJOR,
            random_seed: DEFAULT_RANDOM_SEED,
        }
    }

    /// Set the identity range, clamped to `1..=MAX_DEVICES_LIMIT`.
    #[must_use]
    pub const fn with_max_devices(mut self, max_devices: u32) -> Self {
        self.max_devices = if max_devices == 0 {
            1
        } else if max_devices > MAX_DEVICES_LIMIT {
            MAX_DEVICES_LIMIT
        } else {
            max_devices
        };
        self
    }

    #[must_use]
    pub const fn with_random_fit(mut self, random_fit: bool) -> Self {
        self.random_fit = random_fit;
        self
    }

    #[must_use]
    pub const fn with_block_size(mut self, block_size: BlockSize) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub const fn with_chrdev_major(mut self, major: u32) -> Self {
        self.chrdev_major = major;
        self
    }

    #[must_use]
    pub const fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_module_parameters() {
        let c = DriverConfig::default();
        assert_eq!(c.max_devices, 16);
        assert!(!c.random_fit);
        assert_eq!(c.block_size, BlockSize::PAGE);
    }

    #[test]
    fn max_devices_is_clamped() {
        assert_eq!(DriverConfig::new().with_max_devices(0).max_devices, 1);
        assert_eq!(
            DriverConfig::new().with_max_devices(u32::MAX).max_devices,
            MAX_DEVICES_LIMIT
        );
    }
}
