//! # Driver Limits

pub use p2pmem_addresses::PAGE_SIZE;

/// Name of the device class all p2pmem nodes are created under.
pub const CLASS_NAME: &str = "p2pmem";

/// Prefix of rendered device names; the identity is appended (`p2pmem0`).
pub const DEVICE_NAME_PREFIX: &str = "p2pmem";

/// Number of device identities (char-device minors) reserved by default.
pub const DEFAULT_MAX_DEVICES: u32 = 16;

/// Upper bound on a configured identity range.
pub const MAX_DEVICES_LIMIT: u32 = 1 << 20;

/// Attempts the random-fit placement makes before reporting exhaustion.
pub const RANDOM_FIT_ATTEMPTS: u32 = 100;

/// Seed used for random-fit placement when none is configured.
pub const DEFAULT_RANDOM_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Char-device major used when the platform does not assign one.
pub const DEFAULT_CHRDEV_MAJOR: u32 = 240;

const _: () = {
    assert!(DEFAULT_MAX_DEVICES > 0);
    assert!(DEFAULT_MAX_DEVICES <= MAX_DEVICES_LIMIT);
    assert!(RANDOM_FIT_ATTEMPTS > 0);
    assert!(DEFAULT_RANDOM_SEED != 0);
    assert!(PAGE_SIZE.is_power_of_two());
};
