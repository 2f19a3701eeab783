//! # p2pmem Driver Configuration
//!
//! The single place where driver-wide constants and the load-time
//! configuration live. Every other crate reads its limits from here so the
//! pool, the registry and the lifecycle manager cannot drift apart.
//!
//! ## Constants ([`limits`])
//! * **Naming**: the class name and the `p2pmem<id>` device name prefix
//! * **Identity range**: the default number of device minors reserved
//! * **Placement**: the bounded retry count of the random-fit policy
//!
//! ## Load-time configuration ([`DriverConfig`])
//! Load-time knobs are an explicit value handed to the
//! lifecycle manager at construction:
//!
//! ```rust
//! # use p2pmem_info::DriverConfig;
//! let config = DriverConfig::new().with_max_devices(4).with_random_fit(true);
//! assert_eq!(config.max_devices, 4);
//! assert!(config.random_fit);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod config;
pub mod limits;

pub use config::DriverConfig;
