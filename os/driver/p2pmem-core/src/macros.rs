//! Device-scoped logging: every line is prefixed with the device name.

/// `info!` prefixed with the device name, e.g. `p2pmem0: registered`.
#[macro_export]
macro_rules! dev_info {
    ($dev:expr, $($arg:tt)+) => {
        ::log::info!(target: "p2pmem", "{}: {}", $dev.name(), format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! dev_dbg {
    ($dev:expr, $($arg:tt)+) => {
        ::log::debug!(target: "p2pmem", "{}: {}", $dev.name(), format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! dev_warn {
    ($dev:expr, $($arg:tt)+) => {
        ::log::warn!(target: "p2pmem", "{}: {}", $dev.name(), format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! dev_err {
    ($dev:expr, $($arg:tt)+) => {
        ::log::error!(target: "p2pmem", "{}: {}", $dev.name(), format_args!($($arg)+))
    };
}
