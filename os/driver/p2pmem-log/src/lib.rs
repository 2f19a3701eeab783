//! Minimal [`log`] sink for host builds: the simulator and tests.
//!
//! Lines look like `[INFO] p2pmem: p2pmem0: registered`.

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;

pub struct StderrLogger {
    max_level: LevelFilter,
}

impl StderrLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Install as the process-wide logger. Only the first call succeeds.
    ///
    /// # Errors
    /// Fails if another logger was installed already.
    pub fn init(self) -> Result<(), SetLoggerError> {
        let max_level = self.max_level;
        // set_logger needs a &'static dyn Log; the logger lives for the process.
        log::set_logger(Box::leak(Box::new(self)))?;
        log::set_max_level(max_level);
        Ok(())
    }

    /// Parse a level name (`error` .. `trace`, `off`), case-insensitive.
    #[must_use]
    pub fn parse_level(name: &str) -> Option<LevelFilter> {
        name.parse().ok()
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format: "[LEVEL] target: message\n"
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn level_filtering() {
        let logger = StderrLogger::new(LevelFilter::Info);
        let info = Metadata::builder().level(Level::Info).target("p2pmem").build();
        let debug = Metadata::builder().level(Level::Debug).target("p2pmem").build();
        assert!(logger.enabled(&info));
        assert!(!logger.enabled(&debug));
    }

    #[test]
    fn parses_level_names() {
        assert_eq!(StderrLogger::parse_level("DEBUG"), Some(LevelFilter::Debug));
        assert_eq!(StderrLogger::parse_level("off"), Some(LevelFilter::Off));
        assert_eq!(StderrLogger::parse_level("loud"), None);
    }

    #[test]
    fn second_init_is_rejected() {
        let _ = StderrLogger::new(LevelFilter::Warn).init();
        assert!(StderrLogger::new(LevelFilter::Warn).init().is_err());
    }
}
