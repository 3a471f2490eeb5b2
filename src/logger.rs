// Runtime logging
// Warnings and infos are non-fatal and never affect control flow; every
// runtime owns a logger and embedders may plug in their own sink.

use colored::Colorize;
use parking_lot::Mutex;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "Debug"),
            LogLevel::Info => write!(f, "Info"),
            LogLevel::Warn => write!(f, "Warning"),
            LogLevel::Error => write!(f, "Error"),
        }
    }
}

pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }
}

/// Default logger: colored level prefix on stderr.
pub struct ConsoleLogger {
    min_level: LogLevel,
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }

    pub fn with_min_level(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, level: LogLevel, message: &str) {
        if level < self.min_level {
            return;
        }
        let prefix = match level {
            LogLevel::Debug => "Debug".dimmed(),
            LogLevel::Info => "Info".cyan(),
            LogLevel::Warn => "Warning".yellow().bold(),
            LogLevel::Error => "Error".red().bold(),
        };
        eprintln!("{}: {}", prefix, message);
    }
}

/// Collects log entries in memory. Used by tests to assert on warnings.
#[derive(Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.lock().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(level, _)| *level == LogLevel::Warn)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: LogLevel, message: &str) {
        self.entries.lock().push((level, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_logger_records_warnings() {
        let logger = MemoryLogger::new();
        logger.info("started");
        logger.warn("something looks off");
        logger.warn("still off");
        assert_eq!(logger.entries().len(), 3);
        assert_eq!(
            logger.warnings(),
            vec!["something looks off".to_string(), "still off".to_string()]
        );
    }
}
