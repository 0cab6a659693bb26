//! Guest console output and the host-side sink that receives it.
//!
//! Console output is guest data, not host logging: entries buffer in the
//! context, drain into exactly one `StepReport`, and the driver forwards
//! them to a `ConsoleSink` one call per line in emission order.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Guest console level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    #[default]
    Log,
    Info,
    Debug,
    Warn,
    Error,
}

impl ConsoleLevel {
    /// Lowercase name, as guests spell it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
        }
    }
}

impl fmt::Display for ConsoleLevel {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One buffered console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub message: String,
}

/// Receives guest console lines from the driver, one call per line.
pub trait ConsoleSink: Send + Sync {
    fn write(
        &self,
        level: ConsoleLevel,
        message: &str,
    );
}

/// Prints log/info/debug lines to stdout and warn/error lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardSink;

impl ConsoleSink for StandardSink {
    fn write(
        &self,
        level: ConsoleLevel,
        message: &str,
    ) {
        match level {
            ConsoleLevel::Warn | ConsoleLevel::Error => {
                eprintln!("[{}] {}", level, message);
            }
            _ => println!("[{}] {}", level, message),
        }
    }
}

/// Captures console lines in memory, for tests and embedders that render
/// output themselves.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<ConsoleEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything captured so far.
    pub fn entries(&self) -> Vec<ConsoleEntry> {
        self.entries.lock().clone()
    }

    /// Move the captured lines out, leaving the sink empty.
    pub fn take(&self) -> Vec<ConsoleEntry> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ConsoleSink for MemorySink {
    fn write(
        &self,
        level: ConsoleLevel,
        message: &str,
    ) {
        self.entries.lock().push(ConsoleEntry {
            level,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(ConsoleLevel::Log.as_str(), "log");
        assert_eq!(ConsoleLevel::Error.to_string(), "error");
        assert_eq!(ConsoleLevel::default(), ConsoleLevel::Log);
    }

    #[test]
    fn test_memory_sink_preserves_order() {
        let sink = MemorySink::new();
        sink.write(ConsoleLevel::Log, "one");
        sink.write(ConsoleLevel::Warn, "two");
        let entries = sink.take();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "one");
        assert_eq!(entries[1].level, ConsoleLevel::Warn);
        assert!(sink.is_empty());
    }
}
