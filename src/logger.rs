//! Diagnostic channel handed to the sandbox and executor.
//!
//! Components receive an `Arc<dyn ScriptLogger>` instead of writing
//! to a process-wide logger, so a run can be observed in isolation.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

pub trait ScriptLogger: Send + Sync + fmt::Debug {
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Forwards every record to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl ScriptLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!(target: "vigil::script", "{message}"),
            LogLevel::Info => info!(target: "vigil::script", "{message}"),
            LogLevel::Warn => warn!(target: "vigil::script", "{message}"),
            LogLevel::Error => error!(target: "vigil::script", "{message}"),
        }
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<(LogLevel, String)> {
        self.records.lock().clone()
    }

    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }
}

impl ScriptLogger for MemoryLogger {
    fn log(&self, level: LogLevel, message: &str) {
        self.records.lock().push((level, message.to_string()));
    }
}

pub fn default_logger() -> Arc<dyn ScriptLogger> {
    Arc::new(TracingLogger)
}
