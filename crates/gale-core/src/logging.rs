//! Structured logging for the server lifecycle.
//!
//! Logs are structured entries routed through a pluggable sink. The default
//! sink writes a compact single line to stderr; JSON output is available
//! for production collectors, and [`MemorySink`] captures entries for
//! tests.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Most verbose, for detailed debugging.
    Trace = 0,
    /// Debug information, not shown in production.
    Debug = 1,
    /// General information about normal operation.
    Info = 2,
    /// Something unexpected but recoverable.
    Warn = 3,
    /// An error that affected request processing.
    Error = 4,
}

impl LogLevel {
    /// Returns the level as a lowercase string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Structured key/value fields.
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    fn compact(&self) -> String {
        let mut line = format!("[{}] {}", self.level, self.message);
        for (key, value) in &self.fields {
            line.push_str(&format!(" {key}={value}"));
        }
        line
    }

    fn json(&self) -> String {
        let fields: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::json!({
            "level": self.level.as_str(),
            "message": self.message,
            "fields": fields,
        })
        .to_string()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    /// Minimum level to emit.
    pub level: LogLevel,
    /// Emit JSON lines instead of the compact format.
    pub json_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_output: false,
        }
    }
}

impl LogConfig {
    /// Creates a config with defaults (info, compact).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum level.
    #[must_use]
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Enables or disables JSON output.
    #[must_use]
    pub fn json_output(mut self, enabled: bool) -> Self {
        self.json_output = enabled;
        self
    }
}

type Sink = Box<dyn Fn(&LogEntry)>;

/// A logger with a pluggable sink.
pub struct Logger {
    config: LogConfig,
    sink: Sink,
}

impl Logger {
    /// A logger writing to stderr.
    #[must_use]
    pub fn new(config: LogConfig) -> Self {
        let json = config.json_output;
        Self {
            config,
            sink: Box::new(move |entry| {
                if json {
                    eprintln!("{}", entry.json());
                } else {
                    eprintln!("{}", entry.compact());
                }
            }),
        }
    }

    /// A logger whose entries accumulate in the returned sink.
    #[must_use]
    pub fn with_memory_sink(config: LogConfig) -> (Self, MemorySink) {
        let captured = MemorySink::default();
        let entries = Rc::clone(&captured.entries);
        let logger = Self {
            config,
            sink: Box::new(move |entry| {
                entries.borrow_mut().push(entry.clone());
            }),
        };
        (logger, captured)
    }

    /// Whether the level passes the configured threshold.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.config.level
    }

    /// Emits an entry if the level is enabled.
    pub fn log(&self, level: LogLevel, message: &str, fields: &[(&str, String)]) {
        if !self.enabled(level) {
            return;
        }
        let entry = LogEntry {
            level,
            message: message.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        };
        (self.sink)(&entry);
    }

    /// Info-level shorthand.
    pub fn info(&self, message: &str, fields: &[(&str, String)]) {
        self.log(LogLevel::Info, message, fields);
    }

    /// Warn-level shorthand.
    pub fn warn(&self, message: &str, fields: &[(&str, String)]) {
        self.log(LogLevel::Warn, message, fields);
    }

    /// Error-level shorthand.
    pub fn error(&self, message: &str, fields: &[(&str, String)]) {
        self.log(LogLevel::Error, message, fields);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Captured log entries for test assertions.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: Rc<RefCell<Vec<LogEntry>>>,
}

impl MemorySink {
    /// Snapshot of the captured entries.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.borrow().clone()
    }

    /// Whether any captured entry contains `needle` in its message.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|entry| entry.message.contains(needle))
    }
}
