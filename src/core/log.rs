//! Verbose logging for the runtime
//!
//! This module provides structured logging for program admission and
//! execution, useful for debugging and understanding why programs are
//! rejected or what they executed.

/// Log level for runtime output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// No logging
    #[default]
    Off = 0,
    /// Only errors
    Error = 1,
    /// Errors and warnings
    Warn = 2,
    /// General information (admission results, JIT selection)
    Info = 3,
    /// Detailed debugging info
    Debug = 4,
    /// Very verbose (every executed instruction)
    Trace = 5,
}

/// Bounded runtime log buffer
#[derive(Debug, Clone)]
pub struct RuntimeLog {
    /// Log level threshold
    pub level: LogLevel,
    /// Log buffer
    buffer: String,
    /// Maximum buffer size
    max_size: usize,
    /// Whether buffer has been truncated
    truncated: bool,
}

impl Default for RuntimeLog {
    fn default() -> Self {
        Self::new(LogLevel::Off)
    }
}

impl RuntimeLog {
    /// Create a new log with the given threshold
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            buffer: String::new(),
            max_size: 64 * 1024,
            truncated: false,
        }
    }

    /// Create a log with a custom size cap
    pub fn with_max_size(level: LogLevel, max_size: usize) -> Self {
        Self {
            level,
            buffer: String::new(),
            max_size,
            truncated: false,
        }
    }

    /// Check if logging is enabled at the given level
    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.level && level != LogLevel::Off
    }

    /// Log a message at the given level
    pub fn log(&mut self, level: LogLevel, msg: &str) {
        if !self.enabled(level) || self.truncated {
            return;
        }

        if self.buffer.len() + msg.len() + 1 > self.max_size {
            self.truncated = true;
            self.buffer.push_str("\n... log truncated ...\n");
            return;
        }

        self.buffer.push_str(msg);
        self.buffer.push('\n');
    }

    /// Log an error
    pub fn error(&mut self, msg: &str) {
        self.log(LogLevel::Error, msg);
    }

    /// Log a warning
    pub fn warn(&mut self, msg: &str) {
        self.log(LogLevel::Warn, msg);
    }

    /// Log info
    pub fn info(&mut self, msg: &str) {
        self.log(LogLevel::Info, msg);
    }

    /// Log debug
    pub fn debug(&mut self, msg: &str) {
        self.log(LogLevel::Debug, msg);
    }

    /// Log trace
    pub fn trace(&mut self, msg: &str) {
        self.log(LogLevel::Trace, msg);
    }

    /// Get the log contents
    pub fn contents(&self) -> &str {
        &self.buffer
    }

    /// Whether the buffer overflowed its cap
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Clear the log
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.truncated = false;
    }
}
