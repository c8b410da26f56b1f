// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! Kernel log buffer for LibreRTOS
//!
//! A fixed-capacity circular buffer of formatted records. Writing a
//! record never blocks and never allocates, so it is usable from the tick
//! interrupt. Once full, the oldest record is overwritten.
//!
//! Records are stamped with the system tick count and the module path of
//! the call site (see the `log_*!` macros).

use core::fmt::{self, Write};
use heapless::String;

/// Maximum log message length
pub const MAX_LOG_MESSAGE_LEN: usize = 96;

/// Log buffer size (number of entries)
pub const LOG_BUFFER_SIZE: usize = 32;

/// Log level, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Errors that require immediate attention
    Error,
    /// Warnings about potential issues
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Per-switch tracing
    Trace,
}

impl LogLevel {
    const fn letter(self) -> char {
        match self {
            Self::Error => 'E',
            Self::Warn => 'W',
            Self::Info => 'I',
            Self::Debug => 'D',
            Self::Trace => 'T',
        }
    }
}

/// A single log record
#[derive(Clone)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// System tick count when the record was written
    pub timestamp: u32,
    /// Module path of the call site
    pub module: &'static str,
    /// Formatted message, truncated to [`MAX_LOG_MESSAGE_LEN`]
    pub message: String<MAX_LOG_MESSAGE_LEN>,
}

impl LogEntry {
    /// Message text
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}

impl fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:08X}] {} [{}] {}",
            self.timestamp,
            self.level.letter(),
            self.module,
            self.message
        )
    }
}

/// Writer that drops whatever does not fit instead of failing
struct Truncating<'a>(&'a mut String<MAX_LOG_MESSAGE_LEN>);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Circular log buffer
pub struct LogBuffer {
    entries: [Option<LogEntry>; LOG_BUFFER_SIZE],
    write_index: usize,
    count: usize,
    dropped: u32,
    min_level: LogLevel,
}

impl LogBuffer {
    /// Create a new empty log buffer
    #[must_use]
    pub const fn new() -> Self {
        const NONE: Option<LogEntry> = None;
        Self {
            entries: [NONE; LOG_BUFFER_SIZE],
            write_index: 0,
            count: 0,
            dropped: 0,
            min_level: LogLevel::Info,
        }
    }

    /// Set the minimum log level
    pub fn set_min_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    /// Record a message built from format arguments
    pub fn log(&mut self, level: LogLevel, timestamp: u32, module: &'static str, args: fmt::Arguments<'_>) {
        if level > self.min_level {
            return;
        }

        let mut message = String::new();
        let _ = Truncating(&mut message).write_fmt(args);

        if self.count == LOG_BUFFER_SIZE {
            self.dropped = self.dropped.wrapping_add(1);
        } else {
            self.count += 1;
        }
        self.entries[self.write_index] = Some(LogEntry {
            level,
            timestamp,
            module,
            message,
        });
        self.write_index = (self.write_index + 1) % LOG_BUFFER_SIZE;
    }

    /// Get the number of entries
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Check if buffer is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of records overwritten since the last clear
    #[must_use]
    pub const fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.write_index = 0;
        self.count = 0;
        self.dropped = 0;
    }

    /// Most recent entry
    #[must_use]
    pub fn latest(&self) -> Option<&LogEntry> {
        if self.count == 0 {
            return None;
        }
        let idx = (self.write_index + LOG_BUFFER_SIZE - 1) % LOG_BUFFER_SIZE;
        self.entries[idx].as_ref()
    }

    /// Iterate over entries (oldest first)
    pub fn iter(&self) -> LogBufferIter<'_> {
        let start = if self.count < LOG_BUFFER_SIZE {
            0
        } else {
            self.write_index
        };
        LogBufferIter {
            buffer: self,
            next: start,
            remaining: self.count,
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over log buffer entries
pub struct LogBufferIter<'a> {
    buffer: &'a LogBuffer,
    next: usize,
    remaining: usize,
}

impl<'a> Iterator for LogBufferIter<'a> {
    type Item = &'a LogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let idx = self.next;
        self.next = (self.next + 1) % LOG_BUFFER_SIZE;
        self.remaining -= 1;
        self.buffer.entries[idx].as_ref()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($buffer:expr, $ts:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Error, $ts, module_path!(), format_args!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($buffer:expr, $ts:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Warn, $ts, module_path!(), format_args!($($arg)*))
    };
}

/// Log an informational message
#[macro_export]
macro_rules! log_info {
    ($buffer:expr, $ts:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Info, $ts, module_path!(), format_args!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($buffer:expr, $ts:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Debug, $ts, module_path!(), format_args!($($arg)*))
    };
}

/// Log a trace-level message
#[macro_export]
macro_rules! log_trace {
    ($buffer:expr, $ts:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Trace, $ts, module_path!(), format_args!($($arg)*))
    };
}
