// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! Error types for LibreRTOS
//!
//! A single error enum shared by the kernel crates. Every variant maps to
//! a stable numeric code so failures can be reported over a debug probe
//! without formatting machinery.

use core::fmt;

/// Result type alias for LibreRTOS operations
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for LibreRTOS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Kernel Errors (0x09xx)
    // =========================================================================
    /// Task creation failed (task table full)
    TaskCreationFailed,
    /// Stack memory allocation failed
    MemoryAllocationFailed,
    /// Scheduler has no task to select
    NoTasks,
    /// Stack overflow detected (canary clobbered)
    StackOverflow,

    // =========================================================================
    // HAL Errors (0x08xx)
    // =========================================================================
    /// Tick timer could not be programmed
    TimerError,

    // =========================================================================
    // General Errors (0xFFxx)
    // =========================================================================
    /// Invalid parameter provided
    InvalidParameter,
    /// Invalid state for the operation
    InvalidState,
    /// Internal error (should not occur)
    InternalError,
}

impl Error {
    /// Get the error code for this error
    ///
    /// Error codes are organized by category:
    /// - 0x08xx: HAL errors
    /// - 0x09xx: Kernel errors
    /// - 0xFFxx: General errors
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::TimerError => 0x0803,

            Self::TaskCreationFailed => 0x0901,
            Self::MemoryAllocationFailed => 0x0902,
            Self::NoTasks => 0x0905,
            Self::StackOverflow => 0x0906,

            Self::InvalidParameter => 0xFF02,
            Self::InvalidState => 0xFF07,
            Self::InternalError => 0xFFFF,
        }
    }

    /// Check if this error leaves kernel state untrustworthy
    ///
    /// A clobbered stack canary means memory next to a task stack was
    /// overwritten; nothing the scheduler reads can be trusted after that.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::StackOverflow | Self::InternalError)
    }

    /// Get a short description of the error
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::TimerError => "timer error",
            Self::TaskCreationFailed => "task creation failed",
            Self::MemoryAllocationFailed => "memory allocation failed",
            Self::NoTasks => "no tasks registered",
            Self::StackOverflow => "stack overflow",
            Self::InvalidParameter => "invalid parameter",
            Self::InvalidState => "invalid state",
            Self::InternalError => "internal error",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:04X}] {}", self.code(), self.description())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "[0x{:04X}] {}", self.code(), self.description());
    }
}
