// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! Kernel configuration for LibreRTOS
//!
//! All configuration is fixed at build time. The constants below are the
//! recognized options; [`KernelConfig`] bundles them so a board crate can
//! hand a non-default set to the scheduler.

use crate::errors::{Error, Result};

/// Time slice, in ticks, granted to a task each time it is selected
pub const TIME_SLICE: u32 = 1;

/// Tick rate in Hertz
pub const TICK_RATE_HZ: u32 = 1000;

/// Stack capacity of the idle task, in machine words
pub const IDLE_STACK_WORDS: usize = 1024;

/// Maximum number of tasks the kernel can hold, idle task included
pub const MAX_TASKS: usize = 16;

/// Scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Quota in ticks reloaded into a task whenever it is selected
    pub time_slice: u32,
    /// Frequency of the periodic tick interrupt
    pub tick_rate_hz: u32,
    /// Stack capacity of the idle task, in machine words
    pub idle_stack_words: usize,
}

impl KernelConfig {
    /// Default configuration
    pub const DEFAULT: Self = Self {
        time_slice: TIME_SLICE,
        tick_rate_hz: TICK_RATE_HZ,
        idle_stack_words: IDLE_STACK_WORDS,
    };

    /// Override the time slice
    #[must_use]
    pub const fn with_time_slice(mut self, ticks: u32) -> Self {
        self.time_slice = ticks;
        self
    }

    /// Override the tick rate
    #[must_use]
    pub const fn with_tick_rate_hz(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz;
        self
    }

    /// Override the idle task stack capacity
    #[must_use]
    pub const fn with_idle_stack_words(mut self, words: usize) -> Self {
        self.idle_stack_words = words;
        self
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    /// Returns `Error::InvalidParameter` for a zero tick rate (uptime would
    /// divide by zero) or a zero idle stack.
    pub const fn validate(&self) -> Result<()> {
        if self.tick_rate_hz == 0 || self.idle_stack_words == 0 {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
