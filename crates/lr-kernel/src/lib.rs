// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! LibreRTOS Kernel
//!
//! The scheduling core of a small preemptive, priority-based kernel for
//! single-core microcontrollers:
//!
//! - **Task**: control blocks with priority, quota and saved context
//! - **Ready list**: every task, most urgent first, FIFO among equals
//! - **Scheduler**: selection, context switch, tick accounting, start
//! - **Port**: the hardware boundary (context switch, timer, interrupts,
//!   stack memory), plus a host simulation port
//!
//! # Usage
//!
//! ```rust,ignore
//! use lr_kernel::{Scheduler, SharedScheduler, TaskPriority};
//!
//! // Placed in a static by the board so the tick ISR can reach it.
//! let kernel = SharedScheduler::new(Scheduler::with_default_config(board_port)?);
//!
//! kernel.with(|s| s.create_task(blink, 256, TaskPriority::new(2), 0))??;
//! kernel.with(|s| s.create_task(telemetry, 512, TaskPriority::new(5), 0))??;
//!
//! // Never returns on hardware. From here on the port's timer
//! // interrupt calls `kernel.tick()`.
//! kernel.start()?;
//! ```
//!
//! A bare [`Scheduler`] is enough for host tests, where nothing preempts
//! the caller.

#![no_std]
#![warn(missing_docs)]

#[cfg(test)]
extern crate std;

pub mod memory;
pub mod port;
pub mod ready_list;
pub mod scheduler;
pub mod shared;
pub mod task;

// Re-export commonly used types
pub use lr_common::{Error, KernelConfig, Result, Ticks};
pub use port::{CriticalSection, Port, StackRegion, TaskEntry, TickHandler};
pub use scheduler::{Scheduler, SchedulerState, SchedulerStats};
pub use shared::SharedScheduler;
pub use task::{Task, TaskId, TaskPriority};

pub use lr_common::config::{MAX_TASKS, TICK_RATE_HZ, TIME_SLICE};

/// Kernel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Kernel build info
pub const BUILD_INFO: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " v",
    env!("CARGO_PKG_VERSION"),
    " - LibreRTOS Kernel"
);
