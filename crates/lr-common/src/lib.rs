// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! LibreRTOS Common Library
//!
//! Error definitions, the kernel log buffer, kernel configuration and
//! tick arithmetic shared by the LibreRTOS kernel crates.
//!
//! # Features
//!
//! - `defmt`: Enable defmt formatting of [`Error`] for embedded debugging
//!
//! No heap allocations are performed - all buffers use fixed-size arrays
//! or heapless collections.

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod errors;
pub mod config;
pub mod log;
pub mod time;

// Re-export commonly used items
pub use errors::{Error, Result};
pub use config::KernelConfig;
pub use time::Ticks;
