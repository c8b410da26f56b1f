// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! Stack memory pool
//!
//! A bump allocator over a board-supplied block of words, used by ports
//! to back [`Port::alloc_stack`](crate::port::Port::alloc_stack). Task
//! stacks live for the lifetime of the system, so individual frees are
//! not supported; the whole pool can be reset at teardown.

use core::ptr::NonNull;

use crate::port::StackRegion;

/// Bump allocator handing out word-aligned stack regions
pub struct StackPool {
    base: NonNull<usize>,
    capacity: usize,
    offset: usize,
}

impl StackPool {
    /// Build a pool over `memory`
    ///
    /// Boards usually pass a `static mut` array taken once at startup.
    pub fn new(memory: &'static mut [usize]) -> Self {
        let capacity = memory.len();
        let base = NonNull::new(memory.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            base,
            capacity,
            offset: 0,
        }
    }

    /// Allocate `words` machine words
    ///
    /// Returns `None` for a zero-sized request or when the pool is exhausted.
    pub fn alloc(&mut self, words: usize) -> Option<StackRegion> {
        if words == 0 || words > self.capacity - self.offset {
            return None;
        }

        // SAFETY: offset + words <= capacity, so the pointer stays inside
        // the block passed to `new`.
        let start = unsafe { self.base.as_ptr().add(self.offset) };
        self.offset += words;

        let start = NonNull::new(start)?;
        // SAFETY: the range [offset, offset + words) was never handed out
        // before and the backing block is 'static.
        Some(unsafe { StackRegion::from_raw_parts(start, words) })
    }

    /// Release every allocation
    ///
    /// # Safety
    /// All previously returned regions become invalid. Only call when no
    /// task stack from this pool is still in use.
    pub unsafe fn reset(&mut self) {
        self.offset = 0;
    }

    /// Remaining words
    #[must_use]
    pub const fn available(&self) -> usize {
        self.capacity - self.offset
    }

    /// Total words
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
