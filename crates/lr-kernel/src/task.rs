// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! Task control blocks
//!
//! A [`Task`] is the per-task record the scheduler works on: saved stack
//! pointer and register context, priority, remaining quota and the
//! intrusive link that threads it into the ready list.
//!
//! Control blocks live in the scheduler's task table, separate from the
//! stack they describe, so a task overrunning its stack cannot corrupt
//! its own control block. The lowest stack word holds a canary that is
//! checked on demand.

use core::ptr::{self, NonNull};

use crate::port::{Port, StackRegion, TaskEntry};

/// Value written to the lowest word of every task stack
pub const STACK_CANARY: usize = 0xDEAD_BEEF;

/// Words each stack gives up for the canary
pub const CANARY_WORDS: usize = 1;

/// Task identifier (index into the scheduler's task table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(pub u8);

impl TaskId {
    /// Create a new task ID
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Slot in the task table
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Task urgency: lower number = more urgent, 0 is most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskPriority(pub u8);

impl TaskPriority {
    /// Most urgent priority
    pub const HIGHEST: Self = Self(0);

    /// Least urgent priority, used by the idle task
    pub const IDLE: Self = Self(u8::MAX);

    /// Create a priority
    #[must_use]
    pub const fn new(level: u8) -> Self {
        Self(level)
    }

    /// Raw level
    #[must_use]
    pub const fn level(&self) -> u8 {
        self.0
    }

    /// Check if `self` must run before `other`
    #[must_use]
    pub const fn is_more_urgent_than(&self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl From<u8> for TaskPriority {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// Task control block
pub struct Task<C> {
    pub(crate) id: TaskId,
    /// Saved stack pointer; written only by the port during switches
    pub(crate) stack_pointer: usize,
    /// Next task in the ready list
    pub(crate) next: Option<TaskId>,
    /// Ticks left in the current quota
    pub(crate) time_slice: u32,
    pub(crate) priority: TaskPriority,
    /// Architecture register state, owned by the port
    pub(crate) context: C,
    pub(crate) stack: StackRegion,
    pub(crate) entry: TaskEntry,
    /// Number of times this task was selected to run
    pub(crate) schedule_count: u32,
}

impl<C> Task<C> {
    /// Identifier
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Priority
    #[must_use]
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Remaining quota in ticks
    #[must_use]
    pub fn time_slice(&self) -> u32 {
        self.time_slice
    }

    /// Saved stack pointer
    #[must_use]
    pub fn stack_pointer(&self) -> usize {
        self.stack_pointer
    }

    /// Saved register context
    #[must_use]
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Stack memory
    #[must_use]
    pub fn stack(&self) -> StackRegion {
        self.stack
    }

    /// Entry point
    #[must_use]
    pub fn entry(&self) -> TaskEntry {
        self.entry
    }

    /// Times selected by the scheduler
    #[must_use]
    pub fn schedule_count(&self) -> u32 {
        self.schedule_count
    }

    /// Refill the quota
    pub fn reload_time_slice(&mut self, quota: u32) {
        self.time_slice = quota;
    }

    /// Account one tick against the quota, returns true if it is used up
    ///
    /// A quota that is already zero stays zero and reports expiry, so a
    /// zero-tick configuration reselects on every tick.
    pub fn tick_time_slice(&mut self) -> bool {
        if self.time_slice > 0 {
            self.time_slice -= 1;
        }
        self.time_slice == 0
    }

    /// Check the canary at the bottom of the stack
    #[must_use]
    pub fn stack_canary_intact(&self) -> bool {
        // SAFETY: the region is at least CANARY_WORDS long and stays
        // allocated for the life of the task. Volatile because the task
        // writes its stack behind the compiler's back.
        unsafe { ptr::read_volatile(self.stack.base().as_ptr()) == STACK_CANARY }
    }

    /// Words left between the saved stack pointer and the canary
    #[must_use]
    pub fn stack_headroom(&self) -> usize {
        let floor = self.stack.base().as_ptr() as usize + CANARY_WORDS * core::mem::size_of::<usize>();
        self.stack_pointer.saturating_sub(floor) / core::mem::size_of::<usize>()
    }
}

/// Write the canary into a freshly allocated stack
pub(crate) fn plant_canary(stack: StackRegion) {
    let base: NonNull<usize> = stack.base();
    // SAFETY: `stack` came from the port allocator and is not yet shared
    // with any task.
    unsafe { ptr::write_volatile(base.as_ptr(), STACK_CANARY) };
}

/// One pass of the idle loop
pub fn idle_step<P: Port>() {
    P::enter_low_power();
}

/// Idle task body: sleep until the next interrupt, forever
pub extern "C" fn idle_task<P: Port>(_arg: usize) {
    loop {
        idle_step::<P>();
    }
}
