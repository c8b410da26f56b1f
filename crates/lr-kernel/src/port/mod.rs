// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! Port interface
//!
//! The hardware primitives the scheduling core calls but does not
//! implement: initial stack frames, register save/restore, the tick
//! timer, interrupt masking, low-power entry and stack memory. One
//! implementation exists per target; [`sim::SimPort`] runs the core on a
//! host.
//!
//! The timer interrupt reaches back into the core through
//! [`TickHandler`], which the scheduler implements.

use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use lr_common::Result;

pub mod sim;

/// Task entry point. The argument is the opaque parameter given at creation.
pub type TaskEntry = extern "C" fn(usize);

/// Saved interrupt-enable state returned by [`Port::enter_critical`]
pub type InterruptState = usize;

/// A task's stack memory, measured in machine words
///
/// The region is lent to the kernel by the port's allocator and stays
/// valid until handed back through [`Port::free_stack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    base: NonNull<usize>,
    words: usize,
}

impl StackRegion {
    /// Describe `words` machine words starting at `base`
    ///
    /// # Safety
    /// `base` must point to `words` writable, word-aligned machine words
    /// that nothing else uses for as long as the region is alive.
    #[must_use]
    pub const unsafe fn from_raw_parts(base: NonNull<usize>, words: usize) -> Self {
        Self { base, words }
    }

    /// Lowest word of the region
    #[must_use]
    pub const fn base(&self) -> NonNull<usize> {
        self.base
    }

    /// Capacity in machine words
    #[must_use]
    pub const fn words(&self) -> usize {
        self.words
    }

    /// One past the highest word (stacks grow down from here)
    #[must_use]
    pub fn top(&self) -> *mut usize {
        self.base.as_ptr().wrapping_add(self.words)
    }

    /// Check whether an address lies inside the region
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        let lo = self.base.as_ptr() as usize;
        let hi = self.top() as usize;
        addr >= lo && addr < hi
    }
}

/// Hardware primitives consumed by the scheduler
pub trait Port {
    /// Architecture register state saved for a task that is not running
    type Context: Default;

    /// Smallest stack, in words, that can hold the initial frame
    const MIN_STACK_WORDS: usize;

    /// Build an initial frame at the top of `stack` so that resuming the
    /// task for the first time looks like resuming a preempted task.
    ///
    /// Returns the task's initial stack pointer.
    fn init_task_stack(
        &mut self,
        stack: StackRegion,
        entry: TaskEntry,
        arg: usize,
        ctx: &mut Self::Context,
    ) -> usize;

    /// Transfer control to the first task. Does not return on hardware.
    fn start_scheduler(&mut self, stack_pointer: usize, ctx: &Self::Context);

    /// Persist the register state of the outgoing task
    fn save_context(&mut self, stack_pointer: &mut usize, ctx: &mut Self::Context);

    /// Reload the register state of the incoming task
    fn restore_context(&mut self, stack_pointer: usize, ctx: &Self::Context);

    /// Ask for an asynchronous switch (software interrupt)
    fn request_yield(&mut self);

    /// Program the periodic tick interrupt
    ///
    /// # Errors
    /// Returns `Error::TimerError` if the rate cannot be produced.
    fn setup_tick_timer(&mut self, tick_rate_hz: u32) -> Result<()>;

    /// Disable preemption, returning the previous state. Must nest.
    fn enter_critical(&mut self) -> InterruptState;

    /// Restore the state returned by the matching [`Port::enter_critical`]
    fn exit_critical(&mut self, state: InterruptState);

    /// Allocate `words` machine words of stack memory
    fn alloc_stack(&mut self, words: usize) -> Option<StackRegion>;

    /// Return stack memory obtained from [`Port::alloc_stack`]
    fn free_stack(&mut self, stack: StackRegion);

    /// Sleep until the next interrupt. Called only by the idle task,
    /// which has no handle on the port instance.
    fn enter_low_power();
}

/// Entry point the port's timer interrupt calls once per tick
pub trait TickHandler {
    /// Account one tick; may switch tasks before returning
    fn tick_handler(&mut self);
}

/// Scoped critical section
///
/// Preemption is disabled while the guard lives and the previous state
/// is restored when it drops, on every exit path.
pub struct CriticalSection<'a, P: Port> {
    port: &'a mut P,
    state: InterruptState,
}

impl<'a, P: Port> CriticalSection<'a, P> {
    /// Disable preemption on `port`
    pub fn enter(port: &'a mut P) -> Self {
        let state = port.enter_critical();
        Self { port, state }
    }
}

impl<P: Port> Deref for CriticalSection<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        self.port
    }
}

impl<P: Port> DerefMut for CriticalSection<'_, P> {
    fn deref_mut(&mut self) -> &mut P {
        self.port
    }
}

impl<P: Port> Drop for CriticalSection<'_, P> {
    fn drop(&mut self) {
        self.port.exit_critical(self.state);
    }
}
