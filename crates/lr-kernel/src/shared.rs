// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! Scheduler shared between task code and the tick interrupt
//!
//! Task code and the timer ISR both need the one scheduler instance.
//! [`SharedScheduler`] hands out `&mut Scheduler` to exactly one of them
//! at a time:
//!
//! - task context goes through [`SharedScheduler::with`], which masks
//!   preemption for the whole borrow
//! - the timer ISR goes through [`SharedScheduler::tick`]
//!
//! A `held` flag backs both paths, so a re-entrant `with` or a tick that
//! lands while the scheduler is borrowed never produces a second `&mut`.
//! The flag only uses atomic loads and stores, which every single-core
//! target has.
//!
//! ```rust,ignore
//! static KERNEL: StaticKernel = ...; // holds a SharedScheduler<BoardPort>
//!
//! KERNEL.with(|s| s.create_task(blink, 256, TaskPriority::new(2), 0))??;
//! KERNEL.start()?;
//!
//! #[interrupt]
//! fn SysTick() {
//!     // SAFETY: only ever called from the tick interrupt.
//!     unsafe { KERNEL.tick() };
//! }
//! ```

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use lr_common::{Error, Result};

use crate::port::{Port, TickHandler};
use crate::scheduler::Scheduler;
use crate::task::TaskId;

/// A [`Scheduler`] that task code and the tick ISR can both reach
pub struct SharedScheduler<P: Port> {
    inner: UnsafeCell<Scheduler<P>>,
    held: AtomicBool,
}

// SAFETY: every `&mut Scheduler` is handed out under the `held` flag, and
// the kernel targets a single core where an ISR runs to completion before
// the interrupted code resumes.
unsafe impl<P: Port + Send> Sync for SharedScheduler<P> {}

impl<P: Port> SharedScheduler<P> {
    /// Wrap a scheduler
    pub const fn new(scheduler: Scheduler<P>) -> Self {
        Self {
            inner: UnsafeCell::new(scheduler),
            held: AtomicBool::new(false),
        }
    }

    fn acquire(&self) -> bool {
        if self.held.load(Ordering::Acquire) {
            return false;
        }
        self.held.store(true, Ordering::Release);
        true
    }

    fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    /// Run `f` on the scheduler from task context
    ///
    /// Preemption stays masked from before the borrow is created until
    /// after it ends, so the tick interrupt never observes a half-done
    /// operation.
    ///
    /// # Errors
    /// `InvalidState` if called from inside another `with` closure.
    pub fn with<R>(&self, f: impl FnOnce(&mut Scheduler<P>) -> R) -> Result<R> {
        if !self.acquire() {
            return Err(Error::InvalidState);
        }
        let sched = self.inner.get();

        // SAFETY: `held` is set, so no other `&mut Scheduler` exists; the
        // port is only borrowed for the duration of each call.
        let state = unsafe { (*Scheduler::port_ptr(sched)).enter_critical() };
        // SAFETY: as above, and preemption is now masked.
        let result = f(unsafe { &mut *sched });
        // SAFETY: the closure's borrow has ended.
        unsafe { (*Scheduler::port_ptr(sched)).exit_critical(state) };

        self.release();
        Ok(result)
    }

    /// Start scheduling from task context
    ///
    /// Prepares the scheduler under the same protection as [`with`](Self::with),
    /// then hands control to the port with preemption still masked. The
    /// port must unmask interrupts as it enters the first task. On a host
    /// port the call returns and the previous state is restored.
    ///
    /// # Errors
    /// `InvalidState` if called from inside a `with` closure, otherwise
    /// any error from [`Scheduler::start`].
    pub fn start(&self) -> Result<TaskId> {
        if !self.acquire() {
            return Err(Error::InvalidState);
        }
        let sched = self.inner.get();
        // SAFETY: `held` is set; see `with`.
        let port = unsafe { Scheduler::port_ptr(sched) };
        // SAFETY: `held` is set; see `with`.
        let state = unsafe { (*port).enter_critical() };

        // SAFETY: `held` is set and preemption is masked.
        let prepared = unsafe { &mut *sched }.prepare_start().and_then(|first| {
            // SAFETY: as above.
            let sched = unsafe { &*sched };
            let task = sched.task(first).ok_or(Error::InternalError)?;
            Ok((first, task.stack_pointer(), task.context() as *const P::Context))
        });

        let (first, stack_pointer, ctx) = match prepared {
            Ok(parts) => parts,
            Err(e) => {
                // SAFETY: no scheduler borrow is live.
                unsafe { (*port).exit_critical(state) };
                self.release();
                return Err(e);
            }
        };

        // The tick ISR may use the scheduler as soon as the port unmasks.
        self.release();
        // SAFETY: preemption is still masked, so nothing touches the task
        // table while the port reads the first context.
        unsafe { (*port).start_scheduler(stack_pointer, &*ctx) };
        // SAFETY: reached on host ports only, after the launch returned.
        unsafe { (*port).exit_critical(state) };
        Ok(first)
    }

    /// Timer interrupt entry
    ///
    /// Returns `false` if the scheduler was borrowed and the tick was
    /// dropped. On a correct port this cannot happen, because `with`
    /// masks the tick interrupt.
    ///
    /// # Safety
    /// Must only be called from the port's tick interrupt (or, on a host,
    /// from code standing in for it), never from task context on a
    /// target where the tick can preempt it.
    pub unsafe fn tick(&self) -> bool {
        if !self.acquire() {
            return false;
        }
        // SAFETY: `held` is set, so this is the only `&mut Scheduler`.
        unsafe { &mut *self.inner.get() }.tick_handler();
        self.release();
        true
    }

    /// Unwrap the scheduler
    pub fn into_inner(self) -> Scheduler<P> {
        self.inner.into_inner()
    }
}
