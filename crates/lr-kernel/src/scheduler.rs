// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! Preemptive Priority-Based Task Scheduler
//!
//! # Scheduling Algorithm
//!
//! 1. The ready list holds every task ever created, most urgent first.
//! 2. Each tick takes one tick off the running task's quota.
//! 3. When the quota reaches zero the scheduler saves the running task,
//!    selects the globally most urgent task, reloads its quota and
//!    restores it.
//!
//! There is no blocked state and no rotation: while a more urgent task
//! exists, less urgent tasks never run, and the most urgent task is
//! reselected every time its quota expires. The idle task only runs if
//! nothing more urgent was ever created.
//!
//! # Concurrency
//!
//! The tick handler runs in interrupt context and switches synchronously.
//! Every ready list mutation and every select-and-switch sequence runs
//! inside a [`CriticalSection`]. Exclusive access to the scheduler as a
//! whole, between task code and the ISR, comes from
//! [`SharedScheduler`](crate::shared::SharedScheduler).

use core::ptr;

use heapless::Vec;
use lr_common::config::MAX_TASKS;
use lr_common::log::LogBuffer;
use lr_common::{log_debug, log_error, log_info, log_trace, log_warn};
use lr_common::{Error, KernelConfig, Result, Ticks};

use crate::port::{CriticalSection, Port, StackRegion, TaskEntry, TickHandler};
use crate::ready_list::{ReadyIter, ReadyList};
use crate::task::{self, idle_task, Task, TaskId, TaskPriority, CANARY_WORDS};

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total ticks handled (not wrapped with the 32-bit tick counter)
    pub total_ticks: u64,
    /// Total context switches performed
    pub context_switches: u64,
    /// Number of selections made
    pub selections: u64,
}

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulerState {
    /// Accepting tasks, not yet started
    Initialized,
    /// Started; the tick handler drives switches
    Running,
    /// Torn down; every stack has been returned
    Stopped,
}

/// The scheduler instance
///
/// Owns the port, the task table, the ready list and the tick counter.
/// Boards create one, wrap it in a
/// [`SharedScheduler`](crate::shared::SharedScheduler), register tasks,
/// then start it. The port's timer interrupt reaches it through
/// [`TickHandler`] via the wrapper.
pub struct Scheduler<P: Port> {
    port: P,
    config: KernelConfig,
    /// Task table; ids are indices and never move
    tasks: Vec<Task<P::Context>, MAX_TASKS>,
    ready: ReadyList,
    current: Option<TaskId>,
    idle: Option<TaskId>,
    ticks: Ticks,
    state: SchedulerState,
    stats: SchedulerStats,
    log: LogBuffer,
}

impl<P: Port> Scheduler<P> {
    /// Create a scheduler on `port`
    ///
    /// # Errors
    /// `InvalidParameter` if `config` fails validation.
    pub fn new(port: P, config: KernelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            port,
            config,
            tasks: Vec::new(),
            ready: ReadyList::new(),
            current: None,
            idle: None,
            ticks: Ticks::ZERO,
            state: SchedulerState::Initialized,
            stats: SchedulerStats::default(),
            log: LogBuffer::new(),
        })
    }

    /// Create a scheduler with the default configuration
    ///
    /// # Errors
    /// Never fails with the built-in defaults; kept fallible for symmetry
    /// with [`new`](Self::new).
    pub fn with_default_config(port: P) -> Result<Self> {
        Self::new(port, KernelConfig::DEFAULT)
    }

    /// Smallest stack request, in words, that [`create_task`](Self::create_task) accepts
    #[must_use]
    pub const fn min_stack_words() -> usize {
        P::MIN_STACK_WORDS + CANARY_WORDS
    }

    /// Create a task and link it into the ready list
    ///
    /// Allocates `stack_words` words through the port, plants the stack
    /// canary, lets the port build the initial frame, then inserts the
    /// task at its priority position. The new task starts with a full
    /// quota.
    ///
    /// # Errors
    /// - `InvalidState` after [`shutdown`](Self::shutdown)
    /// - `InvalidParameter` if `stack_words` is below
    ///   [`min_stack_words`](Self::min_stack_words) (including zero)
    /// - `TaskCreationFailed` if the task table is full
    /// - `MemoryAllocationFailed` if the port cannot supply the stack
    ///
    /// On error nothing is linked and no stack is kept.
    pub fn create_task(
        &mut self,
        entry: TaskEntry,
        stack_words: usize,
        priority: TaskPriority,
        arg: usize,
    ) -> Result<TaskId> {
        if self.state == SchedulerState::Stopped {
            return Err(Error::InvalidState);
        }

        if stack_words < Self::min_stack_words() {
            log_warn!(
                self.log,
                self.ticks.as_u32(),
                "stack of {} words below minimum {}",
                stack_words,
                Self::min_stack_words()
            );
            return Err(Error::InvalidParameter);
        }

        if self.tasks.is_full() {
            log_warn!(self.log, self.ticks.as_u32(), "task table full");
            return Err(Error::TaskCreationFailed);
        }
        let id = TaskId::new(u8::try_from(self.tasks.len()).map_err(|_| Error::InternalError)?);

        let Some(stack) = self.port.alloc_stack(stack_words) else {
            log_warn!(
                self.log,
                self.ticks.as_u32(),
                "stack allocation of {} words failed",
                stack_words
            );
            return Err(Error::MemoryAllocationFailed);
        };
        task::plant_canary(stack);

        let mut context = P::Context::default();
        let stack_pointer = self.port.init_task_stack(stack, entry, arg, &mut context);

        let task = Task {
            id,
            stack_pointer,
            next: None,
            time_slice: self.config.time_slice,
            priority,
            context,
            stack,
            entry,
            schedule_count: 0,
        };

        {
            let mut cs = CriticalSection::enter(&mut self.port);
            if self.tasks.push(task).is_err() {
                cs.free_stack(stack);
                return Err(Error::TaskCreationFailed);
            }
            if let Err(e) = self.ready.add(&mut self.tasks, id) {
                // Unreachable with a fresh id; undo the push so the table
                // and the list stay in step.
                let _ = self.tasks.pop();
                cs.free_stack(stack);
                return Err(e);
            }
        }

        log_debug!(
            self.log,
            self.ticks.as_u32(),
            "task {} created, priority {}, {} words",
            id.0,
            priority.level(),
            stack_words
        );
        Ok(id)
    }

    /// Select the most urgent task and reload its quota
    ///
    /// Scans the whole ready list; ties go to the earliest-created task.
    ///
    /// # Errors
    /// `NoTasks` if no task has been created.
    pub fn select_highest_priority(&mut self) -> Result<TaskId> {
        let _cs = CriticalSection::enter(&mut self.port);
        Self::select(&self.ready, &mut self.tasks, self.config.time_slice, &mut self.stats)
    }

    fn select(
        ready: &ReadyList,
        tasks: &mut [Task<P::Context>],
        quota: u32,
        stats: &mut SchedulerStats,
    ) -> Result<TaskId> {
        let id = ready.highest_priority(tasks).ok_or(Error::NoTasks)?;
        let task = &mut tasks[id.index()];
        task.reload_time_slice(quota);
        task.schedule_count = task.schedule_count.wrapping_add(1);
        stats.selections += 1;
        Ok(id)
    }

    /// Save the running task, select the next one and restore it
    ///
    /// The only place `current` changes after start. The selected task
    /// may be the one that was running.
    ///
    /// # Errors
    /// `InvalidState` if the scheduler is not running.
    pub fn switch_task(&mut self) -> Result<TaskId> {
        let outgoing = match (self.state, self.current) {
            (SchedulerState::Running, Some(id)) => id,
            _ => return Err(Error::InvalidState),
        };

        let mut cs = CriticalSection::enter(&mut self.port);

        let prev = &mut self.tasks[outgoing.index()];
        cs.save_context(&mut prev.stack_pointer, &mut prev.context);

        let next = Self::select(&self.ready, &mut self.tasks, self.config.time_slice, &mut self.stats)?;
        let incoming = &self.tasks[next.index()];
        cs.restore_context(incoming.stack_pointer, &incoming.context);

        self.current = Some(next);
        self.stats.context_switches += 1;
        drop(cs);

        log_trace!(self.log, self.ticks.as_u32(), "switch {} -> {}", outgoing.0, next.0);
        Ok(next)
    }

    /// Start scheduling
    ///
    /// Creates the idle task, makes the head of the ready list current,
    /// programs the tick timer and hands control to the port. On hardware
    /// the port does not return; on a host port this returns the task
    /// that was started.
    ///
    /// # Errors
    /// - `InvalidState` unless freshly initialized
    /// - any error from creating the idle task or programming the timer
    pub fn start(&mut self) -> Result<TaskId> {
        let first = self.prepare_start()?;
        let task = &self.tasks[first.index()];
        self.port.start_scheduler(task.stack_pointer, &task.context);
        Ok(first)
    }

    /// Everything [`start`](Self::start) does short of handing control
    /// to the port
    pub(crate) fn prepare_start(&mut self) -> Result<TaskId> {
        if self.state != SchedulerState::Initialized {
            return Err(Error::InvalidState);
        }

        // A previous start may have failed after creating the idle task.
        if self.idle.is_none() {
            let idle = self.create_task(
                idle_task::<P>,
                self.config.idle_stack_words,
                TaskPriority::IDLE,
                0,
            )?;
            self.idle = Some(idle);
        }

        let first = self.ready.head().ok_or(Error::NoTasks)?;
        self.port.setup_tick_timer(self.config.tick_rate_hz)?;

        self.current = Some(first);
        self.state = SchedulerState::Running;

        log_info!(
            self.log,
            self.ticks.as_u32(),
            "scheduler started with {} tasks, first {}",
            self.tasks.len(),
            first.0
        );
        Ok(first)
    }

    /// Port of the scheduler behind `this`, without borrowing the rest
    ///
    /// # Safety
    /// `this` must point to a live scheduler.
    pub(crate) unsafe fn port_ptr(this: *mut Self) -> *mut P {
        ptr::addr_of_mut!((*this).port)
    }

    /// Ask the port for an asynchronous switch
    pub fn request_yield(&mut self) {
        self.port.request_yield();
    }

    /// Return every stack to the port and stop
    ///
    /// After this no task can be created or started. Task ids remain
    /// readable through [`task`](Self::task) but their stacks are gone.
    pub fn shutdown(&mut self) {
        if self.state == SchedulerState::Stopped {
            return;
        }

        let mut cs = CriticalSection::enter(&mut self.port);
        for task in self.tasks.iter() {
            cs.free_stack(task.stack);
        }
        let freed = self.tasks.len();
        self.ready.clear();
        self.current = None;
        self.state = SchedulerState::Stopped;
        drop(cs);

        log_info!(self.log, self.ticks.as_u32(), "scheduler stopped, {} stacks freed", freed);
    }

    /// Tear down and give the port back
    pub fn into_port(mut self) -> P {
        self.shutdown();
        self.port
    }

    /// First task whose stack canary has been overwritten
    #[must_use]
    pub fn overflowed_task(&self) -> Option<TaskId> {
        if self.state == SchedulerState::Stopped {
            return None;
        }
        self.tasks.iter().find(|t| !t.stack_canary_intact()).map(Task::id)
    }

    /// Check every stack canary
    ///
    /// # Errors
    /// `StackOverflow` if any task has overrun its stack.
    pub fn check_stacks(&mut self) -> Result<()> {
        match self.overflowed_task() {
            Some(id) => {
                log_error!(self.log, self.ticks.as_u32(), "task {} overflowed its stack", id.0);
                Err(Error::StackOverflow)
            }
            None => Ok(()),
        }
    }

    /// Task currently executing
    #[must_use]
    pub fn current_task(&self) -> Option<TaskId> {
        self.current
    }

    /// Idle task, once started
    #[must_use]
    pub fn idle_task(&self) -> Option<TaskId> {
        self.idle
    }

    /// Look up a task
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task<P::Context>> {
        self.tasks.get(id.index())
    }

    /// Number of tasks created
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Tasks in ready list order, most urgent first
    pub fn ready_order(&self) -> ReadyIter<'_, P::Context> {
        self.ready.iter(&self.tasks)
    }

    /// Head of the ready list
    #[must_use]
    pub fn ready_head(&self) -> Option<TaskId> {
        self.ready.head()
    }

    /// System tick counter (wraps at `u32::MAX`)
    #[must_use]
    pub fn ticks(&self) -> Ticks {
        self.ticks
    }

    /// Milliseconds since start, derived from the tick counter
    ///
    /// Wraps at 2^32 ms or when the tick counter wraps, whichever comes
    /// first.
    #[must_use]
    pub fn uptime_ms(&self) -> u32 {
        self.ticks.as_millis(self.config.tick_rate_hz)
    }

    /// Scheduler statistics
    #[must_use]
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Lifecycle state
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Kernel log
    #[must_use]
    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    /// Kernel log, for changing the level or draining it
    pub fn log_mut(&mut self) -> &mut LogBuffer {
        &mut self.log
    }

    /// Port
    #[must_use]
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Port, mutably
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Stack region of a task
    #[must_use]
    pub fn task_stack(&self, id: TaskId) -> Option<StackRegion> {
        self.task(id).map(Task::stack)
    }

    #[cfg(test)]
    pub(crate) fn set_ticks(&mut self, ticks: u32) {
        self.ticks = Ticks::new(ticks);
    }
}

impl<P: Port> TickHandler for Scheduler<P> {
    /// Count the tick, charge it to the running task and switch when its
    /// quota runs out. At most one switch per tick.
    fn tick_handler(&mut self) {
        self.ticks = self.ticks.next();
        self.stats.total_ticks += 1;

        if self.state != SchedulerState::Running {
            return;
        }
        let Some(current) = self.current else {
            return;
        };

        if self.tasks[current.index()].tick_time_slice() {
            if let Err(e) = self.switch_task() {
                log_error!(self.log, self.ticks.as_u32(), "tick switch failed: {}", e);
            }
        }
    }
}
