// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! Host simulation port
//!
//! Runs the scheduling core on a development machine. No registers are
//! touched: contexts are bookkeeping records, the "interrupt enable" flag
//! is a plain bool and stacks come from a [`StackPool`]. Every primitive
//! the core calls is counted so tests can observe the protocol.
//!
//! `free_stack` does not return individual regions; once every
//! outstanding stack has been handed back the whole pool is reset.

use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

use lr_common::{Error, Result};

use super::{InterruptState, Port, StackRegion, TaskEntry};
use crate::memory::StackPool;

/// Words reserved for the simulated initial frame
pub const FRAME_WORDS: usize = 16;

/// Frame slot holding the entry address (like PC in an exception frame)
const FRAME_PC: usize = FRAME_WORDS - 2;

/// Frame slot holding the task argument (like R0)
const FRAME_ARG: usize = FRAME_WORDS - 8;

static LOW_POWER_REQUESTS: AtomicU32 = AtomicU32::new(0);

/// Simulated register state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimContext {
    /// Entry point recorded by `init_task_stack`
    pub entry: usize,
    /// Argument recorded by `init_task_stack`
    pub arg: usize,
    /// Times this context was saved
    pub saves: u32,
}

/// Port implementation for host builds
pub struct SimPort {
    pool: StackPool,
    fail_alloc: bool,
    interrupts_enabled: bool,
    critical_depth: u32,
    max_critical_depth: u32,
    critical_entries: u32,
    tick_rate_hz: Option<u32>,
    started_sp: Option<usize>,
    last_saved_sp: Option<usize>,
    last_restored_sp: Option<usize>,
    saves: u32,
    restores: u32,
    yields: u32,
    unmasked_allocs: u32,
    outstanding_words: usize,
    freed_words: usize,
}

impl SimPort {
    /// Create a port whose stacks come from `memory`
    pub fn new(memory: &'static mut [usize]) -> Self {
        Self {
            pool: StackPool::new(memory),
            fail_alloc: false,
            interrupts_enabled: true,
            critical_depth: 0,
            max_critical_depth: 0,
            critical_entries: 0,
            tick_rate_hz: None,
            started_sp: None,
            last_saved_sp: None,
            last_restored_sp: None,
            saves: 0,
            restores: 0,
            yields: 0,
            unmasked_allocs: 0,
            outstanding_words: 0,
            freed_words: 0,
        }
    }

    /// Make every following stack allocation fail (or succeed again)
    pub fn set_fail_alloc(&mut self, fail: bool) {
        self.fail_alloc = fail;
    }

    /// Whether preemption is currently enabled
    #[must_use]
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    /// Current critical-section nesting depth
    #[must_use]
    pub fn critical_depth(&self) -> u32 {
        self.critical_depth
    }

    /// Deepest nesting seen so far
    #[must_use]
    pub fn max_critical_depth(&self) -> u32 {
        self.max_critical_depth
    }

    /// Number of critical sections entered so far
    #[must_use]
    pub fn critical_entries(&self) -> u32 {
        self.critical_entries
    }

    /// Rate passed to `setup_tick_timer`, if called
    #[must_use]
    pub fn tick_rate_hz(&self) -> Option<u32> {
        self.tick_rate_hz
    }

    /// Stack pointer passed to `start_scheduler`, if called
    #[must_use]
    pub fn started_sp(&self) -> Option<usize> {
        self.started_sp
    }

    /// Stack pointer of the last saved context
    #[must_use]
    pub fn last_saved_sp(&self) -> Option<usize> {
        self.last_saved_sp
    }

    /// Stack pointer of the last restored context
    #[must_use]
    pub fn last_restored_sp(&self) -> Option<usize> {
        self.last_restored_sp
    }

    /// Total context saves
    #[must_use]
    pub fn saves(&self) -> u32 {
        self.saves
    }

    /// Total context restores
    #[must_use]
    pub fn restores(&self) -> u32 {
        self.restores
    }

    /// Total yield requests
    #[must_use]
    pub fn yields(&self) -> u32 {
        self.yields
    }

    /// Stack allocations made while preemption was enabled
    #[must_use]
    pub fn unmasked_allocs(&self) -> u32 {
        self.unmasked_allocs
    }

    /// Words handed back through `free_stack`
    #[must_use]
    pub fn freed_words(&self) -> usize {
        self.freed_words
    }

    /// Remaining stack pool words
    #[must_use]
    pub fn available_words(&self) -> usize {
        self.pool.available()
    }

    /// Low-power requests made by idle tasks, process wide
    #[must_use]
    pub fn low_power_requests() -> u32 {
        LOW_POWER_REQUESTS.load(Ordering::Relaxed)
    }
}

impl Port for SimPort {
    type Context = SimContext;

    const MIN_STACK_WORDS: usize = FRAME_WORDS;

    fn init_task_stack(
        &mut self,
        stack: StackRegion,
        entry: TaskEntry,
        arg: usize,
        ctx: &mut SimContext,
    ) -> usize {
        let frame = stack.top().wrapping_sub(FRAME_WORDS);
        for slot in 0..FRAME_WORDS {
            let value = match slot {
                FRAME_PC => entry as usize,
                FRAME_ARG => arg,
                _ => 0,
            };
            // SAFETY: the scheduler only hands over regions of at least
            // MIN_STACK_WORDS words, so the frame lies inside `stack`.
            unsafe { ptr::write_volatile(frame.add(slot), value) };
        }

        ctx.entry = entry as usize;
        ctx.arg = arg;
        frame as usize
    }

    fn start_scheduler(&mut self, stack_pointer: usize, _ctx: &SimContext) {
        self.started_sp = Some(stack_pointer);
    }

    fn save_context(&mut self, stack_pointer: &mut usize, ctx: &mut SimContext) {
        ctx.saves = ctx.saves.wrapping_add(1);
        self.saves = self.saves.wrapping_add(1);
        self.last_saved_sp = Some(*stack_pointer);
    }

    fn restore_context(&mut self, stack_pointer: usize, _ctx: &SimContext) {
        self.restores = self.restores.wrapping_add(1);
        self.last_restored_sp = Some(stack_pointer);
    }

    fn request_yield(&mut self) {
        self.yields = self.yields.wrapping_add(1);
    }

    fn setup_tick_timer(&mut self, tick_rate_hz: u32) -> Result<()> {
        if tick_rate_hz == 0 {
            return Err(Error::TimerError);
        }
        self.tick_rate_hz = Some(tick_rate_hz);
        Ok(())
    }

    fn enter_critical(&mut self) -> InterruptState {
        let previous = InterruptState::from(self.interrupts_enabled);
        self.interrupts_enabled = false;
        self.critical_depth += 1;
        self.critical_entries = self.critical_entries.wrapping_add(1);
        self.max_critical_depth = self.max_critical_depth.max(self.critical_depth);
        previous
    }

    fn exit_critical(&mut self, state: InterruptState) {
        self.critical_depth = self.critical_depth.saturating_sub(1);
        self.interrupts_enabled = state != 0;
    }

    fn alloc_stack(&mut self, words: usize) -> Option<StackRegion> {
        if self.interrupts_enabled {
            self.unmasked_allocs = self.unmasked_allocs.wrapping_add(1);
        }
        if self.fail_alloc {
            return None;
        }
        let stack = self.pool.alloc(words)?;
        self.outstanding_words += stack.words();
        Some(stack)
    }

    fn free_stack(&mut self, stack: StackRegion) {
        self.freed_words += stack.words();
        self.outstanding_words = self.outstanding_words.saturating_sub(stack.words());
        if self.outstanding_words == 0 {
            // SAFETY: every region handed out has come back.
            unsafe { self.pool.reset() };
        }
    }

    fn enter_low_power() {
        LOW_POWER_REQUESTS.fetch_add(1, Ordering::Relaxed);
    }
}

/// Leak a zeroed block of words for a test port
#[cfg(test)]
pub(crate) fn leak_words(words: usize) -> &'static mut [usize] {
    std::boxed::Box::leak(std::vec![0usize; words].into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn entry(_arg: usize) {}

    #[test]
    fn test_initial_frame_written_at_top() {
        let mut port = SimPort::new(leak_words(64));
        let stack = port.alloc_stack(32).unwrap();
        let mut ctx = SimContext::default();

        let sp = port.init_task_stack(stack, entry, 0xA5, &mut ctx);

        assert_eq!(sp, stack.top() as usize - FRAME_WORDS * core::mem::size_of::<usize>());
        assert!(stack.contains(sp));
        // SAFETY: the frame was just written inside a leaked block.
        let (pc, arg) = unsafe {
            let frame = sp as *const usize;
            (*frame.add(FRAME_PC), *frame.add(FRAME_ARG))
        };
        assert_eq!(pc, entry as usize);
        assert_eq!(arg, 0xA5);
        assert_eq!(ctx.arg, 0xA5);
    }

    #[test]
    fn test_alloc_failure_switch() {
        let mut port = SimPort::new(leak_words(64));
        port.set_fail_alloc(true);
        assert!(port.alloc_stack(16).is_none());
        port.set_fail_alloc(false);
        assert!(port.alloc_stack(16).is_some());
        assert_eq!(port.available_words(), 48);
    }

    #[test]
    fn test_zero_tick_rate_rejected() {
        let mut port = SimPort::new(leak_words(16));
        assert_eq!(port.setup_tick_timer(0), Err(Error::TimerError));
        assert!(port.setup_tick_timer(1000).is_ok());
        assert_eq!(port.tick_rate_hz(), Some(1000));
    }

    #[test]
    fn test_pool_reset_after_last_free() {
        let mut port = SimPort::new(leak_words(64));
        let a = port.alloc_stack(16).unwrap();
        let b = port.alloc_stack(32).unwrap();
        assert_eq!(port.available_words(), 16);

        port.free_stack(a);
        assert_eq!(port.available_words(), 16);
        port.free_stack(b);
        assert_eq!(port.available_words(), 64);
        assert_eq!(port.freed_words(), 48);
    }

    #[test]
    fn test_counters_wrap() {
        let mut port = SimPort::new(leak_words(16));
        let mut ctx = SimContext {
            saves: u32::MAX,
            ..SimContext::default()
        };
        port.saves = u32::MAX;
        port.critical_entries = u32::MAX;

        let mut sp = 0;
        port.save_context(&mut sp, &mut ctx);
        let state = port.enter_critical();
        port.exit_critical(state);

        assert_eq!(ctx.saves, 0);
        assert_eq!(port.saves(), 0);
        assert_eq!(port.critical_entries(), 0);
    }

    #[test]
    fn test_low_power_counter() {
        let before = SimPort::low_power_requests();
        SimPort::enter_low_power();
        assert!(SimPort::low_power_requests() > before);
    }
}
