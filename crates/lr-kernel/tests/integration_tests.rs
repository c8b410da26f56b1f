// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! Integration tests for lr-kernel
//!
//! These drive the scheduler through its public API on the host
//! simulation port: task creation, ready list ordering, selection,
//! tick-driven switching, start-up and teardown.

use lr_kernel::port::sim::SimPort;
use lr_kernel::{
    Error, KernelConfig, Scheduler, SharedScheduler, TaskId, TaskPriority, TickHandler,
};

extern "C" fn worker(_arg: usize) {}

fn leak_words(words: usize) -> &'static mut [usize] {
    Box::leak(vec![0usize; words].into_boxed_slice())
}

fn scheduler_with(config: KernelConfig) -> Scheduler<SimPort> {
    let port = SimPort::new(leak_words(8192));
    Scheduler::new(port, config.with_idle_stack_words(128)).expect("valid config")
}

fn scheduler() -> Scheduler<SimPort> {
    scheduler_with(KernelConfig::DEFAULT)
}

fn spawn(sched: &mut Scheduler<SimPort>, priority: u8) -> TaskId {
    sched
        .create_task(worker, 64, TaskPriority::new(priority), 0)
        .expect("task creation")
}

fn priorities(sched: &Scheduler<SimPort>) -> Vec<u8> {
    sched.ready_order().map(|t| t.priority().level()).collect()
}

mod ready_list_tests {
    use super::*;

    #[test]
    fn test_example_order() {
        let mut sched = scheduler();
        let a = spawn(&mut sched, 5);
        let b = spawn(&mut sched, 3);
        let c = spawn(&mut sched, 3);
        let d = spawn(&mut sched, 8);

        let ids: Vec<TaskId> = sched.ready_order().map(|t| t.id()).collect();
        assert_eq!(ids, vec![b, c, a, d]);
        assert_eq!(priorities(&sched), vec![3, 3, 5, 8]);
    }

    #[test]
    fn test_sorted_after_every_add() {
        let mut sched = scheduler();
        let mut created: Vec<(u8, TaskId)> = Vec::new();
        for p in [9u8, 2, 7, 2, 0, 9, 4, 7, 1, 0] {
            created.push((p, spawn(&mut sched, p)));

            let order: Vec<(u8, TaskId)> = sched
                .ready_order()
                .map(|t| (t.priority().level(), t.id()))
                .collect();

            // A stable sort of creation order gives the expected list.
            let mut expected = created.clone();
            expected.sort_by_key(|&(prio, _)| prio);
            assert_eq!(order, expected);
        }
        assert_eq!(sched.ready_order().count(), sched.task_count());
    }

    #[test]
    fn test_no_task_appears_twice() {
        let mut sched = scheduler();
        for p in [1u8, 1, 1, 3] {
            spawn(&mut sched, p);
        }
        let mut ids: Vec<u8> = sched.ready_order().map(|t| t.id().0).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_critical_section_released_after_add() {
        let mut sched = scheduler();
        spawn(&mut sched, 1);
        spawn(&mut sched, 2);
        let port = sched.port();
        assert!(port.critical_entries() >= 2);
        assert_eq!(port.critical_depth(), 0);
        assert!(port.interrupts_enabled());
    }
}

mod selection_tests {
    use super::*;

    #[test]
    fn test_selects_global_minimum() {
        let mut sched = scheduler();
        spawn(&mut sched, 6);
        let urgent = spawn(&mut sched, 2);
        spawn(&mut sched, 4);
        assert_eq!(sched.select_highest_priority(), Ok(urgent));
    }

    #[test]
    fn test_ties_go_to_earliest() {
        let mut sched = scheduler();
        spawn(&mut sched, 3);
        let first = spawn(&mut sched, 1);
        spawn(&mut sched, 1);
        assert_eq!(sched.select_highest_priority(), Ok(first));
    }

    #[test]
    fn test_scan_matches_head() {
        for prios in [vec![5u8, 3, 3, 8], vec![0], vec![7, 7, 7], vec![255, 1, 254, 1]] {
            let mut sched = scheduler();
            for p in &prios {
                spawn(&mut sched, *p);
            }
            let head = sched.ready_head();
            assert_eq!(sched.select_highest_priority().ok(), head, "{prios:?}");
        }
    }

    #[test]
    fn test_selection_reloads_quota() {
        let mut sched = scheduler_with(KernelConfig::DEFAULT.with_time_slice(4));
        let id = spawn(&mut sched, 1);
        sched.start().unwrap();

        for _ in 0..3 {
            sched.tick_handler();
        }
        assert_eq!(sched.task(id).unwrap().time_slice(), 1);

        assert_eq!(sched.select_highest_priority(), Ok(id));
        assert_eq!(sched.task(id).unwrap().time_slice(), 4);
    }

    #[test]
    fn test_empty_scheduler_has_nothing_to_select() {
        let mut sched = scheduler();
        assert_eq!(sched.select_highest_priority(), Err(Error::NoTasks));
    }
}

mod tick_tests {
    use super::*;

    #[test]
    fn test_single_task_reselected_each_tick() {
        let mut sched = scheduler();
        let id = spawn(&mut sched, 1);
        assert_eq!(sched.start(), Ok(id));

        sched.tick_handler();

        assert_eq!(sched.stats().context_switches, 1);
        assert_eq!(sched.current_task(), Some(id));
        assert_eq!(sched.task(id).unwrap().time_slice(), 1);
        assert_eq!(sched.port().saves(), 1);
        assert_eq!(sched.port().restores(), 1);
    }

    #[test]
    fn test_decrement_then_one_switch() {
        let mut sched = scheduler_with(KernelConfig::DEFAULT.with_time_slice(3));
        let id = spawn(&mut sched, 2);
        sched.start().unwrap();

        sched.tick_handler();
        assert_eq!(sched.task(id).unwrap().time_slice(), 2);
        sched.tick_handler();
        assert_eq!(sched.task(id).unwrap().time_slice(), 1);
        assert_eq!(sched.stats().context_switches, 0);

        sched.tick_handler();
        assert_eq!(sched.stats().context_switches, 1);
        assert_eq!(sched.task(id).unwrap().time_slice(), 3);
        assert_eq!(sched.ticks().as_u32(), 3);
    }

    #[test]
    fn test_at_most_one_switch_per_tick() {
        let mut sched = scheduler();
        spawn(&mut sched, 1);
        spawn(&mut sched, 1);
        sched.start().unwrap();

        for n in 1..=50u64 {
            sched.tick_handler();
            assert_eq!(sched.stats().context_switches, n);
            assert_eq!(u64::from(sched.port().saves()), n);
        }
    }

    #[test]
    fn test_more_urgent_task_always_wins() {
        let mut sched = scheduler();
        let b = spawn(&mut sched, 2);
        let a = spawn(&mut sched, 1);
        assert_eq!(sched.start(), Ok(a));

        for _ in 0..100 {
            sched.tick_handler();
            assert_eq!(sched.current_task(), Some(a));
        }
        assert_eq!(sched.task(b).unwrap().schedule_count(), 0);
        assert_eq!(sched.task(a).unwrap().schedule_count(), 100);
    }

    #[test]
    fn test_equal_priority_no_rotation() {
        let mut sched = scheduler();
        let first = spawn(&mut sched, 3);
        let second = spawn(&mut sched, 3);
        sched.start().unwrap();

        for _ in 0..10 {
            sched.tick_handler();
        }
        assert_eq!(sched.current_task(), Some(first));
        assert_eq!(sched.task(second).unwrap().schedule_count(), 0);
    }

    #[test]
    fn test_switch_restores_selected_context() {
        let mut sched = scheduler();
        let id = spawn(&mut sched, 1);
        sched.start().unwrap();
        sched.tick_handler();

        let sp = sched.task(id).unwrap().stack_pointer();
        assert_eq!(sched.port().last_saved_sp(), Some(sp));
        assert_eq!(sched.port().last_restored_sp(), Some(sp));
        assert_eq!(sched.task(id).unwrap().context().saves, 1);
    }

    #[test]
    fn test_interrupts_restored_after_switch() {
        let mut sched = scheduler();
        spawn(&mut sched, 1);
        sched.start().unwrap();
        for _ in 0..5 {
            sched.tick_handler();
        }
        assert!(sched.port().interrupts_enabled());
        assert_eq!(sched.port().critical_depth(), 0);
    }

    #[test]
    fn test_zero_quota_switches_every_tick() {
        let mut sched = scheduler_with(KernelConfig::DEFAULT.with_time_slice(0));
        spawn(&mut sched, 1);
        sched.start().unwrap();
        sched.tick_handler();
        sched.tick_handler();
        assert_eq!(sched.stats().context_switches, 2);
    }
}

mod start_tests {
    use super::*;
    use lr_kernel::SchedulerState;

    #[test]
    fn test_idle_at_tail_and_head_is_current() {
        let mut sched = scheduler();
        spawn(&mut sched, 4);
        let urgent = spawn(&mut sched, 1);

        assert_eq!(sched.start(), Ok(urgent));
        assert_eq!(sched.current_task(), Some(urgent));

        let idle = sched.idle_task().expect("idle created");
        let last = sched.ready_order().last().expect("non-empty");
        assert_eq!(last.id(), idle);
        assert_eq!(last.priority(), TaskPriority::IDLE);
        assert_eq!(sched.task_count(), 3);
    }

    #[test]
    fn test_idle_runs_when_alone() {
        let mut sched = scheduler();
        let first = sched.start().unwrap();
        assert_eq!(Some(first), sched.idle_task());
        sched.tick_handler();
        assert_eq!(sched.current_task(), sched.idle_task());
    }

    #[test]
    fn test_idle_before_equal_priority_task_created_later() {
        let mut sched = scheduler();
        let first = sched.start().unwrap();
        let late = sched
            .create_task(worker, 64, TaskPriority::IDLE, 0)
            .unwrap();
        sched.tick_handler();
        assert_eq!(sched.current_task(), Some(first));
        assert_ne!(sched.current_task(), Some(late));
    }

    #[test]
    fn test_start_programs_timer_and_starts_head() {
        let mut sched = scheduler_with(KernelConfig::DEFAULT.with_tick_rate_hz(250));
        let id = spawn(&mut sched, 1);
        sched.start().unwrap();

        assert_eq!(sched.state(), SchedulerState::Running);
        assert_eq!(sched.port().tick_rate_hz(), Some(250));
        assert_eq!(
            sched.port().started_sp(),
            Some(sched.task(id).unwrap().stack_pointer())
        );
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut sched = scheduler();
        sched.start().unwrap();
        assert_eq!(sched.start(), Err(Error::InvalidState));
        assert_eq!(sched.task_count(), 1);
    }

    #[test]
    fn test_task_created_while_running_waits_for_expiry() {
        let mut sched = scheduler_with(KernelConfig::DEFAULT.with_time_slice(2));
        let low = spawn(&mut sched, 5);
        sched.start().unwrap();

        let high = spawn(&mut sched, 1);
        assert_eq!(sched.current_task(), Some(low));
        sched.tick_handler();
        assert_eq!(sched.current_task(), Some(low));
        sched.tick_handler();
        assert_eq!(sched.current_task(), Some(high));
    }

    #[test]
    fn test_uptime_follows_ticks() {
        let mut sched = scheduler_with(KernelConfig::DEFAULT.with_tick_rate_hz(100));
        sched.start().unwrap();
        for _ in 0..7 {
            sched.tick_handler();
        }
        assert_eq!(sched.uptime_ms(), 70);
    }
}

mod creation_tests {
    use super::*;
    use lr_kernel::port::Port;

    #[test]
    fn test_zero_stack_rejected() {
        let mut sched = scheduler();
        assert_eq!(
            sched.create_task(worker, 0, TaskPriority::new(1), 0),
            Err(Error::InvalidParameter)
        );
        assert_eq!(sched.task_count(), 0);
        assert!(sched.ready_head().is_none());
    }

    #[test]
    fn test_undersized_stack_rejected() {
        let mut sched = scheduler();
        let min = Scheduler::<SimPort>::min_stack_words();
        assert_eq!(min, SimPort::MIN_STACK_WORDS + 1);
        assert_eq!(
            sched.create_task(worker, min - 1, TaskPriority::new(1), 0),
            Err(Error::InvalidParameter)
        );
        assert!(sched.create_task(worker, min, TaskPriority::new(1), 0).is_ok());
    }

    #[test]
    fn test_allocation_failure_leaves_no_state() {
        let mut sched = scheduler();
        spawn(&mut sched, 2);
        sched.port_mut().set_fail_alloc(true);

        assert_eq!(
            sched.create_task(worker, 64, TaskPriority::new(1), 0),
            Err(Error::MemoryAllocationFailed)
        );
        assert_eq!(sched.task_count(), 1);
        assert_eq!(priorities(&sched), vec![2]);

        let entry = sched.log().latest().expect("failure logged");
        assert!(entry.message().contains("allocation"));
    }

    #[test]
    fn test_pool_exhaustion() {
        let port = SimPort::new(leak_words(100));
        let mut sched = Scheduler::with_default_config(port).unwrap();
        assert!(sched.create_task(worker, 60, TaskPriority::new(1), 0).is_ok());
        assert_eq!(
            sched.create_task(worker, 60, TaskPriority::new(1), 0),
            Err(Error::MemoryAllocationFailed)
        );
    }

    #[test]
    fn test_task_table_full() {
        let mut sched = scheduler();
        for _ in 0..lr_kernel::MAX_TASKS {
            spawn(&mut sched, 1);
        }
        let before = sched.port().available_words();
        assert_eq!(
            sched.create_task(worker, 64, TaskPriority::new(1), 0),
            Err(Error::TaskCreationFailed)
        );
        assert_eq!(sched.port().available_words(), before);
    }

    #[test]
    fn test_new_task_fields() {
        let mut sched = scheduler_with(KernelConfig::DEFAULT.with_time_slice(5));
        let id = sched
            .create_task(worker, 64, TaskPriority::new(9), 0x1234)
            .unwrap();
        let task = sched.task(id).unwrap();

        assert_eq!(task.priority(), TaskPriority::new(9));
        assert_eq!(task.time_slice(), 5);
        assert_eq!(task.stack().words(), 64);
        assert!(task.stack().contains(task.stack_pointer()));
        assert_eq!(task.context().arg, 0x1234);
        assert_eq!(task.context().entry, worker as usize);
        assert!(task.stack_canary_intact());
    }
}

mod stack_guard_tests {
    use super::*;

    #[test]
    fn test_clean_stacks_pass() {
        let mut sched = scheduler();
        spawn(&mut sched, 1);
        sched.start().unwrap();
        assert!(sched.check_stacks().is_ok());
        assert!(sched.overflowed_task().is_none());
    }

    #[test]
    fn test_clobbered_canary_reported() {
        let mut sched = scheduler();
        spawn(&mut sched, 1);
        let victim = spawn(&mut sched, 2);

        let base = sched.task_stack(victim).unwrap().base().as_ptr();
        // SAFETY: the stack belongs to a task that never runs on the host;
        // this simulates it writing below its stack.
        unsafe { base.write_volatile(0) };

        assert_eq!(sched.overflowed_task(), Some(victim));
        assert_eq!(sched.check_stacks(), Err(Error::StackOverflow));
        assert!(sched.log().latest().unwrap().message().contains("overflowed"));
    }
}

mod teardown_tests {
    use super::*;
    use lr_kernel::SchedulerState;

    #[test]
    fn test_shutdown_frees_every_stack() {
        let mut sched = scheduler();
        spawn(&mut sched, 1);
        spawn(&mut sched, 2);
        sched.start().unwrap();

        sched.shutdown();
        assert_eq!(sched.state(), SchedulerState::Stopped);
        assert!(sched.current_task().is_none());
        assert_eq!(sched.ready_order().count(), 0);

        let port = sched.into_port();
        assert_eq!(port.freed_words(), 64 + 64 + 128);
        assert_eq!(port.available_words(), 8192);
        assert!(port.interrupts_enabled());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut sched = scheduler();
        spawn(&mut sched, 1);
        sched.shutdown();
        sched.shutdown();
        assert_eq!(sched.into_port().freed_words(), 64);
    }

    #[test]
    fn test_tick_after_shutdown_only_counts() {
        let mut sched = scheduler();
        spawn(&mut sched, 1);
        sched.start().unwrap();
        sched.shutdown();
        sched.tick_handler();
        assert_eq!(sched.stats().context_switches, 0);
        assert_eq!(sched.ticks().as_u32(), 1);
    }

    #[test]
    fn test_yield_forwarded_to_port() {
        let mut sched = scheduler();
        sched.request_yield();
        assert_eq!(sched.port().yields(), 1);
    }
}

mod shared_tests {
    use super::*;

    #[test]
    fn test_preemption_masked_for_whole_borrow() {
        let kernel = SharedScheduler::new(scheduler());
        let (urgent, _) = kernel
            .with(|s| {
                let slow = spawn(s, 4);
                let urgent = spawn(s, 1);
                assert!(!s.port().interrupts_enabled());
                (urgent, slow)
            })
            .unwrap();

        assert_eq!(kernel.start(), Ok(urgent));
        for _ in 0..3 {
            // SAFETY: stands in for the tick interrupt.
            assert!(unsafe { kernel.tick() });
        }

        let sched = kernel.into_inner();
        assert_eq!(sched.port().unmasked_allocs(), 0);
        assert_eq!(sched.current_task(), Some(urgent));
        assert_eq!(sched.ticks().as_u32(), 3);
        assert!(sched.port().interrupts_enabled());
    }

    #[test]
    fn test_direct_use_allocates_unmasked() {
        let mut sched = scheduler();
        spawn(&mut sched, 1);
        assert_eq!(sched.port().unmasked_allocs(), 1);
    }
}
