// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! Ready list
//!
//! A singly linked chain threaded through the task table by each
//! [`Task`]'s `next` index. The list owns only the chain; the tasks
//! themselves belong to the table passed into every operation.
//!
//! The chain is kept in ascending priority order with FIFO tie-break:
//! a new task goes after every task of equal or more urgent priority.
//! Nothing is ever removed.
//!
//! None of these operations mask interrupts; callers hold a
//! [`CriticalSection`](crate::port::CriticalSection).

use lr_common::{Error, Result};

use crate::task::{Task, TaskId};

/// Head of the ready chain
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadyList {
    head: Option<TaskId>,
    len: usize,
}

impl ReadyList {
    /// Create an empty list
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Most urgent task (first in the chain)
    #[must_use]
    pub const fn head(&self) -> Option<TaskId> {
        self.head
    }

    /// Number of linked tasks
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if no task is linked
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Link `new` into the chain at its priority position
    ///
    /// Walks past every task whose priority is less than or equal to the
    /// new one and inserts before the first strictly less urgent task, or
    /// at the tail.
    ///
    /// # Errors
    /// `InvalidParameter` if `new` is not in `tasks`, `InvalidState` if it
    /// is already linked.
    pub fn add<C>(&mut self, tasks: &mut [Task<C>], new: TaskId) -> Result<()> {
        if new.index() >= tasks.len() {
            return Err(Error::InvalidParameter);
        }
        if self.contains(tasks, new) {
            return Err(Error::InvalidState);
        }

        let priority = tasks[new.index()].priority;
        let mut prev: Option<TaskId> = None;
        let mut cursor = self.head;

        while let Some(id) = cursor {
            let task = &tasks[id.index()];
            if task.priority > priority {
                break;
            }
            prev = Some(id);
            cursor = task.next;
        }

        tasks[new.index()].next = cursor;
        match prev {
            None => self.head = Some(new),
            Some(p) => tasks[p.index()].next = Some(new),
        }
        self.len += 1;

        Ok(())
    }

    /// Full scan for the most urgent task
    ///
    /// Ties go to the task met first in chain order. With the ordering
    /// kept by [`add`](Self::add) this always agrees with [`head`](Self::head);
    /// the scan does not rely on that.
    #[must_use]
    pub fn highest_priority<C>(&self, tasks: &[Task<C>]) -> Option<TaskId> {
        let mut best: Option<&Task<C>> = None;
        for task in self.iter(tasks) {
            if best.map_or(true, |b| task.priority.is_more_urgent_than(b.priority)) {
                best = Some(task);
            }
        }
        best.map(|t| t.id)
    }

    /// Check whether `id` is linked
    #[must_use]
    pub fn contains<C>(&self, tasks: &[Task<C>], id: TaskId) -> bool {
        self.iter(tasks).any(|t| t.id == id)
    }

    /// Walk the chain in order
    ///
    /// The walk stops after `len` steps even if a link were corrupted into
    /// a cycle, so it is bounded-time in interrupt context.
    #[must_use]
    pub fn iter<'a, C>(&self, tasks: &'a [Task<C>]) -> ReadyIter<'a, C> {
        ReadyIter {
            tasks,
            cursor: self.head,
            remaining: self.len,
        }
    }

    /// Forget every link. The tasks themselves are untouched.
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }
}

/// Iterator over the ready chain
pub struct ReadyIter<'a, C> {
    tasks: &'a [Task<C>],
    cursor: Option<TaskId>,
    remaining: usize,
}

impl<'a, C> Iterator for ReadyIter<'a, C> {
    type Item = &'a Task<C>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let task = self.tasks.get(self.cursor?.index())?;
        self.cursor = task.next;
        self.remaining -= 1;
        Some(task)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
