// Copyright 2026 The StreamCore Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The task queue backing a [`super::query_manager::QueryManager`].
//!
//! A hard end-of-stream needs to preempt queued data tasks without
//! reordering reconfigurations already ahead of them, which a plain bounded
//! MPMC channel cannot express — so this is a `VecDeque` behind a mutex and
//! condvar, bounded by capacity rather than by a lock-free ring buffer.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use super::task::Task;

pub struct TaskQueue {
    capacity: usize,
    state: Mutex<VecDeque<Task>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, state: Mutex::new(VecDeque::with_capacity(capacity.min(1024))), not_empty: Condvar::new(), not_full: Condvar::new() }
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends to the tail, blocking while the queue is at capacity. Used
    /// for ordinary data tasks and for a soft end-of-stream, which must run
    /// only after everything already queued for that pipeline.
    pub fn push_back(&self, task: Task) {
        let mut state = self.state.lock();
        while state.len() >= self.capacity {
            self.not_full.wait(&mut state);
        }
        state.push_back(task);
        self.not_empty.notify_one();
    }

    /// Inserts `tasks` just after any reconfiguration tasks already at the
    /// front of the queue, ahead of the first data task — the hard
    /// end-of-stream preemption path. Does not block on capacity: a hard
    /// shutdown must not be starved by a full queue.
    pub fn push_front_preempting(&self, tasks: Vec<Task>) {
        let mut state = self.state.lock();
        let insert_at = state.iter().position(|t| !t.is_reconfiguration()).unwrap_or(state.len());
        for (offset, task) in tasks.into_iter().enumerate() {
            state.insert(insert_at + offset, task);
        }
        self.not_empty.notify_all();
    }

    /// Blocks until a task is available, then removes and returns it.
    pub fn pop(&self) -> Task {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.pop_front() {
                self.not_full.notify_one();
                return task;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Non-blocking drain used while shutting down: returns every
    /// reconfiguration task still queued and discards remaining data tasks
    /// (the terminate-loop semantics — queued data is dropped at hard
    /// shutdown rather than executed).
    pub fn drain_reconfigurations(&self) -> Vec<Task> {
        let mut state = self.state.lock();
        let drained: Vec<Task> = std::mem::take(&mut *state).into_iter().filter(|t| t.is_reconfiguration()).collect();
        self.not_full.notify_all();
        drained
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::buffer::RawBuffer;
    use crate::task::reconfiguration::{ReconfigurationKind, ReconfigurationMessage};

    fn data_task(seq: u64) -> Task {
        Task::Data { query_id: 1, pipeline_id: 1, buffer: RawBuffer::new(Bytes::from_static(b"x"), seq, 0) }
    }

    fn reconfig_task() -> Task {
        Task::Reconfiguration(Arc::new(ReconfigurationMessage::new(ReconfigurationKind::Destroy, 1, None, 1)))
    }

    #[test]
    fn fifo_order_is_preserved() {
        let queue = TaskQueue::new(8);
        queue.push_back(data_task(1));
        queue.push_back(data_task(2));
        queue.push_back(data_task(3));
        for expected in [1, 2, 3] {
            match queue.pop() {
                Task::Data { buffer, .. } => assert_eq!(buffer.sequence_number, expected),
                _ => panic!("expected a data task"),
            }
        }
    }

    #[test]
    fn preempting_insert_lands_after_existing_reconfigurations() {
        let queue = TaskQueue::new(8);
        queue.push_back(reconfig_task());
        queue.push_back(data_task(1));
        queue.push_back(data_task(2));

        queue.push_front_preempting(vec![data_task(99)]);

        match queue.pop() {
            Task::Reconfiguration(_) => {}
            _ => panic!("expected the pre-existing reconfiguration task first"),
        }
        match queue.pop() {
            Task::Data { buffer, .. } => assert_eq!(buffer.sequence_number, 99),
            _ => panic!("expected the preempting task second"),
        }
    }

    #[test]
    fn drain_reconfigurations_drops_data_tasks() {
        let queue = TaskQueue::new(8);
        queue.push_back(data_task(1));
        queue.push_back(reconfig_task());
        let drained = queue.drain_reconfigurations();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty());
    }
}
