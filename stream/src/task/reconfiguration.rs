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

//! In-band control messages that flow through the same task queue as data,
//! instead of a side channel. Every worker thread observes a given
//! reconfiguration exactly once; the last observer to decrement the shared
//! counter wakes any thread blocked on [`ReconfigurationMessage::await_completion`].

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::PipelineId;

/// What a reconfiguration asks every worker to do once it observes it.
#[derive(Debug, Clone)]
pub enum ReconfigurationKind {
    /// A pipeline is starting; workers may now dequeue data tasks for it.
    Start,
    /// Graceful end-of-stream: drain the pipeline's remaining data tasks,
    /// then propagate the same message to every successor pipeline.
    SoftEndOfStream { origin_pipeline: PipelineId },
    /// Non-graceful end-of-stream: drop the pipeline's remaining queued
    /// data tasks instead of draining them.
    HardEndOfStream { origin_pipeline: PipelineId },
    /// The query is being torn down; after every worker observes this, the
    /// query manager removes it from the set of running plans.
    Destroy,
}

/// One reconfiguration event, shared by reference across the `num_threads`
/// task-queue copies a [`super::query_manager::QueryManager`] enqueues for
/// it. Each worker calls [`Self::mark_observed`] after running its copy;
/// a blocking submitter calls [`Self::await_completion`].
#[derive(Debug)]
pub struct ReconfigurationMessage {
    pub kind: ReconfigurationKind,
    pub query_id: u64,
    pub pipeline_id: Option<PipelineId>,
    remaining: Arc<(Mutex<usize>, Condvar)>,
}

impl ReconfigurationMessage {
    pub fn new(kind: ReconfigurationKind, query_id: u64, pipeline_id: Option<PipelineId>, num_threads: usize) -> Self {
        Self { kind, query_id, pipeline_id, remaining: Arc::new((Mutex::new(num_threads), Condvar::new())) }
    }

    /// Called by a worker after it has applied the reconfiguration once.
    /// Returns `true` if this call was the last outstanding observation.
    pub fn mark_observed(&self) -> bool {
        let (lock, cvar) = &*self.remaining;
        let mut remaining = lock.lock();
        *remaining = remaining.saturating_sub(1);
        let done = *remaining == 0;
        if done {
            cvar.notify_all();
        }
        done
    }

    /// Blocks until every worker has called [`Self::mark_observed`].
    pub fn await_completion(&self) {
        let (lock, cvar) = &*self.remaining;
        let mut remaining = lock.lock();
        while *remaining > 0 {
            cvar.wait(&mut remaining);
        }
    }

    pub fn outstanding(&self) -> usize {
        *self.remaining.0.lock()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn completion_waits_for_every_observer() {
        let msg = Arc::new(ReconfigurationMessage::new(ReconfigurationKind::Destroy, 1, None, 3));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let msg = msg.clone();
                thread::spawn(move || {
                    thread::sleep(std::time::Duration::from_millis(10));
                    msg.mark_observed();
                })
            })
            .collect();
        msg.await_completion();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(msg.outstanding(), 0);
    }

    #[test]
    fn last_observer_reports_done() {
        let msg = ReconfigurationMessage::new(ReconfigurationKind::Start, 1, None, 2);
        assert!(!msg.mark_observed());
        assert!(msg.mark_observed());
    }
}
