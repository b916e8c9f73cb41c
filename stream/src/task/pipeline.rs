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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::buffer::RawBuffer;
use crate::error::StreamResult;

use super::monitor::QueryStatistics;
use super::task::{PipelineId, QueryId, QueryStatus};
use super::worker::WorkerContext;

/// One stage of a compiled query: consumes a buffer, emits zero or more
/// buffers downstream. Implementations are normally produced by a
/// JIT/compilation step that sits outside this crate; here they are
/// ordinary trait objects.
pub trait ExecutablePipeline: Send + Sync {
    fn id(&self) -> PipelineId;

    fn successors(&self) -> &[PipelineId];

    /// Runs this stage over `buffer`, returning the number of tuples it
    /// produced (0 for a stage that only buffers a fragment, 1+ for one
    /// that emits downstream). Fed into the query's `processed_tuples`
    /// counter at the call site, so the count must reflect real output,
    /// not just "one task ran".
    fn execute(&self, buffer: RawBuffer, ctx: &WorkerContext) -> StreamResult<u64>;

    /// Called once for `Start`/`SoftEndOfStream`/`HardEndOfStream`; the
    /// default implementation does nothing.
    fn reconfigure(&self, _ctx: &WorkerContext) -> StreamResult<()> {
        Ok(())
    }
}

/// A compiled query: a DAG of pipelines (addressed by id, not by pointer —
/// the arena-of-indices convention used throughout this engine), plus the
/// lifecycle state and statistics the query manager tracks for it.
pub struct ExecutableQueryPlan {
    pub query_id: QueryId,
    pub pipelines: HashMap<PipelineId, Arc<dyn ExecutablePipeline>>,
    pub source_pipelines: Vec<PipelineId>,
    status: Mutex<QueryStatus>,
    status_changed: Condvar,
    pub statistics: QueryStatistics,
}

impl ExecutableQueryPlan {
    pub fn new(query_id: QueryId, pipelines: HashMap<PipelineId, Arc<dyn ExecutablePipeline>>, source_pipelines: Vec<PipelineId>) -> Self {
        Self {
            query_id,
            pipelines,
            source_pipelines,
            status: Mutex::new(QueryStatus::Created),
            status_changed: Condvar::new(),
            statistics: QueryStatistics::default(),
        }
    }

    pub fn status(&self) -> QueryStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: QueryStatus) {
        *self.status.lock() = status;
        self.status_changed.notify_all();
    }

    /// Atomically transitions `from -> to`, returning whether it happened.
    pub fn compare_exchange_status(&self, from: QueryStatus, to: QueryStatus) -> bool {
        let mut status = self.status.lock();
        if *status != from {
            return false;
        }
        *status = to;
        self.status_changed.notify_all();
        true
    }

    /// Blocks until the query reaches a terminal status or `timeout`
    /// elapses, returning the status observed. Mirrors the original's wait
    /// on a termination future with a hard timeout during `stop_query`.
    pub fn wait_for_terminal(&self, timeout: Duration) -> QueryStatus {
        let mut status = self.status.lock();
        if !status.is_terminal() {
            self.status_changed.wait_for(&mut status, timeout);
        }
        *status
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<&Arc<dyn ExecutablePipeline>> {
        self.pipelines.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopPipeline {
        id: PipelineId,
        successors: Vec<PipelineId>,
    }

    impl ExecutablePipeline for NoopPipeline {
        fn id(&self) -> PipelineId {
            self.id
        }
        fn successors(&self) -> &[PipelineId] {
            &self.successors
        }
        fn execute(&self, _buffer: RawBuffer, _ctx: &WorkerContext) -> StreamResult<u64> {
            Ok(0)
        }
    }

    #[test]
    fn status_transitions_are_exclusive() {
        let mut pipelines: HashMap<PipelineId, Arc<dyn ExecutablePipeline>> = HashMap::new();
        pipelines.insert(1, Arc::new(NoopPipeline { id: 1, successors: vec![] }));
        let plan = ExecutableQueryPlan::new(1, pipelines, vec![1]);
        assert_eq!(plan.status(), QueryStatus::Created);
        assert!(plan.compare_exchange_status(QueryStatus::Created, QueryStatus::Running));
        assert!(!plan.compare_exchange_status(QueryStatus::Created, QueryStatus::Running));
        assert_eq!(plan.status(), QueryStatus::Running);
    }

    #[test]
    fn wait_for_terminal_returns_once_status_becomes_terminal() {
        let pipelines: HashMap<PipelineId, Arc<dyn ExecutablePipeline>> = HashMap::new();
        let plan = Arc::new(ExecutableQueryPlan::new(1, pipelines, vec![]));
        plan.set_status(QueryStatus::Running);
        let waiter_plan = plan.clone();
        let handle = std::thread::spawn(move || waiter_plan.wait_for_terminal(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        plan.set_status(QueryStatus::Finished);
        assert_eq!(handle.join().unwrap(), QueryStatus::Finished);
    }
}
