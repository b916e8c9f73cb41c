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

//! The top-level entry point for running compiled queries: owns the worker
//! thread pool, the shared task queue and buffer pool, and the map of
//! currently registered query plans.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use streamcore_common::config::StreamingConfig;

use crate::buffer::BufferPool;
use crate::error::{StreamError, StreamResult};

use super::monitor::StreamingMetrics;
use super::pipeline::ExecutableQueryPlan;
use super::reconfiguration::{ReconfigurationKind, ReconfigurationMessage};
use super::task::{PipelineId, QueryId, QueryStatus, Task};
use super::queue::TaskQueue;
use super::worker::WorkerContext;

const MANAGER_CREATED: u8 = 0;
const MANAGER_RUNNING: u8 = 1;
const MANAGER_STOPPED: u8 = 2;

/// Owns the thread pool that executes every registered query's pipelines.
/// There is normally exactly one of these per process.
pub struct QueryManager {
    config: StreamingConfig,
    queue: Arc<TaskQueue>,
    buffer_pool: Arc<BufferPool>,
    plans: RwLock<HashMap<QueryId, Arc<ExecutableQueryPlan>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    status: AtomicU8,
    metrics: Arc<StreamingMetrics>,
    num_threads: usize,
}

impl QueryManager {
    pub fn new(config: StreamingConfig) -> Arc<Self> {
        let num_threads = config.num_worker_threads.max(1);
        let queue = Arc::new(TaskQueue::new(config.task_queue_capacity));
        let buffer_pool = BufferPool::new(config.task_queue_capacity);
        Arc::new(Self {
            config,
            queue,
            buffer_pool,
            plans: RwLock::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            status: AtomicU8::new(MANAGER_CREATED),
            metrics: Arc::new(StreamingMetrics::new()),
            num_threads,
        })
    }

    pub fn metrics(&self) -> Arc<StreamingMetrics> {
        self.metrics.clone()
    }

    /// Spawns the worker thread pool. Idempotent: calling this a second time
    /// is a no-op, matching the original's guarded `running` flag.
    pub fn start_thread_pool(self: &Arc<Self>) {
        if self.status.compare_exchange(MANAGER_CREATED, MANAGER_RUNNING, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }
        let mut workers = self.workers.lock();
        for worker_id in 0..self.num_threads {
            let manager = self.clone();
            let handle = std::thread::Builder::new()
                .name(format!("streamcore-worker-{worker_id}"))
                .spawn(move || manager.worker_loop(worker_id))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }
        info!(num_threads = self.num_threads, "query manager thread pool started");
    }

    fn worker_loop(self: Arc<Self>, worker_id: usize) {
        let ctx = WorkerContext::new(worker_id, self.buffer_pool.clone(), self.queue.clone());
        loop {
            match self.queue.pop() {
                Task::Data { query_id, pipeline_id, buffer } => {
                    self.execute_data_task(&ctx, query_id, pipeline_id, buffer);
                }
                Task::Reconfiguration(msg) => {
                    self.handle_reconfiguration(&ctx, &msg);
                }
                Task::Poison => {
                    debug!(worker_id, "worker observed poison, exiting");
                    return;
                }
            }
        }
    }

    fn execute_data_task(&self, ctx: &WorkerContext, query_id: QueryId, pipeline_id: PipelineId, buffer: crate::buffer::RawBuffer) {
        let Some(plan) = self.plans.read().get(&query_id).cloned() else {
            warn!(query_id, pipeline_id, "data task for an unregistered query, dropping");
            return;
        };
        let Some(pipeline) = plan.pipeline(pipeline_id).cloned() else {
            warn!(query_id, pipeline_id, "data task for an unknown pipeline, dropping");
            return;
        };
        let created_at = buffer.created_at;
        match pipeline.execute(buffer, ctx) {
            Ok(tuples) => {
                let latency_ms = created_at.elapsed().as_millis() as u64;
                let available_buffers = self.buffer_pool.available() as u64;
                plan.statistics.record_task_completion(latency_ms, self.queue.len() as u64, tuples, available_buffers);
                self.metrics.record_completion(query_id);
            }
            Err(err) => {
                error!(query_id, pipeline_id, error = %err, "pipeline execution failed");
                self.metrics.record_failure();
                plan.set_status(QueryStatus::ErrorState);
            }
        }
    }

    fn handle_reconfiguration(&self, ctx: &WorkerContext, msg: &Arc<ReconfigurationMessage>) {
        if let Some(pipeline_id) = msg.pipeline_id {
            if let Some(plan) = self.plans.read().get(&msg.query_id).cloned() {
                if let Some(pipeline) = plan.pipeline(pipeline_id).cloned() {
                    if let Err(err) = pipeline.reconfigure(ctx) {
                        error!(query_id = msg.query_id, pipeline_id, error = %err, "reconfigure callback failed");
                    }
                }
            }
        }
        if msg.mark_observed() {
            self.post_reconfiguration_callback(msg);
        }
    }

    /// Runs once, on whichever worker happened to be the last to observe
    /// `msg`. Applies the state transition the reconfiguration represents:
    /// marking a pipeline started, propagating end-of-stream to successors,
    /// or tearing the query down entirely.
    fn post_reconfiguration_callback(&self, msg: &ReconfigurationMessage) {
        let Some(plan) = self.plans.read().get(&msg.query_id).cloned() else {
            return;
        };
        match &msg.kind {
            ReconfigurationKind::Start => {
                plan.compare_exchange_status(QueryStatus::Created, QueryStatus::Running);
            }
            ReconfigurationKind::Destroy => {
                self.plans.write().remove(&msg.query_id);
                info!(query_id = msg.query_id, "query plan removed");
            }
            ReconfigurationKind::SoftEndOfStream { origin_pipeline } => {
                self.propagate_end_of_stream(&plan, *origin_pipeline, true);
            }
            ReconfigurationKind::HardEndOfStream { origin_pipeline } => {
                self.propagate_end_of_stream(&plan, *origin_pipeline, false);
            }
        }
    }

    fn propagate_end_of_stream(&self, plan: &Arc<ExecutableQueryPlan>, origin_pipeline: PipelineId, graceful: bool) {
        let Some(pipeline) = plan.pipeline(origin_pipeline) else {
            return;
        };
        let successors = pipeline.successors().to_vec();
        if successors.is_empty() {
            plan.set_status(if graceful { QueryStatus::Finished } else { QueryStatus::Stopped });
            info!(query_id = plan.query_id, origin_pipeline, graceful, "query reached a sink with no successors, marking terminal");
            return;
        }
        for successor in successors {
            let kind = if graceful {
                ReconfigurationKind::SoftEndOfStream { origin_pipeline: successor }
            } else {
                ReconfigurationKind::HardEndOfStream { origin_pipeline: successor }
            };
            self.dispatch_reconfiguration(plan.query_id, Some(successor), kind, graceful);
        }
    }

    /// Enqueues one reconfiguration copy per worker thread. Soft end-of-stream
    /// and start/destroy are appended to the tail, so they run after
    /// everything already queued for that pipeline; hard end-of-stream
    /// preempts to the front, ahead of any pending data.
    fn dispatch_reconfiguration(&self, query_id: QueryId, pipeline_id: Option<PipelineId>, kind: ReconfigurationKind, append_to_tail: bool) -> Arc<ReconfigurationMessage> {
        let msg = Arc::new(ReconfigurationMessage::new(kind, query_id, pipeline_id, self.num_threads));
        let tasks: Vec<Task> = (0..self.num_threads).map(|_| Task::Reconfiguration(msg.clone())).collect();
        if append_to_tail {
            for task in tasks {
                self.queue.push_back(task);
            }
        } else {
            self.queue.push_front_preempting(tasks);
        }
        msg
    }

    /// Registers a compiled query plan in `Created` status. Does not start
    /// it; call [`Self::start_query`] afterward.
    pub fn register_query(&self, plan: ExecutableQueryPlan) -> QueryId {
        let query_id = plan.query_id;
        self.plans.write().insert(query_id, Arc::new(plan));
        query_id
    }

    /// Sends a blocking `Start` reconfiguration to every source pipeline of
    /// `query_id`, returning once every worker has observed it.
    pub fn start_query(&self, query_id: QueryId) -> StreamResult<()> {
        let plan = self.plans.read().get(&query_id).cloned().ok_or(StreamError::QueryNotFound(query_id))?;
        if plan.status() != QueryStatus::Created {
            return Err(StreamError::InvalidQueryState(query_id, "query must be Created to start"));
        }
        for &source in &plan.source_pipelines {
            let msg = self.dispatch_reconfiguration(query_id, Some(source), ReconfigurationKind::Start, true);
            msg.await_completion();
        }
        Ok(())
    }

    /// Hands a data buffer to a query's pipeline as a queued task.
    pub fn add_work(&self, query_id: QueryId, pipeline_id: PipelineId, buffer: crate::buffer::RawBuffer) -> StreamResult<()> {
        if !self.plans.read().contains_key(&query_id) {
            return Err(StreamError::QueryNotFound(query_id));
        }
        self.queue.push_back(Task::Data { query_id, pipeline_id, buffer });
        Ok(())
    }

    /// Starts graceful or non-graceful end-of-stream from `pipeline_id`
    /// downward; does not block for completion.
    pub fn add_end_of_stream(&self, query_id: QueryId, pipeline_id: PipelineId, graceful: bool) -> StreamResult<()> {
        if !self.plans.read().contains_key(&query_id) {
            return Err(StreamError::QueryNotFound(query_id));
        }
        let kind = if graceful {
            ReconfigurationKind::SoftEndOfStream { origin_pipeline: pipeline_id }
        } else {
            ReconfigurationKind::HardEndOfStream { origin_pipeline: pipeline_id }
        };
        self.dispatch_reconfiguration(query_id, Some(pipeline_id), kind, graceful);
        Ok(())
    }

    /// Enqueues `num_threads` copies of an arbitrary reconfiguration message
    /// and, when `blocking`, returns only once every worker has observed
    /// its copy. The general-purpose entry point `add_work`/
    /// `add_end_of_stream` sit on top of for their own message kinds; this
    /// is the one external callers use to inject a reconfiguration of a
    /// kind this crate didn't already special-case.
    pub fn add_reconfiguration_message(&self, query_id: QueryId, pipeline_id: Option<PipelineId>, kind: ReconfigurationKind, blocking: bool) -> StreamResult<()> {
        if !self.plans.read().contains_key(&query_id) {
            return Err(StreamError::QueryNotFound(query_id));
        }
        let msg = self.dispatch_reconfiguration(query_id, pipeline_id, kind, true);
        if blocking {
            msg.await_completion();
        }
        Ok(())
    }

    /// Sends a hard end-of-stream from every source pipeline, waits for the
    /// query to reach a terminal status within `config.query_stop_timeout`,
    /// then tears it down with a blocking `Destroy`. Returns
    /// [`StreamError::StopTimeout`] rather than aborting if the deadline
    /// passes without every pipeline draining.
    pub fn stop_query(&self, query_id: QueryId) -> StreamResult<()> {
        let plan = self.plans.read().get(&query_id).cloned().ok_or(StreamError::QueryNotFound(query_id))?;
        if plan.status().is_terminal() {
            return self.destroy_query(query_id);
        }
        for &source in &plan.source_pipelines {
            self.add_end_of_stream(query_id, source, false)?;
        }
        let deadline = self.config.query_stop_timeout;
        let observed = plan.wait_for_terminal(deadline);
        if !observed.is_terminal() {
            error!(query_id, timeout_secs = deadline.as_secs(), "query failed to stop within the configured timeout");
            return Err(StreamError::StopTimeout(query_id));
        }
        self.destroy_query(query_id)
    }

    fn destroy_query(&self, query_id: QueryId) -> StreamResult<()> {
        let msg = self.dispatch_reconfiguration(query_id, None, ReconfigurationKind::Destroy, true);
        msg.await_completion();
        Ok(())
    }

    pub fn query_statistics(&self, query_id: QueryId) -> StreamResult<super::monitor::QueryStatisticsSnapshot> {
        let plan = self.plans.read().get(&query_id).cloned().ok_or(StreamError::QueryNotFound(query_id))?;
        Ok(plan.statistics.snapshot())
    }

    pub fn qep_status(&self, query_id: QueryId) -> StreamResult<QueryStatus> {
        let plan = self.plans.read().get(&query_id).cloned().ok_or(StreamError::QueryNotFound(query_id))?;
        Ok(plan.status())
    }

    /// Poisons every worker thread and joins them. Queued reconfigurations
    /// are preserved one last time so any in-flight `Destroy`/end-of-stream
    /// completes before the pool actually shuts down; remaining data tasks
    /// are dropped.
    pub fn shutdown(&self) {
        if self.status.compare_exchange(MANAGER_RUNNING, MANAGER_STOPPED, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }
        let surviving = self.queue.drain_reconfigurations();
        for task in surviving {
            self.queue.push_back(task);
        }
        let mut workers = self.workers.lock();
        for _ in 0..workers.len() {
            self.queue.push_front_preempting(vec![Task::Poison]);
        }
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        info!("query manager shut down");
    }
}

// No `Drop` impl: each worker thread holds an `Arc<QueryManager>` for the
// duration of its loop, so the manager's strong count never reaches zero
// while workers are alive. Callers must call `shutdown` explicitly before
// releasing their last handle.
