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

use std::sync::Arc;

use crate::buffer::{BufferPool, RawBuffer};

use super::queue::TaskQueue;
use super::task::{PipelineId, QueryId, Task};

/// Handed to a pipeline's `execute`/`reconfigure` call. Gives the compiled
/// stage a way to hand a result buffer to the next pipeline in the DAG
/// without reaching back into the query manager's internals directly.
pub struct WorkerContext {
    pub worker_id: usize,
    pub buffer_pool: Arc<BufferPool>,
    queue: Arc<TaskQueue>,
}

impl WorkerContext {
    pub fn new(worker_id: usize, buffer_pool: Arc<BufferPool>, queue: Arc<TaskQueue>) -> Self {
        Self { worker_id, buffer_pool, queue }
    }

    /// Enqueues `buffer` as a data task for `pipeline_id` within the same
    /// query. This is `addWorkForNextPipeline`: the only way pipelines feed
    /// each other buffers is through the task queue.
    pub fn emit(&self, query_id: QueryId, pipeline_id: PipelineId, buffer: RawBuffer) {
        self.queue.push_back(Task::Data { query_id, pipeline_id, buffer });
    }
}
