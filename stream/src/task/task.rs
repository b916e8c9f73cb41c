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

use crate::buffer::RawBuffer;

use super::reconfiguration::ReconfigurationMessage;

pub type PipelineId = u64;
pub type QueryId = u64;

/// The unit of work a worker thread pulls off the task queue.
pub enum Task {
    /// Run one pipeline stage over one buffer.
    Data { query_id: QueryId, pipeline_id: PipelineId, buffer: RawBuffer },
    /// Apply a reconfiguration, then record that this worker observed it.
    Reconfiguration(Arc<ReconfigurationMessage>),
    /// Sentinel enqueued once per worker at shutdown; causes the receiving
    /// worker's run loop to exit.
    Poison,
}

impl Task {
    pub fn is_reconfiguration(&self) -> bool {
        matches!(self, Task::Reconfiguration(_))
    }
}

/// Per-query lifecycle state. `ErrorState` and `Finished`/`Stopped` are all
/// terminal: only an explicit `Destroy` reconfiguration removes a query
/// from the manager afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Created,
    Running,
    Finished,
    Stopped,
    ErrorState,
}

impl QueryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueryStatus::Finished | QueryStatus::Stopped | QueryStatus::ErrorState)
    }
}
