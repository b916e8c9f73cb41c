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

use thiserror::Error;

/// Errors the streaming core surfaces to callers. Variants split along the
/// recoverable/fatal line: a caller can retry or route around `Transient`
/// and `ExecutionFailed`, but `InvariantViolation` means the engine's
/// internal bookkeeping is already wrong and the process should not keep
/// trusting it.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("sequence number {0} is out of the shredder's current window")]
    SequenceNumberOutOfRange(u64),

    #[error("query {0} not found")]
    QueryNotFound(u64),

    #[error("query {0} is not in a state that allows this operation (status: {1})")]
    InvalidQueryState(u64, &'static str),

    #[error("query {0} failed to stop within the configured timeout")]
    StopTimeout(u64),

    #[error("pipeline execution failed: {0}")]
    ExecutionFailed(String),

    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

pub type StreamResult<T> = Result<T, StreamError>;
