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

//! Thread-pool-driven dispatch of compiled query pipelines. A fixed set of
//! worker threads pulls [`task::Task`] values off a shared [`queue::TaskQueue`]
//! until a [`query_manager::QueryManager`] poisons them at shutdown.

mod task;

pub mod monitor;
pub mod pipeline;
pub mod query_manager;
pub mod queue;
pub mod reconfiguration;
pub mod worker;

pub use query_manager::QueryManager;
pub use task::{PipelineId, QueryId, QueryStatus, Task};
