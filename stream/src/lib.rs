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

//! The concurrent core of the streaming engine: reassembling spanning
//! tuples from out-of-order buffers (`shredder`), a code-gen-friendly hash
//! table for pipeline operators (`hash`), and the thread-pool-driven task
//! dispatcher that runs compiled pipelines (`task`).

pub mod buffer;
pub mod error;
pub mod hash;
pub mod shredder;
pub mod source;
pub mod task;

pub use error::{StreamError, StreamResult};
