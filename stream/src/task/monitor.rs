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

//! Per-query statistics and the process-wide metrics registry they feed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use super::task::QueryId;

/// Running counters for one query, updated by workers as tasks complete.
/// Never reset; a snapshot is a cheap relaxed read of each counter.
#[derive(Default)]
pub struct QueryStatistics {
    pub processed_tasks: AtomicU64,
    pub processed_buffers: AtomicU64,
    pub processed_tuples: AtomicU64,
    pub latency_sum_ms: AtomicU64,
    pub queue_size_sum: AtomicU64,
    /// Sum, across every completed task, of the buffer pool's free-slot
    /// count observed at completion time. This engine has a single
    /// process-wide buffer pool rather than the original's separate
    /// global/fixed pools, so both counters sample the same pool.
    pub available_global_buffer_sum: AtomicU64,
    pub available_fixed_buffer_sum: AtomicU64,
}

impl QueryStatistics {
    pub fn record_task_completion(&self, latency_ms: u64, queue_size: u64, tuples: u64, available_buffers: u64) {
        self.processed_tasks.fetch_add(1, Ordering::Relaxed);
        self.processed_buffers.fetch_add(1, Ordering::Relaxed);
        self.processed_tuples.fetch_add(tuples, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.queue_size_sum.fetch_add(queue_size, Ordering::Relaxed);
        self.available_global_buffer_sum.fetch_add(available_buffers, Ordering::Relaxed);
        self.available_fixed_buffer_sum.fetch_add(available_buffers, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueryStatisticsSnapshot {
        QueryStatisticsSnapshot {
            processed_tasks: self.processed_tasks.load(Ordering::Relaxed),
            processed_buffers: self.processed_buffers.load(Ordering::Relaxed),
            processed_tuples: self.processed_tuples.load(Ordering::Relaxed),
            latency_sum_ms: self.latency_sum_ms.load(Ordering::Relaxed),
            queue_size_sum: self.queue_size_sum.load(Ordering::Relaxed),
            available_global_buffer_sum: self.available_global_buffer_sum.load(Ordering::Relaxed),
            available_fixed_buffer_sum: self.available_fixed_buffer_sum.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryStatisticsSnapshot {
    pub processed_tasks: u64,
    pub processed_buffers: u64,
    pub processed_tuples: u64,
    pub latency_sum_ms: u64,
    pub queue_size_sum: u64,
    pub available_global_buffer_sum: u64,
    pub available_fixed_buffer_sum: u64,
}

impl fmt::Display for QueryStatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let avg_latency = if self.processed_tasks > 0 { self.latency_sum_ms / self.processed_tasks } else { 0 };
        write!(
            f,
            "tasks: {}, buffers: {}, tuples: {}, avg latency: {}ms, avg available (global/fixed): {}/{}",
            self.processed_tasks,
            self.processed_buffers,
            self.processed_tuples,
            avg_latency,
            self.available_global_buffer_sum.checked_div(self.processed_tasks).unwrap_or(0),
            self.available_fixed_buffer_sum.checked_div(self.processed_tasks).unwrap_or(0),
        )
    }
}

/// Process-wide Prometheus counters, shared across every query a single
/// [`super::query_manager::QueryManager`] runs.
pub struct StreamingMetrics {
    pub registry: Registry,
    pub tasks_completed: IntCounterVec,
    pub tasks_failed: IntCounter,
}

impl StreamingMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let tasks_completed = IntCounterVec::new(
            Opts::new("streamcore_tasks_completed_total", "Number of data tasks a worker has finished executing"),
            &["query_id"],
        )
        .expect("static metric options are well-formed");
        let tasks_failed = IntCounter::new("streamcore_tasks_failed_total", "Number of tasks that returned an execution error")
            .expect("static metric options are well-formed");
        registry.register(Box::new(tasks_completed.clone())).ok();
        registry.register(Box::new(tasks_failed.clone())).ok();
        Self { registry, tasks_completed, tasks_failed }
    }

    pub fn record_completion(&self, query_id: QueryId) {
        self.tasks_completed.with_label_values(&[&query_id.to_string()]).inc();
    }

    pub fn record_failure(&self) {
        self.tasks_failed.inc();
    }
}

impl Default for StreamingMetrics {
    fn default() -> Self {
        Self::new()
    }
}
