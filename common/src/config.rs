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

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::resource;

/// Tunables for the streaming engine's concurrency primitives.
///
/// None of these are reloaded at runtime; a fresh `StreamingConfig` is
/// read once at startup and handed to the components that need it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Number of OS worker threads the query manager's thread pool spawns.
    /// Defaults to the detected (cgroup-aware) available parallelism.
    pub num_worker_threads: usize,

    /// Maximum number of tasks the task queue holds before `add_work`
    /// blocks the calling thread.
    pub task_queue_capacity: usize,

    /// Initial number of bitmap words a `SequenceShredder` allocates.
    pub shredder_initial_bitmaps: usize,

    /// Hard ceiling a `SequenceShredder`'s bitmap vector may grow to.
    pub shredder_max_bitmaps: usize,

    /// Consecutive tail wraparounds required before a bitmap vector is
    /// allowed to double in size.
    pub shredder_resize_request_threshold: u32,

    /// Entries a single `ChainedHashMap` page holds before a new page is
    /// allocated.
    pub hash_map_page_size: usize,

    /// Initial bucket count for a new `ChainedHashMap`.
    pub hash_map_initial_buckets: usize,

    /// How long `stop_query` waits for a query's pipelines to drain before
    /// giving up and reporting failure.
    #[serde(with = "duration_secs")]
    pub query_stop_timeout: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            num_worker_threads: resource::available_parallelism(),
            task_queue_capacity: 4096,
            shredder_initial_bitmaps: 4,
            shredder_max_bitmaps: 1 << 20,
            shredder_resize_request_threshold: 8,
            hash_map_page_size: 4096,
            hash_map_initial_buckets: 64,
            query_stop_timeout: Duration::from_secs(600),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let cfg = StreamingConfig::default();
        assert!(cfg.num_worker_threads >= 1);
        assert!(cfg.shredder_max_bitmaps >= cfg.shredder_initial_bitmaps);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = StreamingConfig::default();
        let text = toml::to_string(&cfg).expect("serialize");
        let back: StreamingConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(back.num_worker_threads, cfg.num_worker_threads);
        assert_eq!(back.query_stop_timeout, cfg.query_stop_timeout);
    }
}
