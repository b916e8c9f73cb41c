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

//! Cgroup-aware resource introspection, used to pick sane defaults for the
//! worker thread pool when the process runs inside a container that only
//! gets a fraction of the host's CPUs.

use std::num::NonZeroUsize;

use sysinfo::System;
use tracing::warn;

/// Number of worker threads to spawn by default: the smaller of the
/// process's cgroup CPU quota (if any) and the host's detected core count.
pub fn available_parallelism() -> usize {
    let host = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);

    match cgroup_cpu_quota() {
        Some(quota) if quota > 0 => quota.min(host),
        _ => host,
    }
}

/// Total system memory in bytes, used to size buffer pools.
pub fn total_memory_bytes() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory()
}

/// Reads a cgroup v2 `cpu.max` file (falls back to `None` on cgroup v1 or
/// when unconfined) and returns the number of whole CPUs it grants.
fn cgroup_cpu_quota() -> Option<usize> {
    let raw = std::fs::read_to_string("/sys/fs/cgroup/cpu.max").ok()?;
    let mut parts = raw.split_whitespace();
    let quota = parts.next()?;
    let period = parts.next()?.parse::<u64>().ok()?;
    if quota == "max" {
        return None;
    }
    let quota = quota.parse::<u64>().ok()?;
    if period == 0 {
        warn!("cgroup cpu.max had a zero period, ignoring quota");
        return None;
    }
    Some(((quota as f64 / period as f64).ceil() as usize).max(1))
}
