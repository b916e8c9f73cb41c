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

//! The concrete buffer type the shredder and task dispatcher pass around.
//! Upstream components (sources, network deserializers) are outside this
//! crate's scope; they hand the engine a `RawBuffer` and nothing else.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};

/// Position of a buffer within a source's stream, relative to the implicit
/// start-of-stream delimiter a [`crate::shredder::SequenceShredder`] seeds
/// at construction.
pub type SequenceNumber = u64;

/// An immutable, refcounted chunk of bytes read from a source, tagged with
/// the sequence number it was assigned and the origin it came from.
#[derive(Debug, Clone)]
pub struct RawBuffer {
    pub data: Bytes,
    pub sequence_number: SequenceNumber,
    pub origin_id: u64,
    pub created_at: Instant,
}

impl RawBuffer {
    pub fn new(data: Bytes, sequence_number: SequenceNumber, origin_id: u64) -> Self {
        Self { data, sequence_number, origin_id, created_at: Instant::now() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A buffer staged in a `SequenceShredder`, along with the offsets of its
/// first and last tuple delimiters (if any). A buffer with no delimiter at
/// all staged a "fragment": every byte belongs to some spanning tuple.
#[derive(Debug, Clone, Default)]
pub struct StagedBuffer {
    pub buffer: Option<RawBuffer>,
    pub size_in_bytes: usize,
    pub offset_of_first_delimiter: usize,
    pub offset_of_last_delimiter: usize,
}

impl StagedBuffer {
    pub fn new(buffer: RawBuffer, offset_of_first_delimiter: usize, offset_of_last_delimiter: usize) -> Self {
        let size_in_bytes = buffer.len();
        Self { buffer: Some(buffer), size_in_bytes, offset_of_first_delimiter, offset_of_last_delimiter }
    }

    /// A zero-size placeholder used by `SequenceShredder::flush_final_partial_tuple`
    /// to flush out a trailing fragment that never got a closing delimiter.
    pub fn dummy() -> Self {
        Self::default()
    }
}

/// A bounded pool of reusable output-buffer slots. Pipeline stages block on
/// `acquire` once the pool is exhausted, providing the back-pressure
/// mechanism referenced by the concurrency model: a stalled downstream
/// consumer eventually stalls every producer feeding it.
pub struct BufferPool {
    free: Receiver<()>,
    release: Sender<()>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, rx) = bounded(capacity);
        for _ in 0..capacity {
            let _ = tx.send(());
        }
        Arc::new(Self { free: rx, release: tx, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Blocks the calling thread until a slot is free.
    pub fn acquire(&self) -> BufferPermit<'_> {
        self.free.recv().expect("buffer pool sender outlives receivers");
        BufferPermit { pool: self }
    }

    pub fn try_acquire(&self) -> Option<BufferPermit<'_>> {
        self.free.try_recv().ok().map(|_| BufferPermit { pool: self })
    }
}

/// RAII permit returned by the buffer pool; dropping it returns the slot.
pub struct BufferPermit<'a> {
    pool: &'a BufferPool,
}

impl Drop for BufferPermit<'_> {
    fn drop(&mut self) {
        let _ = self.pool.release.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_blocks_past_capacity() {
        let pool = BufferPool::new(1);
        assert_eq!(pool.available(), 1);
        let permit = pool.acquire();
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire().is_none());
        drop(permit);
        assert_eq!(pool.available(), 1);
    }
}
