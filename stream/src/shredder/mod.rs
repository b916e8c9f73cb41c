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

//! Reassembles "spanning tuples" — records that straddle two or more
//! out-of-order input buffers — using two parallel bitmaps per window of
//! sequence numbers instead of a lock held across the whole search.
//!
//! Each incoming buffer stages itself, flips a bit under a short-held
//! mutex, then searches for the nearest tuple delimiters on either side of
//! it against a *snapshot* of the bitmaps, without holding any lock. Only
//! the final bookkeeping (marking the spanning tuple "used", possibly
//! advancing the tail) re-acquires the mutex. Concurrent callers never
//! contend on the search itself, only on the two short bitmap mutations.

use std::fmt;

use parking_lot::Mutex;
use tracing::warn;

use crate::buffer::StagedBuffer;

const SIZE_OF_BITMAP_IN_BITS: u64 = 64;
const BITMAP_SIZE_BIT_SHIFT: u32 = 6;
const BITMAP_SIZE_MODULO: u64 = 63;
const MAX_VALUE: u64 = u64::MAX;
const INVALID_SEQUENCE_NUMBER: u64 = u64::MAX;

/// The offset and validity of one end of a spanning tuple, paired with its
/// counterpart to describe the full span found by a search.
#[derive(Debug, Clone, Copy, Default)]
struct SpanningTuple {
    span_start: u64,
    span_end: u64,
    is_start_valid: bool,
    is_end_valid: bool,
}

/// Buffers that together make up one or more completed spanning tuples,
/// returned to the caller that happened to complete them. `local_index` is
/// the offset of the caller's own sequence number within `staged_buffers`,
/// so the caller can tell which of the returned buffers was its own.
#[derive(Debug, Default)]
pub struct SpanningTupleBuffers {
    pub local_index: usize,
    pub staged_buffers: Vec<StagedBuffer>,
}

impl SpanningTupleBuffers {
    fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.staged_buffers.is_empty()
    }
}

enum Snapshot {
    /// No wrapping check was necessary: the bitmap that holds the sequence
    /// number's bit is the only bitmap a search could ever touch.
    Local { tuple: u64, seen: u64 },
    /// Either end of the search might cross into a neighboring bitmap, so
    /// the whole bitmap vector pair was cloned for lock-free traversal.
    Wrapping { tail: u64, modulo: u64, tuple: Vec<u64>, seen: Vec<u64> },
}

impl Snapshot {
    fn modulo(&self, local_modulo: u64) -> u64 {
        match self {
            Snapshot::Local { .. } => local_modulo,
            Snapshot::Wrapping { modulo, .. } => *modulo,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WrappingMode {
    None,
    Lower,
    Higher,
    LowerAndHigher,
}

struct ShredderState {
    tail: u64,
    tuple_delimiter_bitmaps: Vec<u64>,
    seen_and_used_bitmaps: Vec<u64>,
    number_of_bitmaps: usize,
    number_of_bitmaps_modulo: u64,
    resize_request_count: u32,
    staged_buffers: Vec<StagedBuffer>,
    staged_buffer_uses: Vec<i8>,
    is_first_tuple: bool,
    is_last_tuple: bool,
}

/// Reassembles tuples that span multiple out-of-order buffers.
///
/// One instance is created per input source/origin. `is_in_range` gates
/// admission (callers whose buffer no longer fits the current window must
/// hold it back); `process_sequence_number` is the hot path every staged
/// buffer goes through exactly once.
pub struct SequenceShredder {
    state: Mutex<ShredderState>,
    resize_request_threshold: u32,
    max_number_of_bitmaps: usize,
}

impl SequenceShredder {
    pub fn new(size_of_tuple_delimiter: usize, initial_num_bitmaps: usize, max_number_of_bitmaps: usize, resize_request_threshold: u32) -> Self {
        assert!(initial_num_bitmaps.is_power_of_two(), "bitmap vector length must be a power of two");
        let num_staged = initial_num_bitmaps << BITMAP_SIZE_BIT_SHIFT;
        let mut tuple_delimiter_bitmaps = vec![0u64; initial_num_bitmaps];
        let seen_and_used_bitmaps = vec![0u64; initial_num_bitmaps];
        let mut staged_buffers = vec![StagedBuffer::default(); num_staged];
        let mut staged_buffer_uses = vec![0i8; num_staged];

        // Seed an implicit "start of stream" delimiter at sequence number 0, so a
        // spanning tuple beginning there always has a predecessor to find.
        tuple_delimiter_bitmaps[0] |= 1;
        staged_buffers[0] = StagedBuffer { buffer: None, size_in_bytes: size_of_tuple_delimiter, offset_of_first_delimiter: 0, offset_of_last_delimiter: 0 };
        staged_buffer_uses[0] = 1;

        Self {
            state: Mutex::new(ShredderState {
                tail: 0,
                tuple_delimiter_bitmaps,
                seen_and_used_bitmaps,
                number_of_bitmaps: initial_num_bitmaps,
                number_of_bitmaps_modulo: (initial_num_bitmaps - 1) as u64,
                resize_request_count: 0,
                staged_buffers,
                staged_buffer_uses,
                is_first_tuple: true,
                is_last_tuple: false,
            }),
            resize_request_threshold,
            max_number_of_bitmaps,
        }
    }

    /// Whether `sequence_number` still falls within the current window.
    /// Increments an internal counter on a miss, which eventually allows
    /// the bitmap vectors to grow (see [`Self::increment_tail`]).
    pub fn is_in_range(&self, sequence_number: u64) -> bool {
        let target_bitmap = sequence_number >> BITMAP_SIZE_BIT_SHIFT;
        let mut state = self.state.lock();
        if target_bitmap < state.tail + state.number_of_bitmaps as u64 {
            return true;
        }
        state.resize_request_count += 1;
        false
    }

    /// Called once the source is known to have no more buffers. Scans
    /// backward from the tail for the last buffer that never got a closing
    /// delimiter and, if found, synthesizes a dummy sequence number one
    /// past the largest seen one to flush the trailing fragment out.
    ///
    /// Safe to call concurrently with ordinary arrivals; its result is only
    /// meaningful to a caller that knows no further buffers are coming.
    pub fn flush_final_partial_tuple(&self) -> (SpanningTupleBuffers, u64) {
        let dummy = {
            let mut state = self.state.lock();
            state.is_last_tuple = true;
            let mut found = None;
            for offset_to_tail in 1..=state.number_of_bitmaps as u64 {
                let bitmap_index = (state.tail + (state.number_of_bitmaps as u64 - offset_to_tail)) & state.number_of_bitmaps_modulo;
                let seen = state.seen_and_used_bitmaps[bitmap_index as usize];
                let delim = state.tuple_delimiter_bitmaps[bitmap_index as usize];
                if (seen | delim) != 0 {
                    let first_seq_of_tail = state.tail * SIZE_OF_BITMAP_IN_BITS;
                    let seq_offset_of_bitmap = ((state.number_of_bitmaps as u64 - offset_to_tail) & state.number_of_bitmaps_modulo) << BITMAP_SIZE_BIT_SHIFT;
                    let first_seq_of_bitmap = first_seq_of_tail + seq_offset_of_bitmap;
                    let not_seen = (seen | delim).leading_zeros() as u64;
                    let offset_to_next = SIZE_OF_BITMAP_IN_BITS - not_seen;
                    let next_largest_sequence_number = first_seq_of_bitmap + offset_to_next;

                    let largest_sequence_number = next_largest_sequence_number - 1;
                    let bit_of_last = 1u64 << (offset_to_next - 1);
                    let has_delimiter = (delim & bit_of_last) != 0;
                    let buffer_idx_of_largest = (largest_sequence_number as usize) & (state.staged_buffers.len() - 1);
                    let uses_of_largest = state.staged_buffer_uses[buffer_idx_of_largest];
                    let largest_already_produced = has_delimiter && uses_of_largest != 2;
                    let sequence_number_to_use = if largest_already_produced { next_largest_sequence_number } else { largest_sequence_number };

                    found = Some((next_largest_sequence_number, sequence_number_to_use));
                    break;
                }
            }
            found
        };

        match dummy {
            Some((next_largest_sequence_number, sequence_number_to_use)) => {
                let buffers = self.process_sequence_number(StagedBuffer::dummy(), next_largest_sequence_number, true);
                (buffers, sequence_number_to_use)
            }
            None => (SpanningTupleBuffers::empty(), 0),
        }
    }

    /// Stages `staged_buffer_of_sequence_number` and searches for any
    /// spanning tuple it completes. Returns the buffers of every spanning
    /// tuple this call completed (zero, one, or — for a delimiter-bearing
    /// buffer — two).
    pub fn process_sequence_number(&self, staged_buffer_of_sequence_number: StagedBuffer, sequence_number: u64, has_delimiter: bool) -> SpanningTupleBuffers {
        let sequence_number_bitmap_count = sequence_number >> BITMAP_SIZE_BIT_SHIFT;
        let sequence_number_bitmap_offset = sequence_number_bitmap_count << BITMAP_SIZE_BIT_SHIFT;
        let sequence_number_bit_index = sequence_number & BITMAP_SIZE_MODULO;
        let sequence_number_bit = 1u64 << sequence_number_bit_index;

        let lower_bits_mask = sequence_number_bit - 1;
        let higher_bits_mask = MAX_VALUE ^ (lower_bits_mask | sequence_number_bit);

        let (snapshot, sequence_number_bitmap_index) = {
            let mut state = self.state.lock();
            let sequence_number_buffer_position = (sequence_number as usize) & (state.staged_buffers.len() - 1);
            state.staged_buffers[sequence_number_buffer_position] = staged_buffer_of_sequence_number.clone();
            let sequence_number_bitmap_index = sequence_number_bitmap_count & state.number_of_bitmaps_modulo;

            if has_delimiter {
                // produces the leading spanning tuple, the trailing one, and itself.
                state.staged_buffer_uses[sequence_number_buffer_position] = 3;
                state.tuple_delimiter_bitmaps[sequence_number_bitmap_index as usize] |= sequence_number_bit;
            } else {
                state.staged_buffer_uses[sequence_number_buffer_position] = 1;
                state.seen_and_used_bitmaps[sequence_number_bitmap_index as usize] |= sequence_number_bit;
            }

            let tuple = state.tuple_delimiter_bitmaps[sequence_number_bitmap_index as usize];
            let seen = state.seen_and_used_bitmaps[sequence_number_bitmap_index as usize];
            let wrapping_check_bitmap = (tuple | seen) ^ tuple;
            let need_lower = (lower_bits_mask | wrapping_check_bitmap) == wrapping_check_bitmap;
            let need_higher = (higher_bits_mask | wrapping_check_bitmap) == wrapping_check_bitmap;

            let snapshot = if need_lower || need_higher {
                Snapshot::Wrapping {
                    tail: state.tail,
                    modulo: state.number_of_bitmaps_modulo,
                    tuple: state.tuple_delimiter_bitmaps.clone(),
                    seen: state.seen_and_used_bitmaps.clone(),
                }
            } else {
                Snapshot::Local { tuple, seen }
            };
            (snapshot, sequence_number_bitmap_index)
        };

        let need_lower = matches!(&snapshot, Snapshot::Wrapping { .. })
            && Self::needs_lower(&snapshot, sequence_number_bit_index, lower_bits_mask, sequence_number_bitmap_index);
        let need_higher = matches!(&snapshot, Snapshot::Wrapping { .. })
            && Self::needs_higher(&snapshot, sequence_number_bit_index, higher_bits_mask, sequence_number_bitmap_index);
        let wrapping_mode = match (need_lower, need_higher) {
            (false, false) => WrappingMode::None,
            (true, false) => WrappingMode::Lower,
            (false, true) => WrappingMode::Higher,
            (true, true) => WrappingMode::LowerAndHigher,
        };

        let spanning_tuple = self.search(&snapshot, wrapping_mode, sequence_number_bit_index, sequence_number_bitmap_offset, sequence_number_bitmap_index, has_delimiter);
        let number_of_bitmaps_modulo_snapshot = snapshot.modulo(sequence_number_bitmap_index);

        if has_delimiter {
            self.check_spanning_tuple_with_delimiter(spanning_tuple, sequence_number, number_of_bitmaps_modulo_snapshot, staged_buffer_of_sequence_number)
        } else {
            if !(spanning_tuple.is_start_valid && spanning_tuple.is_end_valid) {
                return SpanningTupleBuffers::empty();
            }
            self.check_spanning_tuple_without_delimiter(spanning_tuple, sequence_number, number_of_bitmaps_modulo_snapshot)
        }
    }

    fn needs_lower(snapshot: &Snapshot, bit_index: u64, lower_mask: u64, bitmap_index: u64) -> bool {
        if let Snapshot::Wrapping { tuple, seen, .. } = snapshot {
            let t = tuple[bitmap_index as usize];
            let s = seen[bitmap_index as usize];
            let wrapping_check = (t | s) ^ t;
            let _ = bit_index;
            (lower_mask | wrapping_check) == wrapping_check
        } else {
            false
        }
    }

    fn needs_higher(snapshot: &Snapshot, bit_index: u64, higher_mask: u64, bitmap_index: u64) -> bool {
        if let Snapshot::Wrapping { tuple, seen, .. } = snapshot {
            let t = tuple[bitmap_index as usize];
            let s = seen[bitmap_index as usize];
            let wrapping_check = (t | s) ^ t;
            let _ = bit_index;
            (higher_mask | wrapping_check) == wrapping_check
        } else {
            false
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn search(
        &self,
        snapshot: &Snapshot,
        mode: WrappingMode,
        bit_index: u64,
        bitmap_offset: u64,
        bitmap_index: u64,
        has_delimiter: bool,
    ) -> SpanningTuple {
        match (mode, snapshot) {
            (WrappingMode::None, Snapshot::Local { tuple, seen }) => {
                let (start, start_valid) = Self::try_get_start(bit_index, bitmap_offset, *tuple, *seen);
                let (end, end_valid) = Self::try_get_end(bit_index, bitmap_offset, *tuple, *seen);
                SpanningTuple { span_start: start, span_end: end, is_start_valid: start_valid, is_end_valid: end_valid }
            }
            (WrappingMode::Lower, Snapshot::Wrapping { tuple, seen, .. }) => {
                let t = tuple[bitmap_index as usize];
                let s = seen[bitmap_index as usize];
                let (end, end_valid) = Self::try_get_end(bit_index, bitmap_offset, t, s);
                if end_valid || has_delimiter {
                    let (start, start_valid) = Self::find_lower_wrapping(bitmap_offset, bitmap_index as usize, snapshot);
                    SpanningTuple { span_start: start, span_end: end, is_start_valid: start_valid, is_end_valid: end_valid }
                } else {
                    SpanningTuple { span_start: INVALID_SEQUENCE_NUMBER, span_end: end, is_start_valid: false, is_end_valid: end_valid }
                }
            }
            (WrappingMode::Higher, Snapshot::Wrapping { tuple, seen, .. }) => {
                let t = tuple[bitmap_index as usize];
                let s = seen[bitmap_index as usize];
                let (start, start_valid) = Self::try_get_start(bit_index, bitmap_offset, t, s);
                if start_valid || has_delimiter {
                    let (end, end_valid) = Self::find_higher_wrapping(bitmap_offset, bitmap_index as usize, snapshot);
                    SpanningTuple { span_start: start, span_end: end, is_start_valid: start_valid, is_end_valid: end_valid }
                } else {
                    SpanningTuple { span_start: start, span_end: INVALID_SEQUENCE_NUMBER, is_start_valid: start_valid, is_end_valid: false }
                }
            }
            (WrappingMode::LowerAndHigher, Snapshot::Wrapping { .. }) => {
                let (start, start_valid) = Self::find_lower_wrapping(bitmap_offset, bitmap_index as usize, snapshot);
                if start_valid || has_delimiter {
                    let (end, end_valid) = Self::find_higher_wrapping(bitmap_offset, bitmap_index as usize, snapshot);
                    SpanningTuple { span_start: start, span_end: end, is_start_valid: start_valid, is_end_valid: end_valid }
                } else {
                    SpanningTuple { span_start: start, span_end: INVALID_SEQUENCE_NUMBER, is_start_valid: start_valid, is_end_valid: false }
                }
            }
            _ => unreachable!("wrapping mode always matches its snapshot variant"),
        }
    }

    /// Finds the closest tuple delimiter at or below `bit_index` within a
    /// single bitmap, by counting the run of consecutive "seen" bits
    /// leading up to it.
    fn try_get_start(bit_index: u64, bitmap_offset: u64, tuple: u64, seen: u64) -> (u64, bool) {
        let aligned_seen = seen << (SIZE_OF_BITMAP_IN_BITS - bit_index);
        let offset_to_closest = aligned_seen.leading_ones() as u64;
        let index_of_closest = bit_index - (offset_to_closest + 1);
        let sequence_number = bitmap_offset + index_of_closest;
        let is_delimiter = (1u64 << index_of_closest) & tuple != 0;
        (sequence_number, is_delimiter)
    }

    /// Mirror of [`Self::try_get_start`] searching upward from `bit_index`.
    fn try_get_end(bit_index: u64, bitmap_offset: u64, tuple: u64, seen: u64) -> (u64, bool) {
        let only_seen = seen & !tuple;
        let aligned = only_seen >> (bit_index + 1);
        let offset_to_closest = aligned.trailing_ones() as u64 + 1;
        let index_of_closest = bit_index + offset_to_closest;
        let sequence_number = bitmap_offset + index_of_closest;
        let is_delimiter = (1u64 << index_of_closest) & tuple != 0;
        (sequence_number, is_delimiter)
    }

    fn find_lower_wrapping(bitmap_offset: u64, current_bitmap_index: usize, snapshot: &Snapshot) -> (u64, bool) {
        let Snapshot::Wrapping { modulo, tuple, seen, .. } = snapshot else {
            unreachable!("lower wrapping search requires a wrapping snapshot");
        };
        let mut bitmap_index = current_bitmap_index;
        let mut offset = 0u64;
        loop {
            offset += 1;
            bitmap_index = ((current_bitmap_index as u64).wrapping_sub(offset) & modulo) as usize;
            let all_seen_no_delimiter = seen[bitmap_index] == MAX_VALUE && tuple[bitmap_index] == 0;
            if !all_seen_no_delimiter {
                break;
            }
        }
        let potential_start = seen[bitmap_index].leading_ones() as u64 + 1;
        let index_of_closest = SIZE_OF_BITMAP_IN_BITS - potential_start;
        let sequence_number = bitmap_offset.wrapping_sub(offset << BITMAP_SIZE_BIT_SHIFT).wrapping_add(index_of_closest);
        let is_delimiter = (1u64 << index_of_closest) & tuple[bitmap_index] != 0;
        (sequence_number, is_delimiter)
    }

    fn find_higher_wrapping(bitmap_offset: u64, current_bitmap_index: usize, snapshot: &Snapshot) -> (u64, bool) {
        let Snapshot::Wrapping { tail, modulo, tuple, seen } = snapshot else {
            unreachable!("higher wrapping search requires a wrapping snapshot");
        };
        let mut bitmap_index = current_bitmap_index;
        let mut offset = 0u64;
        loop {
            offset += 1;
            bitmap_index = ((current_bitmap_index as u64 + offset) & modulo) as usize;
            let all_seen_no_delimiter = seen[bitmap_index] == MAX_VALUE && tuple[bitmap_index] == 0;
            if !all_seen_no_delimiter {
                break;
            }
        }
        let only_seen = seen[bitmap_index] & !tuple[bitmap_index];
        let index_of_closest = only_seen.trailing_ones() as u64;
        let sequence_number = bitmap_offset + (offset << BITMAP_SIZE_BIT_SHIFT) + index_of_closest;
        let is_delimiter = (1u64 << index_of_closest) & tuple[bitmap_index] != 0;
        let tail_bitmap_index = tail & modulo;
        let is_not_tail_bitmap = bitmap_index as u64 != tail_bitmap_index;
        (sequence_number, is_delimiter && is_not_tail_bitmap)
    }

    fn check_spanning_tuple_without_delimiter(&self, spanning_tuple: SpanningTuple, sequence_number: u64, modulo_snapshot: u64) -> SpanningTupleBuffers {
        let bitmap_of_start = spanning_tuple.span_start >> BITMAP_SIZE_BIT_SHIFT;
        let bitmap_index_of_start = bitmap_of_start & modulo_snapshot;
        let position_of_start = spanning_tuple.span_start & BITMAP_SIZE_MODULO;
        let start_bit = 1u64 << position_of_start;

        let number_of_bitmaps_snapshot = modulo_snapshot + 1;
        let staged_buffer_size_modulo = (number_of_bitmaps_snapshot << BITMAP_SIZE_BIT_SHIFT) - 1;

        let mut buffers = Vec::new();
        let mut state = self.state.lock();
        for index in spanning_tuple.span_start..=spanning_tuple.span_end {
            let adjusted = (index & staged_buffer_size_modulo) as usize;
            state.staged_buffer_uses[adjusted] -= 1;
            let new_uses = state.staged_buffer_uses[adjusted];
            let buffer = if new_uses == 0 { std::mem::take(&mut state.staged_buffers[adjusted]) } else { state.staged_buffers[adjusted].clone() };
            buffers.push(buffer);
        }
        state.seen_and_used_bitmaps[bitmap_index_of_start as usize] |= start_bit;
        let completed_bitmap = state.seen_and_used_bitmaps[bitmap_index_of_start as usize] == MAX_VALUE;
        if completed_bitmap && bitmap_of_start == state.tail {
            self.increment_tail(&mut state);
        }
        state.is_first_tuple = false;
        drop(state);

        let local_index = (sequence_number - spanning_tuple.span_start) as usize;
        SpanningTupleBuffers { local_index, staged_buffers: buffers }
    }

    fn check_spanning_tuple_with_delimiter(
        &self,
        spanning_tuple: SpanningTuple,
        sequence_number: u64,
        modulo_snapshot: u64,
        staged_buffer_of_sequence_number: StagedBuffer,
    ) -> SpanningTupleBuffers {
        let bitmap_of_start = spanning_tuple.span_start >> BITMAP_SIZE_BIT_SHIFT;
        let bitmap_index_of_start = bitmap_of_start & modulo_snapshot;
        let position_of_start = spanning_tuple.span_start & BITMAP_SIZE_MODULO;
        let bitmap_of_sequence_number = sequence_number >> BITMAP_SIZE_BIT_SHIFT;
        let bitmap_index_of_sequence_number = bitmap_of_sequence_number & modulo_snapshot;
        let position_of_sequence_number = sequence_number & BITMAP_SIZE_MODULO;

        let first_start_bit = (spanning_tuple.is_start_valid as u64) << position_of_start;
        let second_start_bit = (spanning_tuple.is_end_valid as u64) << position_of_sequence_number;

        let start_index = if spanning_tuple.is_start_valid { spanning_tuple.span_start } else { sequence_number };
        let end_index = if spanning_tuple.is_end_valid { spanning_tuple.span_end } else { sequence_number };
        let uses_for_leading = (start_index < sequence_number) as i8;
        let uses_for_trailing = (sequence_number < end_index) as i8;
        let number_of_bitmaps_snapshot = modulo_snapshot + 1;
        let staged_buffer_size_modulo = (number_of_bitmaps_snapshot * SIZE_OF_BITMAP_IN_BITS) - 1;

        let mut state = self.state.lock();

        let min_sequence_number = state.tail << BITMAP_SIZE_BIT_SHIFT;
        if sequence_number < min_sequence_number {
            // Two other callers already resolved both spanning tuples touching this
            // buffer; whichever copy the shredder still holds is returned as-is.
            let adjusted = (sequence_number & staged_buffer_size_modulo) as usize;
            let still_owned = state.staged_buffers[adjusted].buffer.is_some();
            let returned = if still_owned { std::mem::take(&mut state.staged_buffers[adjusted]) } else { staged_buffer_of_sequence_number };
            return SpanningTupleBuffers { local_index: 0, staged_buffers: vec![returned] };
        }

        let mut buffers = Vec::new();
        for index in start_index..=end_index {
            let adjusted = (index & staged_buffer_size_modulo) as usize;
            let uses: i8 = if index != sequence_number { 1 } else { 1 + uses_for_leading + uses_for_trailing };
            state.staged_buffer_uses[adjusted] -= uses;
            let new_uses = state.staged_buffer_uses[adjusted];
            if new_uses < 0 {
                warn!(sequence_number, index, new_uses, "staged buffer uses went negative");
            }
            let buffer = if new_uses == 0 { std::mem::take(&mut state.staged_buffers[adjusted]) } else { state.staged_buffers[adjusted].clone() };
            buffers.push(buffer);
        }

        state.seen_and_used_bitmaps[bitmap_index_of_start as usize] |= first_start_bit;
        state.seen_and_used_bitmaps[bitmap_index_of_sequence_number as usize] |= second_start_bit;
        let first_completed = state.seen_and_used_bitmaps[bitmap_index_of_start as usize] == MAX_VALUE && spanning_tuple.is_start_valid;
        let second_completed = state.seen_and_used_bitmaps[bitmap_index_of_sequence_number as usize] == MAX_VALUE && spanning_tuple.is_end_valid;
        let first_completed_tail = first_completed && bitmap_of_start == state.tail;
        let second_completed_tail = second_completed && bitmap_of_sequence_number == state.tail;
        if first_completed_tail || second_completed_tail {
            self.increment_tail(&mut state);
        }
        state.is_first_tuple = false;

        let local_index = (sequence_number - start_index) as usize;
        SpanningTupleBuffers { local_index, staged_buffers: buffers }
    }

    /// Advances the tail across every fully-consumed bitmap, then — only if
    /// the tail just wrapped back to bitmap 0 and enough out-of-range
    /// admissions have piled up — doubles the bitmap vectors, but only when
    /// doing so would not change which bitmap any in-window sequence number
    /// maps to.
    fn increment_tail(&self, state: &mut ShredderState) {
        let mut tail_wrapped_around = false;
        let mut tail_bitmap_index = state.tail & state.number_of_bitmaps_modulo;
        loop {
            state.tuple_delimiter_bitmaps[tail_bitmap_index as usize] = 0;
            state.seen_and_used_bitmaps[tail_bitmap_index as usize] = 0;
            state.tail += 1;
            tail_wrapped_around |= tail_bitmap_index == 0;
            tail_bitmap_index = state.tail & state.number_of_bitmaps_modulo;
            if state.seen_and_used_bitmaps[tail_bitmap_index as usize] != MAX_VALUE {
                break;
            }
        }

        let limit_reached = state.resize_request_count >= self.resize_request_threshold;
        if limit_reached && tail_wrapped_around {
            let next_number_of_bitmaps = state.number_of_bitmaps << 1;
            let preserves_tail_placement = (state.tail & (next_number_of_bitmaps as u64 - 1)) == tail_bitmap_index;
            let within_limit = next_number_of_bitmaps <= self.max_number_of_bitmaps;
            if preserves_tail_placement && within_limit {
                warn!(from = state.number_of_bitmaps, to = next_number_of_bitmaps, "resizing sequence shredder bitmap vectors");
                state.number_of_bitmaps = next_number_of_bitmaps;
                state.number_of_bitmaps_modulo = (next_number_of_bitmaps - 1) as u64;
                state.tuple_delimiter_bitmaps.resize(next_number_of_bitmaps, 0);
                state.seen_and_used_bitmaps.resize(next_number_of_bitmaps, 0);
                state.staged_buffers.resize(next_number_of_bitmaps << BITMAP_SIZE_BIT_SHIFT, StagedBuffer::default());
                state.staged_buffer_uses.resize(next_number_of_bitmaps << BITMAP_SIZE_BIT_SHIFT, 0);
                state.resize_request_count = 0;
            }
        }
    }
}

impl fmt::Display for SequenceShredder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "SequenceShredder(number_of_bitmaps: {}, resize_request_count: {}, tail: {})",
            state.number_of_bitmaps, state.resize_request_count, state.tail
        )
    }
}

#[cfg(test)]
mod tests;
