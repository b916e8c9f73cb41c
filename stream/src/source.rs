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

//! The abstract shapes of the two external seams this crate sits between:
//! whatever reads bytes off the network or disk and assigns them sequence
//! numbers (a "source"), and whatever turns a completed spanning tuple back
//! into records ("formatting"). Neither has a concrete implementation here —
//! wire formats and deserialization are out of scope — but the trait
//! boundary is part of the contract a caller compiles against.

use crate::buffer::{RawBuffer, SequenceNumber};
use crate::shredder::SpanningTupleBuffers;

/// Hands a freshly-read buffer to a [`crate::shredder::SequenceShredder`].
/// Implemented by whatever owns the network/file connection; this crate only
/// consumes the `(buffer, sequence_number, has_delimiter)` triple it submits.
pub trait SourceAdapter: Send + Sync {
    fn submit(&self, buffer: RawBuffer, sequence_number: SequenceNumber, has_delimiter: bool);
}

/// Turns the buffers backing one completed spanning tuple into the records a
/// downstream pipeline operates on. Implemented by whatever understands the
/// wire format those buffers were encoded in.
pub trait Formatter: Send + Sync {
    fn format(&self, group: SpanningTupleBuffers) -> Vec<RawBuffer>;
}
