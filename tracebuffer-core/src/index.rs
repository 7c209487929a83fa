// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Bounded time-ordered index of cached batches
//!
//! Keeps the `capacity` newest entries seen since the last reset. On
//! overflow the entry with the smallest timestamp is evicted, which may be
//! the entry just pushed. This is a size-bounded min-heap, not an LRU.
//!
//! ```text
//! push(t=3) on {1, 2} (cap 2)  →  {1, 2, 3}  →  evict 1  →  {2, 3}
//! push(t=0) on {1, 2} (cap 2)  →  {0, 1, 2}  →  evict 0  →  {1, 2}
//! ```
//!
//! The index is not synchronised; [`crate::TraceBuffer`] owns it behind a
//! single mutex.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::model::TraceMetadata;

/// Heap slot ordered by `(time, seq)`. `seq` makes equal timestamps evict
/// in insertion order.
#[derive(Debug, Clone, Copy)]
struct Slot {
    seq: u64,
    meta: TraceMetadata,
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Slot {}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.meta
            .time
            .cmp(&other.meta.time)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug)]
pub struct TraceIndex {
    heap: BinaryHeap<Reverse<Slot>>,
    capacity: usize,
    next_seq: u64,
}

impl TraceIndex {
    /// `capacity` must be non-zero; configuration validation guarantees it.
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity.saturating_add(1)),
            capacity,
            next_seq: 0,
        }
    }

    /// Insert `meta`, evicting the oldest entry if the index overflows.
    ///
    /// Returns the evicted entry, if any.
    pub fn push(&mut self, meta: TraceMetadata) -> Option<TraceMetadata> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.heap.push(Reverse(Slot { seq, meta }));

        if self.heap.len() > self.capacity {
            self.heap.pop().map(|Reverse(slot)| slot.meta)
        } else {
            None
        }
    }

    /// Take every entry, oldest first, and leave the index empty.
    pub fn snapshot_and_reset(&mut self) -> Vec<TraceMetadata> {
        let heap = std::mem::replace(
            &mut self.heap,
            BinaryHeap::with_capacity(self.capacity.saturating_add(1)),
        );
        self.next_seq = 0;

        // Ascending on Reverse<Slot> is descending on Slot.
        heap.into_sorted_vec()
            .into_iter()
            .rev()
            .map(|Reverse(slot)| slot.meta)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
