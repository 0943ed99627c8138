// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Query router: a 64-slot pending-query table driving a multi-peer
//! fan-out search, merging `RESULTS`, sorting, deduplicating, and
//! enforcing per-query timeouts.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Number of concurrent in-flight distributed queries this router tracks.
pub const PENDING_SLOTS: usize = 64;

/// Hard cap on results returned to any single caller.
pub const CLUSTER_MAX_RESULTS: usize = 100;

/// Per-query deadline from issue to forced finalization.
pub const CLUSTER_QUERY_TIMEOUT_MS: u64 = 2000;

/// The merge buffer is over-allocated relative to `CLUSTER_MAX_RESULTS` so
/// post-sort dedup can compact without blocking; entries beyond this are
/// silently dropped (see DESIGN.md's Open Question decision).
const MERGE_BUFFER_CAPACITY: usize = 4 * CLUSTER_MAX_RESULTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Pending,
    Collecting,
    Done,
}

struct PendingSlot {
    query_id: u32,
    state: SlotState,
    expected: u32,
    received: u32,
    max_results: usize,
    merge_buffer: Vec<(u64, u64)>,
    deadline: Instant,
}

impl PendingSlot {
    fn free() -> Self {
        PendingSlot {
            query_id: 0,
            state: SlotState::Free,
            expected: 0,
            received: 0,
            max_results: 0,
            merge_buffer: Vec::new(),
            deadline: Instant::now(),
        }
    }
}

/// Fixed array of pending-query slots plus a 64-bit bitmap of which are
/// allocated. A freshly constructed `Router` has no outstanding queries;
/// it is an explicit struct, not a global, so tests get a clean instance.
pub struct Router {
    slots: Vec<PendingSlot>,
    bitmap: u64,
    finalized: Vec<u32>,
}

impl Router {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(PENDING_SLOTS);
        slots.resize_with(PENDING_SLOTS, PendingSlot::free);
        Router {
            slots,
            bitmap: 0,
            finalized: Vec::new(),
        }
    }

    fn is_allocated(&self, slot: usize) -> bool {
        self.bitmap & (1u64 << slot) != 0
    }

    /// Finds the lowest clear bit, zeroes that slot, and marks it
    /// allocated. Fails with `Exhausted` once all 64 bits are set.
    fn alloc_pending(&mut self) -> Result<usize> {
        let free_bits = !self.bitmap;
        if free_bits == 0 {
            return Err(Error::Exhausted);
        }
        let slot = free_bits.trailing_zeros() as usize;
        if slot >= PENDING_SLOTS {
            return Err(Error::Exhausted);
        }
        self.bitmap |= 1u64 << slot;
        self.slots[slot] = PendingSlot::free();
        Ok(slot)
    }

    /// Clears the bitmap bit and resets the slot to `FREE`.
    pub fn free_pending(&mut self, slot: usize) -> Result<()> {
        if slot >= PENDING_SLOTS {
            return Err(Error::InvalidArg("slot out of range".into()));
        }
        self.bitmap &= !(1u64 << slot);
        self.slots[slot] = PendingSlot::free();
        Ok(())
    }

    /// Linear scan for an allocated slot with a matching, non-zero
    /// `query_id`.
    pub fn find_pending(&self, query_id: u32) -> Option<usize> {
        if query_id == 0 {
            return None;
        }
        (0..PENDING_SLOTS).find(|&slot| self.is_allocated(slot) && self.slots[slot].query_id == query_id)
    }

    /// Issues a new distributed query: allocates a slot, seeds it with the
    /// local execution's contribution, and leaves it PENDING for peer
    /// responses. `max_results` is capped at `CLUSTER_MAX_RESULTS`.
    /// `timeout_ms` sets this query's deadline (callers typically pass
    /// `NodeConfig::query_timeout_ms`). The caller is responsible for
    /// generating `query_id` (via node state) and for broadcasting the
    /// SEARCH frame to `peer_count` peers.
    pub fn search(
        &mut self,
        query_id: u32,
        peer_count: u32,
        max_results: usize,
        local_results: &[(u64, u64)],
        timeout_ms: u64,
    ) -> Result<usize> {
        let max_results = max_results.min(CLUSTER_MAX_RESULTS);
        let slot = self.alloc_pending()?;
        let mut pending = PendingSlot::free();
        pending.query_id = query_id;
        pending.state = SlotState::Pending;
        pending.expected = 1 + peer_count;
        pending.received = 1;
        pending.max_results = max_results;
        pending.deadline = Instant::now() + Duration::from_millis(timeout_ms);
        pending
            .merge_buffer
            .extend(local_results.iter().take(CLUSTER_MAX_RESULTS).copied());
        self.slots[slot] = pending;
        if self.slots[slot].received >= self.slots[slot].expected {
            self.finalize(slot);
        }
        Ok(slot)
    }

    /// Merges a peer's RESULTS contribution. Unknown or already-`DONE`
    /// query ids are ignored, not errors. Returns `true` if this call
    /// drove the query to finalization.
    pub fn merge_results(&mut self, query_id: u32, incoming: &[(u64, u64)]) -> bool {
        let Some(slot) = self.find_pending(query_id) else {
            return false;
        };
        if self.slots[slot].state == SlotState::Done {
            return false;
        }
        self.slots[slot].state = SlotState::Collecting;
        let remaining = MERGE_BUFFER_CAPACITY.saturating_sub(self.slots[slot].merge_buffer.len());
        let take = incoming.len().min(remaining);
        self.slots[slot]
            .merge_buffer
            .extend_from_slice(&incoming[..take]);
        self.slots[slot].received += 1;
        if self.slots[slot].received >= self.slots[slot].expected {
            self.finalize(slot);
            true
        } else {
            false
        }
    }

    /// Sorts by score descending (ties broken by first-seen order via a
    /// stable sort), deduplicates by doc_id keeping the first (therefore
    /// highest-scoring) occurrence, caps at `max_results`, and marks the
    /// slot `DONE`. A second call on an already-`DONE` slot is a no-op.
    fn finalize(&mut self, slot: usize) {
        let s = &mut self.slots[slot];
        if s.state == SlotState::Done {
            return;
        }
        s.state = SlotState::Done;
        s.merge_buffer.sort_by(|a, b| b.1.cmp(&a.1));
        let mut seen = HashSet::new();
        s.merge_buffer.retain(|(doc_id, _)| seen.insert(*doc_id));
        s.merge_buffer.truncate(s.max_results);
        self.finalized.push(s.query_id);
    }

    /// Samples the clock and force-finalizes every allocated slot that is
    /// not `FREE`/`DONE` and whose deadline has passed. Returns how many
    /// were finalized. Intended to be driven from the reactor loop.
    pub fn check_timeouts(&mut self) -> usize {
        let now = Instant::now();
        let mut count = 0;
        for slot in 0..PENDING_SLOTS {
            if !self.is_allocated(slot) {
                continue;
            }
            let state = self.slots[slot].state;
            if state != SlotState::Free && state != SlotState::Done && self.slots[slot].deadline <= now {
                self.finalize(slot);
                count += 1;
            }
        }
        count
    }

    /// Drains the set of query ids that finalized since the last drain,
    /// modeling the spec's "invoke the callback" step as an explicit
    /// poll-and-drain instead of a raw function pointer.
    pub fn drain_finalized(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.finalized)
    }

    pub fn state_of(&self, slot: usize) -> Option<SlotState> {
        self.is_allocated(slot).then(|| self.slots[slot].state)
    }

    pub fn results_of(&self, slot: usize) -> Option<&[(u64, u64)]> {
        self.is_allocated(slot)
            .then(|| self.slots[slot].merge_buffer.as_slice())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
