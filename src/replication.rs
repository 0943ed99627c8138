// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Replication manager: per-document ownership table and hash-based peer
//! selection honoring a replication factor.

use crate::error::{Error, Result};

/// Capacity of the ownership table; acceptable as a linear scan at this
/// size per the replication design notes (a hash map keyed by doc_id
/// would be the substitute at larger capacity, without changing the
/// public contract).
pub const MAX_DOCS: usize = 4096;

/// Number of peers, at most, a document is replicated to.
pub const REPLICATION_FACTOR: usize = 3;

#[derive(Debug, Clone, Copy)]
struct OwnershipEntry {
    doc_id: u64,
    primary: u64,
    replica_bitmap: u64,
}

impl OwnershipEntry {
    fn empty() -> Self {
        OwnershipEntry {
            doc_id: 0,
            primary: 0,
            replica_bitmap: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.doc_id == 0
    }
}

/// Computes the replica bitmap for `doc_id` over `peer_count` connected
/// peers: each of up to `replication_factor` bits is
/// `(doc_id >> (8*i)) mod peer_count`. Purely a function of its inputs.
/// `peer_count == 0` always yields `0`. `replication_factor` is typically
/// [`REPLICATION_FACTOR`] but is taken as a parameter so `NodeConfig` can
/// override it per node.
pub fn select_peers(doc_id: u64, peer_count: u32, replication_factor: usize) -> u64 {
    if peer_count == 0 {
        return 0;
    }
    let mut bitmap = 0u64;
    for i in 0..replication_factor.min(64) {
        let shifted = doc_id >> (8 * i as u32);
        let peer_idx = shifted % u64::from(peer_count);
        bitmap |= 1u64 << peer_idx;
    }
    bitmap
}

/// Linear-scan table of per-document ownership records.
pub struct OwnershipTable {
    entries: Vec<OwnershipEntry>,
}

impl OwnershipTable {
    pub fn new() -> Self {
        OwnershipTable {
            entries: vec![OwnershipEntry::empty(); MAX_DOCS],
        }
    }

    fn find_index(&self, doc_id: u64) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| !e.is_empty() && e.doc_id == doc_id)
    }

    /// Returns the existing entry's index for `doc_id`, or allocates a
    /// fresh one in the first empty slot. Fails with `Exhausted` if the
    /// table is full and `doc_id` is new.
    fn alloc_index(&mut self, doc_id: u64) -> Result<usize> {
        if let Some(idx) = self.find_index(doc_id) {
            return Ok(idx);
        }
        match self.entries.iter().position(|e| e.is_empty()) {
            Some(idx) => Ok(idx),
            None => Err(Error::Exhausted),
        }
    }

    /// Records `doc_id` as owned by `primary`, replicated to the peers in
    /// `replica_bitmap`, incrementing the node's doc count via the
    /// caller-supplied hook. Fails with `Exhausted` at capacity.
    pub fn index_doc(&mut self, doc_id: u64, primary: u64, replica_bitmap: u64) -> Result<()> {
        if doc_id == 0 {
            return Err(Error::InvalidArg("doc_id must be non-zero".into()));
        }
        let idx = self.alloc_index(doc_id)?;
        self.entries[idx] = OwnershipEntry {
            doc_id,
            primary,
            replica_bitmap,
        };
        Ok(())
    }

    /// Clears `doc_id`'s ownership entry. A no-op if unknown.
    pub fn delete_doc(&mut self, doc_id: u64) {
        if let Some(idx) = self.find_index(doc_id) {
            self.entries[idx] = OwnershipEntry::empty();
        }
    }

    pub fn get_primary(&self, doc_id: u64) -> Option<u64> {
        self.find_index(doc_id).map(|idx| self.entries[idx].primary)
    }

    pub fn get_replicas(&self, doc_id: u64) -> Option<u64> {
        self.find_index(doc_id)
            .map(|idx| self.entries[idx].replica_bitmap)
    }

    pub fn is_primary(&self, doc_id: u64, node_id: u64) -> bool {
        self.get_primary(doc_id) == Some(node_id)
    }

    pub fn ownership_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_empty()).count()
    }
}

impl Default for OwnershipTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_peers_with_zero_peers_is_zero() {
        assert_eq!(select_peers(0x1234_5678, 0, REPLICATION_FACTOR), 0);
    }

    #[test]
    fn select_peers_is_deterministic_and_bounded() {
        let a = select_peers(0x1234_5678, 4, REPLICATION_FACTOR);
        let b = select_peers(0x1234_5678, 4, REPLICATION_FACTOR);
        assert_eq!(a, b);
        assert!(a.count_ones() as usize <= REPLICATION_FACTOR);
    }

    #[test]
    fn index_then_delete_clears_entry() {
        let mut table = OwnershipTable::new();
        table.index_doc(42, 1, 0b101).unwrap();
        assert_eq!(table.get_primary(42), Some(1));
        assert_eq!(table.get_replicas(42), Some(0b101));
        assert_eq!(table.ownership_count(), 1);

        table.delete_doc(42);
        assert_eq!(table.get_primary(42), None);
        assert_eq!(table.ownership_count(), 0);
    }

    #[test]
    fn re_indexing_same_doc_updates_in_place() {
        let mut table = OwnershipTable::new();
        table.index_doc(1, 1, 0).unwrap();
        table.index_doc(1, 2, 0b11).unwrap();
        assert_eq!(table.ownership_count(), 1);
        assert_eq!(table.get_primary(1), Some(2));
    }

    #[test]
    fn exhausted_when_table_is_full() {
        let mut table = OwnershipTable::new();
        for doc_id in 1..=MAX_DOCS as u64 {
            table.index_doc(doc_id, 1, 0).unwrap();
        }
        assert!(matches!(
            table.index_doc(MAX_DOCS as u64 + 1, 1, 0),
            Err(Error::Exhausted)
        ));
    }

    #[test]
    fn is_primary_checks_node_id() {
        let mut table = OwnershipTable::new();
        table.index_doc(5, 9, 0).unwrap();
        assert!(table.is_primary(5, 9));
        assert!(!table.is_primary(5, 1));
    }
}
