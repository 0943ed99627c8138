// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory inverted index: terms map to posting lists of
//! `(doc_id, term_frequency)`, with a parallel per-document term table so
//! `remove` can undo exactly what `add` did without rescanning content.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::index::snapshot;
use crate::index::tokenizer;

/// A term's posting list: which documents contain it and how often, plus
/// its document frequency (`postings.len()`, kept explicit since the
/// snapshot format stores it directly).
#[derive(Debug, Default, Clone)]
pub struct PostingList {
    pub postings: HashMap<u64, u32>,
}

impl PostingList {
    pub fn df(&self) -> u32 {
        self.postings.len() as u32
    }
}

/// The resident inverted index, checkpointed to `dir` on [`Index::close`].
pub struct Index {
    dir: PathBuf,
    postings: HashMap<String, PostingList>,
    doc_terms: HashMap<u64, HashMap<String, u32>>,
}

impl Index {
    /// Opens `dir` (creating it if absent) and loads any previously
    /// checkpointed index.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let (postings, doc_terms) = snapshot::load(&dir)?;
        Ok(Index {
            dir,
            postings,
            doc_terms,
        })
    }

    /// Tokenizes `content` and indexes it under `doc_id`. Re-adding a
    /// `doc_id` already present replaces its previous contribution first
    /// (idempotent replace, not an error and not a duplicate insert).
    /// Returns the number of unique terms indexed for this document.
    pub fn add(&mut self, doc_id: u64, content: &str) -> usize {
        if self.doc_terms.contains_key(&doc_id) {
            self.remove(doc_id);
        }
        let mut freqs: HashMap<String, u32> = HashMap::new();
        for term in tokenizer::tokenize(content) {
            *freqs.entry(term).or_insert(0) += 1;
        }
        for (term, &tf) in &freqs {
            self.postings
                .entry(term.clone())
                .or_default()
                .postings
                .insert(doc_id, tf);
        }
        let count = freqs.len();
        self.doc_terms.insert(doc_id, freqs);
        count
    }

    /// Removes `doc_id`'s contribution. A no-op if the id is unknown.
    pub fn remove(&mut self, doc_id: u64) {
        let Some(freqs) = self.doc_terms.remove(&doc_id) else {
            return;
        };
        for term in freqs.keys() {
            if let Some(pl) = self.postings.get_mut(term) {
                pl.postings.remove(&doc_id);
                if pl.postings.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
    }

    /// Checkpoints the index back to its directory.
    pub fn close(&self) -> Result<()> {
        snapshot::save(&self.dir, &self.postings, &self.doc_terms)
    }

    /// Total number of distinct documents currently indexed (N).
    pub fn doc_count(&self) -> u64 {
        self.doc_terms.len() as u64
    }

    pub fn postings_for(&self, term: &str) -> Option<&PostingList> {
        self.postings.get(term)
    }

    pub fn contains_doc(&self, doc_id: u64) -> bool {
        self.doc_terms.contains_key(&doc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_returns_unique_term_count() {
        let dir = tempdir().unwrap();
        let mut idx = Index::open(dir.path()).unwrap();
        let n = idx.add(1, "the quick brown fox the fox");
        assert_eq!(n, 4); // the, quick, brown, fox
        assert_eq!(idx.doc_count(), 1);
    }

    #[test]
    fn add_then_remove_restores_empty_state() {
        let dir = tempdir().unwrap();
        let mut idx = Index::open(dir.path()).unwrap();
        idx.add(1, "alpha beta");
        idx.remove(1);
        assert_eq!(idx.doc_count(), 0);
        assert!(idx.postings_for("alpha").is_none());
    }

    #[test]
    fn re_adding_a_doc_id_replaces_not_duplicates() {
        let dir = tempdir().unwrap();
        let mut idx = Index::open(dir.path()).unwrap();
        idx.add(7, "alpha alpha alpha");
        idx.add(7, "beta");
        assert_eq!(idx.doc_count(), 1);
        assert!(idx.postings_for("alpha").is_none());
        let pl = idx.postings_for("beta").unwrap();
        assert_eq!(pl.postings.get(&7), Some(&1));
    }

    #[test]
    fn removing_unknown_doc_is_a_no_op() {
        let dir = tempdir().unwrap();
        let mut idx = Index::open(dir.path()).unwrap();
        idx.add(1, "alpha");
        idx.remove(999);
        assert_eq!(idx.doc_count(), 1);
    }

    #[test]
    fn close_then_open_round_trips() {
        let dir = tempdir().unwrap();
        {
            let mut idx = Index::open(dir.path()).unwrap();
            idx.add(1, "the quick brown fox");
            idx.close().unwrap();
        }
        let idx = Index::open(dir.path()).unwrap();
        assert_eq!(idx.doc_count(), 1);
        let pl = idx.postings_for("fox").unwrap();
        assert_eq!(pl.postings.get(&1), Some(&1));
    }
}
