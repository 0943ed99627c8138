// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local query execution context: parse a query string into terms, score
//! matching documents, and hand back a ranked result list.

use std::collections::{HashMap, HashSet};

use crate::index::postings::Index;
use crate::index::tfidf;
use crate::index::tokenizer;

/// Term-combination semantics for a query, taken from the flags byte on
/// the wire (bit 0 clear = OR, set = AND).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Or,
    And,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Or
    }
}

/// A scoped query execution: parse, execute, then read results back out
/// by index.
pub struct QueryContext {
    max_results: usize,
    mode: Mode,
    terms: Vec<String>,
    results: Vec<(u64, u64)>,
}

impl QueryContext {
    pub fn new(max_results: usize) -> Self {
        QueryContext {
            max_results,
            mode: Mode::Or,
            terms: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Tokenizes `query`, recording its terms and the AND/OR mode.
    /// Returns the number of accepted (tokenized) terms; `0` if the query
    /// produced no tokens at all.
    pub fn parse(&mut self, query: &str, mode: Mode) -> usize {
        self.mode = mode;
        self.terms = tokenizer::tokenize(query);
        self.terms.len()
    }

    /// Scores every document matching the parsed terms against `index`
    /// and ranks them descending by score. Returns the result count.
    pub fn execute(&mut self, index: &Index) -> usize {
        let mut scores: HashMap<u64, u64> = HashMap::new();
        for term in &self.terms {
            let Some(pl) = index.postings_for(term) else {
                continue;
            };
            let df = pl.df();
            let n = index.doc_count();
            for (&doc_id, &tf) in &pl.postings {
                *scores.entry(doc_id).or_insert(0) += tfidf::tfidf_score(tf, df, n);
            }
        }

        if self.mode == Mode::And && !self.terms.is_empty() {
            let mut allowed: Option<HashSet<u64>> = None;
            for term in &self.terms {
                let doc_set: HashSet<u64> = index
                    .postings_for(term)
                    .map(|pl| pl.postings.keys().copied().collect())
                    .unwrap_or_default();
                allowed = Some(match allowed {
                    None => doc_set,
                    Some(prev) => prev.intersection(&doc_set).copied().collect(),
                });
            }
            let allowed = allowed.unwrap_or_default();
            scores.retain(|doc_id, _| allowed.contains(doc_id));
        }

        let mut results: Vec<(u64, u64)> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.cmp(&a.1));
        results.truncate(self.max_results);
        self.results = results;
        self.results.len()
    }

    pub fn get_result(&self, i: usize) -> Option<(u64, u64)> {
        self.results.get(i).copied()
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    pub fn results(&self) -> &[(u64, u64)] {
        &self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn indexed_single_doc() -> Index {
        let dir = tempdir().unwrap();
        let mut idx = Index::open(dir.path()).unwrap();
        idx.add(1, "The quick brown fox");
        idx
    }

    #[test]
    fn single_document_search_matches_and_scores_deterministically() {
        // A term that appears in every document of the corpus (df == N)
        // carries no discriminating weight under the documented
        // `tfidf_calc` contract (`N/df == 1` => `0`) — see DESIGN.md for
        // why this, not a smoothed score, is what this implementation
        // returns for a single-document corpus.
        let idx = indexed_single_doc();
        let mut ctx = QueryContext::new(10);
        assert_eq!(ctx.parse("quick", Mode::Or), 1);
        assert_eq!(ctx.execute(&idx), 1);
        let (doc, score) = ctx.get_result(0).unwrap();
        assert_eq!(doc, 1);
        assert_eq!(score, 0);
    }

    #[test]
    fn term_unique_to_one_document_scores_above_zero() {
        let dir = tempdir().unwrap();
        let mut idx = Index::open(dir.path()).unwrap();
        idx.add(1, "quick fox");
        idx.add(2, "slow turtle");

        let mut ctx = QueryContext::new(10);
        ctx.parse("quick", Mode::Or);
        ctx.execute(&idx);
        let (doc, score) = ctx.get_result(0).unwrap();
        assert_eq!(doc, 1);
        assert!(score > 0);
    }

    #[test]
    fn and_mode_requires_all_terms_present() {
        let dir = tempdir().unwrap();
        let mut idx = Index::open(dir.path()).unwrap();
        idx.add(1, "alpha beta");
        idx.add(2, "alpha gamma");

        let mut ctx = QueryContext::new(10);
        ctx.parse("alpha beta", Mode::And);
        ctx.execute(&idx);
        assert_eq!(ctx.result_count(), 1);
        assert_eq!(ctx.get_result(0).unwrap().0, 1);
    }

    #[test]
    fn or_mode_unions_all_terms() {
        let dir = tempdir().unwrap();
        let mut idx = Index::open(dir.path()).unwrap();
        idx.add(1, "alpha beta");
        idx.add(2, "alpha gamma");

        let mut ctx = QueryContext::new(10);
        ctx.parse("beta gamma", Mode::Or);
        ctx.execute(&idx);
        assert_eq!(ctx.result_count(), 2);
    }

    #[test]
    fn out_of_range_result_is_none() {
        let idx = indexed_single_doc();
        let mut ctx = QueryContext::new(10);
        ctx.parse("quick", Mode::Or);
        ctx.execute(&idx);
        assert!(ctx.get_result(5).is_none());
    }

    #[test]
    fn caps_results_at_max_results() {
        let dir = tempdir().unwrap();
        let mut idx = Index::open(dir.path()).unwrap();
        for doc_id in 1..=5u64 {
            idx.add(doc_id, "shared");
        }
        let mut ctx = QueryContext::new(2);
        ctx.parse("shared", Mode::Or);
        let n = ctx.execute(&idx);
        assert_eq!(n, 2);
    }
}
