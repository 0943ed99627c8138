// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Directory-backed checkpoint format for the inverted index. Format is
//! implementation-defined; the only contract is surviving an
//! `open -> close -> open` round trip, so this sticks to the same
//! length-prefixed, little-endian discipline as the wire codec rather
//! than pulling in a serialization crate for something this small.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::index::postings::PostingList;

const SNAPSHOT_MAGIC: u32 = 0x4F4D_5350; // "OMSP"
const SNAPSHOT_VERSION: u8 = 1;
const SNAPSHOT_FILE: &str = "index.omesh";

/// Serializes the postings map and per-document term table to
/// `<dir>/index.omesh`.
pub fn save(
    dir: &Path,
    postings: &HashMap<String, PostingList>,
    doc_terms: &HashMap<u64, HashMap<String, u32>>,
) -> Result<()> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
    buf.push(SNAPSHOT_VERSION);

    buf.extend_from_slice(&(postings.len() as u32).to_le_bytes());
    for (term, pl) in postings {
        write_string(&mut buf, term);
        buf.extend_from_slice(&(pl.postings.len() as u32).to_le_bytes());
        for (&doc_id, &tf) in &pl.postings {
            buf.extend_from_slice(&doc_id.to_le_bytes());
            buf.extend_from_slice(&tf.to_le_bytes());
        }
    }

    buf.extend_from_slice(&(doc_terms.len() as u32).to_le_bytes());
    for (&doc_id, terms) in doc_terms {
        buf.extend_from_slice(&doc_id.to_le_bytes());
        buf.extend_from_slice(&(terms.len() as u32).to_le_bytes());
        for (term, &tf) in terms {
            write_string(&mut buf, term);
            buf.extend_from_slice(&tf.to_le_bytes());
        }
    }

    let path = dir.join(SNAPSHOT_FILE);
    let tmp_path = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(&buf)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Loads a previously saved checkpoint, or returns an empty index if none
/// exists yet at `dir`.
#[allow(clippy::type_complexity)]
pub fn load(
    dir: &Path,
) -> Result<(HashMap<String, PostingList>, HashMap<u64, HashMap<String, u32>>)> {
    let path = dir.join(SNAPSHOT_FILE);
    if !path.exists() {
        return Ok((HashMap::new(), HashMap::new()));
    }
    let mut buf = Vec::new();
    std::fs::File::open(&path)?.read_to_end(&mut buf)?;
    let mut cur = Cursor::new(&buf);

    let magic = cur.read_u32()?;
    let version = cur.read_u8()?;
    if magic != SNAPSHOT_MAGIC || version != SNAPSHOT_VERSION {
        return Err(Error::InvalidArg("bad snapshot header".into()));
    }

    let mut postings = HashMap::new();
    let term_count = cur.read_u32()?;
    for _ in 0..term_count {
        let term = cur.read_string()?;
        let mut pl = PostingList::default();
        let n = cur.read_u32()?;
        for _ in 0..n {
            let doc_id = cur.read_u64()?;
            let tf = cur.read_u32()?;
            pl.postings.insert(doc_id, tf);
        }
        postings.insert(term, pl);
    }

    let mut doc_terms = HashMap::new();
    let doc_count = cur.read_u32()?;
    for _ in 0..doc_count {
        let doc_id = cur.read_u64()?;
        let n = cur.read_u32()?;
        let mut terms = HashMap::new();
        for _ in 0..n {
            let term = cur.read_string()?;
            let tf = cur.read_u32()?;
            terms.insert(term, tf);
        }
        doc_terms.insert(doc_id, terms);
    }

    Ok((postings, doc_terms))
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Incomplete);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::InvalidArg("snapshot term is not valid UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_snapshot_loads_as_empty() {
        let dir = tempdir().unwrap();
        let (postings, doc_terms) = load(dir.path()).unwrap();
        assert!(postings.is_empty());
        assert!(doc_terms.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut postings = HashMap::new();
        let mut pl = PostingList::default();
        pl.postings.insert(1, 3);
        pl.postings.insert(2, 1);
        postings.insert("fox".to_string(), pl);

        let mut doc_terms = HashMap::new();
        let mut terms = HashMap::new();
        terms.insert("fox".to_string(), 3u32);
        doc_terms.insert(1u64, terms);

        save(dir.path(), &postings, &doc_terms).unwrap();
        let (loaded_postings, loaded_doc_terms) = load(dir.path()).unwrap();
        assert_eq!(loaded_postings["fox"].postings.get(&1), Some(&3));
        assert_eq!(loaded_doc_terms[&1]["fox"], 3);
    }
}
