// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SEARCH/RESULTS/INDEX payload encoding and the dispatch entry point
//! tying decoded wire frames to the index, replication table, router, and
//! peer manager.

use crate::error::{Error, Result};
use crate::index::postings::Index;
use crate::index::query::{Mode, QueryContext};
use crate::peer::PeerManager;
use crate::replication::OwnershipTable;
use crate::router::Router;
use crate::wire::codec::{self, msg_type};

/// Bit 0 of a SEARCH payload's flags field selects AND over OR term
/// combination, independent of the frame header's own flags byte.
pub const MODE_AND_FLAG: u32 = 1 << 0;

/// INDEX payload operation codes.
pub mod op {
    pub const PUT: u32 = 1;
    pub const DELETE: u32 = 2;
}

fn read_u32(buf: &[u8], off: usize) -> Result<u32> {
    buf.get(off..off + 4)
        .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
        .ok_or(Error::Incomplete)
}
fn read_u64(buf: &[u8], off: usize) -> Result<u64> {
    buf.get(off..off + 8)
        .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
        .ok_or(Error::Incomplete)
}

pub struct SearchPayload {
    pub query_id: u32,
    pub flags: u32,
    pub max_results: u32,
    pub query: String,
}

pub fn encode_search(query_id: u32, flags: u32, max_results: u32, query: &str) -> Vec<u8> {
    let q = query.as_bytes();
    let mut buf = Vec::with_capacity(16 + q.len());
    buf.extend_from_slice(&query_id.to_le_bytes());
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.extend_from_slice(&max_results.to_le_bytes());
    buf.extend_from_slice(&(q.len() as u32).to_le_bytes());
    buf.extend_from_slice(q);
    buf
}

pub fn decode_search(buf: &[u8]) -> Result<SearchPayload> {
    let query_id = read_u32(buf, 0)?;
    let flags = read_u32(buf, 4)?;
    let max_results = read_u32(buf, 8)?;
    let query_len = read_u32(buf, 12)? as usize;
    let bytes = buf
        .get(16..16 + query_len)
        .ok_or(Error::Incomplete)?;
    let query = String::from_utf8_lossy(bytes).into_owned();
    Ok(SearchPayload {
        query_id,
        flags,
        max_results,
        query,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ResultEntry {
    pub doc_id: u64,
    pub score: u32,
    pub flags: u32,
}

pub struct ResultsPayload {
    pub query_id: u32,
    pub total_matches: u32,
    pub entries: Vec<ResultEntry>,
}

pub fn encode_results(query_id: u32, total_matches: u32, entries: &[(u64, u64)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + entries.len() * 16);
    buf.extend_from_slice(&query_id.to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    buf.extend_from_slice(&total_matches.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    for &(doc_id, score) in entries {
        buf.extend_from_slice(&doc_id.to_le_bytes());
        let score = score.min(u64::from(u32::MAX)) as u32;
        buf.extend_from_slice(&score.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
    }
    buf
}

pub fn decode_results(buf: &[u8]) -> Result<ResultsPayload> {
    let query_id = read_u32(buf, 0)?;
    let result_count = read_u32(buf, 4)? as usize;
    let total_matches = read_u32(buf, 8)?;
    let available = buf.len().saturating_sub(16) / 16;
    if result_count > available {
        return Err(Error::Incomplete);
    }
    let mut entries = Vec::with_capacity(result_count);
    let mut off = 16;
    for _ in 0..result_count {
        let doc_id = read_u64(buf, off)?;
        let score = read_u32(buf, off + 8)?;
        let flags = read_u32(buf, off + 12)?;
        entries.push(ResultEntry { doc_id, score, flags });
        off += 16;
    }
    Ok(ResultsPayload {
        query_id,
        total_matches,
        entries,
    })
}

pub struct IndexPayload {
    pub doc_id: u64,
    pub operation: u32,
    pub data: Vec<u8>,
}

pub fn encode_index(doc_id: u64, operation: u32, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + data.len());
    buf.extend_from_slice(&doc_id.to_le_bytes());
    buf.extend_from_slice(&operation.to_le_bytes());
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
    buf
}

pub fn decode_index(buf: &[u8]) -> Result<IndexPayload> {
    let doc_id = read_u64(buf, 0)?;
    let operation = read_u32(buf, 8)?;
    let doc_len = read_u32(buf, 12)? as usize;
    let data = buf.get(16..16 + doc_len).ok_or(Error::Incomplete)?.to_vec();
    Ok(IndexPayload {
        doc_id,
        operation,
        data,
    })
}

/// Executes a SEARCH locally and sends the RESULTS frame straight back to
/// the peer slot it arrived on.
pub fn handle_search(
    local_node: u64,
    remote_node: u64,
    slot: usize,
    payload: &SearchPayload,
    index: &Index,
    peers: &mut PeerManager,
) -> Result<()> {
    let mode = if payload.flags & MODE_AND_FLAG != 0 {
        Mode::And
    } else {
        Mode::Or
    };
    let max_results = (payload.max_results as usize).min(crate::router::CLUSTER_MAX_RESULTS);
    let mut ctx = QueryContext::new(max_results);
    ctx.parse(&payload.query, mode);
    let total = ctx.execute(index) as u32;

    let body = encode_results(payload.query_id, total, ctx.results());
    let frame = codec::build(msg_type::RESULTS, local_node, remote_node, &body)?;
    peers.send(slot, &frame)
}

/// Merges a RESULTS payload into the router's pending-query table.
pub fn handle_results(router: &mut Router, payload: &ResultsPayload) -> bool {
    let entries: Vec<(u64, u64)> = payload
        .entries
        .iter()
        .map(|e| (e.doc_id, u64::from(e.score)))
        .collect();
    router.merge_results(payload.query_id, &entries)
}

/// Applies an INDEX payload locally. A `PUT` records ownership with
/// `remote_node` as primary and an empty replica bitmap (non-propagating,
/// per the Open Question decision in DESIGN.md); a `DELETE` clears both
/// the posting list and the ownership entry.
pub fn handle_index(
    remote_node: u64,
    payload: &IndexPayload,
    index: &mut Index,
    ownership: &mut OwnershipTable,
) -> Result<()> {
    match payload.operation {
        op::PUT => {
            let content = String::from_utf8_lossy(&payload.data);
            index.add(payload.doc_id, &content);
            ownership.index_doc(payload.doc_id, remote_node, 0)?;
        }
        op::DELETE => {
            index.remove(payload.doc_id);
            ownership.delete_doc(payload.doc_id);
        }
        _ => return Err(Error::InvalidArg(format!("unknown INDEX operation {}", payload.operation))),
    }
    Ok(())
}

/// Decodes `frame`'s message type and routes it to the matching handler.
/// Frame types this dispatcher does not recognize are dropped silently —
/// HELLO/PING/PONG never reach here, [`PeerManager::readable`] already
/// consumes them.
#[allow(clippy::too_many_arguments)]
pub fn dispatch(
    frame: &[u8],
    slot: usize,
    local_node: u64,
    index: &mut Index,
    ownership: &mut OwnershipTable,
    router: &mut Router,
    peers: &mut PeerManager,
) -> Result<()> {
    let remote_node = codec::field::src_node(frame);
    let payload = codec::field::payload(frame);
    match codec::field::msg_type(frame) {
        msg_type::SEARCH => {
            let search = decode_search(payload)?;
            handle_search(local_node, remote_node, slot, &search, index, peers)
        }
        msg_type::RESULTS => {
            let results = decode_results(payload)?;
            handle_results(router, &results);
            Ok(())
        }
        msg_type::INDEX => {
            let idx = decode_index(payload)?;
            handle_index(remote_node, &idx, index, ownership)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::CLUSTER_MAX_RESULTS;
    use std::io::Read;
    use std::time::Duration;

    #[test]
    fn search_payload_round_trips() {
        let buf = encode_search(7, MODE_AND_FLAG, 10, "quick fox");
        let decoded = decode_search(&buf).unwrap();
        assert_eq!(decoded.query_id, 7);
        assert_eq!(decoded.flags, MODE_AND_FLAG);
        assert_eq!(decoded.max_results, 10);
        assert_eq!(decoded.query, "quick fox");
    }

    #[test]
    fn results_payload_round_trips() {
        let buf = encode_results(3, 5, &[(1, 20), (2, 10)]);
        let decoded = decode_results(&buf).unwrap();
        assert_eq!(decoded.query_id, 3);
        assert_eq!(decoded.total_matches, 5);
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[0].doc_id, 1);
        assert_eq!(decoded.entries[0].score, 20);
    }

    #[test]
    fn index_payload_round_trips() {
        let buf = encode_index(42, op::PUT, b"hello world");
        let decoded = decode_index(&buf).unwrap();
        assert_eq!(decoded.doc_id, 42);
        assert_eq!(decoded.operation, op::PUT);
        assert_eq!(decoded.data, b"hello world");
    }

    #[test]
    fn truncated_search_payload_is_incomplete() {
        let buf = encode_search(1, 0, 1, "x");
        assert!(matches!(decode_search(&buf[..10]), Err(Error::Incomplete)));
    }

    #[test]
    fn decode_results_rejects_result_count_exceeding_payload_length() {
        let mut buf = encode_results(1, 0, &[(1, 10)]);
        // claim two entries while only one is actually present.
        buf[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(decode_results(&buf), Err(Error::Incomplete)));
    }

    #[test]
    fn handle_search_caps_oversized_max_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path()).unwrap();
        for doc_id in 1..=(CLUSTER_MAX_RESULTS as u64 + 20) {
            index.add(doc_id, "shared");
        }

        let reactor = crate::net::reactor::Reactor::init(0, 1).unwrap();
        let listen_addr = reactor.listener().local_addr().unwrap();
        let mut client = std::net::TcpStream::connect(listen_addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let mut server_peers = PeerManager::new(1);
        let slot = server_peers.accept(&reactor).unwrap();

        let payload = SearchPayload {
            query_id: 9,
            flags: 0,
            max_results: u32::MAX,
            query: "shared".to_string(),
        };
        handle_search(1, 2, slot, &payload, &index, &mut server_peers).unwrap();

        let mut header = [0u8; codec::HEADER_SIZE];
        client.read_exact(&mut header).unwrap();
        let length = codec::field::length(&header) as usize;
        let mut rest = vec![0u8; length];
        client.read_exact(&mut rest).unwrap();
        let mut frame = header.to_vec();
        frame.extend_from_slice(&rest);
        codec::validate(&frame, frame.len()).unwrap();

        let results = decode_results(codec::field::payload(&frame)).unwrap();
        assert!(results.entries.len() <= CLUSTER_MAX_RESULTS);
    }

    #[test]
    fn dispatch_routes_search_frame_and_replies_with_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path()).unwrap();
        index.add(1, "quick fox");
        let mut ownership = OwnershipTable::new();
        let mut router = Router::new();

        let reactor = crate::net::reactor::Reactor::init(0, 1).unwrap();
        let listen_addr = reactor.listener().local_addr().unwrap();
        let mut client = std::net::TcpStream::connect(listen_addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let mut server_peers = PeerManager::new(1);
        let slot = server_peers.accept(&reactor).unwrap();

        let body = encode_search(3, 0, 10, "quick");
        let frame = codec::build(msg_type::SEARCH, 2, 1, &body).unwrap();
        dispatch(
            &frame,
            slot,
            1,
            &mut index,
            &mut ownership,
            &mut router,
            &mut server_peers,
        )
        .unwrap();

        let mut header = [0u8; codec::HEADER_SIZE];
        client.read_exact(&mut header).unwrap();
        assert_eq!(codec::field::msg_type(&header), msg_type::RESULTS);
    }

    #[test]
    fn handle_index_put_then_delete_round_trips_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path()).unwrap();
        let mut ownership = OwnershipTable::new();

        let put = IndexPayload {
            doc_id: 9,
            operation: op::PUT,
            data: b"quick fox".to_vec(),
        };
        handle_index(5, &put, &mut index, &mut ownership).unwrap();
        assert!(index.contains_doc(9));
        assert_eq!(ownership.get_primary(9), Some(5));
        assert_eq!(ownership.get_replicas(9), Some(0));

        let delete = IndexPayload {
            doc_id: 9,
            operation: op::DELETE,
            data: Vec::new(),
        };
        handle_index(5, &delete, &mut index, &mut ownership).unwrap();
        assert!(!index.contains_doc(9));
        assert_eq!(ownership.get_primary(9), None);
    }
}
