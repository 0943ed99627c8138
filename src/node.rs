// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node state and the top-level `Node` that owns every collaborator and
//! drives the single cooperative event loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::Token;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::index::postings::Index;
use crate::index::query::{Mode, QueryContext};
use crate::messages;
use crate::net::pool::ConnState;
use crate::net::reactor::{Reactor, CONNECTION_TOKEN_START, LISTENER_TOKEN, UDP_TOKEN};
use crate::peer::PeerManager;
use crate::replication::{select_peers, OwnershipTable};
use crate::router::Router;

/// Coarse process lifecycle, independent of any one connection's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Syncing,
    Ready,
    Shutdown,
}

/// Per-node identity and monotonic counters. Deliberately a plain struct
/// field on [`Node`] rather than a process-wide global, so multiple nodes
/// can coexist in one test binary.
pub struct NodeState {
    id: u64,
    lifecycle: LifecycleState,
    doc_count: u64,
    peer_count: u32,
    query_seq: u32,
    last_sync: Instant,
}

impl NodeState {
    /// Builds a fresh state. `id_hint == 0` generates a random 64-bit id
    /// via the OS CSPRNG, falling back to `1` in the vanishingly unlikely
    /// case it returns exactly `0`.
    pub fn new(id_hint: u64) -> Self {
        let id = if id_hint != 0 {
            id_hint
        } else {
            let mut bytes = [0u8; 8];
            getrandom::getrandom(&mut bytes).ok();
            let generated = u64::from_le_bytes(bytes);
            if generated == 0 {
                1
            } else {
                generated
            }
        };
        NodeState {
            id,
            lifecycle: LifecycleState::Init,
            doc_count: 0,
            peer_count: 0,
            query_seq: 0,
            last_sync: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn set_lifecycle(&mut self, state: LifecycleState) {
        self.lifecycle = state;
    }

    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    pub fn peer_count(&self) -> u32 {
        self.peer_count
    }

    pub fn inc_doc_count(&mut self) {
        self.doc_count = self.doc_count.saturating_add(1);
    }

    pub fn dec_doc_count(&mut self) {
        self.doc_count = self.doc_count.saturating_sub(1);
    }

    pub fn set_peer_count(&mut self, count: u32) {
        self.peer_count = count;
    }

    /// Monotonic, wrapping, never-zero query id generator.
    pub fn generate_query_id(&mut self) -> u32 {
        self.query_seq = self.query_seq.wrapping_add(1);
        if self.query_seq == 0 {
            self.query_seq = 1;
        }
        self.query_seq
    }

    pub fn update_sync_time(&mut self) {
        self.last_sync = Instant::now();
    }

    pub fn get_sync_time(&self) -> Instant {
        self.last_sync
    }
}

const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Owns every collaborator (reactor, peer manager, index, ownership
/// table, router, node state) and drives the process's single event
/// loop.
pub struct Node {
    reactor: Reactor,
    peers: PeerManager,
    index: Index,
    ownership: OwnershipTable,
    router: Router,
    state: NodeState,
    config: NodeConfig,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let state = NodeState::new(config.node_id);
        let reactor = Reactor::init(config.port, state.id())?;
        let peers = PeerManager::new(state.id());
        let index = Index::open(&config.snapshot_dir)?;
        let ownership = OwnershipTable::new();
        let router = Router::new();

        let mut node = Node {
            reactor,
            peers,
            index,
            ownership,
            router,
            state,
            config,
        };
        node.state.set_lifecycle(LifecycleState::Syncing);
        for addr in node.config.peers.clone() {
            if let Err(e) = node.connect_peer(addr) {
                log::warn!("initial dial to {} failed: {}", addr, e);
            }
        }
        node.state.set_lifecycle(LifecycleState::Ready);
        Ok(node)
    }

    pub fn id(&self) -> u64 {
        self.state.id()
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn connect_peer(&mut self, addr: SocketAddr) -> Result<usize> {
        self.peers.connect(&self.reactor, addr)
    }

    /// Indexes `content` under `doc_id` locally, records ownership with
    /// this node as primary, and replicates an INDEX PUT to the peers
    /// [`select_peers`] chooses.
    pub fn index_doc(&mut self, doc_id: u64, content: &str) -> Result<usize> {
        let was_present = self.index.contains_doc(doc_id);
        let terms = self.index.add(doc_id, content);
        if !was_present {
            self.state.inc_doc_count();
        }

        let peer_count = self.peers.connected_count() as u32;
        let bitmap = select_peers(doc_id, peer_count, self.config.replication_factor);
        self.ownership.index_doc(doc_id, self.state.id(), bitmap)?;

        let frame = crate::wire::codec::build(
            crate::wire::codec::msg_type::INDEX,
            self.state.id(),
            0,
            &messages::encode_index(doc_id, messages::op::PUT, content.as_bytes()),
        )?;
        self.send_to_replicas(bitmap, &frame);
        Ok(terms)
    }

    pub fn remove_doc(&mut self, doc_id: u64) -> Result<()> {
        if self.index.contains_doc(doc_id) {
            self.index.remove(doc_id);
            self.state.dec_doc_count();
        }
        let bitmap = self.ownership.get_replicas(doc_id).unwrap_or(0);
        self.ownership.delete_doc(doc_id);

        let frame = crate::wire::codec::build(
            crate::wire::codec::msg_type::INDEX,
            self.state.id(),
            0,
            &messages::encode_index(doc_id, messages::op::DELETE, &[]),
        )?;
        self.send_to_replicas(bitmap, &frame);
        Ok(())
    }

    fn send_to_replicas(&mut self, bitmap: u64, frame: &[u8]) {
        let slots: Vec<usize> = self.peers.pool().connected_slots().collect();
        for (i, &slot) in slots.iter().enumerate() {
            if bitmap & (1u64 << i) != 0 {
                let _ = self.peers.send(slot, frame);
            }
        }
    }

    /// Executes `query` locally, then fans it out to every connected peer
    /// and registers the query in the router for result collection.
    /// Returns the query id; use [`Node::drain_finished`] to pick up the
    /// merged result set once every peer has answered or the query times
    /// out.
    pub fn search(&mut self, query: &str, mode: Mode, max_results: usize) -> Result<u32> {
        let max_results = max_results.min(self.config.max_results);
        let mut ctx = QueryContext::new(max_results);
        ctx.parse(query, mode);
        ctx.execute(&self.index);

        let query_id = self.state.generate_query_id();
        let peer_count = self.peers.connected_count() as u32;
        self.router.search(
            query_id,
            peer_count,
            max_results,
            ctx.results(),
            self.config.query_timeout_ms,
        )?;

        if peer_count > 0 {
            let flags = if mode == Mode::And { messages::MODE_AND_FLAG } else { 0 };
            let body = messages::encode_search(query_id, flags, max_results as u32, query);
            let frame = crate::wire::codec::build(
                crate::wire::codec::msg_type::SEARCH,
                self.state.id(),
                0,
                &body,
            )?;
            self.peers.broadcast(&frame);
        }
        Ok(query_id)
    }

    /// Drains every query the router finished since the last call,
    /// returning each query id with its final, ranked result set.
    pub fn drain_finished(&mut self) -> Vec<(u32, Vec<(u64, u64)>)> {
        let ids = self.router.drain_finalized();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(slot) = self.router.find_pending(id) {
                let results = self.router.results_of(slot).unwrap_or(&[]).to_vec();
                out.push((id, results));
                let _ = self.router.free_pending(slot);
            }
        }
        out
    }

    pub fn close(&mut self) -> Result<()> {
        self.state.set_lifecycle(LifecycleState::Shutdown);
        self.index.close()
    }

    fn handle_listener_readable(&mut self) {
        loop {
            match self.peers.accept(&self.reactor) {
                Ok(_) => {}
                Err(crate::error::Error::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("accept failed: {}", e);
                    break;
                }
            }
        }
        self.state.set_peer_count(self.peers.connected_count() as u32);
    }

    fn handle_udp_readable(&mut self) {
        let mut scratch = [0u8; 2048];
        loop {
            match self.reactor.udp().recv_from(&mut scratch) {
                Ok((n, from)) => log::trace!("dropped {} UDP bytes from {}", n, from),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("udp recv failed: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_connection_event(&mut self, token: Token, flags: crate::net::reactor::ReadyFlags) {
        let Some(slot) = self.peers.pool().get_by_token(token.0) else {
            return;
        };
        if flags.error || flags.read_closed {
            let _ = self.peers.disconnect(&self.reactor, slot);
            self.state.set_peer_count(self.peers.connected_count() as u32);
            return;
        }

        let connecting = self
            .peers
            .pool()
            .get(slot)
            .map(|rec| rec.state == ConnState::Connecting)
            .unwrap_or(false);
        if connecting && flags.writable {
            if self.peers.connect_complete(&self.reactor, slot).is_err() {
                let _ = self.peers.disconnect(&self.reactor, slot);
                return;
            }
            self.state.set_peer_count(self.peers.connected_count() as u32);
        }

        if flags.writable {
            let _ = self.peers.flush(&self.reactor, slot);
        }

        if flags.readable {
            match self.peers.readable(slot) {
                Ok(outcome) => {
                    for frame in outcome.frames {
                        let local = self.state.id();
                        if let Err(e) = messages::dispatch(
                            &frame,
                            slot,
                            local,
                            &mut self.index,
                            &mut self.ownership,
                            &mut self.router,
                            &mut self.peers,
                        ) {
                            log::warn!("dispatch failed on peer[{}]: {}", slot, e);
                        }
                    }
                    if outcome.closed {
                        let _ = self.peers.disconnect(&self.reactor, slot);
                        self.state.set_peer_count(self.peers.connected_count() as u32);
                    }
                }
                Err(e) => {
                    log::warn!("read failed on peer[{}]: {}", slot, e);
                    let _ = self.peers.disconnect(&self.reactor, slot);
                    self.state.set_peer_count(self.peers.connected_count() as u32);
                }
            }
        }
    }

    /// Runs the cooperative event loop until `shutdown` is set or the
    /// reactor is told to stop. A single thread, no hidden concurrency:
    /// every iteration blocks in [`Reactor::wait`], dispatches each ready
    /// event, then checks the router for timed-out queries.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        while self.reactor.is_running() && !shutdown.load(Ordering::Relaxed) {
            let ready = self.reactor.wait(Some(POLL_TIMEOUT))?;
            for (token, flags) in ready {
                match token {
                    LISTENER_TOKEN => self.handle_listener_readable(),
                    UDP_TOKEN => self.handle_udp_readable(),
                    t if t.0 >= CONNECTION_TOKEN_START => self.handle_connection_event(t, flags),
                    _ => {}
                }
            }
            self.router.check_timeouts();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> NodeConfig {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = NodeConfig::default();
        cfg.snapshot_dir = dir.into_path();
        cfg
    }

    #[test]
    fn node_state_generates_nonzero_ids_across_wraparound() {
        let mut state = NodeState::new(1);
        state.query_seq = u32::MAX;
        let a = state.generate_query_id();
        let b = state.generate_query_id();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn doc_count_never_underflows() {
        let mut state = NodeState::new(1);
        state.dec_doc_count();
        assert_eq!(state.doc_count(), 0);
    }

    #[test]
    fn new_node_has_no_peers_and_nonzero_id() {
        let node = Node::new(test_config()).unwrap();
        assert_ne!(node.id(), 0);
        assert_eq!(node.state().peer_count(), 0);
    }

    #[test]
    fn search_with_no_peers_finalizes_immediately() {
        let mut node = Node::new(test_config()).unwrap();
        node.index_doc(1, "quick fox").unwrap();
        let qid = node.search("quick", Mode::Or, 10).unwrap();
        assert_ne!(qid, 0);
        let finished = node.drain_finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].0, qid);
    }

    #[test]
    fn index_doc_records_ownership_with_self_as_primary() {
        let mut node = Node::new(test_config()).unwrap();
        node.index_doc(5, "alpha beta").unwrap();
        assert_eq!(node.ownership.get_primary(5), Some(node.id()));
    }
}
