// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer manager: accepts/initiates connections, runs the HELLO handshake
//! and PING/PONG heartbeats, buffers incoming bytes, and validates and
//! dispatches inbound frames.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::SocketAddr;

use mio::{Interest, Token};

use crate::error::{Error, Result};
use crate::net::pool::{ConnPool, ConnState, Direction, CONNECTION_POOL_CAPACITY};
use crate::net::reactor::{Reactor, CONNECTION_TOKEN_START};
use crate::net::socket;
use crate::wire::codec::{self, msg_type, FrameCodec};

const RECV_SCRATCH_SIZE: usize = 64 * 1024;

struct PendingWrite {
    queue: VecDeque<Vec<u8>>,
    offset: usize,
}

impl PendingWrite {
    fn new() -> Self {
        PendingWrite {
            queue: VecDeque::new(),
            offset: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// One slot's transport-level state: the live stream, its frame
/// reassembly codec, and anything queued for a future writable event.
struct Conn {
    stream: mio::net::TcpStream,
    codec: FrameCodec,
    pending: PendingWrite,
}

/// Outcome of [`PeerManager::readable`] for a single slot: messages this
/// manager consumed itself (PING/PONG/HELLO) are not included — only
/// frames the caller still needs to route to the message handlers.
pub struct ReadOutcome {
    pub frames: Vec<Vec<u8>>,
    pub closed: bool,
}

/// Builds on the connection pool, socket facade, and reactor to run the
/// peer-to-peer transport state machine described by the protocol.
pub struct PeerManager {
    pool: ConnPool,
    conns: Vec<Option<Conn>>,
    local_node: u64,
    next_token: usize,
    recv_scratch: Vec<u8>,
}

impl PeerManager {
    pub fn new(local_node: u64) -> Self {
        let mut conns = Vec::with_capacity(CONNECTION_POOL_CAPACITY);
        conns.resize_with(CONNECTION_POOL_CAPACITY, || None);
        PeerManager {
            pool: ConnPool::new(),
            conns,
            local_node,
            next_token: CONNECTION_TOKEN_START,
            recv_scratch: vec![0u8; RECV_SCRATCH_SIZE],
        }
    }

    pub fn pool(&self) -> &ConnPool {
        &self.pool
    }

    fn alloc_token(&mut self) -> usize {
        let t = self.next_token;
        self.next_token += 1;
        t
    }

    /// Accepts one pending connection off the reactor's listener.
    pub fn accept(&mut self, reactor: &Reactor) -> Result<usize> {
        let (mut stream, addr) = reactor.listener().accept()?;
        socket::tune_tcp_stream(&stream)?;

        let token = self.alloc_token();
        let slot = self.pool.alloc(Direction::Inbound, token, Some(addr))?;
        self.pool.get_mut(slot).unwrap().state = ConnState::Connected;

        reactor.add(&mut stream, Token(token), Interest::READABLE)?;
        self.conns[slot] = Some(Conn {
            stream,
            codec: FrameCodec::new(),
            pending: PendingWrite::new(),
        });
        self.pool.touch(slot);
        log::debug!("peer[{}] accepted from {}", slot, addr);
        Ok(slot)
    }

    /// Initiates a non-blocking outbound connect.
    pub fn connect(&mut self, reactor: &Reactor, addr: SocketAddr) -> Result<usize> {
        let mut stream = socket::tcp_connect(addr)?;
        let token = self.alloc_token();
        let slot = self.pool.alloc(Direction::Outbound, token, Some(addr))?;
        reactor.add(&mut stream, Token(token), Interest::WRITABLE)?;
        self.conns[slot] = Some(Conn {
            stream,
            codec: FrameCodec::new(),
            pending: PendingWrite::new(),
        });
        log::debug!("peer[{}] connecting to {}", slot, addr);
        Ok(slot)
    }

    /// Called when an outbound connection's socket becomes writable for
    /// the first time. Promotes to CONNECTED on success and sends HELLO.
    pub fn connect_complete(&mut self, reactor: &Reactor, slot: usize) -> Result<()> {
        let conn = self.conns[slot].as_mut().ok_or(Error::NotFound)?;
        socket::connect_finish(&conn.stream)?;
        socket::tune_tcp_stream(&conn.stream)?;

        let token = self.pool.get(slot).ok_or(Error::NotFound)?.token;
        reactor.modify(&mut conn.stream, Token(token), Interest::READABLE)?;

        let rec = self.pool.get_mut(slot).ok_or(Error::NotFound)?;
        rec.state = ConnState::Connected;
        self.pool.touch(slot);

        let hello = codec::build(msg_type::HELLO, self.local_node, 0, &[])?;
        let _ = self.send(slot, &hello);
        log::info!("peer[{}] connected", slot);
        Ok(())
    }

    /// Reads whatever is available, reassembles frames, and handles
    /// PING/PONG/HELLO internally. Any other frame type is returned to the
    /// caller for dispatch. EOF sets `closed = true` and the caller should
    /// follow with [`PeerManager::disconnect`].
    pub fn readable(&mut self, slot: usize) -> Result<ReadOutcome> {
        let mut out = ReadOutcome {
            frames: Vec::new(),
            closed: false,
        };
        loop {
            let n = {
                let conn = self.conns[slot].as_mut().ok_or(Error::NotFound)?;
                match conn.stream.read(&mut self.recv_scratch) {
                    Ok(0) => {
                        out.closed = true;
                        break;
                    }
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            };
            self.pool.touch(slot);
            {
                let conn = self.conns[slot].as_mut().ok_or(Error::NotFound)?;
                conn.codec.feed(&self.recv_scratch[..n]);
            }
            loop {
                let decoded = {
                    let conn = self.conns[slot].as_mut().ok_or(Error::NotFound)?;
                    conn.codec.decode_next()
                };
                match decoded {
                    Ok(Some(frame)) => self.handle_frame(slot, frame, &mut out)?,
                    Ok(None) => break,
                    // Invalid frames are dropped silently; the connection
                    // stays open per the propagation policy.
                    Err(_) => continue,
                }
            }
        }
        Ok(out)
    }

    fn handle_frame(&mut self, slot: usize, frame: Vec<u8>, out: &mut ReadOutcome) -> Result<()> {
        match codec::field::msg_type(&frame) {
            msg_type::PING => {
                let src = codec::field::src_node(&frame);
                let pong = codec::build(msg_type::PONG, self.local_node, src, &[])?;
                let _ = self.send(slot, &pong);
            }
            msg_type::PONG => {}
            msg_type::HELLO => {
                let remote = codec::field::src_node(&frame);
                if let Some(rec) = self.pool.get_mut(slot) {
                    rec.remote_node = remote;
                }
                log::info!("peer[{}] hello from node {:#x}", slot, remote);
            }
            _ => out.frames.push(frame),
        }
        Ok(())
    }

    /// Sends a fully-built frame on `slot`. Transient `WouldBlock` queues
    /// the remainder to flush on a future writable event.
    pub fn send(&mut self, slot: usize, frame: &[u8]) -> Result<()> {
        let conn = self.conns[slot].as_mut().ok_or(Error::NotFound)?;
        if !conn.pending.is_empty() {
            conn.pending.queue.push_back(frame.to_vec());
            return Ok(());
        }
        match conn.stream.write(frame) {
            Ok(n) if n == frame.len() => {}
            Ok(n) => {
                conn.pending.queue.push_back(frame[n..].to_vec());
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                conn.pending.queue.push_back(frame.to_vec());
            }
            Err(e) => return Err(e.into()),
        }
        self.pool.touch(slot);
        Ok(())
    }

    /// Drains queued writes once the socket reports writable again.
    pub fn flush(&mut self, reactor: &Reactor, slot: usize) -> Result<()> {
        let token = self.pool.get(slot).ok_or(Error::NotFound)?.token;
        let conn = self.conns[slot].as_mut().ok_or(Error::NotFound)?;
        while let Some(front) = conn.pending.queue.front() {
            match conn.stream.write(&front[conn.pending.offset..]) {
                Ok(n) if conn.pending.offset + n == front.len() => {
                    conn.pending.offset = 0;
                    conn.pending.queue.pop_front();
                }
                Ok(n) => {
                    conn.pending.offset += n;
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        let interest = if conn.pending.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE.add(Interest::WRITABLE)
        };
        reactor.modify(&mut conn.stream, Token(token), interest)?;
        Ok(())
    }

    /// Iterates the connected pool, sending `frame` to each; failures for
    /// one peer do not abort the broadcast. Returns the success count.
    pub fn broadcast(&mut self, frame: &[u8]) -> usize {
        let slots: Vec<usize> = self.pool.connected_slots().collect();
        let mut ok = 0;
        for slot in slots {
            if self.send(slot, frame).is_ok() {
                ok += 1;
            }
        }
        ok
    }

    /// Deregisters from the reactor and frees the pool slot, closing the
    /// socket deterministically (via `Conn`'s `Drop`).
    pub fn disconnect(&mut self, reactor: &Reactor, slot: usize) -> Result<()> {
        if let Some(mut conn) = self.conns[slot].take() {
            let _ = reactor.del(&mut conn.stream);
        }
        self.pool.free(slot)
    }

    pub fn connected_count(&self) -> usize {
        self.pool.live_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::reactor::Reactor;
    use std::net::TcpStream as StdTcpStream;

    #[test]
    fn connect_and_accept_round_trip() {
        let reactor = Reactor::init(0, 1).unwrap();
        let listen_addr = reactor.listener().local_addr().unwrap();
        let mut client = PeerManager::new(1);

        let client_slot = client.connect(&reactor, listen_addr).unwrap();
        assert_eq!(client.pool().get(client_slot).unwrap().state, ConnState::Connecting);

        // Drive the accept side with a plain blocking std connection so
        // the test does not depend on reactor timing.
        let _raw = StdTcpStream::connect(listen_addr).unwrap();
    }

    #[test]
    fn broadcast_with_no_peers_returns_zero() {
        let mut mgr = PeerManager::new(7);
        let frame = codec::build(msg_type::PING, 7, 0, &[]).unwrap();
        assert_eq!(mgr.broadcast(&frame), 0);
    }
}
