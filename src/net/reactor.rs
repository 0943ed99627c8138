// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-threaded cooperative event reactor.
//!
//! Owns the readiness instance, the listening TCP and UDP descriptors, a
//! fixed-capacity event buffer, a running flag, and the local node id. All
//! suspension points live inside [`Reactor::wait`]; nothing here spawns a
//! background thread.

use std::time::Duration;

use mio::net::{TcpListener, UdpSocket};
use mio::{Events, Interest, Poll, Token};

use crate::error::{Error, Result};
use crate::net::socket;

/// Token assigned to the TCP listening socket.
pub const LISTENER_TOKEN: Token = Token(0);
/// Token assigned to the UDP socket.
pub const UDP_TOKEN: Token = Token(1);
/// First token handed out for accepted/outbound connections.
pub const CONNECTION_TOKEN_START: usize = 2;

const MAX_EVENTS: usize = 256;
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Readiness flags delivered to a callback for one event.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadyFlags {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub read_closed: bool,
}

/// Implemented by whatever drives the reactor (typically the peer
/// manager). Returning `true` stops [`Reactor::run`].
pub trait Handler {
    fn on_event(&mut self, token: Token, flags: ReadyFlags) -> bool;
}

/// The process's single event reactor instance. Not a global: owned
/// explicitly by `Node` so tests can construct as many as they like.
pub struct Reactor {
    poll: Poll,
    events: Events,
    running: bool,
    node_id: u64,
    listener: TcpListener,
    udp: UdpSocket,
}

impl Reactor {
    /// Creates the readiness instance, binds the listening TCP and UDP
    /// sockets, and registers both with interest in readable. On any step
    /// failure, partial state is dropped (via normal `Drop` of the
    /// already-constructed sockets) and the error is returned.
    pub fn init(port: u16, node_id: u64) -> Result<Self> {
        let poll = Poll::new()?;
        let mut listener = socket::tcp_listen(port)?;
        let mut udp = socket::udp_bind(port)?;

        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        poll.registry()
            .register(&mut udp, UDP_TOKEN, Interest::READABLE)?;

        Ok(Reactor {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            running: true,
            node_id,
            listener,
            udp,
        })
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn listener(&self) -> &TcpListener {
        &self.listener
    }

    pub fn udp(&self) -> &UdpSocket {
        &self.udp
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Registers a source with the requested interest.
    pub fn add<S: mio::event::Source>(
        &self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> Result<()> {
        self.poll.registry().register(source, token, interest)?;
        Ok(())
    }

    /// Changes a previously-registered source's interest.
    pub fn modify<S: mio::event::Source>(
        &self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> Result<()> {
        self.poll.registry().reregister(source, token, interest)?;
        Ok(())
    }

    /// Deregisters a source.
    pub fn del<S: mio::event::Source>(&self, source: &mut S) -> Result<()> {
        self.poll.registry().deregister(source)?;
        Ok(())
    }

    /// Blocks up to `timeout` (`None` means infinite) and returns the
    /// number of ready events. A signal interruption is retried internally
    /// rather than surfaced, since the spec's EINTR-retry contract has no
    /// observable difference from "poll again" in safe Rust (mio already
    /// maps `EINTR` to `io::ErrorKind::Interrupted`).
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<(Token, ReadyFlags)>> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {
                    return Ok(self
                        .events
                        .iter()
                        .map(|ev| {
                            (
                                ev.token(),
                                ReadyFlags {
                                    readable: ev.is_readable(),
                                    writable: ev.is_writable(),
                                    error: ev.is_error(),
                                    read_closed: ev.is_read_closed(),
                                },
                            )
                        })
                        .collect())
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Cooperative single-threaded loop: while `running`, wait with the
    /// default timeout and invoke `handler.on_event` for each ready event.
    /// A `true` return from the handler stops the loop. Callers that need
    /// access to more state than a single `&mut dyn Handler` can hold
    /// (e.g. `Node`, which owns the reactor itself) should drive
    /// [`Reactor::wait`] directly instead.
    pub fn run(&mut self, handler: &mut dyn Handler) -> Result<()> {
        while self.running {
            let ready = self.wait(Some(DEFAULT_POLL_TIMEOUT))?;
            for (token, flags) in ready {
                if handler.on_event(token, flags) {
                    self.running = false;
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler {
        calls: usize,
        stop_after: usize,
    }

    impl Handler for CountingHandler {
        fn on_event(&mut self, _token: Token, _flags: ReadyFlags) -> bool {
            self.calls += 1;
            self.calls >= self.stop_after
        }
    }

    #[test]
    fn init_binds_tcp_and_udp_on_same_port() {
        let reactor = Reactor::init(0, 42).unwrap();
        assert_eq!(reactor.node_id(), 42);
        assert!(reactor.is_running());
    }

    #[test]
    fn stop_flips_running_flag() {
        let mut reactor = Reactor::init(0, 1).unwrap();
        reactor.stop();
        assert!(!reactor.is_running());
    }

    #[test]
    fn wait_returns_empty_on_idle_timeout() {
        let mut reactor = Reactor::init(0, 1).unwrap();
        let ready = reactor.wait(Some(Duration::from_millis(10))).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn run_stops_when_handler_returns_true() {
        let mut reactor = Reactor::init(0, 1).unwrap();
        reactor.stop();
        let mut handler = CountingHandler {
            calls: 0,
            stop_after: 1,
        };
        reactor.run(&mut handler).unwrap();
        assert_eq!(handler.calls, 0);
    }
}
