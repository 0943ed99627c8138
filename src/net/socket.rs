// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket facade: TCP listen/connect/accept, UDP bind, and the handful of
//! option tuning calls the peer manager needs.

use std::net::SocketAddr;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream, UdpSocket as MioUdpSocket};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};

const LISTEN_BACKLOG: i32 = 128;

/// Creates, tunes, and binds a non-blocking TCP listening socket on
/// `0.0.0.0:port`, ready to be registered with the reactor.
pub fn tcp_listen(port: u16) -> Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse().map_err(|_| {
        Error::InvalidArg("invalid bind address".into())
    })?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    let std_listener: std::net::TcpListener = socket.into();
    let listener = TcpListener::from_std(std_listener);
    Ok(listener)
}

/// Initiates a non-blocking TCP connect. The stream is typically not yet
/// writable when this returns; the reactor should watch for writable and
/// call [`connect_finish`].
pub fn tcp_connect(addr: SocketAddr) -> Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(e.into()),
    }
    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpStream::from_std(std_stream);
    Ok(stream)
}

/// Reads `SO_ERROR` to determine whether an in-progress connect finished
/// successfully. `Ok(())` means connected; any other `Err` should close
/// the connection.
pub fn connect_finish(stream: &TcpStream) -> Result<()> {
    match stream.take_error()? {
        None => Ok(()),
        Some(e) => Err(e.into()),
    }
}

/// Applies the post-accept/post-connect tuning this core relies on:
/// `TCP_NODELAY` (latency-sensitive small messages) and `SO_KEEPALIVE`
/// (detect dead peers without relying solely on application heartbeats).
pub fn tune_tcp_stream(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    let sock = socket2::SockRef::from(stream);
    sock.set_keepalive(true)?;
    sock.set_tcp_keepalive(
        &socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(30))
            .with_interval(Duration::from_secs(10)),
    )?;
    Ok(())
}

/// Binds a non-blocking UDP socket. Listened on but, per the protocol
/// contract, not otherwise driven by this core (reserved for future
/// service discovery).
pub fn udp_bind(port: u16) -> Result<MioUdpSocket> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse().map_err(|_| {
        Error::InvalidArg("invalid bind address".into())
    })?;
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    let std_socket: std::net::UdpSocket = socket.into();
    let socket = MioUdpSocket::from_std(std_socket);
    Ok(socket)
}
