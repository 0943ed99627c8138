// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every Omesh module.

/// Errors returned by Omesh operations.
#[derive(Debug)]
pub enum Error {
    /// An argument failed validation (out-of-range length, zero id, etc.).
    InvalidArg(String),
    /// A buffer did not contain a complete frame/record yet; caller should
    /// supply more bytes and retry.
    Incomplete,
    /// The requested entity (peer, doc, pending query, term) does not exist.
    NotFound,
    /// A fixed-capacity table (connection pool, pending-query table,
    /// ownership table) has no free slot left.
    Exhausted,
    /// Operation would block; non-blocking caller should retry later.
    Again,
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// The peer or connection was reset/closed unexpectedly.
    Reset,
    /// Configuration is missing or malformed.
    Config(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArg(msg) => write!(f, "invalid argument: {}", msg),
            Error::Incomplete => write!(f, "incomplete data"),
            Error::NotFound => write!(f, "not found"),
            Error::Exhausted => write!(f, "resource exhausted"),
            Error::Again => write!(f, "operation would block"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Reset => write!(f, "connection reset"),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for results using the crate's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;
