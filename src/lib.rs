// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Omesh — a peer-to-peer distributed full-text search node.
//!
//! ```text
//!  +----------+    +--------------+    +-----------+
//!  |  Node    |--->|  PeerManager |--->|  ConnPool  |
//!  | (owns    |    |  (handshake, |    |  (256      |
//!  |  every-  |    |   frames)    |    |   slots)   |
//!  |  thing)  |    +--------------+    +-----------+
//!  |          |           ^
//!  |          |           |  mio::Poll
//!  |          |    +--------------+
//!  |          |--->|   Reactor    |
//!  |          |    +--------------+
//!  |          |
//!  |          |    +--------------+    +----------------+
//!  |          |--->|    Index     |    | OwnershipTable |
//!  |          |    | (tokenize,   |    | (replication)  |
//!  |          |    |  TF-IDF)     |    +----------------+
//!  |          |
//!  |          |    +--------------+
//!  |          |--->|    Router    |  (pending-query slots,
//!  +----------+    +--------------+   merge, finalize, timeouts)
//! ```
//!
//! Every component above is an explicit field on [`node::Node`], not a
//! global: the whole core runs cooperatively on one thread, driven by
//! [`node::Node::run`].

pub mod config;
pub mod error;
pub mod index;
pub mod messages;
pub mod net;
pub mod node;
pub mod peer;
pub mod replication;
pub mod router;
pub mod wire;

pub use error::{Error, Result};
pub use node::{LifecycleState, Node, NodeState};
