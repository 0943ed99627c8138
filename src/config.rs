// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime configuration surface. A plain struct, not a file-backed
//! loader: the binary fills it in from CLI flags, tests build it
//! directly.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::replication::REPLICATION_FACTOR;
use crate::router::CLUSTER_MAX_RESULTS;
use crate::router::CLUSTER_QUERY_TIMEOUT_MS;

/// Compile-time protocol defaults, overridable per-node at startup.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub port: u16,
    pub peers: Vec<SocketAddr>,
    pub snapshot_dir: PathBuf,
    /// `0` means generate a random id.
    pub node_id: u64,
    pub replication_factor: usize,
    pub max_results: usize,
    pub query_timeout_ms: u64,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            port: 0,
            peers: Vec::new(),
            snapshot_dir: PathBuf::from("."),
            node_id: 0,
            replication_factor: REPLICATION_FACTOR,
            max_results: CLUSTER_MAX_RESULTS,
            query_timeout_ms: CLUSTER_QUERY_TIMEOUT_MS,
            log_level: "info".to_string(),
        }
    }
}
