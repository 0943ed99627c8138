// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! omesh-node - runs a single Omesh search node.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use omesh::config::NodeConfig;
use omesh::node::Node;

/// Process-wide shutdown flag flipped by the SIGINT/SIGTERM handler. A
/// signal handler cannot safely close over a `Node` or any heap state, so
/// this is the one global this crate carries.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Run a single Omesh search node
#[derive(Parser, Debug)]
#[command(name = "omesh-node")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// TCP/UDP port to bind (0 picks an ephemeral port)
    #[arg(short, long, default_value = "7400")]
    port: u16,

    /// Peer address to dial at startup; repeatable
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Directory holding this node's index snapshot
    #[arg(long, default_value = "./omesh-data")]
    snapshot_dir: PathBuf,

    /// Override the generated 64-bit node id (0 = generate randomly)
    #[arg(long, default_value = "0")]
    node_id: u64,

    /// Number of peers each document is replicated to
    #[arg(long, default_value_t = omesh::replication::REPLICATION_FACTOR)]
    replication_factor: usize,

    /// Maximum results returned by a single query
    #[arg(long, default_value_t = omesh::router::CLUSTER_MAX_RESULTS)]
    max_results: usize,

    /// Distributed query timeout in milliseconds
    #[arg(long, default_value_t = omesh::router::CLUSTER_QUERY_TIMEOUT_MS)]
    query_timeout_ms: u64,

    /// Log level passed through to `env_logger` (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl From<Args> for NodeConfig {
    fn from(args: Args) -> Self {
        NodeConfig {
            port: args.port,
            peers: args.peers,
            snapshot_dir: args.snapshot_dir,
            node_id: args.node_id,
            replication_factor: args.replication_factor,
            max_results: args.max_results,
            query_timeout_ms: args.query_timeout_ms,
            log_level: args.log_level,
        }
    }
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
    }
}

fn main() {
    let args = Args::parse();
    std::env::set_var("RUST_LOG", std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()));
    env_logger::init();

    install_signal_handlers();

    let config: NodeConfig = args.into();
    let mut node = match Node::new(config) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("failed to start node: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("omesh node {:#x} listening", node.id());

    if let Err(e) = node.run(&SHUTDOWN) {
        log::error!("node run loop exited with error: {}", e);
    }

    if let Err(e) = node.close() {
        log::warn!("error closing node: {}", e);
    }
}
