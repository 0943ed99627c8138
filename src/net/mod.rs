// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport layer: socket facade, connection pool, and the event
//! reactor that drives them.

pub mod pool;
pub mod reactor;
pub mod socket;

pub use pool::{ConnPool, ConnRecord, ConnState, Direction, CONNECTION_POOL_CAPACITY};
pub use reactor::{Handler, ReadyFlags, Reactor};
