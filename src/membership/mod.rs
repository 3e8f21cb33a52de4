//! Membership & Failure Detection Module
//!
//! A gossip-based group membership protocol: every node keeps a local table
//! of known members, spreads it to a random majority subset of peers each
//! tick, and ages out members whose heartbeat counters stop advancing.
//!
//! ## Core Mechanisms
//! - **Heartbeat counters**: each node increments only its own counter; a
//!   higher counter observed via gossip is the sole liveness signal.
//! - **Counter merge**: incoming fragments only ever raise counters, so the
//!   table tolerates reordered, duplicated and dropped datagrams.
//! - **Two-phase eviction**: an aging record is first marked suspect (when
//!   the suspicion mechanism is enabled) and later deleted unconditionally.
//! - **Incarnation timestamps**: a restart is a brand-new identity, so stale
//!   heartbeat state is never reused across lifetimes of the same machine.

pub mod service;
pub mod table;
pub mod types;

pub use service::{MembershipService, ProtocolConfig};
pub use table::MembershipTable;
pub use types::{Fragment, MemberRecord, NodeId, WireRecord};
