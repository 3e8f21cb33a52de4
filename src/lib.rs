//! Decentralized Group Membership Library
//!
//! This library crate defines the protocol core behind the node binary
//! (`main.rs`): a gossip-based membership and failure-detection service for a
//! closed, statically known set of machines.
//!
//! ## Architecture Modules
//! The system is composed of three loosely coupled subsystems:
//!
//! - **`membership`**: The protocol core. Maintains the member table, merges
//!   incoming gossip with a monotonic counter rule, ages out silent peers with
//!   a two-phase (suspect -> evict) detector, and disseminates the table to a
//!   random majority subset of peers each tick.
//! - **`transport`**: The unreliable datagram layer. A fire-and-forget send
//!   primitive behind a trait (UDP in production, in-memory in tests) plus the
//!   closed address book mapping machine indices to endpoints.
//! - **`command`**: The operator surface. Parses the interactive text commands
//!   (join, leave, list, fault-injection toggles) and dispatches them to the
//!   membership service.

pub mod command;
pub mod membership;
pub mod transport;
