//! Core Data Types
//!
//! Defines node identity, the locally-held member record, and the wire shape
//! exchanged between peers. A join announcement, a routine gossip round and a
//! departure notice all share the same wire shape: a mapping from node id
//! string to a partial record.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Instant;

/// Identity of one lifetime of one process.
///
/// `incarnation` is the unix timestamp of the node's most recent (re)join, so
/// a restarted process is a brand-new identity and never inherits stale
/// heartbeat state. Structural equality: two ids with the same ip and machine
/// index but different incarnations are distinct members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub ip: IpAddr,
    pub machine_index: usize,
    pub incarnation: u64,
}

impl NodeId {
    pub fn new(ip: IpAddr, machine_index: usize, incarnation: u64) -> Self {
        Self {
            ip,
            machine_index,
            incarnation,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}@{}", self.ip, self.machine_index, self.incarnation)
    }
}

impl FromStr for NodeId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('@');
        let (ip, index, incarnation) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(ip), Some(ix), Some(inc), None) => (ip, ix, inc),
                _ => anyhow::bail!("invalid node id {:?}: expected ip@index@incarnation", s),
            };

        Ok(Self {
            ip: ip
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid ip in node id {:?}: {}", s, e))?,
            machine_index: index
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid machine index in node id {:?}: {}", s, e))?,
            incarnation: incarnation
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid incarnation in node id {:?}: {}", s, e))?,
        })
    }
}

// NodeId travels as its string form so fragments serialize to plain JSON
// objects keyed by node id.
impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct NodeIdVisitor;

impl Visitor<'_> for NodeIdVisitor {
    type Value = NodeId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a node id string of the form ip@index@incarnation")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<NodeId, E> {
        value.parse().map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(NodeIdVisitor)
    }
}

/// Locally-held state for one known member. Never serialized; peers exchange
/// `WireRecord` copies instead.
#[derive(Debug, Clone)]
pub struct MemberRecord {
    /// Monotonic liveness counter, incremented only by the record's owner.
    pub heartbeat: u64,
    /// Local receipt time of the most recent counter increase. Local clock
    /// only; no synchronization with the sender is assumed.
    pub last_update: Instant,
    /// True while the record sits in the suspected-failed phase.
    pub suspect: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// One entry of a gossip payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRecord {
    pub heartbeat_counter: u64,
    pub suspect: bool,
    /// Legacy field: older peers piggyback their suspicion toggle on gossip.
    /// Parsed for compatibility, never acted on (the toggle is operator-local).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspicion: Option<bool>,
    /// Graceful-departure marker; a record carrying `left` at the owner's
    /// final counter deletes the entry instead of updating it.
    #[serde(default, skip_serializing_if = "is_false")]
    pub left: bool,
}

impl WireRecord {
    pub fn alive(heartbeat_counter: u64, suspect: bool) -> Self {
        Self {
            heartbeat_counter,
            suspect,
            suspicion: None,
            left: false,
        }
    }

    pub fn departed(heartbeat_counter: u64) -> Self {
        Self {
            heartbeat_counter,
            suspect: false,
            suspicion: None,
            left: true,
        }
    }
}

/// The one wire shape: join announcements, gossip rounds and departure
/// notices are all fragments.
pub type Fragment = HashMap<NodeId, WireRecord>;
