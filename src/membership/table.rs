//! Membership Table
//!
//! The single shared piece of protocol state: one record per known member.
//! The table itself is a plain map with synchronized-access semantics supplied
//! by its owner (`MembershipService` holds it behind one mutex); everything
//! here is pure state manipulation driven by explicit `Instant` values, which
//! keeps the merge rule and the failure sweep directly testable.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::types::{Fragment, MemberRecord, NodeId, WireRecord};

/// Result of one failure-detection sweep, for logging by the caller.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub newly_suspected: Vec<NodeId>,
    pub evicted: Vec<NodeId>,
}

#[derive(Debug, Default)]
pub struct MembershipTable {
    records: HashMap<NodeId, MemberRecord>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&MemberRecord> {
        self.records.get(id)
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<MemberRecord> {
        self.records.remove(id)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Owner-only heartbeat: bump our counter and refresh our timestamp.
    /// Creates the record at counter 1 if it is missing (fresh join).
    pub fn beat(&mut self, id: &NodeId, now: Instant) -> u64 {
        let record = self.records.entry(id.clone()).or_insert(MemberRecord {
            heartbeat: 0,
            last_update: now,
            suspect: false,
        });
        record.heartbeat += 1;
        record.last_update = now;
        record.suspect = false;
        record.heartbeat
    }

    /// Counter-merge rule. Tolerates reordering and duplication: only a
    /// strictly greater counter changes a record, so stale or repeated
    /// fragments are no-ops and gossip amplification stays bounded.
    ///
    /// Timestamps are stamped with local receipt time, never the sender's
    /// clock. An entry carrying the departure marker at (or past) the stored
    /// counter deletes the record outright.
    pub fn merge(&mut self, fragment: &Fragment, now: Instant) {
        for (id, incoming) in fragment {
            if incoming.left {
                if let Some(stored) = self.records.get(id) {
                    if incoming.heartbeat_counter >= stored.heartbeat {
                        tracing::info!("member {} left the group", id);
                        self.records.remove(id);
                    }
                }
                continue;
            }

            match self.records.get_mut(id) {
                Some(stored) => {
                    if incoming.heartbeat_counter > stored.heartbeat {
                        stored.heartbeat = incoming.heartbeat_counter;
                        stored.last_update = now;
                        stored.suspect = false;
                    }
                }
                None => {
                    tracing::info!(
                        "discovered new member {} (heartbeat {})",
                        id,
                        incoming.heartbeat_counter
                    );
                    self.records.insert(
                        id.clone(),
                        MemberRecord {
                            heartbeat: incoming.heartbeat_counter,
                            last_update: now,
                            suspect: false,
                        },
                    );
                }
            }
        }
    }

    /// Two-phase aging pass. Records older than `t_fail + t_cleanup` are
    /// evicted unconditionally; records older than `t_fail` are marked
    /// suspect only while the suspicion mechanism is enabled.
    pub fn sweep(
        &mut self,
        now: Instant,
        t_fail: Duration,
        t_cleanup: Duration,
        suspicion_enabled: bool,
    ) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for (id, record) in self.records.iter_mut() {
            let age = now.saturating_duration_since(record.last_update);

            if age >= t_fail + t_cleanup {
                outcome.evicted.push(id.clone());
            } else if suspicion_enabled && age >= t_fail && !record.suspect {
                record.suspect = true;
                outcome.newly_suspected.push(id.clone());
            }
        }

        for id in &outcome.evicted {
            self.records.remove(id);
        }

        outcome
    }

    /// Sorted key set; no mutable access to the records leaks out.
    pub fn snapshot(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.records.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Distinct machine indices present in the table, excluding `own_index`.
    /// These are the gossip fanout candidates.
    pub fn peer_indices(&self, own_index: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .records
            .keys()
            .map(|id| id.machine_index)
            .filter(|ix| *ix != own_index)
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Serializable copy of the whole table, the payload of a gossip round.
    pub fn to_fragment(&self) -> Fragment {
        self.records
            .iter()
            .map(|(id, record)| {
                (
                    id.clone(),
                    WireRecord::alive(record.heartbeat, record.suspect),
                )
            })
            .collect()
    }
}
