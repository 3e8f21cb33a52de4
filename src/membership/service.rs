//! Membership Service
//!
//! Owns the membership table and runs the two background loops: the receiver
//! (ingest gossip, merge) and the failure detector (age the table, then
//! disseminate). Operator-facing operations (`join`, `leave`, toggles) are
//! called synchronously from the command surface.
//!
//! Locking model: the table sits behind one mutex and is only touched through
//! its synchronized operations; the scalar flags are atomics. No lock is held
//! across a network send.

use anyhow::{Context, Result};
use rand::seq::IteratorRandom;
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::table::MembershipTable;
use super::types::{Fragment, NodeId, WireRecord};
use crate::transport::{AddressBook, Transport};

/// Detector/gossip cadence. Kept well below the failure threshold so a member
/// misses many heartbeats before it is ever suspected.
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);
/// Age at which a record becomes suspect (when suspicion is enabled).
pub const T_FAIL: Duration = Duration::from_secs(4);
/// Additional age after `T_FAIL` at which a record is evicted.
pub const T_CLEANUP: Duration = Duration::from_secs(4);
/// Receive buffer size; outgoing payloads are bounded to fit it.
pub const MAX_DATAGRAM: usize = 8 * 1024;

/// Timing thresholds, injectable so tests can run with short durations.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub tick_interval: Duration,
    pub t_fail: Duration,
    pub t_cleanup: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            tick_interval: TICK_INTERVAL,
            t_fail: T_FAIL,
            t_cleanup: T_CLEANUP,
        }
    }
}

pub struct MembershipService {
    book: AddressBook,
    machine_index: usize,
    bind_port: u16,
    config: ProtocolConfig,
    transport: Arc<dyn Transport>,
    local_id: StdMutex<NodeId>,
    table: Mutex<MembershipTable>,
    is_active: AtomicBool,
    suspicion_enabled: AtomicBool,
    drop_rate: AtomicU8,
    /// Observed bytes/sec averaged over the last gossip round. Diagnostics
    /// only, not part of the protocol.
    throughput: StdMutex<Option<f64>>,
}

impl MembershipService {
    /// Fails when the node cannot form an identity (machine index outside the
    /// address book); nothing else about startup is fatal.
    pub fn new(
        book: AddressBook,
        machine_index: usize,
        transport: Arc<dyn Transport>,
        config: ProtocolConfig,
    ) -> Result<Arc<Self>> {
        let own = book.addr(machine_index).with_context(|| {
            format!(
                "machine index {} is not in the {}-entry address book",
                machine_index,
                book.len()
            )
        })?;

        let local_id = NodeId::new(own.ip(), machine_index, unix_now()?);

        Ok(Arc::new(Self {
            book,
            machine_index,
            bind_port: own.port(),
            config,
            transport,
            local_id: StdMutex::new(local_id),
            table: Mutex::new(MembershipTable::new()),
            is_active: AtomicBool::new(false),
            suspicion_enabled: AtomicBool::new(false),
            drop_rate: AtomicU8::new(0),
            throughput: StdMutex::new(None),
        }))
    }

    /// Binds the gossip socket and spawns the receiver and detector loops.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let own = self.book.addr(self.machine_index).context("own endpoint")?;
        let bind_ip: IpAddr = if own.is_ipv4() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        };
        let socket = UdpSocket::bind(SocketAddr::new(bind_ip, self.bind_port))
            .await
            .with_context(|| format!("cannot bind gossip port {}", self.bind_port))?;

        info!(
            "membership service up on port {} (machine #{})",
            self.bind_port, self.machine_index
        );

        let receiver = self.clone();
        tokio::spawn(async move {
            receiver.receive_loop(socket).await;
        });

        let detector = self.clone();
        tokio::spawn(async move {
            detector.detector_loop().await;
        });

        Ok(())
    }

    // ------------------------------------------------------------------
    // Receiver loop
    // ------------------------------------------------------------------

    async fn receive_loop(self: Arc<Self>, socket: UdpSocket) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    if let Err(e) = self.handle_datagram(&buf[..len]).await {
                        warn!("discarding bad datagram from {}: {}", src, e);
                    }
                }
                Err(e) => {
                    error!("gossip socket receive failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Decodes one datagram and merges it. A payload that fails to decode is
    /// rejected whole; nothing is partially applied. Inactive nodes (never
    /// joined, or left) discard incoming gossip so a cleared table stays
    /// cleared.
    pub async fn handle_datagram(&self, payload: &[u8]) -> Result<()> {
        if !self.is_active() {
            debug!("inactive, ignoring {}-byte datagram", payload.len());
            return Ok(());
        }

        let fragment: Fragment =
            serde_json::from_slice(payload).context("undecodable membership fragment")?;

        let mut table = self.table.lock().await;
        table.merge(&fragment, Instant::now());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Failure detector + gossip disseminator
    // ------------------------------------------------------------------

    async fn detector_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One detector tick: heartbeat (if active), sweep, then gossip.
    pub async fn tick(&self) {
        let now = Instant::now();
        let active = self.is_active();
        let suspicion = self.suspicion_enabled();

        let round = {
            let mut table = self.table.lock().await;

            if active {
                table.beat(&self.whoami(), now);
            }

            let outcome = table.sweep(now, self.config.t_fail, self.config.t_cleanup, suspicion);
            for id in &outcome.newly_suspected {
                warn!("member {} suspected (no heartbeat progress)", id);
            }
            for id in &outcome.evicted {
                info!("member {} evicted after cleanup timeout", id);
            }

            if !active {
                None
            } else {
                let candidates = table.peer_indices(self.machine_index);
                if candidates.is_empty() {
                    None
                } else {
                    Some((table.to_fragment(), candidates))
                }
            }
        };

        if let Some((fragment, candidates)) = round {
            self.gossip_round(&fragment, &candidates);
        }
    }

    /// Fire-and-forget dissemination of the whole table to a random majority
    /// subset of known peers. Evaluates the drop-rate coin once per round to
    /// model a lossy uplink for fault injection.
    fn gossip_round(&self, fragment: &Fragment, candidates: &[usize]) {
        let drop_rate = self.drop_rate.load(Ordering::Relaxed);
        if drop_rate > 0 && rand::thread_rng().gen_range(0..100) < drop_rate {
            debug!("dropping gossip round (drop rate {}%)", drop_rate);
            return;
        }

        let payload = match serde_json::to_vec(fragment) {
            Ok(payload) => payload,
            Err(e) => {
                error!("cannot serialize membership table: {}", e);
                return;
            }
        };
        if payload.len() > MAX_DATAGRAM {
            error!(
                "gossip payload {} bytes exceeds the {}-byte datagram bound, skipping round",
                payload.len(),
                MAX_DATAGRAM
            );
            return;
        }

        let targets = select_targets(candidates);
        let mut total_bytes = 0usize;
        let mut total_elapsed = Duration::ZERO;

        for target_ix in targets {
            let Some(addr) = self.book.addr(target_ix) else {
                warn!("machine #{} not in the address book, skipping", target_ix);
                continue;
            };

            let start = Instant::now();
            match self.transport.send_to(addr, &payload) {
                Ok(()) => {
                    total_bytes += payload.len();
                    // Clamp so a sub-resolution send still counts.
                    total_elapsed += start.elapsed().max(Duration::from_nanos(1));
                    debug!("gossiped {} bytes to machine #{}", payload.len(), target_ix);
                }
                Err(e) => {
                    warn!("gossip to machine #{} failed: {}", target_ix, e);
                }
            }
        }

        if total_bytes > 0 && !total_elapsed.is_zero() {
            let rate = total_bytes as f64 / total_elapsed.as_secs_f64();
            *self.throughput.lock().expect("throughput lock poisoned") = Some(rate);
        }
    }

    // ------------------------------------------------------------------
    // Membership control
    // ------------------------------------------------------------------

    /// Regenerates the node identity with a fresh incarnation, seeds its own
    /// record at heartbeat 1, and announces itself to the introducer
    /// (machine #1). Fire-and-forget: an unreachable introducer means the
    /// operator retries, or some peer eventually gossips us in.
    pub async fn join(&self) -> Result<NodeId> {
        let new_id = NodeId::new(
            self.whoami().ip,
            self.machine_index,
            unix_now()?,
        );

        let old_id = {
            let mut id = self.local_id.lock().expect("identity lock poisoned");
            std::mem::replace(&mut *id, new_id.clone())
        };

        {
            let mut table = self.table.lock().await;
            // A re-join is a new lifetime; the previous one must not linger.
            table.remove(&old_id);
            table.beat(&new_id, Instant::now());
        }

        self.is_active.store(true, Ordering::Relaxed);

        let mut announcement = Fragment::new();
        announcement.insert(new_id.clone(), WireRecord::alive(1, false));
        let payload = serde_json::to_vec(&announcement)?;
        let introducer = self.book.introducer();
        if let Err(e) = self.transport.send_to(introducer, &payload) {
            warn!("join announcement to introducer {} failed: {}", introducer, e);
        }

        info!("joined the group as {}", new_id);
        Ok(new_id)
    }

    /// Gossips a departure notice to a normal fanout sample, then clears the
    /// table and goes inactive. Peers that miss the notice still evict us
    /// through the ordinary failure timeout.
    pub async fn leave(&self) {
        if !self.is_active.swap(false, Ordering::Relaxed) {
            info!("leave requested but not a member, nothing to do");
            return;
        }

        let id = self.whoami();
        let (final_counter, candidates) = {
            let mut table = self.table.lock().await;
            let counter = table.get(&id).map(|r| r.heartbeat).unwrap_or(0) + 1;
            let candidates = table.peer_indices(self.machine_index);
            table.clear();
            (counter, candidates)
        };

        let mut notice = Fragment::new();
        notice.insert(id.clone(), WireRecord::departed(final_counter));
        match serde_json::to_vec(&notice) {
            Ok(payload) => {
                for target_ix in select_targets(&candidates) {
                    if let Some(addr) = self.book.addr(target_ix) {
                        if let Err(e) = self.transport.send_to(addr, &payload) {
                            warn!("departure notice to machine #{} failed: {}", target_ix, e);
                        }
                    }
                }
            }
            Err(e) => error!("cannot serialize departure notice: {}", e),
        }

        info!("left the group as {}", id);
    }

    /// Sorted view of every known member id.
    pub async fn members(&self) -> Vec<NodeId> {
        self.table.lock().await.snapshot()
    }

    /// Snapshot rows for display: (id, heartbeat, suspect).
    pub async fn member_rows(&self) -> Vec<(NodeId, u64, bool)> {
        let table = self.table.lock().await;
        let mut rows: Vec<(NodeId, u64, bool)> = table
            .snapshot()
            .into_iter()
            .filter_map(|id| table.get(&id).map(|r| (id.clone(), r.heartbeat, r.suspect)))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    pub fn whoami(&self) -> NodeId {
        self.local_id.lock().expect("identity lock poisoned").clone()
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Relaxed)
    }

    pub fn suspicion_enabled(&self) -> bool {
        self.suspicion_enabled.load(Ordering::Relaxed)
    }

    pub fn set_suspicion(&self, enabled: bool) {
        self.suspicion_enabled.store(enabled, Ordering::Relaxed);
        info!(
            "suspicion mechanism {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn drop_rate(&self) -> u8 {
        self.drop_rate.load(Ordering::Relaxed)
    }

    pub fn set_drop_rate(&self, percent: u8) -> Result<()> {
        anyhow::ensure!(percent <= 100, "drop rate must be 0-100, got {}", percent);
        self.drop_rate.store(percent, Ordering::Relaxed);
        info!("gossip drop rate set to {}%", percent);
        Ok(())
    }

    /// Observed bytes/sec of the last gossip round, if one has completed.
    pub fn last_round_throughput(&self) -> Option<f64> {
        *self.throughput.lock().expect("throughput lock poisoned")
    }
}

/// Uniform without-replacement sample of `floor(k/2) + 1` targets: a constant
/// majority fraction, trading bandwidth for fast convergence on small
/// clusters.
fn select_targets(candidates: &[usize]) -> Vec<usize> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let fanout = candidates.len() / 2 + 1;
    candidates
        .iter()
        .copied()
        .choose_multiple(&mut rand::thread_rng(), fanout)
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_secs())
}
