//! Per-peer circuit state: sequence numbers, ack bookkeeping, the duplicate
//! window, and the reliable-send retry queue.
//!
//! A circuit is created on the first accepted inbound packet from a peer (or
//! by an explicit open) and destroyed only by an explicit close; it is never
//! collected implicitly while sends are outstanding.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};

/// Retry budget for reliable sends.
pub const DEFAULT_RELIABLE_RETRIES: u8 = 3;

/// Lower bound on the retransmission timeout.
pub const MIN_RELIABLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on the retransmission timeout.
pub const MAX_RELIABLE_TIMEOUT: Duration = Duration::from_secs(5);

/// RTT estimate used before any probe round-trip completes.
pub const INITIAL_RTT: Duration = Duration::from_millis(333);

/// Retransmission timeout as a multiple of the smoothed RTT.
pub const RTO_RTT_FACTOR: u32 = 5;

/// Interval between liveness probes on an alive circuit.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Traffic silence after which the watchdog marks a circuit dormant.
pub const DORMANT_AFTER: Duration = Duration::from_secs(100);

/// How long a reliable sequence id stays in the duplicate window.
pub const DUPLICATE_HORIZON: Duration = Duration::from_secs(30);

/// Size bound on the duplicate window.
pub const DUPLICATE_CAPACITY: usize = 256;

/// Pending acks older than this are flushed in a dedicated ack message
/// rather than waiting for outbound traffic to piggyback on.
pub const ACK_COLLECT_WINDOW: Duration = Duration::from_millis(500);

/// Lifecycle stage of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStage {
    /// Exchanging traffic
    Alive,
    /// Watchdog expired without traffic; revived by any inbound packet
    Dormant,
    /// Explicitly closed; kept only until removed from the table
    Closed,
}

/// Outcome of a reliable send, delivered through its completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Peer acknowledged the packet
    Delivered,
    /// Send permanently failed
    Failed(DeliveryFailure),
}

/// Why a send permanently failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Retry budget exhausted without an ack
    ReliabilityExhausted,
    /// Circuit closed with the send outstanding
    CircuitClosed,
    /// Transport refused to carry the message
    TransportRejected,
}

/// Completion callback for reliable and document sends.
pub type SendCallback = Box<dyn FnOnce(SendStatus) + Send>;

/// What to do with an inbound packet after circuit bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundDisposition {
    /// First sight; decode and dispatch
    Deliver,
    /// Already delivered; drop but re-acknowledge
    Duplicate,
}

/// Per-circuit traffic counters.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct CircuitCounters {
    /// Packets accepted from the peer.
    pub packets_in: u64,
    /// Packets sent to the peer.
    pub packets_out: u64,
    /// Bytes accepted from the peer.
    pub bytes_in: u64,
    /// Bytes sent to the peer.
    pub bytes_out: u64,
    /// Duplicate reliable packets suppressed.
    pub duplicates: u64,
    /// Sequence gaps observed on receive.
    pub gaps: u64,
    /// Reliable packets retransmitted.
    pub resends: u64,
    /// Reliable sends that exhausted their retry budget.
    pub failed_sends: u64,
}

struct ReliableEntry {
    payload: Vec<u8>,
    deadline: SystemTime,
    timeout: Duration,
    retries_left: u8,
    callback: Option<SendCallback>,
}

impl std::fmt::Debug for ReliableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableEntry")
            .field("len", &self.payload.len())
            .field("deadline", &self.deadline)
            .field("retries_left", &self.retries_left)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// A retransmission due on this circuit.
#[derive(Debug, Clone)]
pub struct Retransmit {
    /// Original sequence id, reused on the wire.
    pub sequence: u32,
    /// Stamped packet bytes as first sent.
    pub payload: Vec<u8>,
}

/// Reliability and session state for one remote peer.
#[derive(Debug)]
pub struct Circuit {
    host: SocketAddr,
    stage: CircuitStage,
    trusted: bool,
    allow_dormancy: bool,
    retry_budget: u8,

    next_sequence: u32,
    expected_sequence: Option<u32>,

    pending_acks: VecDeque<u32>,
    oldest_pending_ack: Option<SystemTime>,
    recently_seen: HashMap<u32, SystemTime>,
    unacked: BTreeMap<u32, ReliableEntry>,

    smoothed_rtt: Option<Duration>,
    next_ping_id: u8,
    outstanding_ping: Option<(u8, SystemTime)>,
    last_ping_sent: Option<SystemTime>,
    last_inbound: SystemTime,

    counters: CircuitCounters,
}

impl Circuit {
    /// Create an alive circuit for the peer.
    #[must_use]
    pub fn new(host: SocketAddr, now: SystemTime) -> Self {
        Self {
            host,
            stage: CircuitStage::Alive,
            trusted: false,
            allow_dormancy: true,
            retry_budget: DEFAULT_RELIABLE_RETRIES,
            next_sequence: 0,
            expected_sequence: None,
            pending_acks: VecDeque::new(),
            oldest_pending_ack: None,
            recently_seen: HashMap::new(),
            unacked: BTreeMap::new(),
            smoothed_rtt: None,
            next_ping_id: 0,
            outstanding_ping: None,
            last_ping_sent: None,
            last_inbound: now,
            counters: CircuitCounters::default(),
        }
    }

    /// Peer address.
    #[must_use]
    pub const fn host(&self) -> SocketAddr {
        self.host
    }

    /// Lifecycle stage.
    #[must_use]
    pub const fn stage(&self) -> CircuitStage {
        self.stage
    }

    /// Trust flag; trusted-only messages are refused while this is false.
    #[must_use]
    pub const fn trusted(&self) -> bool {
        self.trusted
    }

    /// Grant or revoke trust. Policy belongs to the embedding application.
    pub fn set_trusted(&mut self, trusted: bool) {
        self.trusted = trusted;
    }

    /// Disable the dormancy watchdog for this peer.
    pub fn set_allow_dormancy(&mut self, allow: bool) {
        self.allow_dormancy = allow;
    }

    /// Override the retry budget for subsequent reliable sends.
    pub fn set_retry_budget(&mut self, retries: u8) {
        self.retry_budget = retries;
    }

    /// Traffic counters.
    #[must_use]
    pub const fn counters(&self) -> CircuitCounters {
        self.counters
    }

    /// Smoothed probe round-trip estimate.
    #[must_use]
    pub const fn smoothed_rtt(&self) -> Option<Duration> {
        self.smoothed_rtt
    }

    /// Number of reliable sends awaiting acknowledgement.
    #[must_use]
    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }

    /// Next outbound sequence id; strictly increasing by one.
    pub fn next_sequence(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }

    /// Record an outbound packet for the traffic counters.
    pub fn note_outbound(&mut self, bytes: usize) {
        self.counters.packets_out += 1;
        self.counters.bytes_out += bytes as u64;
    }

    /// Account an inbound packet: revive a dormant circuit, track the
    /// expected sequence, suppress duplicates, and queue the ack for
    /// reliable packets.
    pub fn note_inbound(
        &mut self,
        sequence: u32,
        reliable: bool,
        resent: bool,
        bytes: usize,
        now: SystemTime,
    ) -> InboundDisposition {
        if self.stage == CircuitStage::Dormant {
            info!(host = %self.host, "dormant circuit revived by inbound traffic");
            self.stage = CircuitStage::Alive;
            // Expected-sequence tracking restarts at the incoming value.
            self.expected_sequence = None;
        }
        self.last_inbound = now;
        self.counters.packets_in += 1;
        self.counters.bytes_in += bytes as u64;

        if reliable && self.recently_seen.contains_key(&sequence) {
            self.counters.duplicates += 1;
            debug!(host = %self.host, sequence, resent, "duplicate reliable packet suppressed");
            // Re-acknowledge so the sender stops retransmitting.
            self.queue_ack(sequence, now);
            return InboundDisposition::Duplicate;
        }

        if reliable {
            self.remember_sequence(sequence, now);
            self.queue_ack(sequence, now);
        }

        match self.expected_sequence {
            None => self.expected_sequence = Some(sequence.wrapping_add(1)),
            Some(expected) if sequence == expected => {
                self.expected_sequence = Some(expected.wrapping_add(1));
            }
            Some(expected) if sequence > expected && !resent => {
                let gap = sequence - expected;
                self.counters.gaps += u64::from(gap);
                if gap > 16 {
                    warn!(host = %self.host, gap, "large inbound sequence gap");
                }
                self.expected_sequence = Some(sequence.wrapping_add(1));
            }
            // Late or resent packet arriving behind the expected id; the
            // tracking position stays put.
            Some(_) => {}
        }

        InboundDisposition::Deliver
    }

    fn queue_ack(&mut self, sequence: u32, now: SystemTime) {
        if !self.pending_acks.contains(&sequence) {
            self.pending_acks.push_back(sequence);
        }
        if self.oldest_pending_ack.is_none() {
            self.oldest_pending_ack = Some(now);
        }
    }

    fn remember_sequence(&mut self, sequence: u32, now: SystemTime) {
        if self.recently_seen.len() >= DUPLICATE_CAPACITY {
            // Age out, then fall back to dropping the oldest entry.
            self.recently_seen
                .retain(|_, seen| now.duration_since(*seen).unwrap_or_default() < DUPLICATE_HORIZON);
            if self.recently_seen.len() >= DUPLICATE_CAPACITY {
                if let Some(oldest) = self
                    .recently_seen
                    .iter()
                    .min_by_key(|(_, seen)| **seen)
                    .map(|(seq, _)| *seq)
                {
                    self.recently_seen.remove(&oldest);
                }
            }
        }
        self.recently_seen.insert(sequence, now);
    }

    /// Drain up to `max` pending ack ids for an outbound trailer; the rest
    /// wait for the following packet.
    pub fn take_acks(&mut self, max: usize) -> Vec<u32> {
        let take = self.pending_acks.len().min(max);
        let acks: Vec<u32> = self.pending_acks.drain(..take).collect();
        if self.pending_acks.is_empty() {
            self.oldest_pending_ack = None;
        }
        acks
    }

    /// Number of acks waiting for a ride.
    #[must_use]
    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks.len()
    }

    /// Whether pending acks have waited past the collection window.
    #[must_use]
    pub fn acks_stale(&self, now: SystemTime) -> bool {
        self.oldest_pending_ack.is_some_and(|oldest| {
            now.duration_since(oldest).unwrap_or_default() >= ACK_COLLECT_WINDOW
        })
    }

    /// Current retransmission timeout, derived from the probe RTT.
    #[must_use]
    pub fn retransmit_timeout(&self) -> Duration {
        let rtt = self.smoothed_rtt.unwrap_or(INITIAL_RTT);
        (rtt * RTO_RTT_FACTOR).clamp(MIN_RELIABLE_TIMEOUT, MAX_RELIABLE_TIMEOUT)
    }

    /// Register a reliable packet awaiting acknowledgement. `payload` is the
    /// stamped wire image; retransmissions reuse it (and its sequence id).
    pub fn register_reliable(
        &mut self,
        sequence: u32,
        payload: Vec<u8>,
        now: SystemTime,
        callback: Option<SendCallback>,
    ) {
        let timeout = self.retransmit_timeout();
        self.unacked.insert(
            sequence,
            ReliableEntry {
                payload,
                deadline: now + timeout,
                timeout,
                retries_left: self.retry_budget,
                callback,
            },
        );
    }

    /// Process ack ids from a trailer or an explicit ack message.
    pub fn process_acks(&mut self, acks: &[u32]) {
        for &sequence in acks {
            if let Some(mut entry) = self.unacked.remove(&sequence) {
                debug!(host = %self.host, sequence, "reliable send acknowledged");
                if let Some(callback) = entry.callback.take() {
                    callback(SendStatus::Delivered);
                }
            }
        }
    }

    /// Collect retransmissions due at `now`. Entries out of retries are
    /// removed and their callbacks fired with failure.
    pub fn due_retransmits(&mut self, now: SystemTime) -> Vec<Retransmit> {
        let due: Vec<u32> = self
            .unacked
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(&sequence, _)| sequence)
            .collect();

        let mut out = Vec::new();
        for sequence in due {
            let Some(entry) = self.unacked.get_mut(&sequence) else {
                continue;
            };
            if entry.retries_left == 0 {
                warn!(host = %self.host, sequence, "reliable send exhausted its retries");
                self.counters.failed_sends += 1;
                let mut entry = self.unacked.remove(&sequence).expect("looked up above");
                if let Some(callback) = entry.callback.take() {
                    callback(SendStatus::Failed(DeliveryFailure::ReliabilityExhausted));
                }
                continue;
            }
            entry.retries_left -= 1;
            entry.deadline = now + entry.timeout;
            self.counters.resends += 1;
            out.push(Retransmit {
                sequence,
                payload: entry.payload.clone(),
            });
        }
        out
    }

    /// Whether a liveness probe is due.
    #[must_use]
    pub fn ping_due(&self, now: SystemTime) -> bool {
        self.stage == CircuitStage::Alive
            && self.last_ping_sent.is_none_or(|last| {
                now.duration_since(last).unwrap_or_default() >= PING_INTERVAL
            })
    }

    /// Record an outgoing probe, returning its id.
    pub fn note_ping_sent(&mut self, now: SystemTime) -> u8 {
        let id = self.next_ping_id;
        self.next_ping_id = self.next_ping_id.wrapping_add(1);
        self.outstanding_ping = Some((id, now));
        self.last_ping_sent = Some(now);
        id
    }

    /// Record a probe reply; a matching id yields an RTT sample folded into
    /// the smoothed estimate.
    pub fn note_ping_reply(&mut self, id: u8, now: SystemTime) -> Option<Duration> {
        let (expected, sent) = self.outstanding_ping?;
        if expected != id {
            return None;
        }
        self.outstanding_ping = None;
        let sample = now.duration_since(sent).ok()?;
        let smoothed = match self.smoothed_rtt {
            None => sample,
            Some(current) => (current * 7 + sample) / 8,
        };
        self.smoothed_rtt = Some(smoothed.max(Duration::from_micros(1)));
        Some(sample)
    }

    /// Oldest unacked sequence id, advertised in probes.
    #[must_use]
    pub fn oldest_unacked(&self) -> Option<u32> {
        self.unacked.keys().next().copied()
    }

    /// Run the dormancy watchdog; returns true when the circuit just went
    /// dormant.
    pub fn watchdog(&mut self, now: SystemTime) -> bool {
        if self.stage != CircuitStage::Alive || !self.allow_dormancy {
            return false;
        }
        if now.duration_since(self.last_inbound).unwrap_or_default() >= DORMANT_AFTER {
            info!(host = %self.host, "circuit went dormant");
            self.stage = CircuitStage::Dormant;
            return true;
        }
        false
    }

    /// Diagnostic snapshot of this circuit's state.
    #[must_use]
    pub fn info(&self) -> serde_json::Value {
        serde_json::json!({
            "host": self.host.to_string(),
            "stage": format!("{:?}", self.stage),
            "trusted": self.trusted,
            "unacked": self.unacked.len(),
            "pending_acks": self.pending_acks.len(),
            "smoothed_rtt_ms": self.smoothed_rtt.map(|rtt| rtt.as_millis() as u64),
            "counters": self.counters,
        })
    }

    /// Close the circuit: outstanding sends fail with `CircuitClosed`.
    pub fn close(&mut self) {
        self.stage = CircuitStage::Closed;
        let unacked = std::mem::take(&mut self.unacked);
        for (_, mut entry) in unacked {
            if let Some(callback) = entry.callback.take() {
                callback(SendStatus::Failed(DeliveryFailure::CircuitClosed));
            }
        }
        self.pending_acks.clear();
        self.oldest_pending_ack = None;
    }
}

/// Owns every circuit, keyed by peer address.
#[derive(Debug, Default)]
pub struct CircuitTable {
    circuits: HashMap<SocketAddr, Circuit>,
}

impl CircuitTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a circuit.
    #[must_use]
    pub fn get(&self, host: SocketAddr) -> Option<&Circuit> {
        self.circuits.get(&host)
    }

    /// Look up a circuit mutably.
    pub fn get_mut(&mut self, host: SocketAddr) -> Option<&mut Circuit> {
        self.circuits.get_mut(&host)
    }

    /// Fetch or create the circuit for a peer.
    pub fn get_or_create(&mut self, host: SocketAddr, now: SystemTime) -> &mut Circuit {
        self.circuits.entry(host).or_insert_with(|| {
            info!(%host, "circuit created");
            Circuit::new(host, now)
        })
    }

    /// Remove a circuit, closing it first.
    pub fn remove(&mut self, host: SocketAddr) -> Option<Circuit> {
        let mut circuit = self.circuits.remove(&host)?;
        circuit.close();
        Some(circuit)
    }

    /// Iterate circuits mutably for housekeeping.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Circuit> {
        self.circuits.values_mut()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }
}
