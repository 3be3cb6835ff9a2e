//! The message engine: packet I/O, compression, circuit bookkeeping, and
//! handler dispatch.
//!
//! One engine value owns the circuit table, handler registry, and transport;
//! callers construct it, register handlers, and drive [`MessageEngine::pump`]
//! from their own loop. Each pump samples a single authoritative "now",
//! drains the transport until empty, then runs retransmission, ack, probe,
//! and watchdog housekeeping against that same instant.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::SystemTime;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{
    BlockInstance, EngineMetrics, Error as ProtocolError, FieldValue, MAX_ACKS_PER_PACKET,
    MIN_PACKET_SIZE, MTU, MessageRecord, OFFSET_FLAGS, OFFSET_SEQUENCE, PacketFlags, PacketHeader,
    TemplateBuilder, TemplateReader, TemplateRegistry, Trust, WireEncoding, append_ack_trailer,
    compress_packet, encode_record, expand_packet, strip_ack_trailer, to_document,
};

use super::circuit::{
    Circuit, CircuitStage, CircuitTable, DeliveryFailure, InboundDisposition, SendCallback,
    SendStatus,
};
use super::error::{Result, TransportError};
use super::socket::SocketBinding;

/// Explicit ack flush message.
pub const MSG_PACKET_ACK: &str = "PacketAck";

/// The one message allowed to establish a circuit from an unknown peer.
pub const MSG_OPEN_CIRCUIT: &str = "OpenCircuit";

/// Liveness probe.
pub const MSG_START_PING: &str = "StartPingCheck";

/// Probe reply.
pub const MSG_COMPLETE_PING: &str = "CompletePingCheck";

/// Policy-deny reply to a trust violation.
pub const MSG_DENY_TRUSTED: &str = "DenyTrustedCircuit";

/// Message names the engine services itself; user registration is refused.
pub const CONTROL_MESSAGES: [&str; 5] = [
    MSG_PACKET_ACK,
    MSG_OPEN_CIRCUIT,
    MSG_START_PING,
    MSG_COMPLETE_PING,
    MSG_DENY_TRUSTED,
];

/// Datagram transport seam. The real implementation is a UDP socket; tests
/// drive the engine over an in-memory link.
pub trait DatagramTransport {
    /// Hand one datagram to the transport. Returns false when refused.
    fn send_datagram(&mut self, bytes: &[u8], host: SocketAddr) -> bool;

    /// Pull one queued datagram, or `None` when the transport is drained.
    fn recv_datagram(&mut self) -> Option<(Vec<u8>, SocketAddr)>;
}

impl DatagramTransport for SocketBinding {
    fn send_datagram(&mut self, bytes: &[u8], host: SocketAddr) -> bool {
        match self.send_to(bytes, host) {
            Ok(_) => true,
            Err(err) => {
                warn!(%host, error = %err, "datagram send failed");
                false
            }
        }
    }

    fn recv_datagram(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        let mut buf = [0u8; 8192];
        match self.recv_from(&mut buf) {
            Ok(Some((len, addr))) => Some((buf[..len].to_vec(), addr)),
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "datagram receive failed");
                None
            }
        }
    }
}

/// Request/response transport for the document encoding, keyed by the
/// per-peer capability URL. Completions are polled each pump so the engine
/// never blocks on the request path.
pub trait RequestTransport {
    /// Start a request carrying the document. The transport reports the
    /// outcome later through [`RequestTransport::poll_response`].
    fn send_request(&mut self, request_id: Uuid, url: &str, document: &Value);

    /// Pull one finished request, if any: the id it was sent with and the
    /// response document or a status code.
    fn poll_response(&mut self) -> Option<(Uuid, std::result::Result<Value, u16>)>;
}

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Create circuits for packets from unrecognized peers. When false, only
    /// the circuit-establishment message may introduce a new peer.
    pub accept_unknown_circuits: bool,
    /// Route every eligible outbound message over the document transport,
    /// not just those the schema marks.
    pub prefer_document: bool,
    /// Retry budget applied to new circuits.
    pub retry_budget: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            accept_unknown_circuits: false,
            prefer_document: false,
            retry_budget: super::circuit::DEFAULT_RELIABLE_RETRIES,
        }
    }
}

type Handler = Box<dyn FnMut(&MessageRecord, SocketAddr) + Send>;

/// Schema-driven messaging engine over an unreliable datagram transport.
pub struct MessageEngine {
    registry: TemplateRegistry,
    config: EngineConfig,
    transport: Box<dyn DatagramTransport + Send>,
    requests: Option<Box<dyn RequestTransport + Send>>,
    capabilities: HashMap<SocketAddr, String>,
    pending_requests: HashMap<Uuid, Option<SendCallback>>,
    circuits: CircuitTable,
    handlers: HashMap<String, Handler>,
    metrics: EngineMetrics,
}

impl std::fmt::Debug for MessageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageEngine")
            .field("templates", &self.registry.len())
            .field("circuits", &self.circuits.len())
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl MessageEngine {
    /// Create an engine over the given transport.
    #[must_use]
    pub fn new(
        registry: TemplateRegistry,
        transport: Box<dyn DatagramTransport + Send>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            config,
            transport,
            requests: None,
            capabilities: HashMap::new(),
            pending_requests: HashMap::new(),
            circuits: CircuitTable::new(),
            handlers: HashMap::new(),
            metrics: EngineMetrics::default(),
        }
    }

    /// Attach the request/response transport for the document encoding.
    #[must_use]
    pub fn with_request_transport(mut self, requests: Box<dyn RequestTransport + Send>) -> Self {
        self.requests = Some(requests);
        self
    }

    /// Register the capability URL for a peer's document endpoint.
    pub fn set_capability(&mut self, host: SocketAddr, url: impl Into<String>) {
        self.capabilities.insert(host, url.into());
    }

    /// Loaded schema registry.
    #[must_use]
    pub const fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Engine-wide counters.
    #[must_use]
    pub const fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Look up a circuit.
    #[must_use]
    pub fn circuit(&self, host: SocketAddr) -> Option<&Circuit> {
        self.circuits.get(host)
    }

    /// Number of circuits in the table.
    #[must_use]
    pub fn circuit_count(&self) -> usize {
        self.circuits.len()
    }

    /// Explicitly open (or fetch) a circuit to a peer.
    pub fn open_circuit(&mut self, host: SocketAddr, now: SystemTime) -> &mut Circuit {
        let budget = self.config.retry_budget;
        let circuit = self.circuits.get_or_create(host, now);
        circuit.set_retry_budget(budget);
        circuit
    }

    /// Close a peer's circuit; outstanding sends fail with `CircuitClosed`.
    pub fn close_circuit(&mut self, host: SocketAddr) {
        if self.circuits.remove(host).is_some() {
            info!(%host, "circuit closed");
        }
    }

    /// Register the handler for a message name, replacing any previous one.
    /// Engine-internal control messages are refused.
    pub fn register_handler<F>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: FnMut(&MessageRecord, SocketAddr) + Send + 'static,
    {
        if CONTROL_MESSAGES.contains(&name) {
            return Err(TransportError::ReservedMessage(name.to_owned()));
        }
        if self.registry.lookup_by_name(name).is_none() {
            return Err(ProtocolError::UnknownMessageName(name.to_owned()).into());
        }
        self.handlers.insert(name.to_owned(), Box::new(handler));
        Ok(())
    }

    /// Start a builder for the named message.
    pub fn builder(&self, name: &str) -> Result<TemplateBuilder<'_>> {
        let template = self
            .registry
            .lookup_by_name(name)
            .ok_or_else(|| ProtocolError::UnknownMessageName(name.to_owned()))?;
        Ok(TemplateBuilder::begin(template))
    }

    /// Send a populated record to a peer.
    ///
    /// Binary messages are stamped with the circuit's next sequence id,
    /// optionally compressed, and carry any pending acks; reliable sends
    /// enter the retry queue and report their outcome through `callback`.
    /// Messages routed over the document transport deliver their outcome
    /// through the same callback, so callers cannot distinguish the
    /// transport used.
    pub fn send(
        &mut self,
        host: SocketAddr,
        record: MessageRecord,
        reliable: bool,
        callback: Option<SendCallback>,
        now: SystemTime,
    ) -> Result<()> {
        let template = self
            .registry
            .lookup_by_name(record.name())
            .ok_or_else(|| ProtocolError::UnknownMessageName(record.name().to_owned()))?;

        // Reliability bookkeeping (acks, pings, denies) stays on the
        // datagram path even when documents are the process-wide default.
        let control = CONTROL_MESSAGES.contains(&record.name());
        let document_route = template.encoding() == WireEncoding::Document
            || (self.config.prefer_document && self.requests.is_some() && !control);
        if document_route {
            return self.send_document(host, &record, callback);
        }

        let zerocode = template.encoding() == WireEncoding::Zerocoded;
        let trusted_only = template.trust() == Trust::Trusted;
        let name = record.name().to_owned();
        let bytes = encode_record(template, &record).map_err(TransportError::Protocol)?;

        let Some(circuit) = self
            .circuits
            .get_mut(host)
            .filter(|c| c.stage() != CircuitStage::Closed)
        else {
            return Err(ProtocolError::UnknownCircuit { host }.into());
        };
        if trusted_only && !circuit.trusted() {
            debug!(%host, message = %name, "sending trusted-only message over untrusted circuit");
        }

        let mut bytes = if zerocode { compress_packet(bytes) } else { bytes };
        let compressed = bytes[OFFSET_FLAGS] & PacketFlags::ZEROCODED != 0;

        let sequence = circuit.next_sequence();
        bytes[OFFSET_SEQUENCE..OFFSET_SEQUENCE + 4].copy_from_slice(&sequence.to_be_bytes());
        if reliable {
            bytes[OFFSET_FLAGS] |= PacketFlags::RELIABLE;
        }

        // Piggyback pending acks, bounded by the MTU leftovers; overflow
        // rides the next packet. The explicit ack message carries its ids
        // in the payload instead.
        if name != MSG_PACKET_ACK {
            let space = MTU.saturating_sub(bytes.len()) / 4;
            let budget = space.min(MAX_ACKS_PER_PACKET).min(u8::MAX as usize);
            if budget > 0 && circuit.pending_ack_count() > 0 {
                let acks = circuit.take_acks(budget);
                append_ack_trailer(&mut bytes, &acks);
            }
        }

        if !self.transport.send_datagram(&bytes, host) {
            if let Some(callback) = callback {
                callback(SendStatus::Failed(DeliveryFailure::TransportRejected));
            }
            return Err(TransportError::SendRejected { host });
        }

        circuit.note_outbound(bytes.len());
        self.metrics.packets_out += 1;
        self.metrics.bytes_out += bytes.len() as u64;
        if compressed {
            self.metrics.compressed_out += 1;
        }
        self.metrics.note_sent(&name, bytes.len());

        if reliable {
            circuit.register_reliable(sequence, bytes, now, callback);
        } else if let Some(callback) = callback {
            callback(SendStatus::Delivered);
        }
        Ok(())
    }

    fn send_document(
        &mut self,
        host: SocketAddr,
        record: &MessageRecord,
        callback: Option<SendCallback>,
    ) -> Result<()> {
        let Some(requests) = self.requests.as_mut() else {
            if let Some(callback) = callback {
                callback(SendStatus::Failed(DeliveryFailure::TransportRejected));
            }
            return Err(TransportError::NoRequestTransport);
        };
        let Some(url) = self.capabilities.get(&host) else {
            if let Some(callback) = callback {
                callback(SendStatus::Failed(DeliveryFailure::TransportRejected));
            }
            return Err(TransportError::NoCapability { host });
        };

        let request_id = Uuid::new_v4();
        let document = to_document(record);
        requests.send_request(request_id, url, &document);
        self.pending_requests.insert(request_id, callback);
        self.metrics.note_sent(record.name(), 0);
        debug!(%host, message = record.name(), %request_id, "document request dispatched");
        Ok(())
    }

    /// Drive one engine iteration: drain the transport, then run
    /// retransmission, ack, probe, watchdog, and request housekeeping.
    /// Returns the number of datagrams processed.
    pub fn pump(&mut self, now: SystemTime) -> usize {
        let mut processed = 0;
        while let Some((datagram, sender)) = self.transport.recv_datagram() {
            processed += 1;
            self.handle_datagram(&datagram, sender, now);
        }
        self.housekeeping(now);
        processed
    }

    fn handle_datagram(&mut self, datagram: &[u8], sender: SocketAddr, now: SystemTime) {
        self.metrics.packets_in += 1;
        self.metrics.bytes_in += datagram.len() as u64;

        if datagram.len() < MIN_PACKET_SIZE {
            self.metrics.malformed += 1;
            warn!(%sender, len = datagram.len(), "runt packet discarded");
            return;
        }

        let (framed, acks) = match strip_ack_trailer(datagram) {
            Ok(parts) => parts,
            Err(err) => {
                self.metrics.malformed += 1;
                warn!(%sender, error = %err, "packet with bad ack trailer discarded");
                return;
            }
        };

        let was_compressed = framed[OFFSET_FLAGS] & PacketFlags::ZEROCODED != 0;
        let packet = match expand_packet(framed) {
            Ok(packet) => packet,
            Err(err) => {
                self.metrics.malformed += 1;
                warn!(%sender, error = %err, "packet failed zero-run expansion");
                return;
            }
        };
        if was_compressed {
            self.metrics.compressed_in += 1;
        }

        let header = match PacketHeader::decode(&packet) {
            Ok(header) => header,
            Err(err) => {
                self.metrics.malformed += 1;
                warn!(%sender, error = %err, "packet with bad header discarded");
                return;
            }
        };

        let circuit_state = self
            .circuits
            .get(sender)
            .filter(|c| c.stage() != CircuitStage::Closed)
            .map(Circuit::trusted);

        let reader = TemplateReader::new(&self.registry);
        let template = match reader.validate(&packet, sender, circuit_state.unwrap_or(false)) {
            Ok(template) => template,
            Err(ProtocolError::TrustViolation { name }) => {
                self.metrics.trust_violations += 1;
                warn!(%sender, message = %name, "trusted-only message over untrusted circuit");
                self.queue_trust_deny(sender, now);
                return;
            }
            Err(err) => {
                self.metrics.malformed += 1;
                warn!(%sender, error = %err, "packet failed validation");
                return;
            }
        };
        let name = template.name().to_owned();

        if circuit_state.is_none() {
            let allowed = self.config.accept_unknown_circuits || name == MSG_OPEN_CIRCUIT;
            if !allowed {
                self.metrics.no_circuit += 1;
                debug!(%sender, message = %name, "packet from unknown peer dropped");
                return;
            }
            let budget = self.config.retry_budget;
            self.circuits.get_or_create(sender, now).set_retry_budget(budget);
        }

        let flags = header.flags();
        let reliable = flags.contains(PacketFlags::RELIABLE);
        let resent = flags.contains(PacketFlags::RESENT);
        let circuit = self
            .circuits
            .get_mut(sender)
            .expect("circuit resolved above");
        circuit.process_acks(&acks);
        let disposition =
            circuit.note_inbound(header.sequence(), reliable, resent, datagram.len(), now);
        if disposition == InboundDisposition::Duplicate {
            self.metrics.duplicates += 1;
            return;
        }

        let record = match reader.decode(&packet, sender) {
            Ok(record) => record,
            Err(err) => {
                self.metrics.malformed += 1;
                warn!(%sender, message = %name, error = %err, "payload decode failed");
                return;
            }
        };
        self.metrics.note_received(&name, datagram.len());

        if CONTROL_MESSAGES.contains(&name.as_str()) {
            self.service_control(&name, &record, sender, now);
            return;
        }
        self.dispatch(&record, sender);
    }

    fn dispatch(&mut self, record: &MessageRecord, sender: SocketAddr) {
        match self.handlers.get_mut(record.name()) {
            Some(handler) => handler(record, sender),
            None => {
                self.metrics.unhandled += 1;
                debug!(message = record.name(), %sender, "no handler registered, dropping");
            }
        }
    }

    fn service_control(
        &mut self,
        name: &str,
        record: &MessageRecord,
        sender: SocketAddr,
        now: SystemTime,
    ) {
        match name {
            MSG_PACKET_ACK => {
                let count = record.block_count("Packets");
                let mut acks = Vec::with_capacity(count);
                for index in 0..count {
                    if let Ok(id) = record.get_u32("Packets", "Id", index) {
                        acks.push(id);
                    }
                }
                if let Some(circuit) = self.circuits.get_mut(sender) {
                    circuit.process_acks(&acks);
                }
            }
            MSG_START_PING => {
                let ping_id = record.get_u8("PingData", "PingId", 0).unwrap_or(0);
                if let Some(record) = self.build_complete_ping(ping_id) {
                    if let Err(err) = self.send(sender, record, false, None, now) {
                        debug!(%sender, error = %err, "probe reply failed");
                    }
                }
            }
            MSG_COMPLETE_PING => {
                let ping_id = record.get_u8("PingData", "PingId", 0).unwrap_or(0);
                if let Some(circuit) = self.circuits.get_mut(sender) {
                    if let Some(rtt) = circuit.note_ping_reply(ping_id, now) {
                        debug!(%sender, ?rtt, "probe round-trip completed");
                    }
                }
            }
            MSG_OPEN_CIRCUIT => {
                debug!(%sender, "circuit established by open message");
            }
            MSG_DENY_TRUSTED => {
                warn!(%sender, "peer denied a trusted-only message");
            }
            _ => {}
        }
    }

    /// A control record is only built when the loaded schema declares the
    /// block/field shape the engine fills in; anything else logs and skips.
    fn control_shape(&self, message: &str, block: &str, fields: &[&str]) -> bool {
        let Some(template) = self.registry.lookup_by_name(message) else {
            return false;
        };
        let shape_ok = template.block(block).is_some_and(|b| {
            b.variables().len() == fields.len()
                && fields.iter().all(|f| b.variable(f).is_some())
        });
        if !shape_ok {
            warn!(message, "schema declares an unexpected control-message shape");
        }
        shape_ok
    }

    fn build_complete_ping(&self, ping_id: u8) -> Option<MessageRecord> {
        if !self.control_shape(MSG_COMPLETE_PING, "PingData", &["PingId"]) {
            return None;
        }
        let mut record = MessageRecord::new(MSG_COMPLETE_PING);
        let mut data = BlockInstance::new();
        data.push("PingId", FieldValue::U8(ping_id));
        record.push_block("PingData", data);
        Some(record)
    }

    fn queue_trust_deny(&mut self, sender: SocketAddr, now: SystemTime) {
        let deny_declared = self
            .registry
            .lookup_by_name(MSG_DENY_TRUSTED)
            .is_some_and(|t| t.blocks().is_empty());
        if !deny_declared {
            return;
        }
        if self.circuits.get(sender).is_none() {
            return;
        }
        let record = MessageRecord::new(MSG_DENY_TRUSTED);
        if let Err(err) = self.send(sender, record, false, None, now) {
            debug!(%sender, error = %err, "policy-deny reply failed");
        }
    }

    fn housekeeping(&mut self, now: SystemTime) {
        // Retransmissions fire against the same instant the receive pass
        // used, so one iteration's decisions stay internally consistent.
        let mut resends: Vec<(SocketAddr, Vec<u8>)> = Vec::new();
        let mut stale_ack_hosts: Vec<SocketAddr> = Vec::new();
        let mut ping_hosts: Vec<(SocketAddr, u8, Option<u32>)> = Vec::new();

        for circuit in self.circuits.iter_mut() {
            if circuit.stage() == CircuitStage::Closed {
                continue;
            }
            for retransmit in circuit.due_retransmits(now) {
                let mut payload = retransmit.payload;
                payload[OFFSET_FLAGS] |= PacketFlags::RESENT;
                resends.push((circuit.host(), payload));
            }
            if circuit.acks_stale(now) {
                stale_ack_hosts.push(circuit.host());
            }
            circuit.watchdog(now);
            if circuit.ping_due(now) {
                let oldest = circuit.oldest_unacked();
                let ping_id = circuit.note_ping_sent(now);
                ping_hosts.push((circuit.host(), ping_id, oldest));
            }
        }

        for (host, payload) in resends {
            if self.transport.send_datagram(&payload, host) {
                self.metrics.resends += 1;
                self.metrics.packets_out += 1;
                self.metrics.bytes_out += payload.len() as u64;
                if let Some(circuit) = self.circuits.get_mut(host) {
                    circuit.note_outbound(payload.len());
                }
            }
        }

        for host in stale_ack_hosts {
            self.flush_acks(host, now);
        }

        for (host, ping_id, oldest) in ping_hosts {
            if let Some(record) = self.build_start_ping(ping_id, oldest) {
                if let Err(err) = self.send(host, record, false, None, now) {
                    debug!(%host, error = %err, "probe send failed");
                }
            }
        }

        self.poll_requests();
    }

    fn build_start_ping(&self, ping_id: u8, oldest_unacked: Option<u32>) -> Option<MessageRecord> {
        if !self.control_shape(MSG_START_PING, "PingData", &["PingId", "OldestUnacked"]) {
            return None;
        }
        let mut record = MessageRecord::new(MSG_START_PING);
        let mut data = BlockInstance::new();
        data.push("PingId", FieldValue::U8(ping_id));
        data.push(
            "OldestUnacked",
            FieldValue::U32(oldest_unacked.unwrap_or(0)),
        );
        record.push_block("PingData", data);
        Some(record)
    }

    /// Send pending acks for a peer in a dedicated ack message when the
    /// schema defines one; otherwise they keep waiting for piggyback.
    fn flush_acks(&mut self, host: SocketAddr, now: SystemTime) {
        if !self.control_shape(MSG_PACKET_ACK, "Packets", &["Id"]) {
            return;
        }
        let Some(circuit) = self.circuits.get_mut(host) else {
            return;
        };
        let acks = circuit.take_acks(MAX_ACKS_PER_PACKET);
        if acks.is_empty() {
            return;
        }
        let mut record = MessageRecord::new(MSG_PACKET_ACK);
        for id in acks {
            let mut packets = BlockInstance::new();
            packets.push("Id", FieldValue::U32(id));
            record.push_block("Packets", packets);
        }
        if let Err(err) = self.send(host, record, false, None, now) {
            debug!(%host, error = %err, "ack flush failed");
        }
    }

    fn poll_requests(&mut self) {
        let Some(requests) = self.requests.as_mut() else {
            return;
        };
        while let Some((request_id, outcome)) = requests.poll_response() {
            let Some(callback) = self.pending_requests.remove(&request_id) else {
                debug!(%request_id, "response for unknown request dropped");
                continue;
            };
            let status = match outcome {
                Ok(_) => SendStatus::Delivered,
                Err(code) => {
                    warn!(%request_id, code, "document request failed");
                    SendStatus::Failed(DeliveryFailure::TransportRejected)
                }
            };
            if let Some(callback) = callback {
                callback(status);
            }
        }
    }

    /// Deliver an inbound document-encoded message, e.g. from the embedding
    /// HTTP server. The record reaches the same handler the binary path
    /// would invoke.
    pub fn deliver_document(
        &mut self,
        document: &Value,
        sender: SocketAddr,
        now: SystemTime,
    ) -> Result<()> {
        let trusted = self
            .circuits
            .get(sender)
            .filter(|c| c.stage() != CircuitStage::Closed)
            .is_some_and(Circuit::trusted);
        let reader = crate::protocol::DocumentReader::new(&self.registry);
        let template = match reader.validate(document, trusted) {
            Ok(template) => template,
            Err(err @ ProtocolError::TrustViolation { .. }) => {
                self.metrics.trust_violations += 1;
                self.queue_trust_deny(sender, now);
                return Err(err.into());
            }
            Err(err) => {
                self.metrics.malformed += 1;
                return Err(err.into());
            }
        };
        let name = template.name().to_owned();
        let record = reader.decode(document).map_err(|err| {
            self.metrics.malformed += 1;
            TransportError::Protocol(err)
        })?;
        self.metrics.note_received(&name, 0);
        if CONTROL_MESSAGES.contains(&name.as_str()) {
            warn!(%sender, message = %name, "control message over document transport dropped");
            return Ok(());
        }
        self.dispatch(&record, sender);
        Ok(())
    }

    /// Convenience wrapper sampling the wall clock for one pump.
    pub fn pump_now(&mut self) -> usize {
        self.pump(SystemTime::now())
    }
}
