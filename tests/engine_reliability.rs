//! Engine-level reliability properties driven over a deterministic
//! in-memory link: duplicate suppression, retry exhaustion, trust
//! enforcement, circuit lifecycle, and document-path completion parity.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use uuid::Uuid;

use twp::protocol::{
    FieldValue, MessageBuilder, PacketFlags, PacketHeader, SCHEMA_VERSION, TemplateReader,
    TemplateRegistry, expand_packet, strip_ack_trailer,
};
use twp::transport::{
    DatagramTransport, EngineConfig, MSG_OPEN_CIRCUIT, MessageEngine, RequestTransport,
    SendStatus, CircuitStage, DeliveryFailure,
};

const SCHEMA: &str = r"
version 2.0

{ PacketAck Low 1 NotTrusted Unencoded
    { Packets Variable
        {   Id    U32 }
    }
}
{ OpenCircuit Low 2 NotTrusted Unencoded
    { CircuitInfo Single
        {   Ip      IpAddr }
        {   Port    IpPort }
    }
}
{ DenyTrustedCircuit Low 3 NotTrusted Unencoded }
{ Secret Low 4 Trusted Unencoded
    { Payload Single
        {   Value    U32 }
    }
}
{ Profile Low 5 NotTrusted Document
    { ProfileData Single
        {   Name    Variable 1 }
    }
}
{ Bulk Low 6 NotTrusted Zerocoded
    { Data Single
        {   Blob    Variable 2 }
    }
}
{ StartPingCheck High 1 NotTrusted Unencoded
    { PingData Single
        {   PingId           U8 }
        {   OldestUnacked    U32 }
    }
}
{ CompletePingCheck High 2 NotTrusted Unencoded
    { PingData Single
        {   PingId    U8 }
    }
}
{ Chat High 3 NotTrusted Unencoded
    { ChatData Single
        {   Channel    S32 }
        {   Text       Variable 1 }
    }
}
{ Orphan High 4 NotTrusted Unencoded
    { OrphanData Single
        {   Value    U8 }
    }
}
";

const DENY_WIRE_ID: u32 = 0xFFFF_0003;

fn at(seconds: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds)
}

fn at_ms(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::new(127, 0, 0, 1), port))
}

#[derive(Default)]
struct NetState {
    queues: HashMap<SocketAddr, VecDeque<(Vec<u8>, SocketAddr)>>,
    sent: Vec<(SocketAddr, SocketAddr, Vec<u8>)>,
    blackholes: HashSet<(SocketAddr, SocketAddr)>,
}

/// Lossless (unless blackholed) zero-delay link shared by test endpoints.
#[derive(Clone, Default)]
struct TestNet(Arc<Mutex<NetState>>);

impl TestNet {
    fn endpoint(&self, addr: SocketAddr) -> TestEndpoint {
        TestEndpoint {
            net: self.clone(),
            addr,
        }
    }

    fn blackhole(&self, from: SocketAddr, to: SocketAddr) {
        self.0.lock().unwrap().blackholes.insert((from, to));
    }

    fn sent_between(&self, from: SocketAddr, to: SocketAddr) -> Vec<Vec<u8>> {
        self.0
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(f, t, _)| *f == from && *t == to)
            .map(|(_, _, bytes)| bytes.clone())
            .collect()
    }

    /// Inject a raw datagram, e.g. to simulate network duplication.
    fn inject(&self, to: SocketAddr, bytes: Vec<u8>, from: SocketAddr) {
        self.0
            .lock()
            .unwrap()
            .queues
            .entry(to)
            .or_default()
            .push_back((bytes, from));
    }
}

struct TestEndpoint {
    net: TestNet,
    addr: SocketAddr,
}

impl DatagramTransport for TestEndpoint {
    fn send_datagram(&mut self, bytes: &[u8], host: SocketAddr) -> bool {
        let mut net = self.net.0.lock().unwrap();
        net.sent.push((self.addr, host, bytes.to_vec()));
        if !net.blackholes.contains(&(self.addr, host)) {
            net.queues
                .entry(host)
                .or_default()
                .push_back((bytes.to_vec(), self.addr));
        }
        true
    }

    fn recv_datagram(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        self.net
            .0
            .lock()
            .unwrap()
            .queues
            .get_mut(&self.addr)?
            .pop_front()
    }
}

#[derive(Default)]
struct ReqState {
    sent: Vec<(Uuid, String)>,
    responses: VecDeque<(Uuid, Result<Value, u16>)>,
}

#[derive(Clone, Default)]
struct TestRequests(Arc<Mutex<ReqState>>);

impl RequestTransport for TestRequests {
    fn send_request(&mut self, request_id: Uuid, url: &str, _document: &Value) {
        self.0.lock().unwrap().sent.push((request_id, url.to_owned()));
    }

    fn poll_response(&mut self) -> Option<(Uuid, Result<Value, u16>)> {
        self.0.lock().unwrap().responses.pop_front()
    }
}

fn make_engine(net: &TestNet, addr: SocketAddr, accept_unknown: bool) -> MessageEngine {
    let registry = TemplateRegistry::load(SCHEMA, SCHEMA_VERSION).unwrap();
    MessageEngine::new(
        registry,
        Box::new(net.endpoint(addr)),
        EngineConfig {
            accept_unknown_circuits: accept_unknown,
            ..EngineConfig::default()
        },
    )
}

fn chat_record(engine: &MessageEngine, text: &str) -> twp::MessageRecord {
    let mut builder = engine.builder("Chat").unwrap();
    builder
        .block("ChatData")
        .set("Channel", FieldValue::S32(0))
        .set_string("Text", text);
    builder.into_record()
}

/// Counter of handler invocations shared with the engine closure.
fn counting_handler(
    log: &Arc<Mutex<Vec<String>>>,
) -> impl FnMut(&twp::MessageRecord, SocketAddr) + Send + 'static {
    let log = Arc::clone(log);
    move |record, _| {
        let text = record.get_string("ChatData", "Text", 0).unwrap_or_default();
        log.lock().unwrap().push(text);
    }
}

/// Every acknowledgement of `sequence` emitted in `bytes`: trailer ids plus
/// explicit PacketAck payload ids.
fn acks_in(bytes: &[u8], reg: &TemplateRegistry, sequence: u32) -> usize {
    let (payload, trailer_acks) = strip_ack_trailer(bytes).unwrap();
    let mut count = trailer_acks.iter().filter(|&&id| id == sequence).count();
    let packet = expand_packet(payload).unwrap();
    let header = PacketHeader::decode(&packet).unwrap();
    if reg
        .lookup_by_wire_id(header.wire_id())
        .is_some_and(|t| t.name() == "PacketAck")
    {
        let reader = TemplateReader::new(reg);
        let record = reader.decode(&packet, addr(1)).unwrap();
        for index in 0..record.block_count("Packets") {
            if record.get_u32("Packets", "Id", index).is_ok_and(|id| id == sequence) {
                count += 1;
            }
        }
    }
    count
}

fn sequence_of(bytes: &[u8]) -> u32 {
    let (payload, _) = strip_ack_trailer(bytes).unwrap();
    PacketHeader::decode(&expand_packet(payload).unwrap())
        .unwrap()
        .sequence()
}

fn wire_id_of(bytes: &[u8]) -> u32 {
    let (payload, _) = strip_ack_trailer(bytes).unwrap();
    PacketHeader::decode(&expand_packet(payload).unwrap())
        .unwrap()
        .wire_id()
}

#[test]
fn chat_reaches_registered_handler() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9001), addr(9002));
    let mut a = make_engine(&net, a_addr, false);
    let mut b = make_engine(&net, b_addr, true);

    let received = Arc::new(Mutex::new(Vec::new()));
    b.register_handler("Chat", counting_handler(&received)).unwrap();

    a.open_circuit(b_addr, at(0));
    let record = chat_record(&a, "hello");
    a.send(b_addr, record, false, None, at(0)).unwrap();
    b.pump(at(0));

    assert_eq!(received.lock().unwrap().as_slice(), ["hello"]);
    assert_eq!(b.circuit_count(), 1);
}

#[test]
fn unregistered_message_is_logged_and_dropped() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9011), addr(9012));
    let mut a = make_engine(&net, a_addr, false);
    let mut b = make_engine(&net, b_addr, true);

    a.open_circuit(b_addr, at(0));
    let mut builder = a.builder("Orphan").unwrap();
    builder.block("OrphanData").set("Value", FieldValue::U8(1));
    let record = builder.into_record();
    a.send(b_addr, record, false, None, at(0)).unwrap();
    b.pump(at(0));

    assert_eq!(b.metrics().unhandled, 1);
}

#[test]
fn outbound_sequence_ids_increase_by_exactly_one() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9021), addr(9022));
    let mut a = make_engine(&net, a_addr, false);

    a.open_circuit(b_addr, at(0));
    for text in ["one", "two", "three"] {
        let record = chat_record(&a, text);
        a.send(b_addr, record, false, None, at(0)).unwrap();
    }

    let sequences: Vec<u32> = net
        .sent_between(a_addr, b_addr)
        .iter()
        .map(|bytes| sequence_of(bytes))
        .collect();
    assert_eq!(sequences, vec![0, 1, 2]);
}

#[test]
fn reliable_send_completes_when_acked() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9031), addr(9032));
    let mut a = make_engine(&net, a_addr, false);
    let mut b = make_engine(&net, b_addr, true);
    b.register_handler("Chat", |_, _| {}).unwrap();

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let statuses_in_callback = Arc::clone(&statuses);

    a.open_circuit(b_addr, at(0));
    let record = chat_record(&a, "important");
    a.send(
        b_addr,
        record,
        true,
        Some(Box::new(move |status| {
            statuses_in_callback.lock().unwrap().push(status);
        })),
        at(0),
    )
    .unwrap();

    // B processes and its housekeeping traffic carries the ack back.
    b.pump(at(1));
    b.pump(at(2));
    a.pump(at(2));

    assert_eq!(statuses.lock().unwrap().as_slice(), [SendStatus::Delivered]);
    assert_eq!(a.circuit(b_addr).unwrap().unacked_count(), 0);
}

#[test]
fn duplicate_reliable_packet_one_dispatch_two_acks() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9041), addr(9042));
    let mut a = make_engine(&net, a_addr, false);
    let mut b = make_engine(&net, b_addr, true);

    let received = Arc::new(Mutex::new(Vec::new()));
    b.register_handler("Chat", counting_handler(&received)).unwrap();

    a.open_circuit(b_addr, at(0));
    let record = chat_record(&a, "once");
    a.send(b_addr, record, true, None, at(0)).unwrap();
    let original = net.sent_between(a_addr, b_addr).remove(0);
    let sequence = sequence_of(&original);

    // First delivery, then the ack drains through housekeeping.
    b.pump(at_ms(1000));
    b.pump(at_ms(2000));

    // The network duplicates the reliable packet.
    net.inject(b_addr, original, a_addr);
    b.pump(at_ms(3000));
    b.pump(at_ms(4000));

    assert_eq!(received.lock().unwrap().len(), 1);
    assert_eq!(b.metrics().duplicates, 1);

    let reg = TemplateRegistry::load(SCHEMA, SCHEMA_VERSION).unwrap();
    let total_acks: usize = net
        .sent_between(b_addr, a_addr)
        .iter()
        .map(|bytes| acks_in(bytes, &reg, sequence))
        .sum();
    assert_eq!(total_acks, 2);
}

#[test]
fn reliable_send_retries_then_reports_exhaustion() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9051), addr(9052));
    let mut a = make_engine(&net, a_addr, false);

    net.blackhole(a_addr, b_addr);
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let statuses_in_callback = Arc::clone(&statuses);

    a.open_circuit(b_addr, at(100));
    let record = chat_record(&a, "void");
    a.send(
        b_addr,
        record,
        true,
        Some(Box::new(move |status| {
            statuses_in_callback.lock().unwrap().push(status);
        })),
        at(100),
    )
    .unwrap();
    let sequence = sequence_of(&net.sent_between(a_addr, b_addr)[0]);

    // Default budget is 3 retries; the fourth deadline exhausts it.
    for pump_at in [102, 104, 106, 108] {
        a.pump(at(pump_at));
    }

    assert_eq!(
        statuses.lock().unwrap().as_slice(),
        [SendStatus::Failed(DeliveryFailure::ReliabilityExhausted)]
    );
    assert_eq!(a.circuit(b_addr).unwrap().unacked_count(), 0);

    let transmissions: Vec<Vec<u8>> = net
        .sent_between(a_addr, b_addr)
        .into_iter()
        .filter(|bytes| sequence_of(bytes) == sequence)
        .collect();
    assert_eq!(transmissions.len(), 4);
    // The original is not marked resent; every retransmission is, and all
    // reuse the original sequence id.
    assert_eq!(transmissions[0][0] & PacketFlags::RESENT, 0);
    for resent in &transmissions[1..] {
        assert_ne!(resent[0] & PacketFlags::RESENT, 0);
    }
}

#[test]
fn trusted_message_on_untrusted_circuit_is_denied() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9061), addr(9062));
    let mut a = make_engine(&net, a_addr, false);
    let mut b = make_engine(&net, b_addr, true);

    let secrets = Arc::new(Mutex::new(Vec::new()));
    let secrets_in_handler = Arc::clone(&secrets);
    b.register_handler("Secret", move |record, _| {
        secrets_in_handler
            .lock()
            .unwrap()
            .push(record.get_u32("Payload", "Value", 0).unwrap());
    })
    .unwrap();

    // B learns about A over an ordinary message first.
    a.open_circuit(b_addr, at(0));
    a.send(b_addr, chat_record(&a, "hi"), false, None, at(0)).unwrap();
    b.pump(at(0));

    let secret = {
        let mut builder = a.builder("Secret").unwrap();
        builder.block("Payload").set("Value", FieldValue::U32(99));
        builder.into_record()
    };
    a.send(b_addr, secret, false, None, at(1)).unwrap();
    b.pump(at(1));

    assert!(secrets.lock().unwrap().is_empty());
    assert_eq!(b.metrics().trust_violations, 1);
    let denies = net
        .sent_between(b_addr, a_addr)
        .iter()
        .filter(|bytes| wire_id_of(bytes) == DENY_WIRE_ID)
        .count();
    assert_eq!(denies, 1);

    // Granting trust lets the same message through.
    b.open_circuit(a_addr, at(2)).set_trusted(true);
    let secret = {
        let mut builder = a.builder("Secret").unwrap();
        builder.block("Payload").set("Value", FieldValue::U32(100));
        builder.into_record()
    };
    a.send(b_addr, secret, false, None, at(2)).unwrap();
    b.pump(at(2));
    assert_eq!(secrets.lock().unwrap().as_slice(), [100]);
}

#[test]
fn unknown_peer_needs_the_open_circuit_message() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9071), addr(9072));
    let mut a = make_engine(&net, a_addr, false);
    let mut b = make_engine(&net, b_addr, false);

    let received = Arc::new(Mutex::new(Vec::new()));
    b.register_handler("Chat", counting_handler(&received)).unwrap();

    a.open_circuit(b_addr, at(0));
    a.send(b_addr, chat_record(&a, "early"), false, None, at(0)).unwrap();
    b.pump(at(0));
    assert!(received.lock().unwrap().is_empty());
    assert_eq!(b.metrics().no_circuit, 1);
    assert_eq!(b.circuit_count(), 0);

    let open = {
        let mut builder = a.builder(MSG_OPEN_CIRCUIT).unwrap();
        builder
            .block("CircuitInfo")
            .set("Ip", FieldValue::IpAddr(Ipv4Addr::new(127, 0, 0, 1)))
            .set("Port", FieldValue::IpPort(a_addr.port()));
        builder.into_record()
    };
    a.send(b_addr, open, false, None, at(1)).unwrap();
    b.pump(at(1));
    assert_eq!(b.circuit_count(), 1);

    a.send(b_addr, chat_record(&a, "late"), false, None, at(2)).unwrap();
    b.pump(at(2));
    assert_eq!(received.lock().unwrap().as_slice(), ["late"]);
}

#[test]
fn zerocoded_message_travels_compressed() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9081), addr(9082));
    let mut a = make_engine(&net, a_addr, false);
    let mut b = make_engine(&net, b_addr, true);

    let blobs = Arc::new(Mutex::new(Vec::new()));
    let blobs_in_handler = Arc::clone(&blobs);
    b.register_handler("Bulk", move |record, _| {
        blobs_in_handler
            .lock()
            .unwrap()
            .push(record.get_bytes("Data", "Blob", 0).unwrap());
    })
    .unwrap();

    a.open_circuit(b_addr, at(0));
    let record = {
        let mut builder = a.builder("Bulk").unwrap();
        builder
            .block("Data")
            .set("Blob", FieldValue::Bytes(vec![0u8; 400].into()));
        builder.into_record()
    };
    a.send(b_addr, record, false, None, at(0)).unwrap();

    let datagrams = net.sent_between(a_addr, b_addr);
    assert_ne!(datagrams[0][0] & PacketFlags::ZEROCODED, 0);
    assert!(datagrams[0].len() < 100);

    b.pump(at(0));
    assert_eq!(blobs.lock().unwrap().as_slice(), [vec![0u8; 400]]);
    assert_eq!(b.metrics().compressed_in, 1);
    assert_eq!(a.metrics().compressed_out, 1);
}

#[test]
fn circuit_goes_dormant_and_revives_on_traffic() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9091), addr(9092));
    let mut a = make_engine(&net, a_addr, false);
    let mut b = make_engine(&net, b_addr, true);
    b.register_handler("Chat", |_, _| {}).unwrap();

    a.open_circuit(b_addr, at(0));
    a.send(b_addr, chat_record(&a, "hi"), false, None, at(0)).unwrap();
    b.pump(at(0));
    assert_eq!(b.circuit(a_addr).unwrap().stage(), CircuitStage::Alive);

    b.pump(at(200));
    assert_eq!(b.circuit(a_addr).unwrap().stage(), CircuitStage::Dormant);

    a.send(b_addr, chat_record(&a, "anyone?"), false, None, at(201)).unwrap();
    b.pump(at(201));
    assert_eq!(b.circuit(a_addr).unwrap().stage(), CircuitStage::Alive);
}

#[test]
fn closing_a_circuit_fails_outstanding_sends() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9101), addr(9102));
    let mut a = make_engine(&net, a_addr, false);

    net.blackhole(a_addr, b_addr);
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let statuses_in_callback = Arc::clone(&statuses);

    a.open_circuit(b_addr, at(0));
    a.send(
        b_addr,
        chat_record(&a, "doomed"),
        true,
        Some(Box::new(move |status| {
            statuses_in_callback.lock().unwrap().push(status);
        })),
        at(0),
    )
    .unwrap();

    a.close_circuit(b_addr);
    assert_eq!(
        statuses.lock().unwrap().as_slice(),
        [SendStatus::Failed(DeliveryFailure::CircuitClosed)]
    );
    // A closed circuit no longer accepts sends.
    assert!(a.send(b_addr, chat_record(&a, "after"), false, None, at(1)).is_err());
}

#[test]
fn probe_roundtrip_feeds_the_rtt_estimate() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9111), addr(9112));
    let mut a = make_engine(&net, a_addr, false);
    let mut b = make_engine(&net, b_addr, true);

    a.open_circuit(b_addr, at(0));
    // Housekeeping emits the probe.
    a.pump(at_ms(0));
    // B answers with the matching probe reply.
    b.pump(at_ms(40));
    // A folds the sample into its estimate.
    a.pump(at_ms(80));

    assert_eq!(
        a.circuit(b_addr).unwrap().smoothed_rtt(),
        Some(Duration::from_millis(80))
    );
}

#[test]
fn document_send_completion_matches_udp_contract() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9121), addr(9122));
    let requests = TestRequests::default();
    let registry = TemplateRegistry::load(SCHEMA, SCHEMA_VERSION).unwrap();
    let mut a = MessageEngine::new(
        registry,
        Box::new(net.endpoint(a_addr)),
        EngineConfig::default(),
    )
    .with_request_transport(Box::new(requests.clone()));
    a.set_capability(b_addr, "https://peer.example/caps/message");

    let statuses = Arc::new(Mutex::new(Vec::new()));

    for (value, outcome) in [
        (Ok(Value::Null), SendStatus::Delivered),
        (
            Err(503),
            SendStatus::Failed(DeliveryFailure::TransportRejected),
        ),
    ] {
        let record = {
            let mut builder = a.builder("Profile").unwrap();
            builder.block("ProfileData").set_string("Name", "wren");
            builder.into_record()
        };
        let statuses_in_callback = Arc::clone(&statuses);
        a.send(
            b_addr,
            record,
            true,
            Some(Box::new(move |status| {
                statuses_in_callback.lock().unwrap().push(status);
            })),
            at(0),
        )
        .unwrap();

        let (request_id, url) = requests.0.lock().unwrap().sent.last().unwrap().clone();
        assert_eq!(url, "https://peer.example/caps/message");
        requests.0.lock().unwrap().responses.push_back((request_id, value));
        a.pump(at(1));
        assert_eq!(statuses.lock().unwrap().last(), Some(&outcome));
    }

    // No datagrams ever hit the UDP transport for document sends.
    assert!(net.sent_between(a_addr, b_addr).is_empty());
}

#[test]
fn inbound_document_reaches_the_same_handler() {
    let net = TestNet::default();
    let (a_addr, b_addr) = (addr(9131), addr(9132));
    let mut b = make_engine(&net, b_addr, true);

    let names = Arc::new(Mutex::new(Vec::new()));
    let names_in_handler = Arc::clone(&names);
    b.register_handler("Profile", move |record, sender| {
        names_in_handler
            .lock()
            .unwrap()
            .push((record.get_string("ProfileData", "Name", 0).unwrap(), sender));
    })
    .unwrap();

    let doc = json!({
        "message": "Profile",
        "body": { "ProfileData": [ { "Name": [119, 114, 101, 110] } ] }
    });
    b.deliver_document(&doc, a_addr, at(0)).unwrap();

    assert_eq!(
        names.lock().unwrap().as_slice(),
        [("wren".to_owned(), a_addr)]
    );
}

#[test]
fn control_message_handlers_cannot_be_registered() {
    let net = TestNet::default();
    let mut a = make_engine(&net, addr(9141), false);
    assert!(a.register_handler("PacketAck", |_, _| {}).is_err());
    assert!(a.register_handler("StartPingCheck", |_, _| {}).is_err());
    assert!(a.register_handler("NoSuchMessage", |_, _| {}).is_err());
}
