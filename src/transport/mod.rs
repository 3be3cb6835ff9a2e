//! TWP transport: circuits, packet I/O, and the poll-driven engine.

mod circuit;
mod engine;
mod error;
mod socket;

pub use circuit::{
    ACK_COLLECT_WINDOW, Circuit, CircuitCounters, CircuitStage, CircuitTable,
    DEFAULT_RELIABLE_RETRIES, DORMANT_AFTER, DUPLICATE_CAPACITY, DUPLICATE_HORIZON,
    DeliveryFailure, INITIAL_RTT, InboundDisposition, MAX_RELIABLE_TIMEOUT, MIN_RELIABLE_TIMEOUT,
    PING_INTERVAL, RTO_RTT_FACTOR, Retransmit, SendCallback, SendStatus,
};
pub use engine::{
    CONTROL_MESSAGES, DatagramTransport, EngineConfig, MSG_COMPLETE_PING, MSG_DENY_TRUSTED,
    MSG_OPEN_CIRCUIT, MSG_PACKET_ACK, MSG_START_PING, MessageEngine, RequestTransport,
};
pub use error::{Result, TransportError};
pub use socket::SocketBinding;
