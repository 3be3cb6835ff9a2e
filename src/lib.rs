//! TWP (Templated Wire Protocol) - Schema-driven dual-encoding messaging
//! with circuit reliability over UDP
//!
//! This library implements the TWP application-layer messaging stack: a
//! schema-driven binary/document dual-encoding wire format, its
//! reader/builder pair, and the per-peer circuit state machine that layers
//! acknowledgement, retransmission, and duplicate suppression over an
//! unreliable unicast transport.
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::SystemTime;
//! use twp::protocol::{FieldValue, MessageBuilder, SCHEMA_VERSION, TemplateReader,
//!     TemplateBuilder, TemplateRegistry};
//!
//! let schema = r"
//! version 2.0
//! {
//!     Ping High 1 NotTrusted Unencoded
//!     {
//!         PingData Single
//!         {   Id    U8 }
//!     }
//! }
//! ";
//! let registry = TemplateRegistry::load(schema, SCHEMA_VERSION)?;
//!
//! // Build a message
//! let template = registry.lookup_by_name("Ping").unwrap();
//! let mut builder = TemplateBuilder::begin(template);
//! builder.block("PingData").set("Id", FieldValue::U8(7));
//! let bytes = builder.finish()?;
//!
//! // Decode it on the receiving side
//! let reader = TemplateReader::new(&registry);
//! let sender = "127.0.0.1:13000".parse().unwrap();
//! let record = reader.decode(&bytes, sender)?;
//! assert_eq!(record.get_u8("PingData", "Id", 0)?, 7);
//! # Ok::<(), twp::protocol::Error>(())
//! ```
//!
//! # Features
//!
//! - **Schema-loaded templates** - message layout, trust, and encoding come
//!   from a versioned template file, rejected wholesale on any collision
//! - **Dual encodings** - compact binary packets or self-describing
//!   documents over a request/response transport, one accessor contract
//! - **Zero-run compression** - transparent, lossless, applied only when it
//!   pays
//! - **Circuit reliability** - per-peer sequence tracking, ack trailers,
//!   retransmission with a retry budget, duplicate suppression
//!
//! The engine ([`transport::MessageEngine`]) is an explicit value owned by
//! the caller and driven from the caller's own poll loop; nothing in this
//! crate is process-global.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod protocol;
pub mod transport;

pub use protocol::{
    Error, FieldValue, MTU, MessageBuilder, MessageRecord, Result, SCHEMA_VERSION,
    TemplateRegistry,
};
pub use transport::{EngineConfig, MessageEngine, SendStatus, SocketBinding};

/// TWP protocol version
pub const VERSION: &str = "2.0";

/// Default TWP port
pub const DEFAULT_PORT: u16 = 13000;
