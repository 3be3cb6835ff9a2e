//! TWP protocol error types

use thiserror::Error;

/// TWP protocol errors
#[derive(Error, Debug)]
pub enum Error {
    /// Schema text failed to parse
    #[error("schema parse error at line {line}: {reason}")]
    Parse {
        /// Line in the schema file
        line: usize,
        /// What went wrong
        reason: String,
    },

    /// Schema version does not match the compiled-in expectation
    #[error("schema version mismatch: expected {expected}, file declares {found}")]
    VersionMismatch {
        /// Version this build requires
        expected: f32,
        /// Version declared by the file
        found: f32,
    },

    /// Two templates collide on name or wire id
    #[error("duplicate template {name:?} (wire id {wire_id:#010x})")]
    DuplicateTemplate {
        /// Offending message name
        name: String,
        /// Composed wire id
        wire_id: u32,
    },

    /// Packet too short or structurally invalid
    #[error("malformed packet: {reason}")]
    MalformedPacket {
        /// What made the packet unusable
        reason: &'static str,
    },

    /// A checked read would run past the end of the buffer
    #[error("truncated read: wanted {wanted} bytes, {available} available")]
    TruncatedRead {
        /// Bytes the read required
        wanted: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// Zero-run expansion would exceed the output capacity
    #[error("runaway zero run: expansion exceeds {max} bytes")]
    RunawayZeroRun {
        /// Output capacity limit
        max: usize,
    },

    /// Wire id resolved to no registered template
    #[error("unknown template: wire id {wire_id:#010x}")]
    UnknownTemplate {
        /// Composed wire id from the header
        wire_id: u32,
    },

    /// Message name resolved to no registered template
    #[error("unknown message name: {0:?}")]
    UnknownMessageName(String),

    /// Trusted-only message arriving over an untrusted circuit
    #[error("trust violation: {name} requires a trusted circuit")]
    TrustViolation {
        /// Message name that was refused
        name: String,
    },

    /// No circuit exists for the peer and none may be created
    #[error("no circuit for {host}")]
    UnknownCircuit {
        /// Peer address
        host: std::net::SocketAddr,
    },

    /// Built message exceeds the transport MTU budget
    #[error("message too large: {size} bytes (MTU budget {max})")]
    Oversize {
        /// Encoded size
        size: usize,
        /// Budget it exceeds
        max: usize,
    },

    /// Document form is structurally wrong for the schema
    #[error("malformed document: {reason}")]
    MalformedDocument {
        /// What made the document unusable
        reason: String,
    },

    /// Accessor addressed a block/field/instance that does not exist
    #[error("no field {block}.{field}[{index}] in message {message}")]
    MissingField {
        /// Message name
        message: String,
        /// Block name
        block: String,
        /// Field name
        field: String,
        /// Block instance index
        index: usize,
    },

    /// Accessor type does not match the stored value
    #[error("type mismatch for {block}.{field}: expected {expected}")]
    TypeMismatch {
        /// Block name
        block: String,
        /// Field name
        field: String,
        /// Type the accessor asked for
        expected: &'static str,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
