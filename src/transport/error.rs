//! Transport-level error types.

use thiserror::Error;

/// Unified error type for transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying socket failure.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// Protocol-layer failure while encoding or decoding.
    #[error("protocol error: {0}")]
    Protocol(#[from] crate::protocol::Error),

    /// The datagram transport refused the send.
    #[error("transport rejected datagram to {host}")]
    SendRejected {
        /// Destination that refused
        host: std::net::SocketAddr,
    },

    /// A document-encoded send was attempted with no request transport.
    #[error("no request transport configured for document sends")]
    NoRequestTransport,

    /// A document-encoded send was attempted to a peer without a capability
    /// URL.
    #[error("no capability URL registered for {host}")]
    NoCapability {
        /// Peer that lacks a capability
        host: std::net::SocketAddr,
    },

    /// Handler registration collided with an engine-internal message name.
    #[error("message {0:?} is serviced internally by the engine")]
    ReservedMessage(String),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
