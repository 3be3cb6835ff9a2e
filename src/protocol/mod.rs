//! TWP protocol core: schema registry, wire codecs, and the builder/reader
//! pair for both encodings.

mod builder;
mod cursor;
mod document;
mod error;
mod header;
mod metrics;
mod parser;
mod reader;
mod record;
mod template;
mod types;
mod zerocode;

pub use builder::{BuiltPayload, Builder, DocumentBuilder, MessageBuilder, TemplateBuilder};
pub use cursor::Cursor;
pub use document::{KEY_BODY, KEY_MESSAGE, from_document, to_document};
pub use error::{Error, Result};
pub use header::{
    OFFSET_FLAGS, OFFSET_OFFSET, OFFSET_SEQUENCE, PREFIX_SIZE, PacketFlags, PacketHeader,
    append_ack_trailer, strip_ack_trailer,
};
pub use metrics::{EngineMetrics, TemplateCounters};
pub use reader::{DocumentReader, TemplateReader};
pub use record::{BlockInstance, MessageRecord};
pub use template::{MessageBlock, MessageTemplate, MessageVariable, TemplateRegistry};
pub use types::{
    BlockKind, Deprecation, FieldValue, Frequency, LengthSize, Trust, VarType, WireEncoding,
};
pub use zerocode::{compress, expand};

pub(crate) use builder::encode_record;

/// Schema file version this build expects.
pub const SCHEMA_VERSION: f32 = 2.0;

/// Transport MTU budget for one encoded message before the ack trailer.
pub const MTU: usize = 1200;

/// Capacity limit for zero-run expansion of one packet.
pub const MAX_EXPANDED_SIZE: usize = 8192;

/// Largest number of ack ids appended to one outbound packet; overflow
/// defers to the following packet.
pub const MAX_ACKS_PER_PACKET: usize = 250;

/// Smallest packet the receive path will look at: framing prefix plus one
/// id byte.
pub const MIN_PACKET_SIZE: usize = PREFIX_SIZE + 1;

/// Expand a packet's compressed region if its flags byte says so.
///
/// Works on the whole datagram (ack trailer already stripped): the framing
/// prefix passes through untouched, the rest is zero-run expanded, and the
/// compression flag is cleared in the returned copy. Uncompressed input is
/// returned as an owned copy unchanged.
pub fn expand_packet(buf: &[u8]) -> Result<Vec<u8>> {
    if buf.len() < MIN_PACKET_SIZE {
        return Err(Error::MalformedPacket {
            reason: "shorter than minimum packet",
        });
    }
    if buf[OFFSET_FLAGS] & PacketFlags::ZEROCODED == 0 {
        return Ok(buf.to_vec());
    }
    let mut out = Vec::with_capacity(buf.len());
    out.extend_from_slice(&buf[..PREFIX_SIZE]);
    out[OFFSET_FLAGS] &= !PacketFlags::ZEROCODED;
    out.extend(zerocode::expand(&buf[PREFIX_SIZE..], MAX_EXPANDED_SIZE)?);
    Ok(out)
}

/// Compress a packet's payload region when that shrinks it, setting the
/// compression flag. Returns the input unchanged when compression does not
/// pay.
#[must_use]
pub fn compress_packet(buf: Vec<u8>) -> Vec<u8> {
    if buf.len() < MIN_PACKET_SIZE {
        return buf;
    }
    match zerocode::compress(&buf[PREFIX_SIZE..]) {
        Some(packed) => {
            let mut out = Vec::with_capacity(PREFIX_SIZE + packed.len());
            out.extend_from_slice(&buf[..PREFIX_SIZE]);
            out[OFFSET_FLAGS] |= PacketFlags::ZEROCODED;
            out.extend(packed);
            out
        }
        None => buf,
    }
}
