//! Message readers: resolve a packet's template from its header, then walk
//! the schema to build the runtime record.
//!
//! Decoding is two-phase. `validate` inspects only the header, resolving the
//! template and enforcing trust policy without touching the payload.
//! `decode` then consumes counted-block counts and length prefixes from the
//! buffer. Payload bytes originate on the network, so every read that would
//! run past the validated length substitutes a zero-filled default and logs
//! instead of reading out of bounds.

use std::net::SocketAddr;

use bytes::Bytes;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::cursor::Cursor;
use super::document;
use super::header::{PREFIX_SIZE, PacketHeader};
use super::record::{BlockInstance, MessageRecord};
use super::template::{MessageTemplate, TemplateRegistry};
use super::types::{BlockKind, Deprecation, FieldValue, Trust, VarType};
use super::{Error, Result};

/// Reader for the binary wire form.
#[derive(Debug, Clone, Copy)]
pub struct TemplateReader<'r> {
    registry: &'r TemplateRegistry,
}

impl<'r> TemplateReader<'r> {
    /// Create a reader over the loaded registry.
    #[must_use]
    pub const fn new(registry: &'r TemplateRegistry) -> Self {
        Self { registry }
    }

    /// Header-only validation: resolve the template and enforce policy.
    ///
    /// `trusted` is the trust state of the sender's circuit.
    pub fn validate(
        &self,
        buf: &[u8],
        sender: SocketAddr,
        trusted: bool,
    ) -> Result<&'r MessageTemplate> {
        let header = PacketHeader::decode(buf)?;
        let template = self
            .registry
            .lookup_by_wire_id(header.wire_id())
            .ok_or(Error::UnknownTemplate {
                wire_id: header.wire_id(),
            })?;

        if template.trust() == Trust::Trusted && !trusted {
            return Err(Error::TrustViolation {
                name: template.name().to_owned(),
            });
        }
        if template.deprecation() == Deprecation::Deprecated {
            warn!(message = template.name(), %sender, "deprecated message received");
        }
        Ok(template)
    }

    /// Decode the payload into a record, walking the schema.
    pub fn decode(&self, buf: &[u8], sender: SocketAddr) -> Result<MessageRecord> {
        let header = PacketHeader::decode(buf)?;
        let template = self
            .registry
            .lookup_by_wire_id(header.wire_id())
            .ok_or(Error::UnknownTemplate {
                wire_id: header.wire_id(),
            })?;

        let payload_start = PREFIX_SIZE + header.frequency().id_width() + header.offset() as usize;
        if payload_start > buf.len() {
            return Err(Error::MalformedPacket {
                reason: "offset points past end of packet",
            });
        }
        let mut cur = Cursor::new(&buf[payload_start..]);

        let mut record = MessageRecord::new(template.name());
        for block in template.blocks() {
            let repeats = match block.kind() {
                BlockKind::Single => 1,
                BlockKind::Fixed(count) => count as usize,
                // A missing count byte at end-of-buffer means zero repeats;
                // peers legitimately omit trailing counted blocks.
                BlockKind::Counted => {
                    if cur.is_empty() {
                        0
                    } else {
                        cur.read_u8()? as usize
                    }
                }
            };

            for _ in 0..repeats {
                let mut instance = BlockInstance::new();
                for variable in block.variables() {
                    let value = decode_value(
                        &mut cur,
                        variable.var_type(),
                        template.name(),
                        block.name(),
                        variable.name(),
                        sender,
                    );
                    instance.push(variable.name(), value);
                }
                record.push_block(block.name(), instance);
            }
        }
        Ok(record)
    }
}

fn ran_off_end(message: &str, block: &str, field: &str, sender: SocketAddr, wanted: usize) {
    warn!(
        message,
        block,
        field,
        %sender,
        wanted,
        "packet too short for field, substituting zero default"
    );
}

fn decode_value(
    cur: &mut Cursor<'_>,
    var_type: VarType,
    message: &str,
    block: &str,
    field: &str,
    sender: SocketAddr,
) -> FieldValue {
    if let VarType::Variable(length) = var_type {
        // The length prefix itself may be cut off.
        let Ok(prefix) = cur.read_bytes(length.width()) else {
            ran_off_end(message, block, field, sender, length.width());
            cur.skip(cur.remaining()).ok();
            return FieldValue::zero_for(var_type);
        };
        let declared = match length.width() {
            1 => usize::from(prefix[0]),
            2 => usize::from(u16::from_be_bytes([prefix[0], prefix[1]])),
            _ => u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize,
        };
        return match cur.read_bytes(declared) {
            Ok(bytes) => FieldValue::Bytes(Bytes::copy_from_slice(bytes)),
            Err(_) => {
                ran_off_end(message, block, field, sender, declared);
                cur.skip(cur.remaining()).ok();
                FieldValue::zero_for(var_type)
            }
        };
    }

    let size = var_type.fixed_size().unwrap_or(0);
    let Ok(bytes) = cur.read_bytes(size) else {
        ran_off_end(message, block, field, sender, size);
        cur.skip(cur.remaining()).ok();
        return FieldValue::zero_for(var_type);
    };
    let mut cur = Cursor::new(bytes);
    let read = &mut cur;

    // Reads below cannot fail: `bytes` is exactly `size` long.
    match var_type {
        VarType::U8 => FieldValue::U8(read.read_u8().unwrap_or_default()),
        VarType::U16 => FieldValue::U16(read.read_u16().unwrap_or_default()),
        VarType::U32 => FieldValue::U32(read.read_u32().unwrap_or_default()),
        VarType::U64 => FieldValue::U64(read.read_u64().unwrap_or_default()),
        VarType::S8 => FieldValue::S8(read.read_i8().unwrap_or_default()),
        VarType::S16 => FieldValue::S16(read.read_i16().unwrap_or_default()),
        VarType::S32 => FieldValue::S32(read.read_i32().unwrap_or_default()),
        VarType::S64 => FieldValue::S64(read.read_i64().unwrap_or_default()),
        VarType::F32 => FieldValue::F32(read.read_f32().unwrap_or_default()),
        VarType::F64 => FieldValue::F64(read.read_f64().unwrap_or_default()),
        VarType::Vector3 => FieldValue::Vector3(read_f32_array(read)),
        VarType::Vector3d => FieldValue::Vector3d(read_f64_array(read)),
        VarType::Vector4 => FieldValue::Vector4(read_f32_array(read)),
        VarType::Quaternion => {
            let [x, y, z] = read_f32_array(read);
            let w = (1.0 - x * x - y * y - z * z).max(0.0).sqrt();
            FieldValue::Quaternion([x, y, z, w])
        }
        VarType::Uuid => FieldValue::Uuid(Uuid::from_slice(bytes).unwrap_or(Uuid::nil())),
        VarType::Bool => FieldValue::Bool(bytes[0] != 0),
        VarType::IpAddr => FieldValue::IpAddr([bytes[0], bytes[1], bytes[2], bytes[3]].into()),
        VarType::IpPort => FieldValue::IpPort(read.read_u16().unwrap_or_default()),
        VarType::Fixed(_) => FieldValue::Bytes(Bytes::copy_from_slice(bytes)),
        VarType::Variable(_) => unreachable!("variable fields handled above"),
    }
}

fn read_f32_array<const N: usize>(cur: &mut Cursor<'_>) -> [f32; N] {
    let mut out = [0.0; N];
    for slot in &mut out {
        *slot = cur.read_f32().unwrap_or_default();
    }
    out
}

fn read_f64_array<const N: usize>(cur: &mut Cursor<'_>) -> [f64; N] {
    let mut out = [0.0; N];
    for slot in &mut out {
        *slot = cur.read_f64().unwrap_or_default();
    }
    out
}

/// Reader for the document form; exposes the identical record contract, so
/// everything above this layer is encoding-agnostic.
#[derive(Debug, Clone, Copy)]
pub struct DocumentReader<'r> {
    registry: &'r TemplateRegistry,
}

impl<'r> DocumentReader<'r> {
    /// Create a reader over the loaded registry.
    #[must_use]
    pub const fn new(registry: &'r TemplateRegistry) -> Self {
        Self { registry }
    }

    /// Resolve the template named by the document and enforce trust policy.
    pub fn validate(&self, document: &Value, trusted: bool) -> Result<&'r MessageTemplate> {
        let name = document
            .get(document::KEY_MESSAGE)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MalformedDocument {
                reason: "document has no message name".to_owned(),
            })?;
        let template = self
            .registry
            .lookup_by_name(name)
            .ok_or_else(|| Error::UnknownMessageName(name.to_owned()))?;
        if template.trust() == Trust::Trusted && !trusted {
            return Err(Error::TrustViolation {
                name: template.name().to_owned(),
            });
        }
        Ok(template)
    }

    /// Decode the document into a record, validating against the schema.
    pub fn decode(&self, document: &Value) -> Result<MessageRecord> {
        document::from_document(document, self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::super::builder::{MessageBuilder, TemplateBuilder};
    use super::super::template::{MessageBlock, MessageVariable};
    use super::super::types::{Deprecation, Frequency, LengthSize, Trust, WireEncoding};
    use super::*;

    fn sender() -> SocketAddr {
        "10.0.0.1:13000".parse().unwrap()
    }

    fn registry() -> TemplateRegistry {
        let mut reg = TemplateRegistry::with_version(2.0);
        reg.insert(MessageTemplate::new(
            "Ping",
            Frequency::High,
            1,
            Trust::NotTrusted,
            WireEncoding::Unencoded,
            Deprecation::NotDeprecated,
            vec![MessageBlock::new(
                "PingData",
                BlockKind::Single,
                vec![MessageVariable::new("Id", VarType::U8)],
            )],
        ))
        .unwrap();
        reg.insert(MessageTemplate::new(
            "Sensitive",
            Frequency::Low,
            2,
            Trust::Trusted,
            WireEncoding::Unencoded,
            Deprecation::NotDeprecated,
            vec![],
        ))
        .unwrap();
        reg.insert(MessageTemplate::new(
            "Inventory",
            Frequency::Medium,
            3,
            Trust::NotTrusted,
            WireEncoding::Unencoded,
            Deprecation::NotDeprecated,
            vec![MessageBlock::new(
                "Items",
                BlockKind::Counted,
                vec![
                    MessageVariable::new("Serial", VarType::U32),
                    MessageVariable::new("Name", VarType::Variable(LengthSize::U8)),
                ],
            )],
        ))
        .unwrap();
        reg
    }

    #[test]
    fn ping_roundtrip() {
        let reg = registry();
        let template = reg.lookup_by_name("Ping").unwrap();
        let mut builder = TemplateBuilder::begin(template);
        builder.block("PingData").set("Id", FieldValue::U8(7));
        let bytes = builder.finish().unwrap();
        assert_eq!(bytes.len(), 8);

        let reader = TemplateReader::new(&reg);
        let validated = reader.validate(&bytes, sender(), false).unwrap();
        assert_eq!(validated.name(), "Ping");
        let record = reader.decode(&bytes, sender()).unwrap();
        assert_eq!(record.get_u8("PingData", "Id", 0).unwrap(), 7);
    }

    #[test]
    fn validate_rejects_trusted_message_on_untrusted_circuit() {
        let reg = registry();
        let template = reg.lookup_by_name("Sensitive").unwrap();
        let bytes = TemplateBuilder::begin(template).finish().unwrap();
        let reader = TemplateReader::new(&reg);
        assert!(matches!(
            reader.validate(&bytes, sender(), false),
            Err(Error::TrustViolation { .. })
        ));
        assert!(reader.validate(&bytes, sender(), true).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_wire_id() {
        let reg = registry();
        let reader = TemplateReader::new(&reg);
        let buf = [0u8, 0, 0, 0, 1, 0, 0x42];
        assert!(matches!(
            reader.validate(&buf, sender(), false),
            Err(Error::UnknownTemplate { wire_id: 0x42 })
        ));
    }

    #[test]
    fn counted_roundtrip_with_variable_fields() {
        let reg = registry();
        let template = reg.lookup_by_name("Inventory").unwrap();
        let mut builder = TemplateBuilder::begin(template);
        builder
            .block("Items")
            .set("Serial", FieldValue::U32(0xAABB))
            .set_string("Name", "rope");
        builder
            .block("Items")
            .set("Serial", FieldValue::U32(2))
            .set_string("Name", "lantern");
        let bytes = builder.finish().unwrap();

        let reader = TemplateReader::new(&reg);
        let record = reader.decode(&bytes, sender()).unwrap();
        assert_eq!(record.block_count("Items"), 2);
        assert_eq!(record.get_u32("Items", "Serial", 0).unwrap(), 0xAABB);
        assert_eq!(record.get_string("Items", "Name", 1).unwrap(), "lantern");
    }

    #[test]
    fn missing_trailing_count_byte_means_zero_repeats() {
        let reg = registry();
        let reader = TemplateReader::new(&reg);
        // Medium header for Inventory with no payload at all.
        let buf = [0u8, 0, 0, 0, 9, 0, 0xFF, 3];
        let record = reader.decode(&buf, sender()).unwrap();
        assert_eq!(record.block_count("Items"), 0);
    }

    #[test]
    fn truncated_fixed_field_substitutes_zero() {
        let reg = registry();
        let reader = TemplateReader::new(&reg);
        // One instance declared, then only two of the four Serial bytes.
        let buf = [0u8, 0, 0, 0, 9, 0, 0xFF, 3, 1, 0xAA, 0xBB];
        let record = reader.decode(&buf, sender()).unwrap();
        assert_eq!(record.get_u32("Items", "Serial", 0).unwrap(), 0);
        assert_eq!(record.get_bytes("Items", "Name", 0).unwrap().len(), 0);
    }

    #[test]
    fn lying_length_prefix_substitutes_empty() {
        let reg = registry();
        let reader = TemplateReader::new(&reg);
        // Serial ok, then a length prefix claiming 200 bytes with 1 present.
        let buf = [0u8, 0, 0, 0, 9, 0, 0xFF, 3, 1, 0, 0, 0, 5, 200, b'x'];
        let record = reader.decode(&buf, sender()).unwrap();
        assert_eq!(record.get_u32("Items", "Serial", 0).unwrap(), 5);
        assert_eq!(record.get_bytes("Items", "Name", 0).unwrap().len(), 0);
    }

    #[test]
    fn offset_byte_skips_padding() {
        let reg = registry();
        let template = reg.lookup_by_name("Ping").unwrap();
        let mut builder = TemplateBuilder::begin(template);
        builder.block("PingData").set("Id", FieldValue::U8(9));
        let mut bytes = builder.finish().unwrap();
        // Inject two padding bytes between the id and the payload.
        bytes[5] = 2;
        bytes.splice(7..7, [0xEE, 0xEE]);

        let reader = TemplateReader::new(&reg);
        let record = reader.decode(&bytes, sender()).unwrap();
        assert_eq!(record.get_u8("PingData", "Id", 0).unwrap(), 9);
    }

    #[test]
    fn document_reader_matches_binary_contract() {
        let reg = registry();
        let template = reg.lookup_by_name("Ping").unwrap();
        let mut builder = TemplateBuilder::begin(template);
        builder.block("PingData").set("Id", FieldValue::U8(3));
        let record = builder.into_record();
        let doc = document::to_document(&record);

        let reader = DocumentReader::new(&reg);
        assert_eq!(reader.validate(&doc, false).unwrap().name(), "Ping");
        let decoded = reader.decode(&doc).unwrap();
        assert_eq!(decoded.get_u8("PingData", "Id", 0).unwrap(), 3);
    }

    #[test]
    fn document_reader_enforces_trust() {
        let reg = registry();
        let doc = serde_json::json!({ "message": "Sensitive", "body": {} });
        let reader = DocumentReader::new(&reg);
        assert!(matches!(
            reader.validate(&doc, false),
            Err(Error::TrustViolation { .. })
        ));
    }
}
