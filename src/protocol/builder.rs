//! Message builders: assemble a record block-by-block, then serialize it to
//! the binary wire form or the self-describing document form.
//!
//! Builder state is an explicit value threaded by the caller, not hidden
//! engine state; misuse (unknown names, wrong types, missing fields) is a
//! local programming error and panics. Only data-dependent failures (the
//! encoded message outgrowing the MTU budget) surface as `Err`.

use serde_json::Value;
use tracing::warn;

use super::document;
use super::header::{PacketFlags, PacketHeader};
use super::record::{BlockInstance, MessageRecord};
use super::template::MessageTemplate;
use super::types::{BlockKind, FieldValue, VarType, WireEncoding};
use super::{MTU, Result};

/// Common builder surface for both encodings.
pub trait MessageBuilder {
    /// Start a new instance of the named block.
    fn block(&mut self, name: &str) -> &mut Self;

    /// Set a field on the current block instance.
    fn set(&mut self, field: &str, value: FieldValue) -> &mut Self;

    /// Set a string field (stored as bytes with a trailing NUL).
    fn set_string(&mut self, field: &str, text: &str) -> &mut Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.set(field, FieldValue::Bytes(bytes.into()))
    }
}

/// Finished output of a [`Builder`].
#[derive(Debug, Clone)]
pub enum BuiltPayload {
    /// Binary packet bytes with a zeroed framing prefix; the packet layer
    /// stamps flags and sequence before transmission.
    Binary(Vec<u8>),
    /// Self-describing document for the request/response transport.
    Document(Value),
}

/// Builder for the binary wire form.
#[derive(Debug)]
pub struct TemplateBuilder<'t> {
    template: &'t MessageTemplate,
    // (schema block index, per-variable values in schema order)
    blocks: Vec<(usize, Vec<Option<FieldValue>>)>,
    current: Option<usize>,
}

impl<'t> TemplateBuilder<'t> {
    /// Begin building a message of the given template.
    #[must_use]
    pub fn begin(template: &'t MessageTemplate) -> Self {
        Self {
            template,
            blocks: Vec::new(),
            current: None,
        }
    }

    /// Template this builder encodes for.
    #[must_use]
    pub const fn template(&self) -> &'t MessageTemplate {
        self.template
    }

    fn open_block(&mut self, name: &str) {
        let msg = self.template.name();
        let Some(schema_index) = self
            .template
            .blocks()
            .iter()
            .position(|b| b.name() == name)
        else {
            panic!("message {msg} has no block {name:?}");
        };

        let existing = self
            .blocks
            .iter()
            .filter(|(idx, _)| *idx == schema_index)
            .count();
        let block = &self.template.blocks()[schema_index];
        match block.kind() {
            BlockKind::Single if existing >= 1 => {
                panic!("block {msg}.{name} is Single but was added twice");
            }
            BlockKind::Fixed(count) if existing >= count as usize => {
                panic!("block {msg}.{name} repeats {count} times, one more was added");
            }
            BlockKind::Counted if existing >= u8::MAX as usize => {
                panic!("block {msg}.{name} exceeds 255 instances");
            }
            _ => {}
        }

        self.blocks
            .push((schema_index, vec![None; block.variables().len()]));
        self.current = Some(self.blocks.len() - 1);
    }

    fn store(&mut self, field: &str, mut value: FieldValue) {
        let msg = self.template.name();
        let Some(current) = self.current else {
            panic!("no active block while setting {msg}.?.{field}");
        };
        let (schema_index, values) = &mut self.blocks[current];
        let block = &self.template.blocks()[*schema_index];
        let block_name = block.name();
        let Some(var_index) = block.variables().iter().position(|v| v.name() == field) else {
            panic!("block {msg}.{block_name} has no field {field:?}");
        };
        let var_type = block.variables()[var_index].var_type();
        if !value.matches(var_type) {
            panic!(
                "field {msg}.{block_name}.{field} is {var_type}, got {}",
                value.kind()
            );
        }

        match (var_type, &mut value) {
            (VarType::Fixed(size), FieldValue::Bytes(bytes)) => {
                assert!(
                    bytes.len() == size as usize,
                    "field {msg}.{block_name}.{field} is Fixed {size}, got {} bytes",
                    bytes.len()
                );
            }
            (VarType::Variable(length), FieldValue::Bytes(bytes)) => {
                // Oversized values truncate to the prefix maximum rather
                // than producing a malformed packet.
                if bytes.len() > length.max_len() {
                    warn!(
                        message = msg,
                        block = block_name,
                        field,
                        len = bytes.len(),
                        max = length.max_len(),
                        "variable field truncated to length-prefix maximum"
                    );
                    bytes.truncate(length.max_len());
                }
            }
            _ => {}
        }

        values[var_index] = Some(value);
    }

    /// Validate completeness and produce the assembled record.
    ///
    /// # Panics
    ///
    /// On missing block instances or unset fields; the record must be fully
    /// populated before building.
    #[must_use]
    pub fn into_record(self) -> MessageRecord {
        let msg = self.template.name();
        let mut record = MessageRecord::new(msg);
        for (schema_index, block) in self.template.blocks().iter().enumerate() {
            let instances: Vec<&Vec<Option<FieldValue>>> = self
                .blocks
                .iter()
                .filter(|(idx, _)| *idx == schema_index)
                .map(|(_, values)| values)
                .collect();
            let name = block.name();
            match block.kind() {
                BlockKind::Single => {
                    assert!(
                        instances.len() == 1,
                        "block {msg}.{name} is Single but has {} instances",
                        instances.len()
                    );
                }
                BlockKind::Fixed(count) => {
                    assert!(
                        instances.len() == count as usize,
                        "block {msg}.{name} needs {count} instances, has {}",
                        instances.len()
                    );
                }
                BlockKind::Counted => {}
            }
            for values in instances {
                let mut instance = BlockInstance::new();
                for (variable, value) in block.variables().iter().zip(values) {
                    let field = variable.name();
                    let Some(value) = value else {
                        panic!("field {msg}.{name}.{field} never set");
                    };
                    instance.push(field, value.clone());
                }
                record.push_block(name, instance);
            }
        }
        record
    }

    /// Serialize to packet bytes: zeroed framing prefix, frequency-encoded
    /// id, then blocks and fields in schema order.
    pub fn finish(self) -> Result<Vec<u8>> {
        let template = self.template;
        let record = self.into_record();
        encode_record(template, &record)
    }
}

impl MessageBuilder for TemplateBuilder<'_> {
    fn block(&mut self, name: &str) -> &mut Self {
        self.open_block(name);
        self
    }

    fn set(&mut self, field: &str, value: FieldValue) -> &mut Self {
        self.store(field, value);
        self
    }
}

/// Builder for the document form; same assembly rules, different target.
#[derive(Debug)]
pub struct DocumentBuilder<'t> {
    inner: TemplateBuilder<'t>,
}

impl<'t> DocumentBuilder<'t> {
    /// Begin building a message of the given template.
    #[must_use]
    pub fn begin(template: &'t MessageTemplate) -> Self {
        Self {
            inner: TemplateBuilder::begin(template),
        }
    }

    /// Template this builder encodes for.
    #[must_use]
    pub const fn template(&self) -> &'t MessageTemplate {
        self.inner.template()
    }

    /// Produce the self-describing document.
    #[must_use]
    pub fn finish(self) -> Value {
        document::to_document(&self.inner.into_record())
    }
}

impl MessageBuilder for DocumentBuilder<'_> {
    fn block(&mut self, name: &str) -> &mut Self {
        self.inner.open_block(name);
        self
    }

    fn set(&mut self, field: &str, value: FieldValue) -> &mut Self {
        self.inner.store(field, value);
        self
    }
}

/// Builder over either encoding, selected once when the message is begun.
#[derive(Debug)]
pub enum Builder<'t> {
    /// Fixed binary wire form
    Binary(TemplateBuilder<'t>),
    /// Self-describing document form
    Document(DocumentBuilder<'t>),
}

impl<'t> Builder<'t> {
    /// Begin a builder in the flavor the template's encoding hint selects.
    #[must_use]
    pub fn begin(template: &'t MessageTemplate) -> Self {
        match template.encoding() {
            WireEncoding::Document => Self::Document(DocumentBuilder::begin(template)),
            WireEncoding::Unencoded | WireEncoding::Zerocoded => {
                Self::Binary(TemplateBuilder::begin(template))
            }
        }
    }

    /// Finish into the flavor-specific payload.
    pub fn finish(self) -> Result<BuiltPayload> {
        match self {
            Self::Binary(builder) => builder.finish().map(BuiltPayload::Binary),
            Self::Document(builder) => Ok(BuiltPayload::Document(builder.finish())),
        }
    }
}

impl MessageBuilder for Builder<'_> {
    fn block(&mut self, name: &str) -> &mut Self {
        match self {
            Self::Binary(builder) => {
                builder.block(name);
            }
            Self::Document(builder) => {
                builder.block(name);
            }
        }
        self
    }

    fn set(&mut self, field: &str, value: FieldValue) -> &mut Self {
        match self {
            Self::Binary(builder) => {
                builder.set(field, value);
            }
            Self::Document(builder) => {
                builder.set(field, value);
            }
        }
        self
    }
}

fn encode_value(out: &mut Vec<u8>, var_type: VarType, value: &FieldValue) {
    match value {
        FieldValue::U8(v) => out.push(*v),
        FieldValue::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::U32(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::U64(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::S8(v) => out.push(*v as u8),
        FieldValue::S16(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::S32(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::S64(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::F32(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        FieldValue::F64(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        FieldValue::Vector3(v) => {
            for component in v {
                out.extend_from_slice(&component.to_bits().to_be_bytes());
            }
        }
        FieldValue::Vector3d(v) => {
            for component in v {
                out.extend_from_slice(&component.to_bits().to_be_bytes());
            }
        }
        FieldValue::Vector4(v) => {
            for component in v {
                out.extend_from_slice(&component.to_bits().to_be_bytes());
            }
        }
        FieldValue::Quaternion(q) => {
            // Wire carries x/y/z of the unit quaternion; w is recomputed on
            // decode. q and -q name the same rotation, so keep w >= 0.
            let (x, y, z) = if q[3] < 0.0 {
                (-q[0], -q[1], -q[2])
            } else {
                (q[0], q[1], q[2])
            };
            for component in [x, y, z] {
                out.extend_from_slice(&component.to_bits().to_be_bytes());
            }
        }
        FieldValue::Uuid(v) => out.extend_from_slice(v.as_bytes()),
        FieldValue::Bool(v) => out.push(u8::from(*v)),
        FieldValue::IpAddr(v) => out.extend_from_slice(&v.octets()),
        FieldValue::IpPort(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::Bytes(bytes) => {
            if let VarType::Variable(length) = var_type {
                match length.width() {
                    1 => out.push(bytes.len() as u8),
                    2 => out.extend_from_slice(&(bytes.len() as u16).to_be_bytes()),
                    _ => out.extend_from_slice(&(bytes.len() as u32).to_be_bytes()),
                }
            }
            out.extend_from_slice(bytes);
        }
    }
}

/// Serialize a complete record to packet bytes with a zeroed framing prefix.
///
/// The record must match the template; builders guarantee this, and decoded
/// records satisfy it by construction.
pub(crate) fn encode_record(template: &MessageTemplate, record: &MessageRecord) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(128);
    PacketHeader::new(PacketFlags::new(), 0, template.wire_id(), template.frequency())
        .encode(&mut out);

    for block in template.blocks() {
        let count = record.block_count(block.name());
        if matches!(block.kind(), BlockKind::Counted) {
            out.push(count as u8);
        }
        for index in 0..count {
            let instance = record
                .block_instance(block.name(), index)
                .expect("instance counted above");
            for variable in block.variables() {
                let value = instance
                    .get(variable.name())
                    .expect("record field matches schema");
                encode_value(&mut out, variable.var_type(), value);
            }
        }
    }

    if out.len() > MTU {
        return Err(super::Error::Oversize {
            size: out.len(),
            max: MTU,
        });
    }
    Ok(out)
}
