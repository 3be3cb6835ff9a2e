//! Runtime message instance: the decoded (or to-be-encoded) value tree.
//!
//! A record is created fresh per send or per receive and never shared across
//! messages. Accessors address values by (block name, field name, block
//! instance index); the same contract holds whichever encoding produced the
//! record, so everything above this layer is encoding-agnostic.

use std::net::Ipv4Addr;

use bytes::Bytes;
use uuid::Uuid;

use super::types::FieldValue;
use super::{Error, Result};

/// One instance of a block: field values in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockInstance {
    fields: Vec<(String, FieldValue)>,
}

impl BlockInstance {
    /// Create an empty instance.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a field value.
    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push((name.into(), value));
    }

    /// Look up a field by name.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Fields in schema order.
    #[must_use]
    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }
}

impl Default for BlockInstance {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded or assembled message: name plus block instances.
///
/// Repeated instances of the same block appear consecutively in schema
/// order, so instance `i` of block `B` is the `i`-th entry named `B`.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    name: String,
    blocks: Vec<(String, BlockInstance)>,
}

impl MessageRecord {
    /// Create an empty record for the named message.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
        }
    }

    /// Message name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a block instance.
    pub fn push_block(&mut self, name: impl Into<String>, instance: BlockInstance) {
        self.blocks.push((name.into(), instance));
    }

    /// All block instances in wire order.
    #[must_use]
    pub fn blocks(&self) -> &[(String, BlockInstance)] {
        &self.blocks
    }

    /// Number of instances of the named block.
    #[must_use]
    pub fn block_count(&self, block: &str) -> usize {
        self.blocks.iter().filter(|(name, _)| name == block).count()
    }

    /// Instance `index` of the named block.
    #[must_use]
    pub fn block_instance(&self, block: &str, index: usize) -> Option<&BlockInstance> {
        self.blocks
            .iter()
            .filter(|(name, _)| name == block)
            .nth(index)
            .map(|(_, instance)| instance)
    }

    /// Raw field accessor.
    pub fn get(&self, block: &str, field: &str, index: usize) -> Result<&FieldValue> {
        self.block_instance(block, index)
            .and_then(|instance| instance.get(field))
            .ok_or_else(|| Error::MissingField {
                message: self.name.clone(),
                block: block.to_owned(),
                field: field.to_owned(),
                index,
            })
    }

    fn mismatch(&self, block: &str, field: &str, expected: &'static str) -> Error {
        Error::TypeMismatch {
            block: block.to_owned(),
            field: field.to_owned(),
            expected,
        }
    }

    /// Typed accessor for U8 fields.
    pub fn get_u8(&self, block: &str, field: &str, index: usize) -> Result<u8> {
        match self.get(block, field, index)? {
            FieldValue::U8(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "U8")),
        }
    }

    /// Typed accessor for U16 fields.
    pub fn get_u16(&self, block: &str, field: &str, index: usize) -> Result<u16> {
        match self.get(block, field, index)? {
            FieldValue::U16(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "U16")),
        }
    }

    /// Typed accessor for U32 fields.
    pub fn get_u32(&self, block: &str, field: &str, index: usize) -> Result<u32> {
        match self.get(block, field, index)? {
            FieldValue::U32(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "U32")),
        }
    }

    /// Typed accessor for U64 fields.
    pub fn get_u64(&self, block: &str, field: &str, index: usize) -> Result<u64> {
        match self.get(block, field, index)? {
            FieldValue::U64(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "U64")),
        }
    }

    /// Typed accessor for S8 fields.
    pub fn get_s8(&self, block: &str, field: &str, index: usize) -> Result<i8> {
        match self.get(block, field, index)? {
            FieldValue::S8(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "S8")),
        }
    }

    /// Typed accessor for S16 fields.
    pub fn get_s16(&self, block: &str, field: &str, index: usize) -> Result<i16> {
        match self.get(block, field, index)? {
            FieldValue::S16(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "S16")),
        }
    }

    /// Typed accessor for S32 fields.
    pub fn get_s32(&self, block: &str, field: &str, index: usize) -> Result<i32> {
        match self.get(block, field, index)? {
            FieldValue::S32(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "S32")),
        }
    }

    /// Typed accessor for S64 fields.
    pub fn get_s64(&self, block: &str, field: &str, index: usize) -> Result<i64> {
        match self.get(block, field, index)? {
            FieldValue::S64(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "S64")),
        }
    }

    /// Typed accessor for F32 fields.
    pub fn get_f32(&self, block: &str, field: &str, index: usize) -> Result<f32> {
        match self.get(block, field, index)? {
            FieldValue::F32(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "F32")),
        }
    }

    /// Typed accessor for F64 fields.
    pub fn get_f64(&self, block: &str, field: &str, index: usize) -> Result<f64> {
        match self.get(block, field, index)? {
            FieldValue::F64(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "F64")),
        }
    }

    /// Typed accessor for Vector3 fields.
    pub fn get_vector3(&self, block: &str, field: &str, index: usize) -> Result<[f32; 3]> {
        match self.get(block, field, index)? {
            FieldValue::Vector3(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "Vector3")),
        }
    }

    /// Typed accessor for Vector3d fields.
    pub fn get_vector3d(&self, block: &str, field: &str, index: usize) -> Result<[f64; 3]> {
        match self.get(block, field, index)? {
            FieldValue::Vector3d(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "Vector3d")),
        }
    }

    /// Typed accessor for Vector4 fields.
    pub fn get_vector4(&self, block: &str, field: &str, index: usize) -> Result<[f32; 4]> {
        match self.get(block, field, index)? {
            FieldValue::Vector4(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "Vector4")),
        }
    }

    /// Typed accessor for Quaternion fields.
    pub fn get_quaternion(&self, block: &str, field: &str, index: usize) -> Result<[f32; 4]> {
        match self.get(block, field, index)? {
            FieldValue::Quaternion(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "Quaternion")),
        }
    }

    /// Typed accessor for Uuid fields.
    pub fn get_uuid(&self, block: &str, field: &str, index: usize) -> Result<Uuid> {
        match self.get(block, field, index)? {
            FieldValue::Uuid(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "Uuid")),
        }
    }

    /// Typed accessor for Bool fields.
    pub fn get_bool(&self, block: &str, field: &str, index: usize) -> Result<bool> {
        match self.get(block, field, index)? {
            FieldValue::Bool(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "Bool")),
        }
    }

    /// Typed accessor for IpAddr fields.
    pub fn get_ip_addr(&self, block: &str, field: &str, index: usize) -> Result<Ipv4Addr> {
        match self.get(block, field, index)? {
            FieldValue::IpAddr(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "IpAddr")),
        }
    }

    /// Typed accessor for IpPort fields.
    pub fn get_ip_port(&self, block: &str, field: &str, index: usize) -> Result<u16> {
        match self.get(block, field, index)? {
            FieldValue::IpPort(v) => Ok(*v),
            _ => Err(self.mismatch(block, field, "IpPort")),
        }
    }

    /// Typed accessor for Fixed/Variable byte fields.
    pub fn get_bytes(&self, block: &str, field: &str, index: usize) -> Result<Bytes> {
        match self.get(block, field, index)? {
            FieldValue::Bytes(v) => Ok(v.clone()),
            _ => Err(self.mismatch(block, field, "Bytes")),
        }
    }

    /// String accessor over a byte field; strips the trailing NUL a string
    /// sender appends.
    pub fn get_string(&self, block: &str, field: &str, index: usize) -> Result<String> {
        let bytes = self.get_bytes(block, field, index)?;
        let trimmed = match bytes.split_last() {
            Some((&0, rest)) => rest,
            _ => &bytes[..],
        };
        Ok(String::from_utf8_lossy(trimmed).into_owned())
    }
}
