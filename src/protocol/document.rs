//! Document form: the self-describing encoding carried over the
//! request/response transport.
//!
//! ```json
//! {
//!     "message": "Ping",
//!     "body": { "PingData": [ { "Id": 7 } ] }
//! }
//! ```
//!
//! Block instances are arrays of field maps. Scalars map to JSON numbers,
//! UUIDs and addresses to strings, vectors to number arrays, bytes to byte
//! arrays. Conversion back is schema-driven, so the numeric representation
//! is never ambiguous.

use std::net::Ipv4Addr;

use bytes::Bytes;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::record::{BlockInstance, MessageRecord};
use super::template::{MessageTemplate, TemplateRegistry};
use super::types::{BlockKind, FieldValue, VarType};
use super::{Error, Result};

/// Top-level key naming the message.
pub const KEY_MESSAGE: &str = "message";

/// Top-level key holding the block tree.
pub const KEY_BODY: &str = "body";

fn value_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::U8(v) => json!(v),
        FieldValue::U16(v) => json!(v),
        FieldValue::U32(v) => json!(v),
        FieldValue::U64(v) => json!(v),
        FieldValue::S8(v) => json!(v),
        FieldValue::S16(v) => json!(v),
        FieldValue::S32(v) => json!(v),
        FieldValue::S64(v) => json!(v),
        FieldValue::F32(v) => json!(f64::from(*v)),
        FieldValue::F64(v) => json!(v),
        FieldValue::Vector3(v) => Value::Array(v.iter().map(|c| json!(f64::from(*c))).collect()),
        FieldValue::Vector3d(v) => Value::Array(v.iter().map(|c| json!(c)).collect()),
        FieldValue::Vector4(v) | FieldValue::Quaternion(v) => {
            Value::Array(v.iter().map(|c| json!(f64::from(*c))).collect())
        }
        FieldValue::Uuid(v) => json!(v.to_string()),
        FieldValue::Bool(v) => json!(v),
        FieldValue::IpAddr(v) => json!(v.to_string()),
        FieldValue::IpPort(v) => json!(v),
        FieldValue::Bytes(bytes) => Value::Array(bytes.iter().map(|b| json!(b)).collect()),
    }
}

/// Convert a record to its document form.
#[must_use]
pub fn to_document(record: &MessageRecord) -> Value {
    let mut body = Map::new();
    for (block_name, instance) in record.blocks() {
        let mut fields = Map::new();
        for (field_name, value) in instance.fields() {
            fields.insert(field_name.clone(), value_to_json(value));
        }
        body.entry(block_name.clone())
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .expect("body entries are arrays")
            .push(Value::Object(fields));
    }

    json!({ KEY_MESSAGE: record.name(), KEY_BODY: Value::Object(body) })
}

fn bad(reason: impl Into<String>) -> Error {
    Error::MalformedDocument {
        reason: reason.into(),
    }
}

fn expect_f64(value: &Value, what: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| bad(format!("{what} is not a number")))
}

fn expect_u64(value: &Value, what: &str, max: u64) -> Result<u64> {
    let number = value
        .as_u64()
        .ok_or_else(|| bad(format!("{what} is not an unsigned number")))?;
    if number > max {
        return Err(bad(format!("{what} value {number} exceeds {max}")));
    }
    Ok(number)
}

fn expect_i64(value: &Value, what: &str, min: i64, max: i64) -> Result<i64> {
    let number = value
        .as_i64()
        .ok_or_else(|| bad(format!("{what} is not a signed number")))?;
    if number < min || number > max {
        return Err(bad(format!("{what} value {number} out of range")));
    }
    Ok(number)
}

fn float_array<const N: usize>(value: &Value, what: &str) -> Result<[f64; N]> {
    let items = value
        .as_array()
        .ok_or_else(|| bad(format!("{what} is not an array")))?;
    if items.len() != N {
        return Err(bad(format!("{what} has {} components, wanted {N}", items.len())));
    }
    let mut out = [0.0; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = expect_f64(item, what)?;
    }
    Ok(out)
}

fn byte_array(value: &Value, what: &str) -> Result<Bytes> {
    let items = value
        .as_array()
        .ok_or_else(|| bad(format!("{what} is not a byte array")))?;
    let mut bytes = Vec::with_capacity(items.len());
    for item in items {
        bytes.push(expect_u64(item, what, u64::from(u8::MAX))? as u8);
    }
    Ok(bytes.into())
}

fn json_to_value(value: &Value, var_type: VarType, what: &str) -> Result<FieldValue> {
    Ok(match var_type {
        VarType::U8 => FieldValue::U8(expect_u64(value, what, u64::from(u8::MAX))? as u8),
        VarType::U16 => FieldValue::U16(expect_u64(value, what, u64::from(u16::MAX))? as u16),
        VarType::U32 => FieldValue::U32(expect_u64(value, what, u64::from(u32::MAX))? as u32),
        VarType::U64 => FieldValue::U64(expect_u64(value, what, u64::MAX)?),
        VarType::S8 => {
            FieldValue::S8(expect_i64(value, what, i64::from(i8::MIN), i64::from(i8::MAX))? as i8)
        }
        VarType::S16 => FieldValue::S16(expect_i64(
            value,
            what,
            i64::from(i16::MIN),
            i64::from(i16::MAX),
        )? as i16),
        VarType::S32 => FieldValue::S32(expect_i64(
            value,
            what,
            i64::from(i32::MIN),
            i64::from(i32::MAX),
        )? as i32),
        VarType::S64 => FieldValue::S64(expect_i64(value, what, i64::MIN, i64::MAX)?),
        VarType::F32 => FieldValue::F32(expect_f64(value, what)? as f32),
        VarType::F64 => FieldValue::F64(expect_f64(value, what)?),
        VarType::Vector3 => {
            let v = float_array::<3>(value, what)?;
            FieldValue::Vector3(v.map(|c| c as f32))
        }
        VarType::Vector3d => FieldValue::Vector3d(float_array::<3>(value, what)?),
        VarType::Vector4 => {
            let v = float_array::<4>(value, what)?;
            FieldValue::Vector4(v.map(|c| c as f32))
        }
        VarType::Quaternion => {
            let v = float_array::<4>(value, what)?;
            FieldValue::Quaternion(v.map(|c| c as f32))
        }
        VarType::Uuid => {
            let text = value
                .as_str()
                .ok_or_else(|| bad(format!("{what} is not a UUID string")))?;
            FieldValue::Uuid(
                Uuid::parse_str(text).map_err(|_| bad(format!("{what} is not a valid UUID")))?,
            )
        }
        VarType::Bool => FieldValue::Bool(
            value
                .as_bool()
                .ok_or_else(|| bad(format!("{what} is not a bool")))?,
        ),
        VarType::IpAddr => {
            let text = value
                .as_str()
                .ok_or_else(|| bad(format!("{what} is not an address string")))?;
            FieldValue::IpAddr(
                text.parse::<Ipv4Addr>()
                    .map_err(|_| bad(format!("{what} is not a valid IPv4 address")))?,
            )
        }
        VarType::IpPort => FieldValue::IpPort(expect_u64(value, what, u64::from(u16::MAX))? as u16),
        VarType::Fixed(size) => {
            let bytes = byte_array(value, what)?;
            if bytes.len() != size as usize {
                return Err(bad(format!(
                    "{what} has {} bytes, schema fixes {size}",
                    bytes.len()
                )));
            }
            FieldValue::Bytes(bytes)
        }
        VarType::Variable(_) => FieldValue::Bytes(byte_array(value, what)?),
    })
}

/// Convert a document back into a record, validating it against the schema.
pub fn from_document(document: &Value, registry: &TemplateRegistry) -> Result<MessageRecord> {
    let root = document
        .as_object()
        .ok_or_else(|| bad("document root is not an object"))?;
    let name = root
        .get(KEY_MESSAGE)
        .and_then(Value::as_str)
        .ok_or_else(|| bad("document has no message name"))?;
    let template = registry
        .lookup_by_name(name)
        .ok_or_else(|| Error::UnknownMessageName(name.to_owned()))?;
    let body = root
        .get(KEY_BODY)
        .and_then(Value::as_object)
        .ok_or_else(|| bad("document has no body object"))?;

    from_body(template, body)
}

fn from_body(template: &MessageTemplate, body: &Map<String, Value>) -> Result<MessageRecord> {
    let mut record = MessageRecord::new(template.name());
    for block in template.blocks() {
        let instances = match body.get(block.name()) {
            Some(value) => value
                .as_array()
                .ok_or_else(|| bad(format!("block {} is not an array", block.name())))?
                .as_slice(),
            None => &[],
        };

        let expected = match block.kind() {
            BlockKind::Single => Some(1usize),
            BlockKind::Fixed(count) => Some(count as usize),
            BlockKind::Counted => None,
        };
        if let Some(expected) = expected {
            if instances.len() != expected {
                return Err(bad(format!(
                    "block {} has {} instances, schema fixes {expected}",
                    block.name(),
                    instances.len()
                )));
            }
        } else if instances.len() > u8::MAX as usize {
            return Err(bad(format!(
                "block {} has {} instances, more than a count byte can carry",
                block.name(),
                instances.len()
            )));
        }

        for fields in instances {
            let fields = fields
                .as_object()
                .ok_or_else(|| bad(format!("instance of {} is not an object", block.name())))?;
            let mut instance = BlockInstance::new();
            for variable in block.variables() {
                let what = format!("{}.{}", block.name(), variable.name());
                let value = fields
                    .get(variable.name())
                    .ok_or_else(|| bad(format!("{what} missing from document")))?;
                instance.push(variable.name(), json_to_value(value, variable.var_type(), &what)?);
            }
            record.push_block(block.name(), instance);
        }
    }
    Ok(record)
}
