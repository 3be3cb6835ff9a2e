//! Schema-level type tags and runtime field values

use std::fmt;
use std::net::Ipv4Addr;

use bytes::Bytes;
use uuid::Uuid;

/// Frequency class of a message, fixing how many bytes encode its id on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    /// One id byte, 0x00-0xFE
    High,
    /// Escape byte 0xFF then one id byte
    Medium,
    /// 0xFF 0xFF then a 2-byte big-endian id
    Low,
}

impl Frequency {
    /// Number of bytes the frequency-encoded id occupies on the wire.
    #[must_use]
    pub const fn id_width(self) -> usize {
        match self {
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 4,
        }
    }

    /// Compose the full wire id from the per-class raw id.
    #[must_use]
    pub const fn compose_id(self, raw: u16) -> u32 {
        match self {
            Self::High => raw as u32,
            Self::Medium => 0xFF00 | (raw as u32),
            Self::Low => 0xFFFF_0000 | (raw as u32),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        };
        write!(f, "{name}")
    }
}

/// Whether a message may only be accepted from a trusted circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    /// Only deliverable over a circuit marked trusted
    Trusted,
    /// Deliverable over any circuit
    NotTrusted,
}

/// Encoding hint declared per message in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEncoding {
    /// Binary form, payload sent as-is
    Unencoded,
    /// Binary form, payload zero-run compressed when that shrinks it
    Zerocoded,
    /// Self-describing document form over the request/response transport
    Document,
}

/// Deprecation state declared per message in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deprecation {
    /// In active use
    NotDeprecated,
    /// Still decoded from the wire, no longer built
    UdpDeprecated,
    /// Fully retired; decoding logs a warning
    Deprecated,
}

/// Repetition kind of a block within a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Exactly one instance
    Single,
    /// A count fixed by the schema
    Fixed(u8),
    /// Runtime-counted; a count byte precedes the instances on the wire
    Counted,
}

/// Width of the length prefix carried before a variable-length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthSize {
    /// 1-byte prefix, values up to 255 bytes
    U8,
    /// 2-byte prefix, values up to 65535 bytes
    U16,
    /// 4-byte prefix
    U32,
}

impl LengthSize {
    /// Prefix width in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Largest value length this prefix can express.
    #[must_use]
    pub const fn max_len(self) -> usize {
        match self {
            Self::U8 => u8::MAX as usize,
            Self::U16 => u16::MAX as usize,
            Self::U32 => u32::MAX as usize,
        }
    }
}

/// Primitive type tag of a schema variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Unsigned 64-bit integer
    U64,
    /// Signed 8-bit integer
    S8,
    /// Signed 16-bit integer
    S16,
    /// Signed 32-bit integer
    S32,
    /// Signed 64-bit integer
    S64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// Three 32-bit floats
    Vector3,
    /// Three 64-bit floats
    Vector3d,
    /// Four 32-bit floats
    Vector4,
    /// Unit quaternion, x/y/z on the wire, w recomputed
    Quaternion,
    /// 16-byte UUID
    Uuid,
    /// Single byte, zero is false
    Bool,
    /// IPv4 address, 4 bytes
    IpAddr,
    /// Port number, 2 bytes
    IpPort,
    /// Fixed-size opaque bytes
    Fixed(u32),
    /// Variable-length bytes with a schema-fixed length prefix width
    Variable(LengthSize),
}

impl VarType {
    /// Wire size of one value, or `None` for variable-length types.
    #[must_use]
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::U8 | Self::S8 | Self::Bool => Some(1),
            Self::U16 | Self::S16 | Self::IpPort => Some(2),
            Self::U32 | Self::S32 | Self::F32 | Self::IpAddr => Some(4),
            Self::U64 | Self::S64 | Self::F64 => Some(8),
            Self::Vector3 | Self::Quaternion => Some(12),
            Self::Vector4 => Some(16),
            Self::Vector3d => Some(24),
            Self::Uuid => Some(16),
            Self::Fixed(n) => Some(n as usize),
            Self::Variable(_) => None,
        }
    }

    /// Schema keyword for diagnostics.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::U8 => "U8",
            Self::U16 => "U16",
            Self::U32 => "U32",
            Self::U64 => "U64",
            Self::S8 => "S8",
            Self::S16 => "S16",
            Self::S32 => "S32",
            Self::S64 => "S64",
            Self::F32 => "F32",
            Self::F64 => "F64",
            Self::Vector3 => "Vector3",
            Self::Vector3d => "Vector3d",
            Self::Vector4 => "Vector4",
            Self::Quaternion => "Quaternion",
            Self::Uuid => "Uuid",
            Self::Bool => "Bool",
            Self::IpAddr => "IpAddr",
            Self::IpPort => "IpPort",
            Self::Fixed(_) => "Fixed",
            Self::Variable(_) => "Variable",
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "Fixed {n}"),
            Self::Variable(size) => write!(f, "Variable {}", size.width()),
            other => write!(f, "{}", other.keyword()),
        }
    }
}

/// A concrete runtime value for one schema variable.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Unsigned 8-bit value
    U8(u8),
    /// Unsigned 16-bit value
    U16(u16),
    /// Unsigned 32-bit value
    U32(u32),
    /// Unsigned 64-bit value
    U64(u64),
    /// Signed 8-bit value
    S8(i8),
    /// Signed 16-bit value
    S16(i16),
    /// Signed 32-bit value
    S32(i32),
    /// Signed 64-bit value
    S64(i64),
    /// 32-bit float value
    F32(f32),
    /// 64-bit float value
    F64(f64),
    /// Three-component float vector
    Vector3([f32; 3]),
    /// Three-component double vector
    Vector3d([f64; 3]),
    /// Four-component float vector
    Vector4([f32; 4]),
    /// Quaternion as x/y/z/w
    Quaternion([f32; 4]),
    /// UUID value
    Uuid(Uuid),
    /// Boolean value
    Bool(bool),
    /// IPv4 address value
    IpAddr(Ipv4Addr),
    /// Port value
    IpPort(u16),
    /// Opaque bytes for Fixed and Variable fields
    Bytes(Bytes),
}

impl FieldValue {
    /// Whether this value is storable in a variable of the given type.
    #[must_use]
    pub fn matches(&self, var_type: VarType) -> bool {
        matches!(
            (self, var_type),
            (Self::U8(_), VarType::U8)
                | (Self::U16(_), VarType::U16)
                | (Self::U32(_), VarType::U32)
                | (Self::U64(_), VarType::U64)
                | (Self::S8(_), VarType::S8)
                | (Self::S16(_), VarType::S16)
                | (Self::S32(_), VarType::S32)
                | (Self::S64(_), VarType::S64)
                | (Self::F32(_), VarType::F32)
                | (Self::F64(_), VarType::F64)
                | (Self::Vector3(_), VarType::Vector3)
                | (Self::Vector3d(_), VarType::Vector3d)
                | (Self::Vector4(_), VarType::Vector4)
                | (Self::Quaternion(_), VarType::Quaternion)
                | (Self::Uuid(_), VarType::Uuid)
                | (Self::Bool(_), VarType::Bool)
                | (Self::IpAddr(_), VarType::IpAddr)
                | (Self::IpPort(_), VarType::IpPort)
                | (Self::Bytes(_), VarType::Fixed(_) | VarType::Variable(_))
        )
    }

    /// Name of the stored variant, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::U8(_) => "U8",
            Self::U16(_) => "U16",
            Self::U32(_) => "U32",
            Self::U64(_) => "U64",
            Self::S8(_) => "S8",
            Self::S16(_) => "S16",
            Self::S32(_) => "S32",
            Self::S64(_) => "S64",
            Self::F32(_) => "F32",
            Self::F64(_) => "F64",
            Self::Vector3(_) => "Vector3",
            Self::Vector3d(_) => "Vector3d",
            Self::Vector4(_) => "Vector4",
            Self::Quaternion(_) => "Quaternion",
            Self::Uuid(_) => "Uuid",
            Self::Bool(_) => "Bool",
            Self::IpAddr(_) => "IpAddr",
            Self::IpPort(_) => "IpPort",
            Self::Bytes(_) => "Bytes",
        }
    }

    /// Zero-filled default for a variable of the given type, used when a
    /// truncated packet forces a substitute value.
    #[must_use]
    pub fn zero_for(var_type: VarType) -> Self {
        match var_type {
            VarType::U8 => Self::U8(0),
            VarType::U16 => Self::U16(0),
            VarType::U32 => Self::U32(0),
            VarType::U64 => Self::U64(0),
            VarType::S8 => Self::S8(0),
            VarType::S16 => Self::S16(0),
            VarType::S32 => Self::S32(0),
            VarType::S64 => Self::S64(0),
            VarType::F32 => Self::F32(0.0),
            VarType::F64 => Self::F64(0.0),
            VarType::Vector3 => Self::Vector3([0.0; 3]),
            VarType::Vector3d => Self::Vector3d([0.0; 3]),
            VarType::Vector4 => Self::Vector4([0.0; 4]),
            VarType::Quaternion => Self::Quaternion([0.0, 0.0, 0.0, 1.0]),
            VarType::Uuid => Self::Uuid(Uuid::nil()),
            VarType::Bool => Self::Bool(false),
            VarType::IpAddr => Self::IpAddr(Ipv4Addr::UNSPECIFIED),
            VarType::IpPort => Self::IpPort(0),
            VarType::Fixed(n) => Self::Bytes(Bytes::from(vec![0u8; n as usize])),
            VarType::Variable(_) => Self::Bytes(Bytes::new()),
        }
    }
}
