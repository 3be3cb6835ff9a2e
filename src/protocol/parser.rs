//! Textual schema parser.
//!
//! One stanza per message:
//!
//! ```text
//! version 2.0
//!
//! {
//!     ChatFromPeer Low 80 NotTrusted Zerocoded
//!     {
//!         ChatData Single
//!         {   Channel    S32 }
//!         {   Message    Variable 2 }
//!     }
//! }
//! ```
//!
//! `//` starts a comment running to end of line. Grammar errors are reported
//! with the line they occur on; the caller treats them as startup-fatal.

use super::template::{MessageBlock, MessageTemplate, MessageVariable, TemplateRegistry};
use super::types::{BlockKind, Deprecation, Frequency, LengthSize, Trust, VarType, WireEncoding};
use super::{Error, Result};

struct Tokenizer {
    tokens: Vec<(String, usize)>,
    pos: usize,
}

impl Tokenizer {
    fn new(text: &str) -> Self {
        let mut tokens = Vec::new();
        for (idx, raw_line) in text.lines().enumerate() {
            let line = match raw_line.find("//") {
                Some(cut) => &raw_line[..cut],
                None => raw_line,
            };
            for tok in line.split_whitespace() {
                tokens.push((tok.to_owned(), idx + 1));
            }
        }
        Self { tokens, pos: 0 }
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map_or(0, |(_, line)| *line)
    }

    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(|(tok, _)| tok.as_str())
    }

    fn next(&mut self, what: &str) -> Result<String> {
        match self.tokens.get(self.pos) {
            Some((tok, _)) => {
                self.pos += 1;
                Ok(tok.clone())
            }
            None => Err(Error::Parse {
                line: self.line(),
                reason: format!("unexpected end of schema, expected {what}"),
            }),
        }
    }

    fn want(&mut self, tok: &str) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &str) -> Result<()> {
        if self.want(tok) {
            Ok(())
        } else {
            Err(Error::Parse {
                line: self.line(),
                reason: format!("expected {tok:?}, found {:?}", self.peek().unwrap_or("<eof>")),
            })
        }
    }

    fn done(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

fn fail(tokens: &Tokenizer, reason: impl Into<String>) -> Error {
    Error::Parse {
        line: tokens.line(),
        reason: reason.into(),
    }
}

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_identifier(tokens: &mut Tokenizer, what: &str) -> Result<String> {
    let token = tokens.next(what)?;
    if is_identifier(&token) {
        Ok(token)
    } else {
        Err(fail(tokens, format!("{what} {token:?} is not a legal name")))
    }
}

fn parse_number(tokens: &mut Tokenizer, what: &str) -> Result<u32> {
    let token = tokens.next(what)?;
    let parsed = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        token.parse::<u32>()
    };
    parsed.map_err(|_| fail(tokens, format!("{what} {token:?} is not a number")))
}

/// Parse a schema file into a registry, enforcing the version expectation.
pub fn parse(text: &str, expected_version: f32) -> Result<TemplateRegistry> {
    let mut tokens = Tokenizer::new(text);

    // The version declaration must come first.
    tokens.expect("version")?;
    let version_token = tokens.next("version number")?;
    let version: f32 = version_token
        .parse()
        .map_err(|_| fail(&tokens, format!("bad version number {version_token:?}")))?;
    if (version - expected_version).abs() > 1e-4 {
        return Err(Error::VersionMismatch {
            expected: expected_version,
            found: version,
        });
    }

    let mut registry = TemplateRegistry::with_version(version);
    while !tokens.done() {
        let template = parse_message(&mut tokens)?;
        registry.insert(template)?;
    }
    Ok(registry)
}

fn parse_message(tokens: &mut Tokenizer) -> Result<MessageTemplate> {
    tokens.expect("{")?;
    let name = parse_identifier(tokens, "message name")?;

    let freq_token = tokens.next("frequency class")?;
    let frequency = match freq_token.as_str() {
        "High" => Frequency::High,
        "Medium" => Frequency::Medium,
        "Low" => Frequency::Low,
        other => return Err(fail(tokens, format!("expected frequency class, got {other:?}"))),
    };

    let raw_id = parse_number(tokens, "message id")?;
    // 0xFF is the escape byte in one-byte positions, so High and Medium ids
    // stop at 0xFE.
    let max_id = match frequency {
        Frequency::High | Frequency::Medium => 0xFE,
        Frequency::Low => 0xFFFF,
    };
    if raw_id > max_id {
        return Err(fail(
            tokens,
            format!("id {raw_id} out of range for {frequency} (max {max_id})"),
        ));
    }

    let trust_token = tokens.next("trust level")?;
    let trust = match trust_token.as_str() {
        "Trusted" => Trust::Trusted,
        "NotTrusted" => Trust::NotTrusted,
        other => return Err(fail(tokens, format!("expected trust level, got {other:?}"))),
    };

    let encoding_token = tokens.next("encoding")?;
    let encoding = match encoding_token.as_str() {
        "Unencoded" => WireEncoding::Unencoded,
        "Zerocoded" => WireEncoding::Zerocoded,
        "Document" => WireEncoding::Document,
        other => return Err(fail(tokens, format!("expected encoding, got {other:?}"))),
    };

    let deprecation = if tokens.want("Deprecated") {
        Deprecation::Deprecated
    } else if tokens.want("UDPDeprecated") {
        Deprecation::UdpDeprecated
    } else {
        tokens.want("NotDeprecated");
        Deprecation::NotDeprecated
    };

    let mut blocks: Vec<MessageBlock> = Vec::new();
    while tokens.peek() == Some("{") {
        let block = parse_block(tokens)?;
        if blocks.iter().any(|b| b.name() == block.name()) {
            return Err(fail(
                tokens,
                format!("duplicate block {:?} in message {name:?}", block.name()),
            ));
        }
        blocks.push(block);
    }
    tokens.expect("}")?;

    Ok(MessageTemplate::new(
        name,
        frequency,
        raw_id as u16,
        trust,
        encoding,
        deprecation,
        blocks,
    ))
}

fn parse_block(tokens: &mut Tokenizer) -> Result<MessageBlock> {
    tokens.expect("{")?;
    let name = parse_identifier(tokens, "block name")?;

    let kind_token = tokens.next("block kind")?;
    let kind = match kind_token.as_str() {
        "Single" => BlockKind::Single,
        "Multiple" => {
            let count = parse_number(tokens, "block repeat count")?;
            if count == 0 || count > u8::MAX as u32 {
                return Err(fail(tokens, format!("repeat count {count} out of range")));
            }
            BlockKind::Fixed(count as u8)
        }
        "Variable" => BlockKind::Counted,
        other => return Err(fail(tokens, format!("expected block kind, got {other:?}"))),
    };

    let mut variables: Vec<MessageVariable> = Vec::new();
    while tokens.peek() == Some("{") {
        let variable = parse_variable(tokens)?;
        if variables.iter().any(|v| v.name() == variable.name()) {
            return Err(fail(
                tokens,
                format!("duplicate field {:?} in block {name:?}", variable.name()),
            ));
        }
        variables.push(variable);
    }
    tokens.expect("}")?;

    Ok(MessageBlock::new(name, kind, variables))
}

fn parse_variable(tokens: &mut Tokenizer) -> Result<MessageVariable> {
    tokens.expect("{")?;
    let name = parse_identifier(tokens, "field name")?;

    let type_token = tokens.next("field type")?;
    let var_type = match type_token.as_str() {
        "U8" => VarType::U8,
        "U16" => VarType::U16,
        "U32" => VarType::U32,
        "U64" => VarType::U64,
        "S8" => VarType::S8,
        "S16" => VarType::S16,
        "S32" => VarType::S32,
        "S64" => VarType::S64,
        "F32" => VarType::F32,
        "F64" => VarType::F64,
        "Vector3" => VarType::Vector3,
        "Vector3d" => VarType::Vector3d,
        "Vector4" => VarType::Vector4,
        "Quaternion" => VarType::Quaternion,
        "Uuid" => VarType::Uuid,
        "Bool" => VarType::Bool,
        "IpAddr" => VarType::IpAddr,
        "IpPort" => VarType::IpPort,
        "Fixed" => {
            let size = parse_number(tokens, "fixed field size")?;
            if size == 0 {
                return Err(fail(tokens, "fixed field size must be nonzero"));
            }
            VarType::Fixed(size)
        }
        "Variable" => {
            let width = parse_number(tokens, "length prefix width")?;
            let size = match width {
                1 => LengthSize::U8,
                2 => LengthSize::U16,
                4 => LengthSize::U32,
                other => {
                    return Err(fail(tokens, format!("length prefix width {other} not 1/2/4")));
                }
            };
            VarType::Variable(size)
        }
        other => return Err(fail(tokens, format!("unknown field type {other:?}"))),
    };

    tokens.expect("}")?;
    Ok(MessageVariable::new(name, var_type))
}
