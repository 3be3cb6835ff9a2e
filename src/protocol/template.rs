//! Message templates and the registry that owns them.
//!
//! Templates are immutable after load and live as long as the registry.

use std::collections::HashMap;

use super::parser;
use super::types::{BlockKind, Deprecation, Frequency, Trust, VarType, WireEncoding};
use super::{Error, Result};

/// One named variable inside a block.
#[derive(Debug, Clone)]
pub struct MessageVariable {
    name: String,
    var_type: VarType,
}

impl MessageVariable {
    /// Create a variable declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, var_type: VarType) -> Self {
        Self {
            name: name.into(),
            var_type,
        }
    }

    /// Variable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type tag.
    #[must_use]
    pub const fn var_type(&self) -> VarType {
        self.var_type
    }
}

/// A named, possibly repeated group of variables.
#[derive(Debug, Clone)]
pub struct MessageBlock {
    name: String,
    kind: BlockKind,
    variables: Vec<MessageVariable>,
}

impl MessageBlock {
    /// Create a block declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: BlockKind, variables: Vec<MessageVariable>) -> Self {
        Self {
            name: name.into(),
            kind,
            variables,
        }
    }

    /// Block name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Repetition kind.
    #[must_use]
    pub const fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Variables in schema order.
    #[must_use]
    pub fn variables(&self) -> &[MessageVariable] {
        &self.variables
    }

    /// Look up a variable by name.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&MessageVariable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// The static description of one message: id, policy flags, block layout.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    name: String,
    wire_id: u32,
    frequency: Frequency,
    trust: Trust,
    encoding: WireEncoding,
    deprecation: Deprecation,
    blocks: Vec<MessageBlock>,
}

impl MessageTemplate {
    /// Create a template. `raw_id` is the per-frequency-class id from the
    /// schema; the composed wire id is derived from it.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        frequency: Frequency,
        raw_id: u16,
        trust: Trust,
        encoding: WireEncoding,
        deprecation: Deprecation,
        blocks: Vec<MessageBlock>,
    ) -> Self {
        Self {
            name: name.into(),
            wire_id: frequency.compose_id(raw_id),
            frequency,
            trust,
            encoding,
            deprecation,
            blocks,
        }
    }

    /// Message name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Composed wire id (frequency class folded in).
    #[must_use]
    pub const fn wire_id(&self) -> u32 {
        self.wire_id
    }

    /// Frequency class.
    #[must_use]
    pub const fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Trust requirement.
    #[must_use]
    pub const fn trust(&self) -> Trust {
        self.trust
    }

    /// Encoding hint.
    #[must_use]
    pub const fn encoding(&self) -> WireEncoding {
        self.encoding
    }

    /// Deprecation state.
    #[must_use]
    pub const fn deprecation(&self) -> Deprecation {
        self.deprecation
    }

    /// Blocks in schema order.
    #[must_use]
    pub fn blocks(&self) -> &[MessageBlock] {
        &self.blocks
    }

    /// Look up a block by name.
    #[must_use]
    pub fn block(&self, name: &str) -> Option<&MessageBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }
}

/// Owns every loaded template, indexed by name and by wire id.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: Vec<MessageTemplate>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<u32, usize>,
    version: f32,
}

impl TemplateRegistry {
    /// Parse a schema file and build the registry. Fails on grammar errors,
    /// a version mismatch, or duplicate templates, all fatal configuration
    /// errors.
    pub fn load(schema_text: &str, expected_version: f32) -> Result<Self> {
        parser::parse(schema_text, expected_version)
    }

    /// Empty registry carrying a schema version, for programmatic assembly.
    #[must_use]
    pub fn with_version(version: f32) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Declared schema version.
    #[must_use]
    pub const fn version(&self) -> f32 {
        self.version
    }

    /// Insert a template, rejecting duplicate names and duplicate wire ids.
    pub fn insert(&mut self, template: MessageTemplate) -> Result<()> {
        if self.by_name.contains_key(template.name()) || self.by_id.contains_key(&template.wire_id())
        {
            return Err(Error::DuplicateTemplate {
                name: template.name().to_owned(),
                wire_id: template.wire_id(),
            });
        }
        let index = self.templates.len();
        self.by_name.insert(template.name().to_owned(), index);
        self.by_id.insert(template.wire_id(), index);
        self.templates.push(template);
        Ok(())
    }

    /// Look up by message name.
    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Option<&MessageTemplate> {
        self.by_name.get(name).map(|&i| &self.templates[i])
    }

    /// Look up by composed wire id.
    #[must_use]
    pub fn lookup_by_wire_id(&self, wire_id: u32) -> Option<&MessageTemplate> {
        self.by_id.get(&wire_id).map(|&i| &self.templates[i])
    }

    /// All templates in load order.
    #[must_use]
    pub fn templates(&self) -> &[MessageTemplate] {
        &self.templates
    }

    /// Number of loaded templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the registry holds no templates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
