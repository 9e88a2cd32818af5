//! Schema contract and key generation.
//!
//! [`SchemaInfo`] is the read-only description of the document schema the
//! host supplies once per editor instance: the canonical text block type
//! name, the object types allowed at block and inline level, and the
//! decorator names spans may reference without a backing mark definition.
//! [`KeyGenerator`] mints the `_key` values that give blocks, children,
//! and mark definitions their stable identity.

use std::collections::BTreeSet;
use uuid::Uuid;

/// The `_type` name shared by all spans.
pub const SPAN_TYPE: &str = "span";

/// The generic placeholder block type name that validation coerces to the
/// schema's canonical block type.
pub const GENERIC_BLOCK_TYPE: &str = "block";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaInfo {
    /// Canonical text block type name, e.g. `"block"`.
    pub block_name: String,
    /// Object types allowed at the top (block) level.
    pub block_objects: BTreeSet<String>,
    /// Object types allowed inline, as children of a text block.
    pub inline_objects: BTreeSet<String>,
    /// Decorator mark names (bold, italic, ...) that need no mark definition.
    pub decorators: BTreeSet<String>,
}

impl SchemaInfo {
    pub fn new(block_name: impl Into<String>) -> Self {
        Self {
            block_name: block_name.into(),
            block_objects: BTreeSet::new(),
            inline_objects: BTreeSet::new(),
            decorators: BTreeSet::new(),
        }
    }

    pub fn with_block_objects<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.block_objects = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_inline_objects<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inline_objects = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_decorators<I, S>(mut self, decorators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.decorators = decorators.into_iter().map(Into::into).collect();
        self
    }

    /// True for the canonical text block type.
    pub fn is_text_block(&self, type_name: &str) -> bool {
        type_name == self.block_name
    }

    pub fn is_block_object(&self, type_name: &str) -> bool {
        self.block_objects.contains(type_name)
    }

    pub fn is_inline_object(&self, type_name: &str) -> bool {
        self.inline_objects.contains(type_name)
    }

    pub fn is_decorator(&self, mark: &str) -> bool {
        self.decorators.contains(mark)
    }
}

impl Default for SchemaInfo {
    fn default() -> Self {
        Self::new(GENERIC_BLOCK_TYPE).with_decorators([
            "strong",
            "em",
            "code",
            "underline",
            "strike-through",
        ])
    }
}

/// Mints `_key` values unique within the document's lifetime.
///
/// The core never assumes a particular key format; hosts may plug in
/// anything from counters (useful in tests) to content hashes.
pub trait KeyGenerator {
    fn next_key(&mut self) -> String;
}

impl<F> KeyGenerator for F
where
    F: FnMut() -> String,
{
    fn next_key(&mut self) -> String {
        self()
    }
}

/// Default generator backed by UUID v4, truncated to the customary
/// twelve-character key length.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomKeys;

impl KeyGenerator for RandomKeys {
    fn next_key(&mut self) -> String {
        let mut key = Uuid::new_v4().simple().to_string();
        key.truncate(12);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_keys_are_unique() {
        let mut generator = RandomKeys;
        let a = generator.next_key();
        let b = generator.next_key();
        assert_ne!(a, b);
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn closures_generate_keys() {
        let mut counter = 0u32;
        let mut generator = move || {
            counter += 1;
            format!("k{counter}")
        };
        assert_eq!(KeyGenerator::next_key(&mut generator), "k1");
        assert_eq!(KeyGenerator::next_key(&mut generator), "k2");
    }

    #[test]
    fn schema_lookups() {
        let schema = SchemaInfo::new("myBlock")
            .with_block_objects(["image"])
            .with_inline_objects(["stock-ticker"])
            .with_decorators(["strong", "em"]);
        assert!(schema.is_text_block("myBlock"));
        assert!(!schema.is_text_block("block"));
        assert!(schema.is_block_object("image"));
        assert!(schema.is_inline_object("stock-ticker"));
        assert!(schema.is_decorator("em"));
        assert!(!schema.is_decorator("ghost"));
    }
}
