//! The Portable Text value model.
//!
//! A Portable Text value is an ordered array of keyed block objects. The
//! typed structs here mirror the wire shape (`_key`, `_type`, `markDefs`)
//! and keep unknown fields through serde flattening so a round trip never
//! drops host data. Pre-validation input cannot be assumed to fit these
//! shapes, so the raw-JSON accessors at the bottom are what the validator
//! works with.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::schema::SPAN_TYPE;

/// Style assigned to text blocks that carry none.
pub const DEFAULT_STYLE: &str = "normal";

fn default_style() -> String {
    DEFAULT_STYLE.to_string()
}

/// An annotation definition (e.g. a link) referenced by spans via its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkDef {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_type")]
    pub def_type: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A run of text plus the marks applied to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_type")]
    pub span_type: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub marks: Vec<String>,
}

impl Span {
    pub fn new(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            span_type: SPAN_TYPE.to_string(),
            text: text.into(),
            marks: Vec::new(),
        }
    }

    pub fn with_marks<I, S>(mut self, marks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.marks = marks.into_iter().map(Into::into).collect();
        self
    }
}

/// An opaque keyed object, atomic at whichever level it appears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectNode {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_type")]
    pub object_type: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A child of a text block: a span or an inline object, never split.
#[derive(Debug, Clone, PartialEq)]
pub enum Child {
    Span(Span),
    Object(ObjectNode),
}

impl Child {
    pub fn key(&self) -> &str {
        match self {
            Child::Span(span) => &span.key,
            Child::Object(object) => &object.key,
        }
    }
}

impl Serialize for Child {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Child::Span(span) => span.serialize(serializer),
            Child::Object(object) => object.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Child {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if type_of(&value) == Some(SPAN_TYPE) {
            Span::deserialize(value)
                .map(Child::Span)
                .map_err(D::Error::custom)
        } else {
            ObjectNode::deserialize(value)
                .map(Child::Object)
                .map_err(D::Error::custom)
        }
    }
}

/// A styled block of inline children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_type")]
    pub block_type: String,
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(rename = "markDefs", default)]
    pub mark_defs: Vec<MarkDef>,
    pub children: Vec<Child>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A top-level unit of the document.
///
/// Deserialization discriminates on the presence of a `children` array:
/// validated text blocks always carry one, object blocks never do.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text(TextBlock),
    Object(ObjectNode),
}

impl Block {
    pub fn key(&self) -> &str {
        match self {
            Block::Text(block) => &block.key,
            Block::Object(object) => &object.key,
        }
    }
}

impl Serialize for Block {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Block::Text(block) => block.serialize(serializer),
            Block::Object(object) => object.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Block {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.get("children").is_some_and(Value::is_array) {
            TextBlock::deserialize(value)
                .map(Block::Text)
                .map_err(D::Error::custom)
        } else {
            ObjectNode::deserialize(value)
                .map(Block::Object)
                .map_err(D::Error::custom)
        }
    }
}

/// Reads the `_key` of a raw JSON node, if it has one.
pub fn key_of(value: &Value) -> Option<&str> {
    value.get("_key").and_then(Value::as_str)
}

/// Reads the `_type` of a raw JSON node, if it has one.
pub fn type_of(value: &Value) -> Option<&str> {
    value.get("_type").and_then(Value::as_str)
}

/// Builds the raw JSON for a new empty span, used when repairing a text
/// block whose children emptied out.
pub fn empty_span(key: impl Into<String>) -> Value {
    json!({
        "_key": key.into(),
        "_type": SPAN_TYPE,
        "text": "",
        "marks": [],
    })
}
