//! Structural validation and self-healing.
//!
//! `validate` scans a raw Portable Text value top to bottom and stops at
//! the first structural defect, producing a [`Resolution`]: one
//! corrective patch set plus a human-readable description, sufficient to
//! clear that defect. Validation is deliberately not exhaustive per pass:
//! the caller applies the resolution and re-validates, so a document with
//! several defects converges in as many passes as it has defects.
//!
//! This is a pure function. It never panics and never errors; input it
//! cannot make sense of at all (a non-array, or an empty array) resolves
//! to a whole-value unset.

use serde_json::{Value, json};
use tracing::debug;

use crate::patch::{InsertPosition, Patch};
use crate::path::{Path, Segment};
use crate::schema::{GENERIC_BLOCK_TYPE, KeyGenerator, SPAN_TYPE, SchemaInfo};
use crate::value::{empty_span, key_of, type_of};

/// One corrective patch set and its explanation. Applying the patches
/// clears the reported defect; re-validate afterwards.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Resolution {
    pub patches: Vec<Patch>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid,
    Invalid(Resolution),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    pub fn into_resolution(self) -> Option<Resolution> {
        match self {
            Validation::Valid => None,
            Validation::Invalid(resolution) => Some(resolution),
        }
    }
}

fn invalid(patches: Vec<Patch>, description: String) -> Validation {
    debug!(target: "pt_sync::validate", "{description}");
    Validation::Invalid(Resolution {
        patches,
        description,
    })
}

fn unset_all(description: String) -> Validation {
    invalid(vec![Patch::Unset { path: Path::new() }], description)
}

/// Validates a value against the schema. `None` (an absent document) is
/// valid; so is any array of well-formed blocks.
pub fn validate(
    value: Option<&Value>,
    schema: &SchemaInfo,
    keygen: &mut dyn KeyGenerator,
) -> Validation {
    let Some(value) = value else {
        return Validation::Valid;
    };
    let Some(blocks) = value.as_array() else {
        return unset_all(format!(
            "Value must be an array of Portable Text blocks, got {}",
            type_name(value)
        ));
    };
    if blocks.is_empty() {
        return unset_all("Value is an empty array, which is not allowed".to_string());
    }

    for (index, block) in blocks.iter().enumerate() {
        if let Validation::Invalid(resolution) = validate_block(index, block, schema, keygen) {
            return Validation::Invalid(resolution);
        }
    }
    Validation::Valid
}

fn validate_block(
    index: usize,
    block: &Value,
    schema: &SchemaInfo,
    keygen: &mut dyn KeyGenerator,
) -> Validation {
    if !block.is_object() {
        return invalid(
            vec![Patch::Unset {
                path: Path(vec![Segment::Index(index)]),
            }],
            format!("Block at index {index} is not an object"),
        );
    }

    let Some(key) = key_of(block) else {
        return invalid(
            vec![Patch::Set {
                path: Path(vec![Segment::Index(index), Segment::property("_key")]),
                value: json!(keygen.next_key()),
            }],
            format!("Block at index {index} is missing a _key"),
        );
    };
    let block_path = Path::block(key);

    let Some(block_type) = type_of(block) else {
        return invalid(
            vec![Patch::Unset {
                path: block_path,
            }],
            format!("Block {key} is missing a _type"),
        );
    };

    if !schema.is_text_block(block_type) && !schema.is_block_object(block_type) {
        if block_type == GENERIC_BLOCK_TYPE {
            return invalid(
                vec![Patch::Set {
                    path: block_path.join(Segment::property("_type")),
                    value: json!(schema.block_name),
                }],
                format!(
                    "Block {key} uses the generic {GENERIC_BLOCK_TYPE:?} type; coercing to {:?}",
                    schema.block_name
                ),
            );
        }
        return invalid(
            vec![Patch::Unset { path: block_path }],
            format!("Block {key} has invalid type {block_type:?}"),
        );
    }

    if schema.is_text_block(block_type) {
        validate_text_block(key, block, schema, keygen)
    } else {
        Validation::Valid
    }
}

fn validate_text_block(
    key: &str,
    block: &Value,
    schema: &SchemaInfo,
    keygen: &mut dyn KeyGenerator,
) -> Validation {
    let block_path = Path::block(key);

    let Some(children) = block.get("children").and_then(Value::as_array) else {
        return invalid(
            vec![Patch::Unset { path: block_path }],
            format!("Text block {key} has no children array"),
        );
    };

    let mark_defs = block.get("markDefs").and_then(Value::as_array);
    let Some(mark_defs) = mark_defs else {
        return invalid(
            vec![Patch::Set {
                path: block_path.join(Segment::property("markDefs")),
                value: json!([]),
            }],
            format!("Text block {key} is missing markDefs"),
        );
    };

    // Orphaned annotation marks: references that are neither decorators
    // nor keys of this block's markDefs. One patch per affected child.
    let def_keys: Vec<&str> = mark_defs.iter().filter_map(key_of).collect();
    let mut orphan_patches = Vec::new();
    let mut orphaned = Vec::new();
    for (child_index, child) in children.iter().enumerate() {
        if type_of(child) != Some(SPAN_TYPE) {
            continue;
        }
        let Some(marks) = child.get("marks").and_then(Value::as_array) else {
            continue;
        };
        let kept: Vec<&str> = marks
            .iter()
            .filter_map(Value::as_str)
            .filter(|mark| schema.is_decorator(mark) || def_keys.contains(mark))
            .collect();
        if kept.len() != marks.len() {
            for mark in marks.iter().filter_map(Value::as_str) {
                if !kept.contains(&mark) {
                    orphaned.push(mark.to_string());
                }
            }
            orphan_patches.push(Patch::Set {
                path: block_path
                    .join(Segment::property("children"))
                    .join(child_segment(child, child_index))
                    .join(Segment::property("marks")),
                value: json!(kept),
            });
        }
    }
    if !orphan_patches.is_empty() {
        return invalid(
            orphan_patches,
            format!(
                "Block {key} contains marks ({}) not supported by the schema or backed by a markDef",
                orphaned.join(", ")
            ),
        );
    }

    if children.is_empty() {
        return invalid(
            vec![Patch::Insert {
                path: block_path
                    .join(Segment::property("children"))
                    .join(Segment::Index(0)),
                position: InsertPosition::After,
                items: vec![empty_span(keygen.next_key())],
            }],
            format!("Text block {key} has no children; inserting an empty span"),
        );
    }

    for (child_index, child) in children.iter().enumerate() {
        if let Validation::Invalid(resolution) =
            validate_child(key, child_index, child, schema, keygen)
        {
            return Validation::Invalid(resolution);
        }
    }
    Validation::Valid
}

fn validate_child(
    block_key: &str,
    index: usize,
    child: &Value,
    schema: &SchemaInfo,
    keygen: &mut dyn KeyGenerator,
) -> Validation {
    let children_path = Path::block(block_key).join(Segment::property("children"));

    if !child.is_object() {
        return invalid(
            vec![Patch::Unset {
                path: children_path.join(Segment::Index(index)),
            }],
            format!("Child at index {index} of block {block_key} is not an object"),
        );
    }

    let Some(child_key) = key_of(child) else {
        return invalid(
            vec![Patch::Set {
                path: children_path
                    .join(Segment::Index(index))
                    .join(Segment::property("_key")),
                value: json!(keygen.next_key()),
            }],
            format!("Child at index {index} of block {block_key} is missing a _key"),
        );
    };
    let child_path = children_path.join(Segment::key(child_key));

    let child_type = type_of(child);
    let resolvable = child_type
        .is_some_and(|name| name == SPAN_TYPE || schema.is_inline_object(name));
    if !resolvable {
        return invalid(
            vec![Patch::Unset { path: child_path }],
            format!(
                "Child {child_key} of block {block_key} has invalid type {:?}",
                child_type.unwrap_or("<missing>")
            ),
        );
    }

    if child_type == Some(SPAN_TYPE) && !child.get("text").is_some_and(Value::is_string) {
        return invalid(
            vec![Patch::Set {
                path: child_path.join(Segment::property("text")),
                value: json!(""),
            }],
            format!("Span {child_key} of block {block_key} is missing a text field"),
        );
    }

    Validation::Valid
}

fn child_segment(child: &Value, index: usize) -> Segment {
    match key_of(child) {
        Some(key) => Segment::key(key),
        None => Segment::Index(index),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
