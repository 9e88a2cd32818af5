//! Value ⇄ tree conversion.
//!
//! `value_to_tree` materializes an editable tree from a Portable Text
//! value; `tree_to_value` is its inverse, and a left-inverse for any
//! value that passed validation (after defaulting of `style` and
//! `markDefs`). Conversion never fails: a node whose type does not
//! resolve against the schema is skipped and reported as a diagnostic so
//! that partially-corrupt documents remain usable.
//!
//! The key registry makes conversion identity-preserving: converting the
//! same logical node twice (same key, unchanged shape) yields the same
//! [`NodeId`], which lets change detection skip no-op updates. The same
//! pass also destroys converted-away content: any binding whose key no
//! longer appears in the value is unbound and its arena slot freed.

use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

use crate::schema::{SPAN_TYPE, SchemaInfo};
use crate::tree::{EditorTree, KeyRegistry, Node, NodeId, NodeKind};
use crate::value::{
    Block, Child, DEFAULT_STYLE, MarkDef, ObjectNode, Span, TextBlock, key_of, type_of,
};

/// Outcome of a conversion pass: the root block ids plus diagnostics for
/// every skipped node.
#[derive(Debug, Default)]
pub struct Conversion {
    pub roots: Vec<NodeId>,
    pub diagnostics: Vec<String>,
}

/// Converts a Portable Text value into tree nodes, reusing node identity
/// through the registry wherever content is unchanged and releasing
/// every node whose key the value no longer contains.
pub fn value_to_tree(
    value: &Value,
    schema: &SchemaInfo,
    tree: &mut EditorTree,
    registry: &mut KeyRegistry,
) -> Conversion {
    let mut pass = Pass {
        schema,
        tree,
        registry,
        seen: HashSet::new(),
        conversion: Conversion::default(),
    };
    pass.run(value);
    pass.release_unseen();
    pass.conversion
}

/// One conversion pass over a value.
struct Pass<'a> {
    schema: &'a SchemaInfo,
    tree: &'a mut EditorTree,
    registry: &'a mut KeyRegistry,
    seen: HashSet<String>,
    conversion: Conversion,
}

impl Pass<'_> {
    fn run(&mut self, value: &Value) {
        let Some(blocks) = value.as_array() else {
            self.skip("top-level value is not an array".to_string());
            return;
        };

        for (index, block) in blocks.iter().enumerate() {
            let (Some(key), Some(block_type)) = (key_of(block), type_of(block)) else {
                self.skip(format!("block at index {index} has no _key/_type; skipped"));
                continue;
            };

            if self.schema.is_text_block(block_type) {
                let Some(node) = self.text_block_node(block, key, block_type) else {
                    continue;
                };
                let id = self.intern(node);
                self.conversion.roots.push(id);
            } else if self.schema.is_block_object(block_type) {
                let id = self.intern(Node {
                    key: key.to_string(),
                    kind: NodeKind::ObjectBlock {
                        object_type: block_type.to_string(),
                        fields: opaque_fields(block),
                    },
                });
                self.conversion.roots.push(id);
            } else {
                self.skip(format!(
                    "block {key} has unresolvable type {block_type:?}; skipped"
                ));
            }
        }
    }

    fn text_block_node(&mut self, block: &Value, key: &str, block_type: &str) -> Option<Node> {
        let Some(raw_children) = block.get("children").and_then(Value::as_array) else {
            self.skip(format!("text block {key} has no children array; skipped"));
            return None;
        };

        let mut children = Vec::with_capacity(raw_children.len());
        for (index, child) in raw_children.iter().enumerate() {
            let (Some(child_key), Some(child_type)) = (key_of(child), type_of(child)) else {
                self.skip(format!(
                    "child {index} of block {key} has no _key/_type; skipped"
                ));
                continue;
            };
            let node = if child_type == SPAN_TYPE {
                Node {
                    key: child_key.to_string(),
                    kind: NodeKind::Span {
                        text: child
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        marks: string_items(child.get("marks")),
                    },
                }
            } else if self.schema.is_inline_object(child_type) {
                Node {
                    key: child_key.to_string(),
                    kind: NodeKind::InlineObject {
                        object_type: child_type.to_string(),
                        fields: opaque_fields(child),
                    },
                }
            } else {
                self.skip(format!(
                    "child {child_key} of block {key} has unresolvable type {child_type:?}; skipped"
                ));
                continue;
            };
            children.push(self.intern(node));
        }

        Some(Node {
            key: key.to_string(),
            kind: NodeKind::TextBlock {
                block_type: block_type.to_string(),
                style: block
                    .get("style")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_STYLE)
                    .to_string(),
                mark_defs: self.mark_defs_of(block, key),
                children,
                fields: text_block_fields(block),
            },
        })
    }

    /// Allocates a node, or hands back the existing id when the registry
    /// already maps the key to an identical node. Either way the key
    /// counts as seen by this pass.
    fn intern(&mut self, node: Node) -> NodeId {
        self.seen.insert(node.key.clone());
        match self.registry.lookup(&node.key) {
            Some(id) if self.tree.get(id) == Some(&node) => id,
            Some(stale) => {
                // Allocate before freeing so the fresh node cannot land in
                // the stale slot and alias the old identity.
                let key = node.key.clone();
                let id = self.tree.alloc(node);
                self.tree.free(stale);
                self.registry.bind(key, id);
                id
            }
            None => {
                let key = node.key.clone();
                let id = self.tree.alloc(node);
                self.registry.bind(key, id);
                id
            }
        }
    }

    fn mark_defs_of(&mut self, block: &Value, key: &str) -> Vec<MarkDef> {
        let Some(raw) = block.get("markDefs").and_then(Value::as_array) else {
            return Vec::new();
        };
        let mut defs = Vec::with_capacity(raw.len());
        for def in raw {
            match serde_json::from_value::<MarkDef>(def.clone()) {
                Ok(def) => defs.push(def),
                Err(error) => {
                    self.skip(format!("markDef in block {key} is malformed ({error}); skipped"))
                }
            }
        }
        defs
    }

    /// Destroys every node whose key this pass did not see, so the arena
    /// and registry never accumulate converted-away content.
    fn release_unseen(&mut self) {
        let stale: Vec<String> = self
            .registry
            .keys()
            .filter(|key| !self.seen.contains(key.as_str()))
            .cloned()
            .collect();
        for key in stale {
            if let Some(id) = self.registry.unbind(&key) {
                self.tree.free(id);
            }
        }
    }

    fn skip(&mut self, message: String) {
        warn!(target: "pt_sync::convert", "{message}");
        self.conversion.diagnostics.push(message);
    }
}

fn string_items(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Every field except the identity pair, for opaque objects.
fn opaque_fields(value: &Value) -> Map<String, Value> {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter(|(name, _)| name.as_str() != "_key" && name.as_str() != "_type")
                .map(|(name, field)| (name.clone(), field.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Host fields on a text block beyond the modeled ones.
fn text_block_fields(value: &Value) -> Map<String, Value> {
    const MODELED: [&str; 5] = ["_key", "_type", "style", "markDefs", "children"];
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter(|(name, _)| !MODELED.contains(&name.as_str()))
                .map(|(name, field)| (name.clone(), field.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Serializes the live tree back into a Portable Text value, through the
/// typed block model.
pub fn tree_to_value(tree: &EditorTree) -> Value {
    let blocks = tree
        .roots()
        .iter()
        .filter_map(|id| block_of(tree, *id))
        .filter_map(|block| serde_json::to_value(&block).ok())
        .collect::<Vec<_>>();
    Value::Array(blocks)
}

fn block_of(tree: &EditorTree, id: NodeId) -> Option<Block> {
    let node = tree.get(id)?;
    match &node.kind {
        NodeKind::TextBlock {
            block_type,
            style,
            mark_defs,
            children,
            fields,
        } => Some(Block::Text(TextBlock {
            key: node.key.clone(),
            block_type: block_type.clone(),
            style: style.clone(),
            mark_defs: mark_defs.clone(),
            children: children
                .iter()
                .filter_map(|child| child_of(tree, *child))
                .collect(),
            fields: fields.clone(),
        })),
        NodeKind::ObjectBlock {
            object_type,
            fields,
        } => Some(Block::Object(ObjectNode {
            key: node.key.clone(),
            object_type: object_type.clone(),
            fields: fields.clone(),
        })),
        // Spans and inline objects are never roots.
        _ => None,
    }
}

fn child_of(tree: &EditorTree, id: NodeId) -> Option<Child> {
    let node = tree.get(id)?;
    match &node.kind {
        NodeKind::Span { text, marks } => Some(Child::Span(
            Span::new(node.key.clone(), text.clone()).with_marks(marks.clone()),
        )),
        NodeKind::InlineObject {
            object_type,
            fields,
        } => Some(Child::Object(ObjectNode {
            key: node.key.clone(),
            object_type: object_type.clone(),
            fields: fields.clone(),
        })),
        _ => None,
    }
}
