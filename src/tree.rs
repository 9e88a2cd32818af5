//! The arena-backed editable tree.
//!
//! Tree nodes live in a slot vector addressed by [`NodeId`]; parent/child
//! links are ids, so the mutation-in-place behavior an editor needs comes
//! without pointer aliasing. The arena also carries an explicit transform
//! depth: a multi-step edit brackets itself with
//! [`EditorTree::begin_transform`]/[`EditorTree::end_transform`], and the
//! synchronizer refuses to flush while the tree is not settled.
//!
//! [`KeyRegistry`] is the weak key↔node association the value converter
//! uses to hand back the same node identity for unchanged content across
//! conversions. The arena index plays the weak-handle role: the registry
//! holds only ids, never nodes.

use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

use crate::value::MarkDef;

/// Stable handle of one node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    TextBlock {
        block_type: String,
        style: String,
        mark_defs: Vec<MarkDef>,
        children: Vec<NodeId>,
        /// Host fields such as `listItem` and `level`, carried verbatim.
        fields: Map<String, Value>,
    },
    ObjectBlock {
        object_type: String,
        fields: Map<String, Value>,
    },
    Span {
        text: String,
        marks: Vec<String>,
    },
    InlineObject {
        object_type: String,
        fields: Map<String, Value>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub key: String,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_block(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::TextBlock { .. } | NodeKind::ObjectBlock { .. }
        )
    }

    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::TextBlock { children, .. } => children,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node not found in arena")]
    NodeNotFound,
    #[error("child index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("node cannot carry children")]
    NotAParent,
}

/// The live editable tree, exclusively owned by the synchronizer for the
/// duration of any mutation.
#[derive(Debug, Default)]
pub struct EditorTree {
    slots: Vec<Option<Node>>,
    free: Vec<u32>,
    roots: Vec<NodeId>,
    transform_depth: u32,
}

impl EditorTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(node);
            NodeId(slot)
        } else {
            self.slots.push(Some(node));
            NodeId((self.slots.len() - 1) as u32)
        }
    }

    /// Releases a slot. The caller is responsible for unlinking the id
    /// from roots/children and the key registry first.
    pub fn free(&mut self, id: NodeId) -> Option<Node> {
        let node = self.slots.get_mut(id.index())?.take();
        if node.is_some() {
            self.free.push(id.0);
        }
        node
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn set_roots(&mut self, roots: Vec<NodeId>) {
        self.roots = roots;
    }

    pub fn insert_root(&mut self, index: usize, id: NodeId) -> Result<(), TreeError> {
        if index > self.roots.len() {
            return Err(TreeError::IndexOutOfBounds {
                index,
                len: self.roots.len(),
            });
        }
        self.roots.insert(index, id);
        Ok(())
    }

    pub fn remove_root(&mut self, index: usize) -> Result<NodeId, TreeError> {
        if index >= self.roots.len() {
            return Err(TreeError::IndexOutOfBounds {
                index,
                len: self.roots.len(),
            });
        }
        Ok(self.roots.remove(index))
    }

    pub fn insert_child(
        &mut self,
        parent: NodeId,
        index: usize,
        child: NodeId,
    ) -> Result<(), TreeError> {
        let node = self.get_mut(parent).ok_or(TreeError::NodeNotFound)?;
        let NodeKind::TextBlock { children, .. } = &mut node.kind else {
            return Err(TreeError::NotAParent);
        };
        if index > children.len() {
            return Err(TreeError::IndexOutOfBounds {
                index,
                len: children.len(),
            });
        }
        children.insert(index, child);
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, index: usize) -> Result<NodeId, TreeError> {
        let node = self.get_mut(parent).ok_or(TreeError::NodeNotFound)?;
        let NodeKind::TextBlock { children, .. } = &mut node.kind else {
            return Err(TreeError::NotAParent);
        };
        if index >= children.len() {
            return Err(TreeError::IndexOutOfBounds {
                index,
                len: children.len(),
            });
        }
        Ok(children.remove(index))
    }

    /// Resolves a zero-based tree index path to a node id. Valid only
    /// until the next mutation.
    pub fn node_at(&self, path: &[usize]) -> Option<NodeId> {
        let mut iter = path.iter();
        let mut id = *self.roots.get(*iter.next()?)?;
        for &index in iter {
            id = *self.get(id)?.children().get(index)?;
        }
        Some(id)
    }

    /// Index of a top-level block by key.
    pub fn root_index_of(&self, key: &str) -> Option<usize> {
        self.roots
            .iter()
            .position(|id| self.get(*id).is_some_and(|node| node.key == key))
    }

    /// Index of a child by key within the given text block.
    pub fn child_index_of(&self, block: NodeId, key: &str) -> Option<usize> {
        self.get(block)?
            .children()
            .iter()
            .position(|id| self.get(*id).is_some_and(|node| node.key == key))
    }

    pub fn block_count(&self) -> usize {
        self.roots.len()
    }

    /// A multi-step edit is in progress while the depth is non-zero.
    pub fn begin_transform(&mut self) {
        self.transform_depth += 1;
    }

    pub fn end_transform(&mut self) {
        self.transform_depth = self.transform_depth.saturating_sub(1);
    }

    /// True when no multi-step edit is mid-flight; the synchronizer only
    /// flushes in this state.
    pub fn is_settled(&self) -> bool {
        self.transform_depth == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.roots.clear();
    }
}

/// Low-level tree operations, addressed by index path. These are the
/// vocabulary the selection mapper transforms ranges over; the editing
/// primitives producing them are an external collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeOp {
    InsertText {
        path: Vec<usize>,
        offset: usize,
        text: String,
    },
    RemoveText {
        path: Vec<usize>,
        offset: usize,
        text: String,
    },
    InsertNode {
        path: Vec<usize>,
    },
    RemoveNode {
        path: Vec<usize>,
    },
    SplitNode {
        path: Vec<usize>,
        position: usize,
    },
    MergeNode {
        path: Vec<usize>,
        position: usize,
    },
    MoveNode {
        path: Vec<usize>,
        new_path: Vec<usize>,
    },
}

/// Bidirectional weak association between stable keys and live nodes,
/// scoped to one editor instance.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    bindings: HashMap<String, NodeId>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, key: impl Into<String>, id: NodeId) {
        self.bindings.insert(key.into(), id);
    }

    pub fn lookup(&self, key: &str) -> Option<NodeId> {
        self.bindings.get(key).copied()
    }

    pub fn unbind(&mut self, key: &str) -> Option<NodeId> {
        self.bindings.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.bindings.keys()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(key: &str, text: &str) -> Node {
        Node {
            key: key.to_string(),
            kind: NodeKind::Span {
                text: text.to_string(),
                marks: Vec::new(),
            },
        }
    }

    fn block(key: &str, children: Vec<NodeId>) -> Node {
        Node {
            key: key.to_string(),
            kind: NodeKind::TextBlock {
                block_type: "block".to_string(),
                style: "normal".to_string(),
                mark_defs: Vec::new(),
                children,
                fields: Map::new(),
            },
        }
    }

    #[test]
    fn alloc_reuses_freed_slots() {
        let mut tree = EditorTree::new();
        let a = tree.alloc(span("a", ""));
        let b = tree.alloc(span("b", ""));
        tree.free(a);
        let c = tree.alloc(span("c", ""));
        assert_eq!(c, a);
        assert_ne!(c, b);
        assert_eq!(tree.get(c).unwrap().key, "c");
    }

    #[test]
    fn index_path_resolution() {
        let mut tree = EditorTree::new();
        let s1 = tree.alloc(span("s1", "one"));
        let s2 = tree.alloc(span("s2", "two"));
        let b1 = tree.alloc(block("b1", vec![s1, s2]));
        tree.set_roots(vec![b1]);

        assert_eq!(tree.node_at(&[0]), Some(b1));
        assert_eq!(tree.node_at(&[0, 1]), Some(s2));
        assert_eq!(tree.node_at(&[0, 2]), None);
        assert_eq!(tree.node_at(&[1]), None);
        assert_eq!(tree.root_index_of("b1"), Some(0));
        assert_eq!(tree.child_index_of(b1, "s2"), Some(1));
    }

    #[test]
    fn child_manipulation_bounds() {
        let mut tree = EditorTree::new();
        let s1 = tree.alloc(span("s1", ""));
        let b1 = tree.alloc(block("b1", vec![s1]));
        tree.set_roots(vec![b1]);

        let s2 = tree.alloc(span("s2", ""));
        tree.insert_child(b1, 1, s2).unwrap();
        assert_eq!(tree.get(b1).unwrap().children(), &[s1, s2]);

        assert!(matches!(
            tree.insert_child(b1, 5, s2),
            Err(TreeError::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            tree.insert_child(s1, 0, s2),
            Err(TreeError::NotAParent)
        ));

        let removed = tree.remove_child(b1, 0).unwrap();
        assert_eq!(removed, s1);
    }

    #[test]
    fn transform_depth_tracks_settledness() {
        let mut tree = EditorTree::new();
        assert!(tree.is_settled());
        tree.begin_transform();
        tree.begin_transform();
        tree.end_transform();
        assert!(!tree.is_settled());
        tree.end_transform();
        assert!(tree.is_settled());
        // Unbalanced end calls must not underflow.
        tree.end_transform();
        assert!(tree.is_settled());
    }

    #[test]
    fn registry_bind_lookup_unbind() {
        let mut tree = EditorTree::new();
        let id = tree.alloc(span("s1", ""));
        let mut registry = KeyRegistry::new();
        registry.bind("s1", id);
        assert_eq!(registry.lookup("s1"), Some(id));
        assert_eq!(registry.unbind("s1"), Some(id));
        assert_eq!(registry.lookup("s1"), None);
        assert!(registry.is_empty());
    }
}
