//! Mapping selections between key paths and tree positions.
//!
//! Key-path selections are the stable, externally visible addressing;
//! tree ranges are zero-based index positions valid only until the next
//! mutation. This module converts between the two, transforms ranges
//! forward across low-level tree operations, decides document-order
//! overlap, and keeps externally supplied range decorations valid (or
//! invalidates them) as content changes underneath them.

use std::fmt;

use crate::path::{Path, Point, Segment, Selection};
use crate::tree::{EditorTree, NodeId, TreeOp};

/// A position in the live tree: index path plus character offset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TreePoint {
    pub path: Vec<usize>,
    pub offset: usize,
}

impl TreePoint {
    pub fn new(path: Vec<usize>, offset: usize) -> Self {
        Self { path, offset }
    }
}

/// An index-addressed range over the live tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRange {
    pub anchor: TreePoint,
    pub focus: TreePoint,
}

impl TreeRange {
    pub fn new(anchor: TreePoint, focus: TreePoint) -> Self {
        Self { anchor, focus }
    }

    pub fn collapsed(point: TreePoint) -> Self {
        Self {
            anchor: point.clone(),
            focus: point,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    pub fn is_backward(&self) -> bool {
        self.focus < self.anchor
    }

    /// The earlier of the two ends in document order.
    pub fn start(&self) -> &TreePoint {
        if self.is_backward() { &self.focus } else { &self.anchor }
    }

    pub fn end(&self) -> &TreePoint {
        if self.is_backward() { &self.anchor } else { &self.focus }
    }
}

/// Resolves one key-path point against the tree. Supported shapes are
/// `[{_key}]` (block level) and `[{_key}, "children", {_key}]` (leaf).
fn resolve_point(point: &Point, tree: &EditorTree) -> Option<TreePoint> {
    let block_key = point.path.first()?.as_key()?;
    let block_index = tree.root_index_of(block_key)?;
    match point.path.len() {
        1 => Some(TreePoint::new(vec![block_index], point.offset)),
        3 => {
            if point.path.get(1)?.as_property()? != "children" {
                return None;
            }
            let child_key = point.path.get(2)?.as_key()?;
            let block_id = *tree.roots().get(block_index)?;
            let child_index = tree.child_index_of(block_id, child_key)?;
            Some(TreePoint::new(vec![block_index, child_index], point.offset))
        }
        _ => None,
    }
}

/// Converts a key-path selection into a tree range, or `None` when any
/// key path fails to resolve (e.g. the selection references deleted
/// content).
pub fn to_tree_range(selection: &Selection, tree: &EditorTree) -> Option<TreeRange> {
    Some(TreeRange {
        anchor: resolve_point(&selection.anchor, tree)?,
        focus: resolve_point(&selection.focus, tree)?,
    })
}

fn point_to_key_path(point: &TreePoint, tree: &EditorTree) -> Option<Point> {
    let block_index = *point.path.first()?;
    let block_id = *tree.roots().get(block_index)?;
    let block_key = &tree.get(block_id)?.key;
    let path = match point.path.len() {
        1 => Path::block(block_key),
        2 => {
            let child_id: NodeId = *tree.get(block_id)?.children().get(point.path[1])?;
            let child_key = &tree.get(child_id)?.key;
            Path::child(block_key, child_key)
        }
        _ => return None,
    };
    Some(Point::new(path, point.offset))
}

/// Converts a tree range back into a key-path selection; `backward` is
/// normalized from the actual document order of the two ends.
pub fn to_selection(range: &TreeRange, tree: &EditorTree) -> Option<Selection> {
    let anchor = point_to_key_path(&range.anchor, tree)?;
    let focus = point_to_key_path(&range.focus, tree)?;
    Some(Selection {
        anchor,
        focus,
        backward: range.is_backward(),
    })
}

/// True iff the two ranges share at least one position in document
/// order. Collapsed ranges only overlap ranges that contain that exact
/// point.
pub fn is_overlapping(a: &TreeRange, b: &TreeRange) -> bool {
    a.start() <= b.end() && b.start() <= a.end()
}

/// Outcome of transforming a point across one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointMove {
    /// Provably unaffected; callers may skip work.
    Unchanged,
    Moved(TreePoint),
    /// The point's path no longer resolves.
    Dead,
}

/// Outcome of transforming a range across one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeMove {
    Unaffected,
    Moved(TreeRange),
    Invalid,
}

fn is_prefix(prefix: &[usize], path: &[usize]) -> bool {
    path.len() >= prefix.len() && path[..prefix.len()] == *prefix
}

/// Shares the parent of `op_path` and sits at or after its index.
fn sibling_at_or_after(op_path: &[usize], path: &[usize]) -> bool {
    let depth = op_path.len() - 1;
    path.len() > depth && path[..depth] == op_path[..depth] && path[depth] >= op_path[depth]
}

enum PathMove {
    Unchanged,
    Moved(Vec<usize>),
    Dead,
}

fn transform_path(path: &[usize], op: &TreeOp) -> PathMove {
    match op {
        TreeOp::InsertText { .. } | TreeOp::RemoveText { .. } => PathMove::Unchanged,
        TreeOp::InsertNode { path: at } => {
            if at.is_empty() {
                return PathMove::Unchanged;
            }
            let depth = at.len() - 1;
            if sibling_at_or_after(at, path) {
                let mut moved = path.to_vec();
                moved[depth] += 1;
                PathMove::Moved(moved)
            } else {
                PathMove::Unchanged
            }
        }
        TreeOp::RemoveNode { path: at } => {
            if at.is_empty() {
                return PathMove::Unchanged;
            }
            if is_prefix(at, path) {
                return PathMove::Dead;
            }
            let depth = at.len() - 1;
            if sibling_at_or_after(at, path) {
                let mut moved = path.to_vec();
                moved[depth] -= 1;
                PathMove::Moved(moved)
            } else {
                PathMove::Unchanged
            }
        }
        TreeOp::SplitNode { path: at, position } => {
            if at.is_empty() {
                return PathMove::Unchanged;
            }
            let depth = at.len() - 1;
            if is_prefix(at, path) && path.len() > at.len() {
                // A descendant: children at or past the split position
                // move into the new sibling node.
                if path[at.len()] >= *position {
                    let mut moved = path.to_vec();
                    moved[depth] += 1;
                    moved[at.len()] -= *position;
                    PathMove::Moved(moved)
                } else {
                    PathMove::Unchanged
                }
            } else if path != at && sibling_at_or_after(at, path) {
                let mut moved = path.to_vec();
                moved[depth] += 1;
                PathMove::Moved(moved)
            } else {
                PathMove::Unchanged
            }
        }
        TreeOp::MergeNode { path: at, position } => {
            if at.is_empty() || at[at.len() - 1] == 0 {
                return PathMove::Unchanged;
            }
            let depth = at.len() - 1;
            if path == at {
                let mut moved = path.to_vec();
                moved[depth] -= 1;
                PathMove::Moved(moved)
            } else if is_prefix(at, path) {
                // Children of the merged node are re-homed after the
                // previous sibling's existing children.
                let mut moved = path.to_vec();
                moved[depth] -= 1;
                moved[at.len()] += *position;
                PathMove::Moved(moved)
            } else if sibling_at_or_after(at, path) {
                let mut moved = path.to_vec();
                moved[depth] -= 1;
                PathMove::Moved(moved)
            } else {
                PathMove::Unchanged
            }
        }
        TreeOp::MoveNode { path: from, new_path: to } => {
            if from == to || from.is_empty() || to.is_empty() {
                return PathMove::Unchanged;
            }
            if is_prefix(from, path) {
                // Points inside the moved subtree follow it.
                let mut moved = to.clone();
                moved.extend_from_slice(&path[from.len()..]);
                return PathMove::Moved(moved);
            }
            // Everyone else sees a removal at `from` followed by an
            // insertion at `to`.
            let mut current = path.to_vec();
            let mut changed = false;
            let from_depth = from.len() - 1;
            if sibling_at_or_after(from, &current) && current[from_depth] > from[from_depth] {
                current[from_depth] -= 1;
                changed = true;
            }
            if sibling_at_or_after(to, &current) {
                let to_depth = to.len() - 1;
                current[to_depth] += 1;
                changed = true;
            }
            if changed {
                PathMove::Moved(current)
            } else {
                PathMove::Unchanged
            }
        }
    }
}

/// Transforms one point forward across one operation.
pub fn transform_point(point: &TreePoint, op: &TreeOp) -> PointMove {
    match op {
        TreeOp::InsertText { path, offset, text } => {
            if point.path != *path || *offset > point.offset {
                return PointMove::Unchanged;
            }
            PointMove::Moved(TreePoint::new(
                point.path.clone(),
                point.offset + text.chars().count(),
            ))
        }
        TreeOp::RemoveText { path, offset, text } => {
            if point.path != *path {
                return PointMove::Unchanged;
            }
            let removed = text.chars().count();
            if offset + removed <= point.offset {
                PointMove::Moved(TreePoint::new(point.path.clone(), point.offset - removed))
            } else if *offset < point.offset {
                // Removal runs through the point: collapse onto its start.
                PointMove::Moved(TreePoint::new(point.path.clone(), *offset))
            } else {
                PointMove::Unchanged
            }
        }
        TreeOp::SplitNode { path, position } if !path.is_empty() && point.path == *path => {
            if point.offset < *position {
                return PointMove::Unchanged;
            }
            let depth = path.len() - 1;
            let mut moved = point.path.clone();
            moved[depth] += 1;
            PointMove::Moved(TreePoint::new(moved, point.offset - *position))
        }
        TreeOp::MergeNode { path, position } if !path.is_empty() && point.path == *path => {
            if path[path.len() - 1] == 0 {
                return PointMove::Unchanged;
            }
            let depth = path.len() - 1;
            let mut moved = point.path.clone();
            moved[depth] -= 1;
            PointMove::Moved(TreePoint::new(moved, point.offset + *position))
        }
        _ => match transform_path(&point.path, op) {
            PathMove::Unchanged => PointMove::Unchanged,
            PathMove::Moved(path) => PointMove::Moved(TreePoint::new(path, point.offset)),
            PathMove::Dead => PointMove::Dead,
        },
    }
}

/// Transforms a range forward across one operation: `Unaffected` when
/// both ends are provably untouched, `Invalid` when either end's path no
/// longer resolves, `Moved` otherwise.
pub fn move_by_operation(range: &TreeRange, op: &TreeOp) -> RangeMove {
    let anchor = transform_point(&range.anchor, op);
    let focus = transform_point(&range.focus, op);
    match (anchor, focus) {
        (PointMove::Dead, _) | (_, PointMove::Dead) => RangeMove::Invalid,
        (PointMove::Unchanged, PointMove::Unchanged) => RangeMove::Unaffected,
        (anchor, focus) => {
            let anchor = match anchor {
                PointMove::Moved(point) => point,
                _ => range.anchor.clone(),
            };
            let focus = match focus {
                PointMove::Moved(point) => point,
                _ => range.focus.clone(),
            };
            RangeMove::Moved(TreeRange { anchor, focus })
        }
    }
}

type OnMoved = Box<dyn FnMut(Option<&Selection>)>;

/// An externally supplied overlay region tied to a selection.
///
/// The renderer itself is UI and lives outside the core; the core's job
/// is keeping the selection valid (or reporting its death) as content
/// changes.
pub struct RangeDecoration {
    selection: Selection,
    on_moved: Option<OnMoved>,
    range: Option<TreeRange>,
    alive: bool,
}

impl RangeDecoration {
    pub fn new(selection: Selection) -> Self {
        Self {
            selection,
            on_moved: None,
            range: None,
            alive: true,
        }
    }

    pub fn on_moved(mut self, callback: impl FnMut(Option<&Selection>) + 'static) -> Self {
        self.on_moved = Some(Box::new(callback));
        self
    }

    /// Current selection, or `None` once the decorated content is gone.
    pub fn selection(&self) -> Option<&Selection> {
        self.alive.then_some(&self.selection)
    }

    /// A collapsed decoration is only displayed when it sits exactly on a
    /// leaf-level path, to avoid duplicate rendering at multiple depths.
    pub fn is_displayable(&self) -> bool {
        self.alive && (!self.selection.is_collapsed() || self.selection.anchor.path.is_leaf())
    }

    fn fire(&mut self, selection: Option<Selection>) {
        if let Some(callback) = self.on_moved.as_mut() {
            callback(selection.as_ref());
        }
    }

    fn die(&mut self) {
        self.alive = false;
        self.range = None;
        self.fire(None);
    }
}

impl fmt::Debug for RangeDecoration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeDecoration")
            .field("selection", &self.selection)
            .field("alive", &self.alive)
            .finish_non_exhaustive()
    }
}

/// All live decorations of one editor, recomputed synchronously within
/// the same tick as the mutation that triggered it.
#[derive(Debug, Default)]
pub struct DecorationSet {
    items: Vec<RangeDecoration>,
}

impl DecorationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, decoration: RangeDecoration) {
        self.items.push(decoration);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RangeDecoration> {
        self.items.iter()
    }

    /// (Re-)resolves every live decoration against the tree, killing the
    /// ones whose content no longer exists.
    pub fn resolve(&mut self, tree: &EditorTree) {
        for decoration in &mut self.items {
            if !decoration.alive {
                continue;
            }
            match to_tree_range(&decoration.selection, tree) {
                Some(range) => decoration.range = Some(range),
                None => decoration.die(),
            }
        }
    }

    /// Transforms every live decoration across one operation. `tree` is
    /// the tree state after the operation was applied.
    pub fn apply_operation(&mut self, tree: &EditorTree, op: &TreeOp) {
        for decoration in &mut self.items {
            if !decoration.alive {
                continue;
            }
            let Some(range) = decoration.range.as_ref() else {
                continue;
            };
            match move_by_operation(range, op) {
                RangeMove::Unaffected => {}
                RangeMove::Invalid => decoration.die(),
                RangeMove::Moved(moved) => match to_selection(&moved, tree) {
                    Some(selection) => {
                        decoration.range = Some(moved);
                        if selection != decoration.selection {
                            decoration.selection = selection.clone();
                            decoration.fire(Some(selection));
                        }
                    }
                    None => decoration.die(),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(path: &[usize], offset: usize) -> TreePoint {
        TreePoint::new(path.to_vec(), offset)
    }

    fn range(anchor: (&[usize], usize), focus: (&[usize], usize)) -> TreeRange {
        TreeRange::new(point(anchor.0, anchor.1), point(focus.0, focus.1))
    }

    #[test]
    fn insert_text_before_boundary_shifts_it() {
        let r = range((&[0, 0], 2), (&[0, 0], 5));
        let op = TreeOp::InsertText {
            path: vec![0, 0],
            offset: 1,
            text: "ab".to_string(),
        };
        let RangeMove::Moved(moved) = move_by_operation(&r, &op) else {
            panic!("expected movement");
        };
        assert_eq!(moved.anchor.offset, 4);
        assert_eq!(moved.focus.offset, 7);
    }

    #[test]
    fn insert_text_after_boundary_is_unaffected() {
        let r = range((&[0, 0], 2), (&[0, 0], 3));
        let op = TreeOp::InsertText {
            path: vec![0, 0],
            offset: 4,
            text: "x".to_string(),
        };
        assert_eq!(move_by_operation(&r, &op), RangeMove::Unaffected);
    }

    #[test]
    fn remove_text_through_boundary_collapses_it() {
        let r = range((&[0, 0], 4), (&[0, 0], 8));
        let op = TreeOp::RemoveText {
            path: vec![0, 0],
            offset: 2,
            text: "abcd".to_string(),
        };
        let RangeMove::Moved(moved) = move_by_operation(&r, &op) else {
            panic!("expected movement");
        };
        assert_eq!(moved.anchor.offset, 2);
        assert_eq!(moved.focus.offset, 4);
    }

    #[test]
    fn remove_node_through_range_kills_it() {
        let r = range((&[1, 0], 0), (&[1, 0], 3));
        let op = TreeOp::RemoveNode { path: vec![1] };
        assert_eq!(move_by_operation(&r, &op), RangeMove::Invalid);
    }

    #[test]
    fn remove_earlier_sibling_shifts_block_index() {
        let r = range((&[2, 0], 1), (&[2, 1], 0));
        let op = TreeOp::RemoveNode { path: vec![0] };
        let RangeMove::Moved(moved) = move_by_operation(&r, &op) else {
            panic!("expected movement");
        };
        assert_eq!(moved.anchor.path, vec![1, 0]);
        assert_eq!(moved.focus.path, vec![1, 1]);
    }

    #[test]
    fn insert_node_before_shifts_and_after_is_unaffected() {
        let r = range((&[1, 0], 0), (&[1, 0], 2));
        let before = TreeOp::InsertNode { path: vec![0] };
        let RangeMove::Moved(moved) = move_by_operation(&r, &before) else {
            panic!("expected movement");
        };
        assert_eq!(moved.anchor.path, vec![2, 0]);

        let after = TreeOp::InsertNode { path: vec![5] };
        assert_eq!(move_by_operation(&r, &after), RangeMove::Unaffected);
    }

    #[test]
    fn split_node_moves_tail_points_into_new_node() {
        // Span [0, 0] holds "hello world"; split at offset 5.
        let op = TreeOp::SplitNode {
            path: vec![0, 0],
            position: 5,
        };
        let tail = point(&[0, 0], 8);
        let PointMove::Moved(moved) = transform_point(&tail, &op) else {
            panic!("expected movement");
        };
        assert_eq!(moved.path, vec![0, 1]);
        assert_eq!(moved.offset, 3);

        let head = point(&[0, 0], 3);
        assert_eq!(transform_point(&head, &op), PointMove::Unchanged);
    }

    #[test]
    fn split_block_moves_tail_children() {
        // Block 0 splits at child position 2: child [0, 3] lands at [1, 1].
        let op = TreeOp::SplitNode {
            path: vec![0],
            position: 2,
        };
        let p = point(&[0, 3], 4);
        let PointMove::Moved(moved) = transform_point(&p, &op) else {
            panic!("expected movement");
        };
        assert_eq!(moved.path, vec![1, 1]);
        assert_eq!(moved.offset, 4);
    }

    #[test]
    fn merge_node_rehomes_points() {
        // Span [0, 1] merges into [0, 0] whose text is 5 chars long.
        let op = TreeOp::MergeNode {
            path: vec![0, 1],
            position: 5,
        };
        let p = point(&[0, 1], 2);
        let PointMove::Moved(moved) = transform_point(&p, &op) else {
            panic!("expected movement");
        };
        assert_eq!(moved.path, vec![0, 0]);
        assert_eq!(moved.offset, 7);
    }

    #[test]
    fn move_node_carries_subtree_points() {
        let op = TreeOp::MoveNode {
            path: vec![0],
            new_path: vec![2],
        };
        let p = point(&[0, 1], 3);
        let PointMove::Moved(moved) = transform_point(&p, &op) else {
            panic!("expected movement");
        };
        assert_eq!(moved.path, vec![2, 1]);
        assert_eq!(moved.offset, 3);
    }

    #[test]
    fn empty_op_paths_leave_points_alone() {
        let p = point(&[], 0);
        let split = TreeOp::SplitNode {
            path: vec![],
            position: 1,
        };
        assert_eq!(transform_point(&p, &split), PointMove::Unchanged);
        let merge = TreeOp::MergeNode {
            path: vec![],
            position: 1,
        };
        assert_eq!(transform_point(&p, &merge), PointMove::Unchanged);
    }

    #[test]
    fn overlap_inclusive_of_shared_offset() {
        let a = range((&[0, 0], 0), (&[0, 0], 4));
        let b = range((&[0, 0], 4), (&[0, 0], 9));
        assert!(is_overlapping(&a, &b));

        let c = range((&[0, 0], 5), (&[0, 0], 9));
        assert!(!is_overlapping(&a, &c));
    }

    #[test]
    fn collapsed_overlap_requires_containment() {
        let caret = TreeRange::collapsed(point(&[0, 0], 3));
        let covering = range((&[0, 0], 1), (&[0, 0], 5));
        let elsewhere = range((&[0, 0], 4), (&[0, 0], 5));
        assert!(is_overlapping(&caret, &covering));
        assert!(!is_overlapping(&caret, &elsewhere));
    }

    #[test]
    fn backward_ranges_normalize_for_overlap() {
        let forward = range((&[0, 0], 1), (&[0, 0], 3));
        let backward = range((&[0, 0], 6), (&[0, 0], 2));
        assert!(backward.is_backward());
        assert!(is_overlapping(&forward, &backward));
    }
}
