use pt_sync::convert::value_to_tree;
use pt_sync::path::{Path, Point, Segment, Selection};
use pt_sync::schema::SchemaInfo;
use pt_sync::selection::{TreePoint, TreeRange, to_selection, to_tree_range};
use pt_sync::tree::{EditorTree, KeyRegistry};
use serde_json::json;

fn schema() -> SchemaInfo {
    SchemaInfo::new("block")
        .with_block_objects(["image"])
        .with_inline_objects(["stock-ticker"])
        .with_decorators(["strong", "em"])
}

fn sample_tree() -> EditorTree {
    let value = json!([
        {
            "_key": "b1",
            "_type": "block",
            "style": "normal",
            "markDefs": [],
            "children": [
                {"_key": "s1", "_type": "span", "text": "Hello ", "marks": []},
                {"_key": "s2", "_type": "span", "text": "world", "marks": ["strong"]},
                {"_key": "i1", "_type": "stock-ticker", "symbol": "AAPL"},
            ],
        },
        {"_key": "b2", "_type": "image", "url": "https://example.com/x.png"},
        {
            "_key": "b3",
            "_type": "block",
            "style": "h1",
            "markDefs": [],
            "children": [{"_key": "s3", "_type": "span", "text": "Title", "marks": []}],
        },
    ]);
    let mut tree = EditorTree::new();
    let mut registry = KeyRegistry::new();
    let conversion = value_to_tree(&value, &schema(), &mut tree, &mut registry);
    assert!(conversion.diagnostics.is_empty());
    tree.set_roots(conversion.roots);
    tree
}

#[test]
fn leaf_points_resolve_to_index_paths() {
    let tree = sample_tree();
    let selection = Selection::new(
        Point::new(Path::child("b1", "s1"), 2),
        Point::new(Path::child("b1", "s2"), 4),
    );
    let range = to_tree_range(&selection, &tree).unwrap();
    assert_eq!(range.anchor, TreePoint::new(vec![0, 0], 2));
    assert_eq!(range.focus, TreePoint::new(vec![0, 1], 4));
}

#[test]
fn block_points_resolve_to_root_indices() {
    let tree = sample_tree();
    let selection = Selection::collapsed(Point::new(Path::block("b3"), 0));
    let range = to_tree_range(&selection, &tree).unwrap();
    assert_eq!(range.anchor, TreePoint::new(vec![2], 0));
}

#[test]
fn resolution_round_trips_every_addressable_position() {
    let tree = sample_tree();
    let selections = [
        Selection::collapsed(Point::new(Path::block("b1"), 0)),
        Selection::collapsed(Point::new(Path::block("b2"), 0)),
        Selection::collapsed(Point::new(Path::child("b1", "s1"), 3)),
        Selection::collapsed(Point::new(Path::child("b1", "i1"), 0)),
        Selection::new(
            Point::new(Path::child("b1", "s2"), 0),
            Point::new(Path::child("b3", "s3"), 5),
        ),
    ];
    for selection in selections {
        let range = to_tree_range(&selection, &tree).unwrap();
        let restored = to_selection(&range, &tree).unwrap();
        assert_eq!(restored, selection);
    }
}

#[test]
fn backward_flag_is_normalized_from_document_order() {
    let tree = sample_tree();
    // Anchor after focus in document order.
    let selection = Selection::new(
        Point::new(Path::child("b3", "s3"), 2),
        Point::new(Path::child("b1", "s1"), 0),
    );
    let range = to_tree_range(&selection, &tree).unwrap();
    assert!(range.is_backward());
    let restored = to_selection(&range, &tree).unwrap();
    assert!(restored.backward);
    assert_eq!(restored.anchor, selection.anchor);
    assert_eq!(restored.focus, selection.focus);
}

#[test]
fn unknown_keys_do_not_resolve() {
    let tree = sample_tree();
    let missing_block = Selection::collapsed(Point::new(Path::block("nope"), 0));
    assert_eq!(to_tree_range(&missing_block, &tree), None);

    let missing_child = Selection::collapsed(Point::new(Path::child("b1", "nope"), 0));
    assert_eq!(to_tree_range(&missing_child, &tree), None);

    // One dead end poisons the whole selection.
    let half_dead = Selection::new(
        Point::new(Path::child("b1", "s1"), 0),
        Point::new(Path::child("nope", "s1"), 0),
    );
    assert_eq!(to_tree_range(&half_dead, &tree), None);
}

#[test]
fn unsupported_path_shapes_do_not_resolve() {
    let tree = sample_tree();
    // markDefs paths are addressable by patches but not by selections.
    let mark_def = Selection::collapsed(Point::new(
        Path(vec![
            Segment::key("b1"),
            Segment::property("markDefs"),
            Segment::key("m1"),
        ]),
        0,
    ));
    assert_eq!(to_tree_range(&mark_def, &tree), None);
}

#[test]
fn stale_ranges_do_not_convert_back() {
    let tree = sample_tree();
    let range = TreeRange::collapsed(TreePoint::new(vec![7], 0));
    assert_eq!(to_selection(&range, &tree), None);
}
