use std::cell::RefCell;
use std::rc::Rc;

use pt_sync::path::{Path, Point, Selection};
use pt_sync::schema::{KeyGenerator, SchemaInfo};
use pt_sync::selection::RangeDecoration;
use pt_sync::sync::{SyncOptions, Synchronizer};
use pt_sync::tree::TreeOp;
use serde_json::{Value, json};

fn schema() -> SchemaInfo {
    SchemaInfo::new("block")
        .with_block_objects(["image"])
        .with_decorators(["strong", "em"])
}

fn keys() -> impl KeyGenerator {
    let mut counter = 0u32;
    move || {
        counter += 1;
        format!("g{counter}")
    }
}

fn sample() -> Value {
    json!([
        {
            "_key": "b1",
            "_type": "block",
            "style": "normal",
            "markDefs": [],
            "children": [{"_key": "s1", "_type": "span", "text": "Hello there", "marks": []}],
        },
        {
            "_key": "b2",
            "_type": "block",
            "style": "normal",
            "markDefs": [],
            "children": [{"_key": "s2", "_type": "span", "text": "Comment anchor", "marks": []}],
        },
    ])
}

fn mounted() -> Synchronizer {
    let mut sync = Synchronizer::new(schema(), keys(), SyncOptions::default());
    sync.mount(Some(sample()), 0);
    sync.take_events();
    sync
}

type Calls = Rc<RefCell<Vec<Option<Selection>>>>;

fn recording(selection: Selection) -> (RangeDecoration, Calls) {
    let calls: Calls = Rc::default();
    let sink = Rc::clone(&calls);
    let decoration = RangeDecoration::new(selection)
        .on_moved(move |selection| sink.borrow_mut().push(selection.cloned()));
    (decoration, calls)
}

fn span_range(block: &str, child: &str, from: usize, to: usize) -> Selection {
    Selection::new(
        Point::new(Path::child(block, child), from),
        Point::new(Path::child(block, child), to),
    )
}

#[test]
fn removing_decorated_content_invalidates_the_decoration() {
    let mut sync = mounted();
    let (decoration, calls) = recording(span_range("b2", "s2", 0, 7));
    sync.add_decoration(decoration);
    assert!(calls.borrow().is_empty());

    sync.tree_mut().remove_root(1).unwrap();
    sync.local_mutation(vec![], &[TreeOp::RemoveNode { path: vec![1] }], None, 0);

    assert_eq!(calls.borrow().as_slice(), &[None]);
    let decoration = sync.decorations().iter().next().unwrap();
    assert_eq!(decoration.selection(), None);
    assert!(!decoration.is_displayable());
}

#[test]
fn decorations_follow_text_inserted_before_them() {
    let mut sync = mounted();
    let (decoration, calls) = recording(span_range("b1", "s1", 6, 11));
    sync.add_decoration(decoration);

    sync.local_mutation(
        vec![],
        &[TreeOp::InsertText {
            path: vec![0, 0],
            offset: 0,
            text: "Oh ".to_string(),
        }],
        None,
        0,
    );

    let expected = span_range("b1", "s1", 9, 14);
    assert_eq!(calls.borrow().as_slice(), &[Some(expected.clone())]);
    let decoration = sync.decorations().iter().next().unwrap();
    assert_eq!(decoration.selection(), Some(&expected));
}

#[test]
fn untouched_decorations_stay_silent() {
    let mut sync = mounted();
    let (decoration, calls) = recording(span_range("b1", "s1", 0, 5));
    sync.add_decoration(decoration);

    // Text appended after the range does not move it.
    sync.local_mutation(
        vec![],
        &[TreeOp::InsertText {
            path: vec![0, 0],
            offset: 11,
            text: "!".to_string(),
        }],
        None,
        0,
    );
    assert!(calls.borrow().is_empty());
}

#[test]
fn decorations_shift_with_earlier_block_removal() {
    let mut sync = mounted();
    let (decoration, calls) = recording(span_range("b2", "s2", 0, 7));
    sync.add_decoration(decoration);

    sync.tree_mut().remove_root(0).unwrap();
    sync.local_mutation(vec![], &[TreeOp::RemoveNode { path: vec![0] }], None, 0);

    // Same keys, same offsets: the selection is unchanged even though the
    // underlying indices shifted, so the callback stays quiet.
    assert!(calls.borrow().is_empty());
    let decoration = sync.decorations().iter().next().unwrap();
    assert_eq!(decoration.selection(), Some(&span_range("b2", "s2", 0, 7)));
}

#[test]
fn decoration_over_missing_content_dies_on_resolve() {
    let mut sync = mounted();
    let (decoration, calls) = recording(span_range("gone", "s9", 0, 3));
    sync.add_decoration(decoration);
    assert_eq!(calls.borrow().as_slice(), &[None]);
    assert!(!sync.decorations().iter().next().unwrap().is_displayable());
}

#[test]
fn collapsed_decorations_display_only_at_leaf_level() {
    let leaf = RangeDecoration::new(Selection::collapsed(Point::new(Path::child("b1", "s1"), 3)));
    assert!(leaf.is_displayable());

    let block = RangeDecoration::new(Selection::collapsed(Point::new(Path::block("b1"), 0)));
    assert!(!block.is_displayable());

    let expanded = RangeDecoration::new(span_range("b1", "s1", 0, 4));
    assert!(expanded.is_displayable());
}
