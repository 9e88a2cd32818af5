//! Key-based addressing into a Portable Text value.
//!
//! A [`Path`] is an ordered sequence of [`Segment`]s (`{"_key": …}`
//! selectors, property names, and plain indices) and stays valid under
//! insertion, deletion, and reordering elsewhere in the document. All
//! externally visible addressing (selections, patch targets, range
//! decoration anchors) uses key paths; zero-based tree index paths never
//! cross the core boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a [`Path`].
///
/// On the wire a segment is a JSON number (index), a JSON string
/// (property name), or a `{"_key": …}` object (keyed selector), so the
/// enum deserializes untagged in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Index(usize),
    Property(String),
    Key(KeyedSegment),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedSegment {
    #[serde(rename = "_key")]
    pub key: String,
}

impl Segment {
    pub fn key(key: impl Into<String>) -> Self {
        Segment::Key(KeyedSegment { key: key.into() })
    }

    pub fn property(name: impl Into<String>) -> Self {
        Segment::Property(name.into())
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            Segment::Key(keyed) => Some(&keyed.key),
            _ => None,
        }
    }

    pub fn as_property(&self) -> Option<&str> {
        match self {
            Segment::Property(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(index) => Some(*index),
            _ => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Index(index) => write!(f, "[{index}]"),
            Segment::Property(name) => write!(f, "{name}"),
            Segment::Key(keyed) => write!(f, "[_key==\"{}\"]", keyed.key),
        }
    }
}

/// A key path: stable address of one node inside the document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Path(pub Vec<Segment>);

impl Path {
    pub fn new() -> Self {
        Path(Vec::new())
    }

    /// Path of a top-level block: `[{_key}]`.
    pub fn block(key: impl Into<String>) -> Self {
        Path(vec![Segment::key(key)])
    }

    /// Path of a child inside a text block: `[{_key}, "children", {_key}]`.
    pub fn child(block_key: impl Into<String>, child_key: impl Into<String>) -> Self {
        Path(vec![
            Segment::key(block_key),
            Segment::property("children"),
            Segment::key(child_key),
        ])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.0.get(index)
    }

    pub fn first(&self) -> Option<&Segment> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.0.iter()
    }

    pub fn push(&mut self, segment: Segment) {
        self.0.push(segment);
    }

    /// Returns `self` extended with one more segment.
    pub fn join(&self, segment: Segment) -> Self {
        let mut path = self.clone();
        path.push(segment);
        path
    }

    /// Everything but the last segment, plus the last segment itself.
    pub fn split_last(&self) -> Option<(&[Segment], &Segment)> {
        self.0.split_last().map(|(last, init)| (init, last))
    }

    /// True when this path addresses a child of a text block (a leaf),
    /// as opposed to an intermediate block-level path.
    pub fn is_leaf(&self) -> bool {
        self.len() >= 3 && self.get(1).and_then(Segment::as_property) == Some("children")
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Path(segments)
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, segment) in self.0.iter().enumerate() {
            if position > 0 && matches!(segment, Segment::Property(_)) {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// One end of a selection: a key path plus a character offset within the
/// addressed node's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub path: Path,
    pub offset: usize,
}

impl Point {
    pub fn new(path: Path, offset: usize) -> Self {
        Self { path, offset }
    }
}

/// A key-path addressed selection.
///
/// `backward` records that the focus precedes the anchor in document
/// order; anchor and focus themselves are stored as the user produced
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Point,
    pub focus: Point,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub backward: bool,
}

impl Selection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self {
            anchor,
            focus,
            backward: false,
        }
    }

    /// A selection whose anchor and focus coincide.
    pub fn collapsed(point: Point) -> Self {
        Self {
            anchor: point.clone(),
            focus: point,
            backward: false,
        }
    }

    /// A selection is collapsed iff anchor equals focus exactly.
    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }
}
