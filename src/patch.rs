//! The patch algebra.
//!
//! Patches are the only externally persisted representation of a change:
//! `Set`/`Unset`/`Insert` operations addressed by key path, plus `Diff`,
//! a splice-shaped text diff for span text edits. Application against a
//! raw JSON value lives here too: the validator's repair cycle and the
//! deferred-sync path both need it, and hosts mirror repairs with it.
//!
//! Patches along disjoint paths commute; patches targeting overlapping
//! paths must be applied in emission order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

use crate::path::{Path, Segment};
use crate::value::key_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertPosition {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Patch {
    Set {
        path: Path,
        value: Value,
    },
    Unset {
        path: Path,
    },
    Insert {
        path: Path,
        position: InsertPosition,
        items: Vec<Value>,
    },
    /// Single contiguous splice of a span's text: delete `delete` chars at
    /// `offset`, then insert `insert` there.
    Diff {
        path: Path,
        offset: usize,
        delete: usize,
        insert: String,
    },
}

impl Patch {
    pub fn path(&self) -> &Path {
        match self {
            Patch::Set { path, .. }
            | Patch::Unset { path }
            | Patch::Insert { path, .. }
            | Patch::Diff { path, .. } => path,
        }
    }

    /// Builds a `Diff` patch describing the edit from `old` to `new`, or
    /// `None` when the texts are equal.
    pub fn diff(path: Path, old: &str, new: &str) -> Option<Self> {
        diff_text(old, new).map(|splice| Patch::Diff {
            path,
            offset: splice.offset,
            delete: splice.delete,
            insert: splice.insert,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("path {path} does not resolve against the value")]
    UnresolvedPath { path: String },
    #[error("path {path} descends into a non-container value")]
    NotAContainer { path: String },
    #[error("diff patch at {path} targets a non-string value")]
    NotText { path: String },
    #[error("diff splice at offset {offset} is out of bounds (text length {len})")]
    SpliceOutOfBounds { offset: usize, len: usize },
}

fn unresolved(segments: &[Segment]) -> PatchError {
    PatchError::UnresolvedPath {
        path: Path(segments.to_vec()).to_string(),
    }
}

fn not_a_container(segments: &[Segment]) -> PatchError {
    PatchError::NotAContainer {
        path: Path(segments.to_vec()).to_string(),
    }
}

/// Walks `segments` down from `root`, returning the addressed node.
fn locate_mut<'a>(root: &'a mut Value, segments: &[Segment]) -> Result<&'a mut Value, PatchError> {
    let mut current = root;
    for (depth, segment) in segments.iter().enumerate() {
        let here = &segments[..=depth];
        current = match segment {
            Segment::Key(keyed) => {
                let items = current.as_array_mut().ok_or_else(|| not_a_container(here))?;
                items
                    .iter_mut()
                    .find(|item| key_of(item) == Some(keyed.key.as_str()))
                    .ok_or_else(|| unresolved(here))?
            }
            Segment::Index(index) => {
                let items = current.as_array_mut().ok_or_else(|| not_a_container(here))?;
                items.get_mut(*index).ok_or_else(|| unresolved(here))?
            }
            Segment::Property(name) => {
                let object = current.as_object_mut().ok_or_else(|| not_a_container(here))?;
                object.get_mut(name).ok_or_else(|| unresolved(here))?
            }
        };
    }
    Ok(current)
}

/// Applies one patch, returning the new value. `None` models an absent
/// (undefined) document; a whole-value `Unset` produces it.
pub fn apply(value: Option<Value>, patch: &Patch) -> Result<Option<Value>, PatchError> {
    // Whole-value patches do not need an existing document.
    match patch {
        Patch::Set { path, value: new } if path.is_empty() => return Ok(Some(new.clone())),
        Patch::Unset { path } if path.is_empty() => return Ok(None),
        _ => {}
    }

    let mut root = value.ok_or_else(|| unresolved(&patch.path().0))?;
    match patch {
        Patch::Set { path, value: new } => {
            let Some((init, last)) = path.split_last() else {
                unreachable!("empty set handled above");
            };
            match last {
                Segment::Property(name) => {
                    let parent = locate_mut(&mut root, init)?;
                    let object = parent.as_object_mut().ok_or_else(|| not_a_container(init))?;
                    object.insert(name.clone(), new.clone());
                }
                Segment::Key(keyed) => {
                    let parent = locate_mut(&mut root, init)?;
                    let items = parent.as_array_mut().ok_or_else(|| not_a_container(init))?;
                    let slot = items
                        .iter_mut()
                        .find(|item| key_of(item) == Some(keyed.key.as_str()))
                        .ok_or_else(|| unresolved(&path.0))?;
                    *slot = new.clone();
                }
                Segment::Index(index) => {
                    let parent = locate_mut(&mut root, init)?;
                    let items = parent.as_array_mut().ok_or_else(|| not_a_container(init))?;
                    let slot = items.get_mut(*index).ok_or_else(|| unresolved(&path.0))?;
                    *slot = new.clone();
                }
            }
        }
        Patch::Unset { path } => {
            let Some((init, last)) = path.split_last() else {
                unreachable!("empty unset handled above");
            };
            // Unsetting something already gone is a no-op.
            match last {
                Segment::Property(name) => {
                    let parent = locate_mut(&mut root, init)?;
                    if let Some(object) = parent.as_object_mut() {
                        object.remove(name);
                    }
                }
                Segment::Key(keyed) => {
                    let parent = locate_mut(&mut root, init)?;
                    if let Some(items) = parent.as_array_mut() {
                        items.retain(|item| key_of(item) != Some(keyed.key.as_str()));
                    }
                }
                Segment::Index(index) => {
                    let parent = locate_mut(&mut root, init)?;
                    if let Some(items) = parent.as_array_mut()
                        && *index < items.len()
                    {
                        items.remove(*index);
                    }
                }
            }
        }
        Patch::Insert {
            path,
            position,
            items: new_items,
        } => {
            let Some((init, last)) = path.split_last() else {
                return Err(unresolved(&path.0));
            };
            let parent = locate_mut(&mut root, init)?;
            let items = parent.as_array_mut().ok_or_else(|| not_a_container(init))?;
            let at = if items.is_empty() {
                0
            } else {
                let reference = match last {
                    Segment::Key(keyed) => items
                        .iter()
                        .position(|item| key_of(item) == Some(keyed.key.as_str()))
                        .ok_or_else(|| unresolved(&path.0))?,
                    Segment::Index(index) => (*index).min(items.len() - 1),
                    Segment::Property(_) => return Err(unresolved(&path.0)),
                };
                match position {
                    InsertPosition::Before => reference,
                    InsertPosition::After => reference + 1,
                }
            };
            items.splice(at..at, new_items.iter().cloned());
        }
        Patch::Diff {
            path,
            offset,
            delete,
            insert,
        } => {
            let target = locate_mut(&mut root, &path.0)?;
            let Some(text) = target.as_str() else {
                return Err(PatchError::NotText {
                    path: path.to_string(),
                });
            };
            let spliced = splice_chars(text, *offset, *delete, insert)?;
            *target = Value::String(spliced);
        }
    }
    Ok(Some(root))
}

/// Applies patches in order; overlapping paths rely on emission order.
pub fn apply_all(
    mut value: Option<Value>,
    patches: &[Patch],
) -> Result<Option<Value>, PatchError> {
    for patch in patches {
        value = apply(value, patch)?;
    }
    Ok(value)
}

fn splice_chars(
    text: &str,
    offset: usize,
    delete: usize,
    insert: &str,
) -> Result<String, PatchError> {
    let len = text.chars().count();
    if offset + delete > len {
        return Err(PatchError::SpliceOutOfBounds { offset, len });
    }
    let start = char_to_byte(text, offset);
    let end = char_to_byte(text, offset + delete);
    let mut out = String::with_capacity(text.len() + insert.len());
    out.push_str(&text[..start]);
    out.push_str(insert);
    out.push_str(&text[end..]);
    Ok(out)
}

fn char_to_byte(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}

/// A single contiguous text edit, offsets counted in chars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSplice {
    pub offset: usize,
    pub delete: usize,
    pub insert: String,
}

/// Computes the minimal single splice turning `old` into `new` by
/// trimming the common prefix and suffix on grapheme boundaries, so a
/// combining sequence is never cut in half. Returns `None` for equal
/// texts.
pub fn diff_text(old: &str, new: &str) -> Option<TextSplice> {
    if old == new {
        return None;
    }
    let old_graphemes: Vec<&str> = old.graphemes(true).collect();
    let new_graphemes: Vec<&str> = new.graphemes(true).collect();
    let max_common = old_graphemes.len().min(new_graphemes.len());

    let mut prefix = 0;
    while prefix < max_common && old_graphemes[prefix] == new_graphemes[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < max_common - prefix
        && old_graphemes[old_graphemes.len() - 1 - suffix]
            == new_graphemes[new_graphemes.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let offset = old_graphemes[..prefix]
        .iter()
        .map(|g| g.chars().count())
        .sum();
    let delete = old_graphemes[prefix..old_graphemes.len() - suffix]
        .iter()
        .map(|g| g.chars().count())
        .sum();
    let insert = new_graphemes[prefix..new_graphemes.len() - suffix].concat();
    Some(TextSplice {
        offset,
        delete,
        insert,
    })
}
