//! pt-sync: bidirectional synchronization between Portable Text and an
//! editable tree model.
//!
//! This crate is the translation, validation, and change-propagation
//! layer backing an interactive rich-text editor with a remote,
//! patch-based persistence protocol. It keeps two representations of one
//! document consistent under concurrent local edits and remote updates:
//!
//! - **Value model** - the flat, serializable array of keyed blocks
//! - **Editable tree** - an arena-backed, position-addressed structure
//!   for cursor-driven editing
//! - **Validator** - structural self-healing via corrective patches
//! - **Patch model** - Set/Unset/Insert/Diff operations over key paths
//! - **Selection mapper** - key-path ⇄ tree-range conversion and range
//!   tracking across mutations
//! - **Synchronizer** - the debounced/gated control loop between local
//!   edits and external value updates
//!
//! Rendering, keyboard handling, clipboard, and the tree-editing
//! primitives themselves are external collaborators; they reach the core
//! through the change-event stream, the converters, the validator, and
//! the selection mapper.
//!
//! # Quick Start
//!
//! ```rust
//! use pt_sync::{RandomKeys, SchemaInfo, SyncOptions, Synchronizer};
//! use serde_json::json;
//!
//! let schema = SchemaInfo::default();
//! let mut sync = Synchronizer::new(schema, RandomKeys, SyncOptions::default());
//! sync.mount(
//!     Some(json!([{
//!         "_key": "b1",
//!         "_type": "block",
//!         "style": "normal",
//!         "markDefs": [],
//!         "children": [{"_key": "s1", "_type": "span", "text": "Hello", "marks": []}],
//!     }])),
//!     0,
//! );
//! assert!(sync.value().is_some());
//! ```

// Value ⇄ tree conversion
pub mod convert;

// The patch algebra and its application
pub mod patch;

// Key paths, points, selections
pub mod path;

// Schema contract and key generation
pub mod schema;

// Selection mapping and range decorations
pub mod selection;

// The synchronization control loop
pub mod sync;

// The arena-backed editable tree
pub mod tree;

// Structural validation and self-healing
pub mod validate;

// The Portable Text value model
pub mod value;

// Re-export conversion entry points
pub use convert::{Conversion, tree_to_value, value_to_tree};

// Re-export patch types
pub use patch::{InsertPosition, Patch, PatchError, TextSplice, apply, apply_all, diff_text};

// Re-export addressing types
pub use path::{KeyedSegment, Path, Point, Segment, Selection};

// Re-export schema types
pub use schema::{GENERIC_BLOCK_TYPE, KeyGenerator, RandomKeys, SPAN_TYPE, SchemaInfo};

// Re-export selection mapping types
pub use selection::{
    DecorationSet, PointMove, RangeDecoration, RangeMove, TreePoint, TreeRange, is_overlapping,
    move_by_operation, to_selection, to_tree_range, transform_point,
};

// Re-export synchronizer types
pub use sync::{ConnectionState, EditorEvent, SyncOptions, SyncState, Synchronizer};

// Re-export tree types
pub use tree::{EditorTree, KeyRegistry, Node, NodeId, NodeKind, TreeError, TreeOp};

// Re-export validation types
pub use validate::{Resolution, Validation, validate};

// Re-export value model types
pub use value::{
    Block, Child, DEFAULT_STYLE, MarkDef, ObjectNode, Span, TextBlock, empty_span, key_of, type_of,
};
