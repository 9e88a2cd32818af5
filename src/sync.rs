//! The synchronization control loop.
//!
//! The [`Synchronizer`] owns the live tree and reconciles two change
//! sources: local edits (buffered as patches, flushed on a debounced
//! schedule) and external value updates (gated while local patches are
//! in flight, then validated, repaired, and converted). Everything runs
//! on one logical thread; asynchrony exists only as due times over an
//! explicit millisecond clock the host drives via [`Synchronizer::poll`],
//! so ordering and retry bounds are directly testable.
//!
//! Ordering guarantees: patches flush in the exact order they were
//! buffered, and a later external value is never applied ahead of an
//! earlier local patch that is still pending.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::convert::{tree_to_value, value_to_tree};
use crate::patch::{Patch, apply_all};
use crate::path::Selection;
use crate::schema::{KeyGenerator, SchemaInfo};
use crate::selection::{DecorationSet, RangeDecoration, RangeMove, move_by_operation, to_selection, to_tree_range};
use crate::tree::{EditorTree, KeyRegistry, TreeOp};
use crate::validate::{Resolution, Validation, validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Online,
    Offline,
}

/// Tagged events delivered to the host, in order, at most once each.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    /// The resolved value changed (or the document became empty, in
    /// which case `value` is `None`).
    Value { value: Option<Value> },
    /// One local patch was produced.
    Patch { patch: Patch },
    /// One flushed batch of local patches, for the external sink.
    Mutation {
        patches: Vec<Patch>,
        snapshot: Option<Value>,
    },
    Selection { selection: Option<Selection> },
    /// The external value failed validation; the resolution was applied
    /// internally before the value reached the tree.
    InvalidValue {
        resolution: Resolution,
        value: Option<Value>,
    },
    Ready,
    Connection { value: ConnectionState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    /// One or more unflushed local patches are buffered.
    LocalEditPending,
    /// An external value arrived while local patches were pending.
    ExternalSyncDeferred,
    Flushing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Quiet period coalescing bursts of edits into one flush.
    pub flush_debounce_ms: u64,
    /// Poll interval while a deferred external value waits for the
    /// pending buffer to drain.
    pub retry_interval_ms: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            flush_debounce_ms: 500,
            retry_interval_ms: 200,
        }
    }
}

// Safety valve only; each repair pass clears at least one defect, so the
// loop is bounded by the defect count of the incoming value.
const MAX_REPAIR_PASSES: usize = 1000;

pub struct Synchronizer {
    schema: SchemaInfo,
    keygen: Box<dyn KeyGenerator>,
    options: SyncOptions,
    tree: EditorTree,
    registry: KeyRegistry,
    state: SyncState,
    pending: Vec<Patch>,
    snapshot: Option<Value>,
    flush_due: Option<u64>,
    retry_due: Option<u64>,
    deferred: Option<Option<Value>>,
    selection: Option<Selection>,
    /// Tree-range shadow of `selection`, transformed across operations
    /// rather than re-resolved, so index shifts are applied exactly once.
    selection_range: Option<crate::selection::TreeRange>,
    decorations: DecorationSet,
    events: VecDeque<EditorEvent>,
    ready: bool,
    was_empty: bool,
}

impl Synchronizer {
    pub fn new(
        schema: SchemaInfo,
        keygen: impl KeyGenerator + 'static,
        options: SyncOptions,
    ) -> Self {
        Self {
            schema,
            keygen: Box::new(keygen),
            options,
            tree: EditorTree::new(),
            registry: KeyRegistry::new(),
            state: SyncState::Idle,
            pending: Vec::new(),
            snapshot: None,
            flush_due: None,
            retry_due: None,
            deferred: None,
            selection: None,
            selection_range: None,
            decorations: DecorationSet::new(),
            events: VecDeque::new(),
            ready: false,
            was_empty: true,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn tree(&self) -> &EditorTree {
        &self.tree
    }

    /// The editing layer mutates the tree directly through this handle,
    /// then reports what it did via [`Synchronizer::local_mutation`].
    pub fn tree_mut(&mut self) -> &mut EditorTree {
        &mut self.tree
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn decorations(&self) -> &DecorationSet {
        &self.decorations
    }

    pub fn add_decoration(&mut self, decoration: RangeDecoration) {
        self.decorations.push(decoration);
        self.decorations.resolve(&self.tree);
    }

    /// Current value as seen through the tree, or `None` when empty.
    pub fn value(&self) -> Option<Value> {
        if self.tree.block_count() == 0 {
            None
        } else {
            Some(tree_to_value(&self.tree))
        }
    }

    pub fn pending_patches(&self) -> usize {
        self.pending.len()
    }

    /// Earliest due time of any scheduled work, for hosts integrating
    /// with their own event loop.
    pub fn next_wakeup(&self) -> Option<u64> {
        match (self.flush_due, self.retry_due) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Drains the ordered event queue.
    pub fn take_events(&mut self) -> Vec<EditorEvent> {
        self.events.drain(..).collect()
    }

    fn emit(&mut self, event: EditorEvent) {
        self.events.push_back(event);
    }

    /// Supplies the initial external value and reports readiness.
    pub fn mount(&mut self, value: Option<Value>, _now_ms: u64) {
        self.apply_external(value);
        if !self.ready {
            self.ready = true;
            self.emit(EditorEvent::Ready);
        }
    }

    /// Consumes one local edit: the patches the editing layer diffed out
    /// of its tree mutation, and the low-level operations it performed.
    /// Selection and decorations are transformed synchronously, within
    /// this call, against the already-mutated tree.
    pub fn local_mutation(
        &mut self,
        patches: Vec<Patch>,
        ops: &[TreeOp],
        snapshot: Option<Value>,
        now_ms: u64,
    ) {
        for op in ops {
            self.transform_selection(op);
            self.decorations.apply_operation(&self.tree, op);
        }
        for patch in patches {
            self.emit(EditorEvent::Patch {
                patch: patch.clone(),
            });
            self.pending.push(patch);
        }
        self.snapshot = snapshot;
        if !self.pending.is_empty() {
            if self.state == SyncState::Idle {
                self.set_state(SyncState::LocalEditPending);
            }
            // Debounce: every edit pushes the flush out again.
            self.flush_due = Some(now_ms + self.options.flush_debounce_ms);
        }
        self.signal_if_empty();
    }

    /// A new external value arrived. While local patches are pending it
    /// is deferred and retried on a fixed interval until the buffer
    /// drains, so in-flight edits are never clobbered.
    pub fn set_external_value(&mut self, value: Option<Value>, now_ms: u64) {
        if self.pending.is_empty() {
            self.apply_external(value);
            return;
        }
        debug!(
            target: "pt_sync::sync",
            pending = self.pending.len(),
            "deferring external value until local patches drain"
        );
        self.deferred = Some(value);
        self.retry_due = Some(now_ms + self.options.retry_interval_ms);
        self.set_state(SyncState::ExternalSyncDeferred);
    }

    /// Runs any scheduled work that has come due.
    pub fn poll(&mut self, now_ms: u64) {
        if let Some(due) = self.flush_due
            && now_ms >= due
        {
            if self.tree.is_settled() {
                self.flush();
            } else {
                // Never flush a partial transform; retry after another
                // quiet period.
                debug!(target: "pt_sync::sync", "tree mid-transform, re-arming flush");
                self.flush_due = Some(now_ms + self.options.flush_debounce_ms);
            }
        }
        if let Some(due) = self.retry_due
            && now_ms >= due
        {
            if self.pending.is_empty() {
                self.retry_due = None;
                if let Some(value) = self.deferred.take() {
                    self.apply_external(value);
                }
                if self.state == SyncState::ExternalSyncDeferred {
                    self.set_state(SyncState::Idle);
                }
            } else {
                self.retry_due = Some(now_ms + self.options.retry_interval_ms);
            }
        }
    }

    /// Host-driven selection updates. An identical selection is not
    /// re-emitted, preserving object identity downstream.
    pub fn set_selection(&mut self, selection: Option<Selection>) {
        if self.selection == selection {
            return;
        }
        self.selection_range = selection
            .as_ref()
            .and_then(|selection| to_tree_range(selection, &self.tree));
        self.selection = selection.clone();
        self.emit(EditorEvent::Selection { selection });
    }

    pub fn set_connection(&mut self, value: ConnectionState) {
        self.emit(EditorEvent::Connection { value });
    }

    /// Cancels all scheduled work and performs one final synchronous
    /// flush of anything still buffered.
    pub fn teardown(&mut self) {
        self.flush_due = None;
        self.retry_due = None;
        self.deferred = None;
        if !self.pending.is_empty() {
            self.flush();
        }
        self.registry.clear();
        self.set_state(SyncState::Idle);
    }

    fn flush(&mut self) {
        self.set_state(SyncState::Flushing);
        let patches = std::mem::take(&mut self.pending);
        debug!(target: "pt_sync::sync", count = patches.len(), "flushing patch batch");
        self.emit(EditorEvent::Mutation {
            patches,
            snapshot: self.snapshot.clone(),
        });
        self.flush_due = None;
        let next = if self.deferred.is_some() {
            SyncState::ExternalSyncDeferred
        } else {
            SyncState::Idle
        };
        self.set_state(next);
    }

    /// Validate-and-repair until the value is structurally sound, then
    /// reconcile the tree with it. Skips entirely when the incoming
    /// value is structurally identical to what the tree already holds.
    fn apply_external(&mut self, value: Option<Value>) {
        let resolved = self.resolve_value(value);
        if resolved == self.value() {
            debug!(target: "pt_sync::sync", "external value identical, skipping sync");
            return;
        }

        match resolved.as_ref() {
            Some(value) => {
                let conversion =
                    value_to_tree(value, &self.schema, &mut self.tree, &mut self.registry);
                for diagnostic in &conversion.diagnostics {
                    warn!(target: "pt_sync::sync", "{diagnostic}");
                }
                self.tree.set_roots(conversion.roots);
            }
            None => {
                // No conversion pass runs for an absent document, so the
                // arena and registry are emptied here instead.
                self.tree.clear();
                self.registry.clear();
            }
        }
        self.was_empty = self.tree.block_count() == 0;
        self.emit(EditorEvent::Value { value: resolved });
        self.restore_selection();
        self.decorations.resolve(&self.tree);
    }

    fn resolve_value(&mut self, mut value: Option<Value>) -> Option<Value> {
        for _ in 0..MAX_REPAIR_PASSES {
            let validation = validate(value.as_ref(), &self.schema, self.keygen.as_mut());
            let Some(resolution) = validation.into_resolution() else {
                return value;
            };
            self.emit(EditorEvent::InvalidValue {
                resolution: resolution.clone(),
                value: value.clone(),
            });
            match apply_all(value.take(), &resolution.patches) {
                Ok(repaired) => value = repaired,
                Err(error) => {
                    warn!(target: "pt_sync::sync", %error, "repair patch failed to apply");
                    return None;
                }
            }
        }
        warn!(target: "pt_sync::sync", "value did not stabilize after repair passes");
        None
    }

    /// Re-resolve the stored selection after a value sync. If it still
    /// resolves to the same place nothing is emitted.
    fn restore_selection(&mut self) {
        let Some(current) = self.selection.clone() else {
            self.selection_range = None;
            return;
        };
        let range = to_tree_range(&current, &self.tree);
        let restored = range
            .as_ref()
            .and_then(|range| to_selection(range, &self.tree));
        self.selection_range = range;
        if restored == self.selection {
            return;
        }
        self.selection = restored.clone();
        self.emit(EditorEvent::Selection {
            selection: restored,
        });
    }

    fn transform_selection(&mut self, op: &TreeOp) {
        if self.selection.is_none() {
            return;
        }
        let Some(range) = self.selection_range.as_ref() else {
            // Selected content was already gone before this operation.
            self.selection = None;
            self.emit(EditorEvent::Selection { selection: None });
            return;
        };
        match move_by_operation(range, op) {
            RangeMove::Unaffected => {}
            RangeMove::Invalid => {
                self.selection = None;
                self.selection_range = None;
                self.emit(EditorEvent::Selection { selection: None });
            }
            RangeMove::Moved(moved) => {
                let updated = to_selection(&moved, &self.tree);
                self.selection_range = Some(moved);
                if updated != self.selection {
                    self.selection = updated.clone();
                    self.emit(EditorEvent::Selection { selection: updated });
                }
            }
        }
    }

    /// The "document became empty" signal: the editing layer answers it
    /// by inserting the placeholder block.
    fn signal_if_empty(&mut self) {
        let empty = self.tree.block_count() == 0;
        if empty && !self.was_empty {
            self.emit(EditorEvent::Value { value: None });
        }
        self.was_empty = empty;
    }

    fn set_state(&mut self, state: SyncState) {
        if self.state != state {
            debug!(target: "pt_sync::sync", from = ?self.state, to = ?state, "state transition");
            self.state = state;
        }
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("blocks", &self.tree.block_count())
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}
