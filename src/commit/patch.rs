//! Patches
//!
//! A [`Patch`] layers changes over a shared base snapshot without copying
//! it. Branches use one to replay their own log over the parent's state.

use std::sync::Arc;

use crate::error::{LakeError, Result};
use crate::index::IndexRef;
use crate::segment::SegmentRef;
use crate::span::Span;
use crate::uid::Uid;

use super::actions::{Action, Transaction};
use super::snapshot::{Playable, Snapshot, View};

/// Base snapshot plus a diff
#[derive(Debug, Clone)]
pub struct Patch {
    base: Arc<Snapshot>,
    diff: Snapshot,
    /// Base objects deleted through this patch
    deleted: Vec<Uid>,
}

impl Patch {
    pub fn new(base: Arc<Snapshot>) -> Self {
        Self {
            base,
            diff: Snapshot::new(),
            deleted: Vec::new(),
        }
    }

    pub fn base(&self) -> &Arc<Snapshot> {
        &self.base
    }

    pub fn diff(&self) -> &Snapshot {
        &self.diff
    }

    /// Base objects deleted through this patch
    pub fn deleted(&self) -> &[Uid] {
        &self.deleted
    }

    fn in_base(&self, id: Uid) -> bool {
        self.base.exists(id) && !self.deleted.contains(&id)
    }

    pub fn add_segment(&mut self, seg: SegmentRef) -> Result<()> {
        if self.in_base(seg.id) {
            return Err(LakeError::SegmentExists(seg.id));
        }
        self.diff.add_segment(seg)
    }

    pub fn delete_segment(&mut self, id: Uid) -> Result<()> {
        if self.diff.exists(id) {
            return self.diff.delete_segment(id).map(|_| ());
        }
        if self.in_base(id) {
            self.deleted.push(id);
            self.diff.take_indexes(id);
            return Ok(());
        }
        Err(LakeError::SegmentNotFound(id))
    }

    pub fn add_index(&mut self, index: IndexRef) -> bool {
        if !self.diff.exists(index.segment_id) && !self.in_base(index.segment_id) {
            return false;
        }
        self.diff.attach_index(index);
        true
    }

    /// Whether the patch changes anything relative to its base
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty() && self.deleted.is_empty() && self.diff.all_indexes().next().is_none()
    }

    /// The diff as a transaction under a fresh commit id
    ///
    /// Emits deletes of base objects, then adds for the diff (by id), then
    /// index attachments.
    pub fn new_transaction(&self) -> Transaction {
        let mut txn = Transaction::new(Uid::new());
        for id in &self.deleted {
            txn.append_delete(*id);
        }
        for seg in self.diff.select_all() {
            txn.append_add(seg);
        }
        let mut indexes: Vec<&IndexRef> = self.diff.all_indexes().collect();
        indexes.sort_by(|a, b| (a.segment_id, a.rule_id).cmp(&(b.segment_id, b.rule_id)));
        for index in indexes {
            txn.append_add_index(index.clone());
        }
        txn
    }

    /// Materialize the patched view
    pub fn to_snapshot(&self) -> Snapshot {
        let mut snap = (*self.base).clone();
        for id in &self.deleted {
            let _ = snap.delete_segment(*id);
        }
        for seg in self.diff.select_all() {
            // Diff ids never collide with live base ids
            let _ = snap.add_segment(seg);
        }
        for index in self.diff.all_indexes() {
            if snap.exists(index.segment_id) {
                snap.attach_index(index.clone());
            }
        }
        snap
    }
}

impl View for Patch {
    fn lookup(&self, id: Uid) -> Option<SegmentRef> {
        self.diff.lookup(id).or_else(|| {
            if self.deleted.contains(&id) {
                None
            } else {
                self.base.lookup(id)
            }
        })
    }

    fn select(&self, span: Option<&Span>) -> Vec<SegmentRef> {
        let mut out: Vec<SegmentRef> = self
            .base
            .select(span)
            .into_iter()
            .filter(|seg| !self.deleted.contains(&seg.id))
            .chain(self.diff.select(span))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    fn indexes(&self, id: Uid) -> Vec<IndexRef> {
        let mut out = if self.in_base(id) {
            self.base.indexes(id)
        } else {
            Vec::new()
        };
        for index in self.diff.indexes(id) {
            if !out.iter().any(|r| r.rule_id == index.rule_id) {
                out.push(index);
            }
        }
        out
    }
}

impl Playable for Patch {
    fn play(&mut self, action: &Action) -> Result<()> {
        match action {
            Action::Add { segment, .. } => self.add_segment(segment.clone()),
            Action::Delete { id, .. } => self.delete_segment(*id),
            Action::AddIndex { index, .. } => {
                if !self.add_index(index.clone()) {
                    tracing::warn!(
                        segment = %index.segment_id,
                        "index for missing data object ignored"
                    );
                }
                Ok(())
            }
            Action::CommitMessage { .. } => Ok(()),
        }
    }
}
