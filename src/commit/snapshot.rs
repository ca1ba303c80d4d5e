//! Snapshots
//!
//! A snapshot is the set of live data objects (and their index objects) at
//! one journal position. Replaying actions is strict: adding a present id
//! or deleting an absent one is an error.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{LakeError, Result};
use crate::index::IndexRef;
use crate::segment::SegmentRef;
use crate::span::Span;
use crate::uid::Uid;

use super::actions::Action;

/// Read access shared by snapshots and patches
pub trait View {
    fn lookup(&self, id: Uid) -> Option<SegmentRef>;

    fn exists(&self, id: Uid) -> bool {
        self.lookup(id).is_some()
    }

    /// Objects overlapping `span` (`None` selects everything), ordered by id
    fn select(&self, span: Option<&Span>) -> Vec<SegmentRef>;

    fn select_all(&self) -> Vec<SegmentRef> {
        self.select(None)
    }

    /// Index objects attached to `id`
    fn indexes(&self, id: Uid) -> Vec<IndexRef>;
}

/// State that actions can be replayed into
pub trait Playable {
    fn play(&mut self, action: &Action) -> Result<()>;
}

/// Immutable-once-built set of live objects
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    segments: HashMap<Uid, SegmentRef>,
    indexes: HashMap<Uid, Vec<IndexRef>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &Uid> {
        self.segments.keys()
    }

    pub fn add_segment(&mut self, seg: SegmentRef) -> Result<()> {
        if self.segments.contains_key(&seg.id) {
            return Err(LakeError::SegmentExists(seg.id));
        }
        self.segments.insert(seg.id, seg);
        Ok(())
    }

    pub fn delete_segment(&mut self, id: Uid) -> Result<SegmentRef> {
        self.indexes.remove(&id);
        self.segments
            .remove(&id)
            .ok_or(LakeError::SegmentNotFound(id))
    }

    /// Attach an index object; returns false if its segment is not here
    pub fn add_index(&mut self, index: IndexRef) -> bool {
        if !self.segments.contains_key(&index.segment_id) {
            return false;
        }
        self.attach_index(index);
        true
    }

    /// Attach without checking segment membership
    pub(crate) fn attach_index(&mut self, index: IndexRef) {
        let list = self.indexes.entry(index.segment_id).or_default();
        if !list.iter().any(|r| r.rule_id == index.rule_id) {
            list.push(index);
        }
    }

    pub(crate) fn take_indexes(&mut self, id: Uid) -> Vec<IndexRef> {
        self.indexes.remove(&id).unwrap_or_default()
    }

    pub(crate) fn all_indexes(&self) -> impl Iterator<Item = &IndexRef> {
        self.indexes.values().flatten()
    }
}

impl View for Snapshot {
    fn lookup(&self, id: Uid) -> Option<SegmentRef> {
        self.segments.get(&id).cloned()
    }

    fn exists(&self, id: Uid) -> bool {
        self.segments.contains_key(&id)
    }

    fn select(&self, span: Option<&Span>) -> Vec<SegmentRef> {
        let mut out: Vec<SegmentRef> = self
            .segments
            .values()
            .filter(|seg| span.map_or(true, |s| s.overlaps(&seg.span())))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    fn indexes(&self, id: Uid) -> Vec<IndexRef> {
        self.indexes.get(&id).cloned().unwrap_or_default()
    }
}

impl Playable for Snapshot {
    fn play(&mut self, action: &Action) -> Result<()> {
        match action {
            Action::Add { segment, .. } => self.add_segment(segment.clone()),
            Action::Delete { id, .. } => self.delete_segment(*id).map(|_| ()),
            Action::AddIndex { index, .. } => {
                if !self.add_index(index.clone()) {
                    warn!(
                        segment = %index.segment_id,
                        rule = %index.rule_id,
                        "index for missing data object ignored"
                    );
                }
                Ok(())
            }
            Action::CommitMessage { .. } => Ok(()),
        }
    }
}
