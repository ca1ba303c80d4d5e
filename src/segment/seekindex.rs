//! Seek index
//!
//! Maps sampled keys to row-file offsets so a range read can skip the parts
//! of an object that cannot hold matching records.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::codec::decode_all;
use crate::record::{Order, Value};
use crate::span::Span;
use crate::storage::{Engine, Uri};

/// Key of the record starting at `offset`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekEntry {
    pub key: Value,
    pub offset: u64,
}

/// Sparse key → offset map, entries in pool order
#[derive(Debug, Clone, Default)]
pub struct SeekIndex {
    entries: Vec<SeekEntry>,
}

impl SeekIndex {
    pub fn new(entries: Vec<SeekEntry>) -> Self {
        Self { entries }
    }

    pub fn read(engine: &dyn Engine, uri: &Uri) -> Result<Self> {
        let bytes = engine.get_bytes(uri)?;
        Ok(Self {
            entries: decode_all(&bytes)?,
        })
    }

    pub fn entries(&self) -> &[SeekEntry] {
        &self.entries
    }

    /// Byte range `[start, end)` of the row file that holds every record in
    /// `span`; `end = None` means the end of the file
    ///
    /// Equal keys may straddle an entry, so the start is the last entry
    /// strictly before the span and the end the first entry strictly after.
    pub fn range(&self, span: &Span, order: Order) -> (u64, Option<u64>) {
        let first = span.first(order);
        let last = span.last(order);

        let start = self
            .entries
            .iter()
            .take_while(|e| order.apply(e.key.cmp(first)) == Ordering::Less)
            .last()
            .map(|e| e.offset)
            .unwrap_or(0);

        let end = self
            .entries
            .iter()
            .find(|e| order.apply(e.key.cmp(last)) == Ordering::Greater)
            .map(|e| e.offset);

        (start, end)
    }
}
