//! Sorted scanner
//!
//! Merges the data objects of one partition into a single stream in pool
//! order. Each object is read through its seek index against the
//! partition's clipped span; a k-way heap does the merge.
//!
//! Equal keys come out ordered by (object id, record index), so repeated
//! scans of the same snapshot produce the same sequence.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::Context;
use crate::error::{LakeError, Result};
use crate::record::{Layout, Order, Record, Value};
use crate::segment::SegmentReader;
use crate::span::Span;
use crate::storage::{EngineRef, Uri};
use crate::uid::Uid;

use super::partition::Partition;

/// Caller-supplied predicate; records it rejects are dropped
pub type RecordFilter = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Progress shared by every scanner of one scan
#[derive(Debug, Default)]
pub struct ScanStats {
    records_read: AtomicU64,
    bytes_read: AtomicU64,
}

impl ScanStats {
    pub fn records_read(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }
}

struct Source {
    reader: SegmentReader,
    seg_id: Uid,
    /// Drop records outside the partition span
    range_filter: bool,
    next_index: u64,
    bytes_seen: u64,
}

struct HeapItem {
    keys: Vec<Value>,
    order: Order,
    seg_id: Uid,
    index: u64,
    source: usize,
    rec: Record,
}

impl HeapItem {
    fn scan_order(&self, other: &Self) -> CmpOrdering {
        self.order
            .apply(self.keys.cmp(&other.keys))
            .then_with(|| self.seg_id.cmp(&other.seg_id))
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.scan_order(other) == CmpOrdering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    // BinaryHeap is a max-heap; reverse so the next record in scan order
    // sits on top
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.scan_order(other).reverse()
    }
}

/// Merged, filtered record stream over one partition
pub struct SortedScanner {
    ctx: Context,
    layout: Layout,
    span: Span,
    filter: Option<RecordFilter>,
    sources: Vec<Source>,
    heap: BinaryHeap<HeapItem>,
    stats: Arc<ScanStats>,
    error: Option<LakeError>,
    done: bool,
}

impl SortedScanner {
    pub fn new(
        ctx: &Context,
        engine: &EngineRef,
        data: &Uri,
        layout: Layout,
        partition: Partition,
        filter: Option<RecordFilter>,
        stats: Arc<ScanStats>,
    ) -> Result<Self> {
        let mut sources = Vec::with_capacity(partition.segments.len());
        for seg in &partition.segments {
            let reader = SegmentReader::open(
                ctx,
                engine.as_ref(),
                data,
                seg,
                Some(&partition.span),
                layout.order,
            )?;
            sources.push(Source {
                reader,
                seg_id: seg.id,
                range_filter: !partition.span.covers(&seg.span()),
                next_index: 0,
                bytes_seen: 0,
            });
        }

        let mut scanner = Self {
            ctx: ctx.clone(),
            layout,
            span: partition.span,
            filter,
            sources,
            heap: BinaryHeap::new(),
            stats,
            error: None,
            done: false,
        };
        for source in 0..scanner.sources.len() {
            scanner.advance(source)?;
        }
        Ok(scanner)
    }

    /// Key span this scanner covers
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Pull the next accepted record of `source` onto the heap
    fn advance(&mut self, source: usize) -> Result<()> {
        let order = self.layout.order;
        loop {
            let src = &mut self.sources[source];
            let rec = match src.reader.next() {
                None => return Ok(()),
                Some(rec) => rec?,
            };
            let index = src.next_index;
            src.next_index += 1;
            let bytes = src.reader.bytes_read();
            self.stats
                .bytes_read
                .fetch_add(bytes - src.bytes_seen, Ordering::Relaxed);
            src.bytes_seen = bytes;
            self.stats.records_read.fetch_add(1, Ordering::Relaxed);

            if src.range_filter {
                let key = self.layout.key_of(&rec);
                if !self.span.contains(&key) {
                    if order.apply(key.cmp(self.span.last(order))) == CmpOrdering::Greater {
                        // Past the end of the partition; nothing further matches
                        return Ok(());
                    }
                    continue;
                }
            }
            if let Some(filter) = &self.filter {
                if !filter(&rec) {
                    continue;
                }
            }

            let keys = self
                .layout
                .keys
                .iter()
                .map(|k| rec.get(k).cloned().unwrap_or(Value::Null))
                .collect();
            self.heap.push(HeapItem {
                keys,
                order,
                seg_id: src.seg_id,
                index,
                source,
                rec,
            });
            return Ok(());
        }
    }
}

impl Iterator for SortedScanner {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(e) = self.error.take() {
            self.done = true;
            return Some(Err(e));
        }
        if let Err(e) = self.ctx.check() {
            self.done = true;
            return Some(Err(e));
        }
        let Some(item) = self.heap.pop() else {
            self.done = true;
            return None;
        };
        if let Err(e) = self.advance(item.source) {
            // Surface the failure after the record already in hand
            self.heap.clear();
            self.error = Some(e);
        }
        Some(Ok(item.rec))
    }
}
