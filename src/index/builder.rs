//! Index object builder and reader

use std::collections::BTreeMap;

use tracing::debug;

use crate::context::Context;
use crate::error::Result;
use crate::record::codec::{decode_all, FrameWriter};
use crate::record::{Order, Value};
use crate::segment::{SegmentReader, SegmentRef};
use crate::storage::{Engine, Uri};

use super::{index_uri, IndexRef, IndexRule};

/// Read `seg` and write its index object for `rule`
pub fn build_index(
    ctx: &Context,
    engine: &dyn Engine,
    data: &Uri,
    index: &Uri,
    rule: &IndexRule,
    seg: &SegmentRef,
) -> Result<IndexRef> {
    let mut counts: BTreeMap<Value, u64> = BTreeMap::new();
    for rec in SegmentReader::open(ctx, engine, data, seg, None, Order::Asc)? {
        for v in rule.values(&rec?) {
            *counts.entry(v).or_insert(0) += 1;
        }
    }

    let mut out = FrameWriter::new(Vec::new());
    for (value, count) in &counts {
        out.write(&(value, count))?;
    }
    engine.put_bytes(&index_uri(index, rule.id, seg.id), &out.into_inner())?;

    debug!(rule = %rule.name, segment = %seg.id, values = counts.len(), "index object written");
    Ok(IndexRef {
        rule_id: rule.id,
        segment_id: seg.id,
        count: counts.len() as u64,
    })
}

/// A loaded index object
#[derive(Debug, Clone)]
pub struct IndexObject {
    rows: Vec<(Value, u64)>,
}

impl IndexObject {
    pub fn open(engine: &dyn Engine, index: &Uri, r: &IndexRef) -> Result<Self> {
        let bytes = engine.get_bytes(&index_uri(index, r.rule_id, r.segment_id))?;
        Ok(Self {
            rows: decode_all(&bytes)?,
        })
    }

    /// Number of records holding `value`
    pub fn count(&self, value: &Value) -> u64 {
        self.rows
            .binary_search_by(|(v, _)| v.cmp(value))
            .map(|i| self.rows[i].1)
            .unwrap_or(0)
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.count(value) > 0
    }

    /// Distinct values
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
