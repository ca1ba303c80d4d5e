//! Partitioning
//!
//! Groups overlapping data objects so each group can be merge-scanned on
//! its own while groups are emitted in pool order.
//!
//! The sweep is the merge-overlapping-intervals variant: objects sorted by
//! where they start in pool order either extend the current partition or
//! open a new one. Partitions are then clipped to the scan span.

use std::cmp::Ordering;

use crate::record::Order;
use crate::segment::SegmentRef;
use crate::span::Span;

/// A key span and the objects that must be merged to scan it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub span: Span,
    pub segments: Vec<SegmentRef>,
}

impl Partition {
    fn new(seg: SegmentRef) -> Self {
        Self {
            span: seg.span(),
            segments: vec![seg],
        }
    }
}

/// Pool-order sort: start, then end, then count, then id
fn compare_segments(a: &SegmentRef, b: &SegmentRef, order: Order) -> Ordering {
    let (sa, sb) = (a.span(), b.span());
    sa.cmp_first(&sb, order)
        .then_with(|| order.apply(sa.last(order).cmp(sb.last(order))))
        .then_with(|| a.count.cmp(&b.count))
        .then_with(|| a.id.cmp(&b.id))
}

/// Split `segments` into disjoint partitions within `scan` (`None` is
/// unbounded), ordered for a scan in `order`
pub fn partition_segments(
    mut segments: Vec<SegmentRef>,
    order: Order,
    scan: Option<&Span>,
) -> Vec<Partition> {
    if let Some(scan) = scan {
        segments.retain(|seg| scan.overlaps(&seg.span()));
    }
    segments.sort_by(|a, b| compare_segments(a, b, order));

    let mut partitions: Vec<Partition> = Vec::new();
    for seg in segments {
        let span = seg.span();
        match partitions.last_mut() {
            Some(top)
                if order.apply(span.first(order).cmp(top.span.last(order)))
                    != Ordering::Greater =>
            {
                top.span.extend(&span);
                top.segments.push(seg);
            }
            _ => partitions.push(Partition::new(seg)),
        }
    }

    if let Some(scan) = scan {
        for p in &mut partitions {
            if let Some(clipped) = p.span.intersect(scan) {
                p.span = clipped;
            }
        }
    }
    partitions
}
