//! Scan scheduler
//!
//! A background thread partitions the selected data objects and feeds the
//! partitions through a bounded channel; `pull_scan_task` turns each one
//! into a [`SortedScanner`]. Partition order is scan order, so draining the
//! tasks one after another yields the whole scan in pool order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver};
use crossbeam::select;
use tracing::debug;

use crate::context::Context;
use crate::error::{LakeError, Result};
use crate::record::{Layout, Record};
use crate::segment::SegmentRef;
use crate::span::Span;
use crate::storage::{EngineRef, Uri};

use super::partition::{partition_segments, Partition};
use super::scanner::{RecordFilter, ScanStats, SortedScanner};

/// Hands out one sorted scan task per partition
pub struct Scheduler {
    ctx: Context,
    engine: EngineRef,
    data: Uri,
    layout: Layout,
    filter: Option<RecordFilter>,
    stats: Arc<ScanStats>,
    partitions: Receiver<Partition>,
    producer: Option<JoinHandle<Result<()>>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: &Context,
        engine: EngineRef,
        data: Uri,
        layout: Layout,
        segments: Vec<SegmentRef>,
        span: Option<Span>,
        filter: Option<RecordFilter>,
        depth: usize,
    ) -> Self {
        let ctx = ctx.with_cancel();
        let (tx, rx) = bounded(depth.max(1));
        let order = layout.order;

        let producer_ctx = ctx.clone();
        let producer = thread::spawn(move || {
            let parts = partition_segments(segments, order, span.as_ref());
            debug!(partitions = parts.len(), "scan partitioned");
            for p in parts {
                select! {
                    send(tx, p) -> res => {
                        if res.is_err() {
                            // Consumer went away
                            return Ok(());
                        }
                    }
                    recv(producer_ctx.done()) -> _ => return Err(LakeError::Cancelled),
                }
            }
            Ok(())
        });

        Self {
            ctx,
            engine,
            data,
            layout,
            filter,
            stats: Arc::new(ScanStats::default()),
            partitions: rx,
            producer: Some(producer),
        }
    }

    pub fn stats(&self) -> Arc<ScanStats> {
        Arc::clone(&self.stats)
    }

    /// Scanner for the next partition, `None` once all have been handed out
    pub fn pull_scan_task(&mut self) -> Result<Option<SortedScanner>> {
        let next = select! {
            recv(self.partitions) -> msg => msg.ok(),
            recv(self.ctx.done()) -> _ => return Err(LakeError::Cancelled),
        };
        match next {
            Some(partition) => SortedScanner::new(
                &self.ctx,
                &self.engine,
                &self.data,
                self.layout.clone(),
                partition,
                self.filter.clone(),
                Arc::clone(&self.stats),
            )
            .map(Some),
            None => {
                self.join_producer()?;
                Ok(None)
            }
        }
    }

    fn join_producer(&mut self) -> Result<()> {
        match self.producer.take() {
            Some(handle) => handle.join().map_err(|_| {
                LakeError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "partition producer panicked",
                ))
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.ctx.cancel();
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
    }
}

/// Records of a whole scan in pool order
pub struct Scan {
    scheduler: Scheduler,
    current: Option<SortedScanner>,
    done: bool,
}

impl Scan {
    pub(crate) fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            current: None,
            done: false,
        }
    }

    pub fn stats(&self) -> Arc<ScanStats> {
        self.scheduler.stats()
    }
}

impl Iterator for Scan {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if let Some(scanner) = &mut self.current {
                match scanner.next() {
                    Some(Ok(rec)) => return Some(Ok(rec)),
                    Some(Err(e)) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                    None => self.current = None,
                }
            }
            match self.scheduler.pull_scan_task() {
                Ok(Some(scanner)) => self.current = Some(scanner),
                Ok(None) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
