//! Pool writer
//!
//! Turns a stream of records into data objects of roughly the pool
//! threshold.
//!
//! ## Modes
//! - Unsorted: buffer until the threshold, stable sort, write. The sort and
//!   write run on a background thread while the next buffer fills; at most
//!   one write is in flight.
//! - Sorted: write straight through, starting a new object once the
//!   threshold is reached and the key changes.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::config::InputMode;
use crate::context::Context;
use crate::error::{LakeError, Result};
use crate::record::{Layout, Record};
use crate::segment::{SegmentRef, SegmentWriter};
use crate::storage::{EngineRef, Uri};

/// Counters accumulated by a writer, safe to read while it runs
#[derive(Debug, Default)]
pub struct ImportStats {
    objects_written: AtomicU64,
    record_bytes_written: AtomicU64,
    records_written: AtomicU64,
}

impl ImportStats {
    fn accumulate(&self, seg: &SegmentRef) {
        self.objects_written.fetch_add(1, Ordering::Relaxed);
        self.record_bytes_written.fetch_add(seg.size, Ordering::Relaxed);
        self.records_written.fetch_add(seg.count, Ordering::Relaxed);
    }

    pub fn objects_written(&self) -> u64 {
        self.objects_written.load(Ordering::Relaxed)
    }

    pub fn record_bytes_written(&self) -> u64 {
        self.record_bytes_written.load(Ordering::Relaxed)
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }
}

/// Everything a background object write needs
#[derive(Clone)]
struct Target {
    engine: EngineRef,
    data: Uri,
    layout: Layout,
    seek_stride: u64,
}

impl Target {
    fn new_object(&self) -> Result<SegmentWriter> {
        SegmentWriter::new(
            self.engine.clone(),
            self.data.clone(),
            self.layout.clone(),
            self.seek_stride,
        )
    }

    /// Sort (stable) and write one buffer as a single object
    fn write_buffer(&self, ctx: &Context, mut records: Vec<Record>) -> Result<SegmentRef> {
        let layout = &self.layout;
        records.sort_by(|a, b| layout.compare(a, b));

        let mut writer = self.new_object()?;
        for rec in &records {
            let res = ctx.check().and_then(|_| writer.write(rec));
            if let Err(e) = res {
                writer.abort();
                return Err(e);
            }
        }
        writer.close()
    }
}

/// Writes records into new data objects of a pool
pub struct Writer {
    ctx: Context,
    target: Target,
    threshold: u64,
    mode: InputMode,
    records: Vec<Record>,
    buffered: u64,
    pending: Option<JoinHandle<Result<SegmentRef>>>,
    current: Option<SegmentWriter>,
    segments: Vec<SegmentRef>,
    stats: Arc<ImportStats>,
}

impl Writer {
    pub fn new(
        ctx: &Context,
        engine: EngineRef,
        data: Uri,
        layout: Layout,
        threshold: u64,
        seek_stride: u64,
        mode: InputMode,
    ) -> Self {
        Self {
            ctx: ctx.with_cancel(),
            target: Target {
                engine,
                data,
                layout,
                seek_stride,
            },
            threshold: threshold.max(1),
            mode,
            records: Vec::new(),
            buffered: 0,
            pending: None,
            current: None,
            segments: Vec::new(),
            stats: Arc::new(ImportStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ImportStats> {
        Arc::clone(&self.stats)
    }

    /// Objects completed so far
    pub fn segments(&self) -> &[SegmentRef] {
        &self.segments
    }

    pub fn write(&mut self, rec: Record) -> Result<()> {
        self.ctx.check()?;
        match self.mode {
            InputMode::Unsorted => {
                self.buffered += rec.mem_size() as u64;
                self.records.push(rec);
                if self.buffered >= self.threshold {
                    self.flip_buffers()?;
                }
                Ok(())
            }
            InputMode::Sorted => self.write_sorted(&rec),
        }
    }

    fn write_sorted(&mut self, rec: &Record) -> Result<()> {
        let key = self.target.layout.key_of(rec);
        let split = match &self.current {
            Some(w) => {
                w.bytes_written() >= self.threshold
                    && w.last_key().map_or(true, |last| {
                        self.target.layout.compare_values(&key, last) != CmpOrdering::Equal
                    })
            }
            None => false,
        };
        if split {
            self.finish_current()?;
        }

        let mut writer = match self.current.take() {
            Some(w) => w,
            None => self.target.new_object()?,
        };
        match writer.write(rec) {
            Ok(()) => {
                self.current = Some(writer);
                Ok(())
            }
            Err(e) => {
                writer.abort();
                Err(e)
            }
        }
    }

    fn finish_current(&mut self) -> Result<()> {
        if let Some(writer) = self.current.take() {
            let seg = writer.close()?;
            self.stats.accumulate(&seg);
            self.segments.push(seg);
        }
        Ok(())
    }

    /// Hand the filled buffer to a background write
    fn flip_buffers(&mut self) -> Result<()> {
        self.wait_pending()?;
        let records = std::mem::take(&mut self.records);
        self.buffered = 0;

        let ctx = self.ctx.clone();
        let target = self.target.clone();
        let stats = Arc::clone(&self.stats);
        debug!(records = records.len(), "flushing writer buffer");
        self.pending = Some(thread::spawn(move || {
            let seg = target.write_buffer(&ctx, records)?;
            stats.accumulate(&seg);
            Ok(seg)
        }));
        Ok(())
    }

    fn wait_pending(&mut self) -> Result<()> {
        if let Some(handle) = self.pending.take() {
            let seg = handle.join().map_err(|_| {
                LakeError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "object writer thread panicked",
                ))
            })??;
            self.segments.push(seg);
        }
        Ok(())
    }

    /// Flush what is buffered and return every object written
    pub fn close(mut self) -> Result<Vec<SegmentRef>> {
        match self.mode {
            InputMode::Unsorted => {
                if !self.records.is_empty() {
                    self.flip_buffers()?;
                }
                self.wait_pending()?;
            }
            InputMode::Sorted => self.finish_current()?,
        }
        Ok(std::mem::take(&mut self.segments))
    }

    /// Stop writing; objects already completed are left as orphans
    pub fn abort(mut self) {
        self.ctx.cancel();
        if let Err(e) = self.wait_pending() {
            debug!(error = %e, "pending object write ended during abort");
        }
        if let Some(writer) = self.current.take() {
            writer.abort();
        }
        if !self.segments.is_empty() {
            warn!(objects = self.segments.len(), "writer aborted, objects left unreferenced");
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        // Never leave a background write running past its owner
        self.ctx.cancel();
        if let Some(handle) = self.pending.take() {
            let _ = handle.join();
        }
    }
}
