//! Data object writer
//!
//! Writes records in pool order to a new row file, sampling the seek index
//! along the way.

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::error::{LakeError, Result};
use crate::record::codec::{encode_all, FrameWriter};
use crate::record::{Layout, Record, Value};
use crate::storage::{EngineRef, ObjectWriter, Uri};
use crate::uid::Uid;

use super::{row_uri, seek_uri, SeekEntry, SegmentRef};

/// Builder for one data object
///
/// Records must arrive in pool order; call `close()` to publish the object
/// or `abort()` to discard it.
pub struct SegmentWriter {
    engine: EngineRef,
    data: Uri,
    layout: Layout,
    id: Uid,
    rows: FrameWriter<Box<dyn ObjectWriter>>,
    seek: Vec<SeekEntry>,
    seek_stride: u64,
    /// Row offset of the most recent seek entry
    last_seek: u64,
    first: Option<Value>,
    last: Option<Value>,
    count: u64,
    row_size: u64,
}

impl SegmentWriter {
    pub fn new(engine: EngineRef, data: Uri, layout: Layout, seek_stride: u64) -> Result<Self> {
        let id = Uid::new();
        let rows = FrameWriter::new(engine.put(&row_uri(&data, id))?);
        Ok(Self {
            engine,
            data,
            layout,
            id,
            rows,
            seek: Vec::new(),
            seek_stride,
            last_seek: 0,
            first: None,
            last: None,
            count: 0,
            row_size: 0,
        })
    }

    pub fn id(&self) -> Uid {
        self.id
    }

    /// Row bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.rows.position()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Primary key of the last record written
    pub fn last_key(&self) -> Option<&Value> {
        self.last.as_ref()
    }

    /// Append one record
    pub fn write(&mut self, rec: &Record) -> Result<()> {
        let key = self.layout.key_of(rec);
        if let Some(last) = &self.last {
            if self.layout.compare_values(&key, last) == Ordering::Less {
                return Err(LakeError::InvalidArgument(format!(
                    "record key {} out of {} order after {}",
                    key, self.layout.order, last
                )));
            }
        }

        let offset = self.rows.position();
        if self.count == 0 || offset - self.last_seek >= self.seek_stride {
            self.seek.push(SeekEntry {
                key: key.clone(),
                offset,
            });
            self.last_seek = offset;
        }

        self.rows.write(rec)?;
        if self.first.is_none() {
            self.first = Some(key.clone());
        }
        self.last = Some(key);
        self.count += 1;
        self.row_size += rec.mem_size() as u64;
        Ok(())
    }

    /// Publish the row file and seek index
    pub fn close(self) -> Result<SegmentRef> {
        let (first, last) = match (self.first, self.last) {
            (Some(first), Some(last)) if self.count > 0 => (first, last),
            _ => {
                let id = self.id;
                drop(self.rows);
                return Err(LakeError::InvalidArgument(format!(
                    "data object {} has no records",
                    id
                )));
            }
        };

        let size = self.rows.position();
        self.rows.into_inner().close()?;

        let seek_bytes = encode_all(&self.seek)?;
        if let Err(e) = self
            .engine
            .put_bytes(&seek_uri(&self.data, self.id), &seek_bytes)
        {
            if let Err(cleanup) = self.engine.delete(&row_uri(&self.data, self.id)) {
                warn!(id = %self.id, error = %cleanup, "failed to remove orphaned row file");
            }
            return Err(e);
        }

        debug!(id = %self.id, count = self.count, size, "data object written");
        Ok(SegmentRef {
            id: self.id,
            first,
            last,
            count: self.count,
            row_size: self.row_size,
            size,
        })
    }

    /// Discard the object, removing anything already published
    pub fn abort(self) {
        let SegmentWriter {
            engine, data, id, rows, ..
        } = self;
        drop(rows);
        for uri in [row_uri(&data, id), seek_uri(&data, id)] {
            if let Err(e) = engine.delete(&uri) {
                warn!(%uri, error = %e, "failed to remove partial data object");
            }
        }
        debug!(%id, "data object aborted");
    }
}
