//! Data object reader
//!
//! Opens a row file limited to the byte range the seek index allows for a
//! scan span. Without a seek index the whole file is read.

use std::io::{Read, Seek, SeekFrom, Take};

use tracing::debug;

use crate::context::Context;
use crate::error::{ErrorKind, Result};
use crate::record::codec::FrameReader;
use crate::record::{Order, Record};
use crate::span::Span;
use crate::storage::{Engine, ObjectReader, Uri};

use super::{row_uri, seek_uri, SeekIndex, SegmentRef};

/// Iterator over the records of one data object in a byte range
pub struct SegmentReader {
    frames: FrameReader<Take<Box<dyn ObjectReader>>>,
    ctx: Context,
    done: bool,
}

impl SegmentReader {
    /// Open `seg` for a scan over `span` (`None` reads everything)
    pub fn open(
        ctx: &Context,
        engine: &dyn Engine,
        data: &Uri,
        seg: &SegmentRef,
        span: Option<&Span>,
        order: Order,
    ) -> Result<Self> {
        ctx.check()?;
        let (start, end) = match span {
            Some(span) if !span.covers(&seg.span()) => {
                match SeekIndex::read(engine, &seek_uri(data, seg.id)) {
                    Ok(index) => index.range(span, order),
                    Err(e) if e.is(ErrorKind::ObjectNotFound) => {
                        debug!(id = %seg.id, "seek index missing, scanning whole object");
                        (0, None)
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => (0, None),
        };

        let mut file = engine.get(&row_uri(data, seg.id))?;
        if start > 0 {
            file.seek(SeekFrom::Start(start))?;
        }
        let limit = end.map(|end| end.saturating_sub(start)).unwrap_or(u64::MAX);

        Ok(Self {
            frames: FrameReader::new(file.take(limit)),
            ctx: ctx.clone(),
            done: false,
        })
    }

    /// Row bytes consumed so far
    pub fn bytes_read(&self) -> u64 {
        self.frames.position()
    }
}

impl Iterator for SegmentReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.ctx.check().and_then(|_| self.frames.read::<Record>());
        match item {
            Ok(Some(rec)) => Some(Ok(rec)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
