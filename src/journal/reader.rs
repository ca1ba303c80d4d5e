//! Journal readers

use std::io::{self, Cursor, Read};

use bytes::Bytes;

use crate::context::Context;
use crate::error::Result;

use super::{JournalId, Queue};

/// Iterator over `(position, payload)` pairs of a journal range
pub struct Entries {
    queue: Queue,
    ctx: Context,
    next: JournalId,
    end: JournalId,
}

impl Entries {
    pub(super) fn new(queue: Queue, ctx: Context, from: JournalId, to: JournalId) -> Self {
        // Position 0 never holds an entry
        let next = if from.is_nil() { JournalId(1) } else { from };
        Self {
            queue,
            ctx,
            next,
            end: to,
        }
    }
}

impl Iterator for Entries {
    type Item = Result<(JournalId, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.end {
            return None;
        }
        let id = self.next;
        self.next = id.next();
        match self.queue.load(&self.ctx, id) {
            Ok(payload) => Some(Ok((id, payload))),
            Err(e) => {
                // Stop after the first error
                self.next = self.end.next();
                Some(Err(e))
            }
        }
    }
}

/// Concatenation of journal payloads as one byte stream
pub struct JournalReader {
    entries: Entries,
    current: Cursor<Bytes>,
}

impl JournalReader {
    pub(super) fn new(entries: Entries) -> Self {
        Self {
            entries,
            current: Cursor::new(Bytes::new()),
        }
    }
}

impl Read for JournalReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.current.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            match self.entries.next() {
                None => return Ok(0),
                Some(Ok((_, payload))) => self.current = Cursor::new(payload),
                Some(Err(e)) => return Err(io::Error::new(io::ErrorKind::Other, e)),
            }
        }
    }
}
