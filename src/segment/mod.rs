//! Data Object Module
//!
//! Immutable files of records sorted by the pool key, each paired with a
//! sparse seek index.
//!
//! ## Files
//! ```text
//! <pool>/data/
//!   ├── <id>.row    framed records in pool order
//!   └── <id>.seek   framed (key, byte offset) entries
//! ```
//!
//! A seek entry is emitted for the first record and then whenever at least
//! `seek_stride` bytes of rows have been written since the previous entry.

mod reader;
mod seekindex;
mod writer;

use serde::{Deserialize, Serialize};

use crate::record::{Order, Value};
use crate::span::Span;
use crate::storage::Uri;
use crate::uid::Uid;

pub use reader::SegmentReader;
pub use seekindex::{SeekEntry, SeekIndex};
pub use writer::SegmentWriter;

/// Metadata of a committed data object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRef {
    pub id: Uid,
    /// Key of the first record in pool order
    pub first: Value,
    /// Key of the last record in pool order
    pub last: Value,
    pub count: u64,
    /// In-memory size of the records
    pub row_size: u64,
    /// Size of the row file in bytes
    pub size: u64,
}

impl SegmentRef {
    /// Key range covered by this object, regardless of pool order
    pub fn span(&self) -> Span {
        Span::new(self.first.clone(), self.last.clone())
    }

    /// Compare two objects by where they start in `order`, then by id
    pub fn cmp_first(&self, other: &SegmentRef, order: Order) -> std::cmp::Ordering {
        self.span()
            .cmp_first(&other.span(), order)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Uri of an object's row file
pub fn row_uri(data: &Uri, id: Uid) -> Uri {
    data.join(format!("{}.row", id))
}

/// Uri of an object's seek index
pub fn seek_uri(data: &Uri, id: Uid) -> Uri {
    data.join(format!("{}.seek", id))
}
