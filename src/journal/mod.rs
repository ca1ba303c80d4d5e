//! Journal Module
//!
//! Append-only numbered log with compare-and-swap commits. Both the commit
//! logs of branches and the configuration tables (pools, branches, index
//! rules) are journals.
//!
//! ## Layout
//! ```text
//! <journal>/
//!   ├── 1, 2, 3 ...   one object per position, payload is opaque bytes
//!   ├── HEAD          "<head>"  hint, scanned forward and repaired on read
//!   └── TAIL          "<tail> <base>" per line; the last line is the
//!                     current tail and base pointer, earlier lines are
//!                     the ones it replaced
//! ```
//!
//! ## Concurrency
//! - A commit at position N+1 is an exclusive create of object `N+1`;
//!   exactly one writer wins, the others see `ObjectExists`
//! - Readers never block writers; entries are immutable once created

mod queue;
mod reader;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use queue::Queue;
pub use reader::{Entries, JournalReader};

/// Position in a journal; `NIL` (0) means "before the first entry"
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct JournalId(pub u64);

impl JournalId {
    pub const NIL: JournalId = JournalId(0);

    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    pub fn next(self) -> JournalId {
        JournalId(self.0 + 1)
    }

    /// Previous position, saturating at `NIL`
    pub fn prev(self) -> JournalId {
        JournalId(self.0.saturating_sub(1))
    }
}

impl fmt::Display for JournalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
