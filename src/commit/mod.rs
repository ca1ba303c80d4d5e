//! Commit Module
//!
//! Typed actions, transactions, snapshots and the commit log that ties them
//! to a journal.
//!
//! ## Data Flow
//! ```text
//! Transaction ──serialize──▶ journal payload at position N
//!                                   │
//!               replay [tail..=N]   ▼
//!                             Snapshot / Patch
//! ```

mod actions;
mod log;
mod patch;
mod snapshot;

pub use actions::{Action, Transaction};
pub use log::{CommitInfo, CommitLog};
pub use patch::Patch;
pub use snapshot::{Playable, Snapshot, View};
