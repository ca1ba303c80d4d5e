//! KV Store Module
//!
//! A key → value table whose state is the replay of a [`crate::journal`].
//! Pools, branches and index rules are all kept in KV stores.
//!
//! ## Journal Entries
//! Each journal payload is a batch of framed [`Entry`]s applied atomically;
//! `value: None` deletes the key. Single operations commit a one-entry
//! batch, `move_key` commits a delete and an insert together.
//!
//! ## Concurrency
//! Every mutation replays to the head, checks its preconditions against
//! that state, and commits at exactly that position. Losing the race means
//! reloading and checking again, so a conflicting write turns into the
//! proper error (`KeyExists`, `NoSuchKey`) instead of a retry failure.

mod store;

use serde::{Deserialize, Serialize};

pub use store::{Constraint, KvStore};

/// One journal record of a KV store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry<T> {
    pub key: String,
    pub value: Option<T>,
}
