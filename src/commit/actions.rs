//! Actions and transactions
//!
//! A transaction is a list of actions sharing one commit id, serialized as
//! consecutive frames in a single journal payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LakeError, Result};
use crate::index::IndexRef;
use crate::record::codec::{decode_all, encode_all};
use crate::segment::SegmentRef;
use crate::uid::Uid;

/// One change to a branch's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Add {
        commit: Uid,
        segment: SegmentRef,
    },
    Delete {
        commit: Uid,
        id: Uid,
    },
    AddIndex {
        commit: Uid,
        index: IndexRef,
    },
    CommitMessage {
        id: Uid,
        author: String,
        date: DateTime<Utc>,
        message: String,
        meta: Option<String>,
    },
}

impl Action {
    /// The commit this action belongs to
    pub fn commit_id(&self) -> Uid {
        match self {
            Action::Add { commit, .. }
            | Action::Delete { commit, .. }
            | Action::AddIndex { commit, .. } => *commit,
            Action::CommitMessage { id, .. } => *id,
        }
    }
}

/// Actions committed together
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: Uid,
    pub actions: Vec<Action>,
}

impl Transaction {
    pub fn new(id: Uid) -> Self {
        Self {
            id,
            actions: Vec::new(),
        }
    }

    /// A transaction adding `segments`
    pub fn adds(id: Uid, segments: impl IntoIterator<Item = SegmentRef>) -> Self {
        let mut txn = Self::new(id);
        for seg in segments {
            txn.append_add(seg);
        }
        txn
    }

    /// A transaction deleting `ids`
    pub fn deletes(id: Uid, ids: impl IntoIterator<Item = Uid>) -> Self {
        let mut txn = Self::new(id);
        for seg in ids {
            txn.append_delete(seg);
        }
        txn
    }

    pub fn append_add(&mut self, segment: SegmentRef) {
        self.actions.push(Action::Add {
            commit: self.id,
            segment,
        });
    }

    pub fn append_delete(&mut self, id: Uid) {
        self.actions.push(Action::Delete {
            commit: self.id,
            id,
        });
    }

    pub fn append_add_index(&mut self, index: IndexRef) {
        self.actions.push(Action::AddIndex {
            commit: self.id,
            index,
        });
    }

    /// Append a commit message stamped with the current time
    pub fn append_message(&mut self, author: &str, message: &str, meta: Option<String>) {
        self.actions.push(Action::CommitMessage {
            id: self.id,
            author: author.to_string(),
            date: Utc::now(),
            message: message.to_string(),
            meta,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Whether the transaction changes state (anything besides messages)
    pub fn has_changes(&self) -> bool {
        self.actions
            .iter()
            .any(|a| !matches!(a, Action::CommitMessage { .. }))
    }

    /// Segments this transaction adds
    pub fn added(&self) -> impl Iterator<Item = &SegmentRef> {
        self.actions.iter().filter_map(|a| match a {
            Action::Add { segment, .. } => Some(segment),
            _ => None,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.actions.is_empty() {
            return Err(LakeError::EmptyTransaction);
        }
        encode_all(&self.actions)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let actions: Vec<Action> = decode_all(bytes)?;
        let id = match actions.first() {
            Some(a) => a.commit_id(),
            None => return Err(LakeError::EmptyTransaction),
        };
        Ok(Self { id, actions })
    }
}
