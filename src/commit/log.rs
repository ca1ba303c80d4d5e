//! Commit log
//!
//! A journal whose payloads are serialized transactions. Snapshots are
//! replayed from the tail and memoized by `(tail, position)` in a small LRU,
//! so moving the tail naturally invalidates older entries.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::LakeConfig;
use crate::context::Context;
use crate::error::{LakeError, Result};
use crate::journal::{JournalId, Queue};
use crate::segment::SegmentRef;
use crate::storage::{EngineRef, Uri};
use crate::uid::Uid;

use super::actions::{Action, Transaction};
use super::snapshot::{Playable, Snapshot, View};

/// Summary of one commit, as listed by `commits`
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub position: JournalId,
    pub id: Uid,
    pub author: String,
    pub date: DateTime<Utc>,
    pub message: String,
    pub meta: Option<String>,
}

/// Journal of transactions with a snapshot cache
pub struct CommitLog {
    queue: Queue,
    cache: Mutex<LruCache<(JournalId, JournalId), Arc<Snapshot>>>,
}

impl CommitLog {
    /// Create an empty log whose base pointer is `base`
    pub fn create(
        ctx: &Context,
        engine: EngineRef,
        path: Uri,
        base: JournalId,
        config: &LakeConfig,
    ) -> Result<Self> {
        let queue = Queue::create(ctx, engine, path, base, config)?;
        Ok(Self::with_queue(queue, config))
    }

    pub fn open(ctx: &Context, engine: EngineRef, path: Uri, config: &LakeConfig) -> Result<Self> {
        let queue = Queue::open(ctx, engine, path, config)?;
        Ok(Self::with_queue(queue, config))
    }

    fn with_queue(queue: Queue, config: &LakeConfig) -> Self {
        let capacity = NonZeroUsize::new(config.snapshot_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            queue,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of snapshots currently cached
    pub fn cached_snapshots(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn path(&self) -> &Uri {
        self.queue.path()
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Append a transaction at the head
    pub fn commit(&self, ctx: &Context, txn: &Transaction) -> Result<JournalId> {
        let payload = txn.serialize()?;
        let at = self.queue.commit(ctx, &payload)?;
        debug!(path = %self.path(), commit = %txn.id, position = %at, actions = txn.actions.len(), "transaction committed");
        Ok(at)
    }

    /// Append a transaction at `expected + 1` only if `expected` is the head
    ///
    /// `ObjectExists` when another writer committed first.
    pub fn commit_at(&self, ctx: &Context, expected: JournalId, txn: &Transaction) -> Result<JournalId> {
        let payload = txn.serialize()?;
        let at = self.queue.commit_at(ctx, expected, &payload)?;
        debug!(path = %self.path(), commit = %txn.id, position = %at, "transaction committed at expected head");
        Ok(at)
    }

    /// Move the tail to `tail` and record `base` as the new base pointer
    pub fn move_tail(&self, ctx: &Context, tail: JournalId, base: JournalId) -> Result<()> {
        self.queue.move_tail(ctx, tail, base)?;
        self.cache.lock().clear();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Positions
    // -------------------------------------------------------------------------

    /// Head position, `NIL` for an empty log
    pub fn tip_position(&self, ctx: &Context) -> Result<JournalId> {
        self.queue.head(ctx)
    }

    /// `(tail, base)`
    pub fn read_tail(&self, ctx: &Context) -> Result<(JournalId, JournalId)> {
        self.queue.read_tail(ctx)
    }

    /// Every `(tail, base)` this log has had, oldest first
    pub fn tail_history(&self, ctx: &Context) -> Result<Vec<(JournalId, JournalId)>> {
        self.queue.tail_history(ctx)
    }

    /// `(head, tail)`
    pub fn boundaries(&self, ctx: &Context) -> Result<(JournalId, JournalId)> {
        self.queue.boundaries(ctx)
    }

    /// The transaction stored at `at`
    pub fn read_transaction(&self, ctx: &Context, at: JournalId) -> Result<Transaction> {
        let payload = self.queue.load(ctx, at)?;
        Transaction::deserialize(&payload)
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Snapshot at the head; empty when nothing has been committed
    pub fn tip(&self, ctx: &Context) -> Result<Arc<Snapshot>> {
        let head = self.queue.head(ctx)?;
        self.snapshot(ctx, head)
    }

    /// Snapshot of everything from the tail through `at`
    pub fn snapshot(&self, ctx: &Context, at: JournalId) -> Result<Arc<Snapshot>> {
        let (tail, _) = self.queue.read_tail(ctx)?;
        if at < tail {
            return Ok(Arc::new(Snapshot::new()));
        }

        // Start from the closest cached snapshot below `at`
        let (mut snap, from) = {
            let mut cache = self.cache.lock();
            if let Some(snap) = cache.get(&(tail, at)) {
                debug!(path = %self.path(), position = %at, "snapshot cache hit");
                return Ok(Arc::clone(snap));
            }
            cache
                .iter()
                .filter(|((t, p), _)| *t == tail && *p < at)
                .max_by_key(|((_, p), _)| *p)
                .map(|((_, p), s)| ((**s).clone(), p.next()))
                .unwrap_or_else(|| (Snapshot::new(), tail))
        };

        debug!(path = %self.path(), %from, to = %at, "replaying snapshot");
        self.play(ctx, &mut snap, from, at)?;

        let snap = Arc::new(snap);
        self.cache.lock().put((tail, at), Arc::clone(&snap));
        Ok(snap)
    }

    /// Replay positions `[from..=to]` into `target`
    pub fn play<P: Playable>(
        &self,
        ctx: &Context,
        target: &mut P,
        from: JournalId,
        to: JournalId,
    ) -> Result<()> {
        for item in self.queue.entries(ctx, from, to) {
            let (position, payload) = item?;
            let txn = Transaction::deserialize(&payload)?;
            for action in &txn.actions {
                target
                    .play(action)
                    .map_err(|e| e.context(format!("{} position {}", self.path(), position)))?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Commit lookups
    // -------------------------------------------------------------------------

    /// Position holding `commit`, searching from `from` down to the tail
    pub fn journal_id_of_commit(
        &self,
        ctx: &Context,
        from: JournalId,
        commit: Uid,
    ) -> Result<JournalId> {
        let (tail, _) = self.queue.read_tail(ctx)?;
        self.find_commit(ctx, from, tail, commit)
    }

    /// Position holding `commit`, searching from `from` down to `floor`
    ///
    /// Entries below the tail are still stored, so a `floor` under the tail
    /// reaches commits made before the tail last moved.
    pub fn find_commit(
        &self,
        ctx: &Context,
        from: JournalId,
        floor: JournalId,
        commit: Uid,
    ) -> Result<JournalId> {
        let floor = if floor.is_nil() { JournalId(1) } else { floor };
        let mut at = from;
        while at >= floor && !at.is_nil() {
            let txn = self.read_transaction(ctx, at)?;
            if txn.id == commit {
                return Ok(at);
            }
            at = at.prev();
        }
        Err(LakeError::CommitNotFound(commit))
    }

    /// Snapshot through `commit`, and whether every object it added is
    /// still present at `from`
    pub fn snapshot_of_commit(
        &self,
        ctx: &Context,
        from: JournalId,
        commit: Uid,
    ) -> Result<(Arc<Snapshot>, bool)> {
        let at = self.journal_id_of_commit(ctx, from, commit)?;
        let snap = self.snapshot(ctx, at)?;
        let adds = self.read_transaction(ctx, at)?;
        let head = self.snapshot(ctx, from)?;
        let live = adds.added().all(|seg| head.exists(seg.id));
        Ok((snap, live))
    }

    /// Objects added by `commit`
    pub fn adds_of_commit(
        &self,
        ctx: &Context,
        from: JournalId,
        commit: Uid,
    ) -> Result<Vec<SegmentRef>> {
        let at = self.journal_id_of_commit(ctx, from, commit)?;
        let txn = self.read_transaction(ctx, at)?;
        Ok(txn.added().cloned().collect())
    }

    /// Commit messages from `from` down to the tail, newest first
    pub fn commits(&self, ctx: &Context, from: JournalId) -> Result<Vec<CommitInfo>> {
        let (tail, _) = self.queue.read_tail(ctx)?;
        self.commits_down_to(ctx, from, tail)
    }

    /// Commit messages from `from` down to `floor`, newest first
    pub fn commits_down_to(
        &self,
        ctx: &Context,
        from: JournalId,
        floor: JournalId,
    ) -> Result<Vec<CommitInfo>> {
        let floor = if floor.is_nil() { JournalId(1) } else { floor };
        let mut out = Vec::new();
        let mut at = from;
        while at >= floor && !at.is_nil() {
            let txn = self.read_transaction(ctx, at)?;
            for action in &txn.actions {
                if let Action::CommitMessage {
                    id,
                    author,
                    date,
                    message,
                    meta,
                } = action
                {
                    out.push(CommitInfo {
                        position: at,
                        id: *id,
                        author: author.clone(),
                        date: *date,
                        message: message.clone(),
                        meta: meta.clone(),
                    });
                }
            }
            at = at.prev();
        }
        Ok(out)
    }
}
