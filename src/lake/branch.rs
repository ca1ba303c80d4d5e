//! Branches
//!
//! A branch is a commit log layered over a position of its parent. The
//! log's `TAIL` object carries the base pointer: the parent position this
//! branch was forked from or last merged into. Each merge appends a new
//! `(tail, base)` line, so the log splits into epochs. The state at a
//! position is the parent's snapshot at that epoch's base patched with the
//! log from the epoch's tail through the position. Older positions keep
//! resolving against the base that was in effect when they were written.
//!
//! ## Merge
//! ```text
//! parent:  ... ─ B ──────────── M        M = squashed diff of the branch
//!                 \                \
//! branch:          c1 ─ c2 ─ c3 ─ r      r = rebase note; a new epoch
//!                                            starts at r with base M
//! ```
//!
//! Commits after a partial merge point are carried into the rebase note.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::commit::{Action, CommitInfo, CommitLog, Patch, Snapshot, Transaction, View};
use crate::context::Context;
use crate::error::{ErrorKind, LakeError, Result, ResultExt};
use crate::index::{build_index, IndexRule};
use crate::journal::JournalId;
use crate::record::Record;
use crate::segment::SegmentRef;
use crate::span::Span;
use crate::storage::Uri;
use crate::uid::Uid;

use super::pool::Pool;
use super::scanner::RecordFilter;
use super::scheduler::{Scan, Scheduler};

/// Object lines listed in a default load message
const MAX_MESSAGE_OBJECTS: usize = 10;

/// Entry of a pool's branch table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchConfig {
    pub id: Uid,
    pub name: String,
    /// Branch this one was forked from; `None` for main
    pub parent: Option<Uid>,
}

/// Run of log positions replayed over one parent position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Epoch {
    tail: JournalId,
    base: JournalId,
}

/// An open branch of a pool
pub struct Branch {
    pool: Pool,
    config: BranchConfig,
    log: CommitLog,
    /// Parent snapshot at one base position
    base: Mutex<Option<(JournalId, Arc<Snapshot>)>>,
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("pool", &self.pool.name())
            .field("name", &self.config.name)
            .field("id", &self.config.id)
            .finish()
    }
}

impl Branch {
    pub(crate) fn create(
        ctx: &Context,
        pool: Pool,
        config: BranchConfig,
        base: JournalId,
    ) -> Result<Self> {
        let log = CommitLog::create(
            ctx,
            pool.engine().clone(),
            pool.branch_path(config.id).join("J"),
            base,
            pool.lake_config(),
        )?;
        Ok(Self::with_log(pool, config, log))
    }

    pub(crate) fn open(ctx: &Context, pool: Pool, config: BranchConfig) -> Result<Self> {
        let log = CommitLog::open(
            ctx,
            pool.engine().clone(),
            pool.branch_path(config.id).join("J"),
            pool.lake_config(),
        )
        .context(|| format!("{}/{}", pool.name(), config.name))?;
        Ok(Self::with_log(pool, config, log))
    }

    fn with_log(pool: Pool, config: BranchConfig, log: CommitLog) -> Self {
        Self {
            pool,
            config,
            log,
            base: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uid {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BranchConfig {
        &self.config
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Head of this branch's log, `NIL` before the first commit
    pub fn head_position(&self, ctx: &Context) -> Result<JournalId> {
        self.log.tip_position(ctx)
    }

    /// Current `(tail, base)`: the first position of the current epoch and
    /// the parent position it is replayed over
    pub fn tail(&self, ctx: &Context) -> Result<(JournalId, JournalId)> {
        self.log.read_tail(ctx)
    }

    /// Every `(tail, base)` this branch has had, oldest first
    pub fn tail_history(&self, ctx: &Context) -> Result<Vec<(JournalId, JournalId)>> {
        self.log.tail_history(ctx)
    }

    /// Directory holding this branch's journal
    pub fn log_path(&self) -> &Uri {
        self.log.path()
    }

    /// Position of `commit` in this branch's own log, searching down from
    /// `from`
    pub(crate) fn position_of(&self, ctx: &Context, from: JournalId, commit: Uid) -> Result<JournalId> {
        self.log
            .find_commit(ctx, from, JournalId::NIL, commit)
            .context(|| self.label())
    }

    fn label(&self) -> String {
        format!("{}/{}", self.pool.name(), self.config.name)
    }

    // -------------------------------------------------------------------------
    // Parent chain
    // -------------------------------------------------------------------------

    fn open_parent(&self, ctx: &Context) -> Result<Option<Branch>> {
        match self.config.parent {
            None => Ok(None),
            Some(id) => self
                .pool
                .open_branch_by_id(ctx, id)
                .map(Some)
                .context(|| self.label()),
        }
    }

    /// The epoch in effect at `at`
    ///
    /// Positions before the first tail (only `NIL`) belong to the first
    /// epoch. Among epochs sharing a tail the latest wins.
    fn epoch_at(&self, ctx: &Context, at: JournalId) -> Result<Epoch> {
        let history = self.log.tail_history(ctx)?;
        let (tail, base) = history
            .iter()
            .rev()
            .find(|(tail, _)| *tail <= at)
            .or_else(|| history.first())
            .copied()
            .ok_or_else(|| LakeError::Corruption(format!("{}: empty tail history", self.label())))?;
        Ok(Epoch { tail, base })
    }

    /// The parent's snapshot at `base`
    fn base_snapshot(&self, ctx: &Context, parent: &Branch, base: JournalId) -> Result<Arc<Snapshot>> {
        if let Some((at, snap)) = &*self.base.lock() {
            if *at == base {
                return Ok(Arc::clone(snap));
            }
        }
        debug!(branch = %self.label(), %base, "loading parent base");
        let snap = parent.snapshot_at(ctx, base).context(|| self.label())?;
        *self.base.lock() = Some((base, Arc::clone(&snap)));
        Ok(snap)
    }

    /// Epoch base patched with the log from the epoch's tail through `to`
    fn replay(&self, ctx: &Context, parent: &Branch, epoch: Epoch, to: JournalId) -> Result<Patch> {
        let base = self.base_snapshot(ctx, parent, epoch.base)?;
        let mut patch = Patch::new(base);
        if !to.is_nil() && to >= epoch.tail {
            self.log.play(ctx, &mut patch, epoch.tail, to)?;
        }
        Ok(patch)
    }

    /// Run `f` on the branch whose log holds `commit` and its position there
    ///
    /// Searches this log from `from` down, then the parent chain at or
    /// before the base in effect at `from`.
    fn with_commit<T, F>(&self, ctx: &Context, from: JournalId, commit: Uid, f: F) -> Result<T>
    where
        F: FnOnce(&Branch, JournalId) -> Result<T>,
    {
        match self.log.find_commit(ctx, from, JournalId::NIL, commit) {
            Ok(at) => f(self, at),
            Err(e) if e.is(ErrorKind::CommitNotFound) => match self.open_parent(ctx)? {
                Some(parent) => {
                    let epoch = self.epoch_at(ctx, from)?;
                    parent.with_commit(ctx, epoch.base, commit, f)
                }
                None => Err(e.context(self.label())),
            },
            Err(e) => Err(e.context(self.label())),
        }
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// State at commit `at`, or at the head when `None`
    ///
    /// A commit not found on this branch is looked up on the parent chain,
    /// at or before each base pointer.
    pub fn snapshot(&self, ctx: &Context, at: Option<Uid>) -> Result<Arc<Snapshot>> {
        let head = self.log.tip_position(ctx)?;
        match at {
            None => self.snapshot_at(ctx, head),
            Some(commit) => self.with_commit(ctx, head, commit, |b, at| b.snapshot_at(ctx, at)),
        }
    }

    /// State at log position `at`
    pub fn snapshot_at(&self, ctx: &Context, at: JournalId) -> Result<Arc<Snapshot>> {
        let Some(parent) = self.open_parent(ctx)? else {
            return self.log.snapshot(ctx, at);
        };
        let epoch = self.epoch_at(ctx, at)?;
        let patch = self.replay(ctx, &parent, epoch, at)?;
        Ok(Arc::new(patch.to_snapshot()))
    }

    /// The change made by the commit at `at`, as a patch over the state
    /// just before it
    fn patch_of_commit(&self, ctx: &Context, at: JournalId) -> Result<Patch> {
        let before = match self.open_parent(ctx)? {
            None => self.log.snapshot(ctx, at.prev())?,
            Some(parent) => {
                let epoch = self.epoch_at(ctx, at)?;
                let prev = if at > epoch.tail {
                    at.prev()
                } else {
                    JournalId::NIL
                };
                Arc::new(self.replay(ctx, &parent, epoch, prev)?.to_snapshot())
            }
        };
        let mut patch = Patch::new(before);
        self.log.play(ctx, &mut patch, at, at)?;
        Ok(patch)
    }

    /// Commit messages on this branch's log, newest first
    ///
    /// Includes commits from earlier epochs and the rebase notes merges
    /// leave behind.
    pub fn commits(&self, ctx: &Context) -> Result<Vec<CommitInfo>> {
        let head = self.log.tip_position(ctx)?;
        self.log.commits_down_to(ctx, head, JournalId::NIL)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    fn commit(&self, ctx: &Context, txn: &Transaction) -> Result<JournalId> {
        self.log.commit(ctx, txn).context(|| self.label())
    }

    /// Write `records` into new data objects and commit them
    ///
    /// Returns the commit id. Loading nothing fails with `EmptyTransaction`.
    pub fn load<I>(
        &self,
        ctx: &Context,
        records: I,
        author: &str,
        message: Option<&str>,
        meta: Option<String>,
    ) -> Result<Uid>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut writer = self.pool.writer(ctx);
        for rec in records {
            if let Err(e) = writer.write(rec) {
                writer.abort();
                return Err(e.context(self.label()));
            }
        }
        let segments = writer.close().context(|| self.label())?;
        if segments.is_empty() {
            return Err(LakeError::EmptyTransaction.context(self.label()));
        }

        let message = match message {
            Some(m) => m.to_string(),
            None => load_message(&segments),
        };
        let mut txn = Transaction::adds(Uid::new(), segments);
        txn.append_message(author, &message, meta);
        if let Err(e) = self.commit(ctx, &txn) {
            warn!(branch = %self.label(), objects = txn.added().count(), "load commit failed, objects left unreferenced");
            return Err(e);
        }
        info!(branch = %self.label(), commit = %txn.id, objects = txn.added().count(), "data loaded");
        Ok(txn.id)
    }

    /// Commit the deletion of data objects
    ///
    /// Ids are not checked here; an id that is not live surfaces as
    /// `SegmentNotFound` when the log is replayed.
    pub fn delete(
        &self,
        ctx: &Context,
        ids: &[Uid],
        author: &str,
        message: Option<&str>,
    ) -> Result<Uid> {
        if ids.is_empty() {
            return Err(LakeError::EmptyTransaction.context(self.label()));
        }
        let message = match message {
            Some(m) => m.to_string(),
            None => format!("deleted {} data object{}", ids.len(), plural(ids.len())),
        };
        let mut txn = Transaction::deletes(Uid::new(), ids.iter().copied());
        txn.append_message(author, &message, None);
        self.commit(ctx, &txn)?;
        info!(branch = %self.label(), commit = %txn.id, objects = ids.len(), "data objects deleted");
        Ok(txn.id)
    }

    /// Undo the data object changes of `commit`
    ///
    /// Objects the commit added that are still live get deleted; objects it
    /// deleted that are not live get added back. The commit may live on this
    /// branch or anywhere up its parent chain.
    pub fn revert(
        &self,
        ctx: &Context,
        commit: Uid,
        author: &str,
        message: Option<&str>,
    ) -> Result<Uid> {
        let head = self.log.tip_position(ctx)?;
        let patch = self.with_commit(ctx, head, commit, |b, at| b.patch_of_commit(ctx, at))?;
        let tip = self.snapshot_at(ctx, head)?;

        let mut txn = Transaction::new(Uid::new());
        for seg in patch.diff().select_all() {
            if tip.exists(seg.id) {
                txn.append_delete(seg.id);
            }
        }
        for id in patch.deleted() {
            let seg = patch.base().lookup(*id).ok_or_else(|| {
                LakeError::Corruption(format!(
                    "{}: object {} deleted by {} is missing from the state before it",
                    self.label(),
                    id,
                    commit
                ))
            })?;
            if !tip.exists(*id) {
                txn.append_add(seg);
            }
        }
        if !txn.has_changes() {
            return Err(LakeError::EmptyTransaction.context(self.label()));
        }

        let message = match message {
            Some(m) => m.to_string(),
            None => format!("reverted commit {}", commit),
        };
        txn.append_message(author, &message, None);
        self.commit(ctx, &txn)?;
        info!(branch = %self.label(), commit = %txn.id, reverted = %commit, "commit reverted");
        Ok(txn.id)
    }

    /// Squash this branch's changes into its parent and rebase onto the
    /// result
    ///
    /// With `at`, only the changes up to and including that commit are
    /// merged; later commits are carried into the rebase note. Returns the
    /// id of the parent's merge commit, or of this branch's rebase note when
    /// there was nothing to merge.
    ///
    /// Fails with `WriteConflict` when objects this branch deleted were
    /// deleted on the parent too, and with `ObjectExists` when this branch
    /// got a commit while the merge was running.
    pub fn merge(
        &self,
        ctx: &Context,
        at: Option<Uid>,
        author: &str,
        message: Option<&str>,
    ) -> Result<Uid> {
        let Some(parent) = self.open_parent(ctx)? else {
            return Err(LakeError::InvalidArgument(format!(
                "{}: branch has no parent to merge into",
                self.label()
            )));
        };

        let head = self.log.tip_position(ctx)?;
        let (tail, base) = self.log.read_tail(ctx)?;
        let epoch = Epoch { tail, base };
        let to = match at {
            None => head,
            Some(commit) => {
                let found = self.position_of(ctx, head, commit)?;
                // Earlier epochs are already merged
                if found < tail {
                    tail.prev()
                } else {
                    found
                }
            }
        };

        let merged = self.replay(ctx, &parent, epoch, to)?;
        let diff = merged.new_transaction();

        let config = self.pool.lake_config();
        let mut attempt = 0;
        let (merge_commit, new_base) = loop {
            attempt += 1;
            let parent_head = parent.log.tip_position(ctx)?;
            let parent_tip = parent.snapshot_at(ctx, parent_head)?;
            check_conflicts(&diff, &parent_tip).context(|| self.label())?;

            // Keep only what the parent does not already reflect, so a
            // retried merge commits nothing
            let mut txn = filter_merge(diff.clone(), &parent_tip);
            if !txn.has_changes() {
                break (None, parent_head);
            }
            let message = match message {
                Some(m) => m.to_string(),
                None => format!("merged {} into {}", self.name(), parent.name()),
            };
            txn.append_message(author, &message, None);
            match parent.log.commit_at(ctx, parent_head, &txn) {
                Ok(at) => break (Some(txn.id), at),
                Err(e) if e.is(ErrorKind::ObjectExists) && attempt < config.max_retries => {
                    debug!(branch = %self.label(), attempt, "parent moved during merge, retrying");
                    ctx.sleep(config.retry_backoff)?;
                }
                Err(e) => return Err(e.context(parent.label())),
            }
        };

        // Commits past the merge point move into the note, rebased onto
        // the new base
        let mut note = if to < head {
            let mut rest = Patch::new(Arc::new(merged.to_snapshot()));
            self.log.play(ctx, &mut rest, to.next(), head)?;
            let rebased = parent.snapshot_at(ctx, new_base)?;
            filter_merge(rest.new_transaction(), &rebased)
        } else {
            Transaction::new(Uid::new())
        };
        note.append_message(
            author,
            &format!("rebased {} onto {} at {}", self.name(), parent.name(), new_base),
            None,
        );
        let new_tail = self
            .log
            .commit_at(ctx, head, &note)
            .context(|| format!("{}: branch moved during merge", self.label()))?;
        self.log
            .move_tail(ctx, new_tail, new_base)
            .context(|| self.label())?;

        info!(
            branch = %self.label(),
            parent = %parent.name(),
            merged = merge_commit.is_some(),
            carried = note.has_changes(),
            %new_base,
            "branch merged"
        );
        Ok(merge_commit.unwrap_or(note.id))
    }

    // -------------------------------------------------------------------------
    // Tags and indexes
    // -------------------------------------------------------------------------

    /// Resolve tags to live data object ids
    ///
    /// A tag naming a live data object stands for itself; a tag naming a
    /// commit on this branch or its parent chain stands for the objects
    /// that commit added that are still live.
    pub fn lookup_tags(&self, ctx: &Context, tags: &[Uid]) -> Result<Vec<Uid>> {
        let head = self.log.tip_position(ctx)?;
        let snap = self.snapshot_at(ctx, head)?;
        let mut out: Vec<Uid> = Vec::new();
        for tag in tags {
            if snap.exists(*tag) && self.pool.object_exists(ctx, *tag)? {
                if !out.contains(tag) {
                    out.push(*tag);
                }
                continue;
            }
            let txn = self.with_commit(ctx, head, *tag, |b, at| b.log.read_transaction(ctx, at))?;
            for seg in txn.added() {
                if snap.exists(seg.id) && !out.contains(&seg.id) {
                    out.push(seg.id);
                }
            }
        }
        Ok(out)
    }

    /// Build index objects for `ids` under each rule and commit them
    pub fn apply_index_rules(
        &self,
        ctx: &Context,
        rules: &[IndexRule],
        ids: &[Uid],
        author: &str,
    ) -> Result<Uid> {
        let snap = self.snapshot(ctx, None)?;
        let mut work = Vec::with_capacity(ids.len());
        for id in ids {
            let seg = snap
                .lookup(*id)
                .ok_or_else(|| LakeError::SegmentNotFound(*id).context(self.label()))?;
            work.push((seg, rules.iter().collect::<Vec<_>>()));
        }
        self.commit_indexes(ctx, &work, author)
    }

    /// Index every live object under the rules it is not yet indexed by
    ///
    /// `EmptyTransaction` when every object already carries every rule.
    pub fn update_index(&self, ctx: &Context, rules: &[IndexRule], author: &str) -> Result<Uid> {
        let snap = self.snapshot(ctx, None)?;
        let mut work = Vec::new();
        for seg in snap.select_all() {
            let attached = snap.indexes(seg.id);
            let missing: Vec<&IndexRule> = rules
                .iter()
                .filter(|rule| !attached.iter().any(|r| r.rule_id == rule.id))
                .collect();
            if !missing.is_empty() {
                work.push((seg, missing));
            }
        }
        debug!(branch = %self.label(), objects = work.len(), "unindexed objects found");
        self.commit_indexes(ctx, &work, author)
    }

    fn commit_indexes(
        &self,
        ctx: &Context,
        work: &[(SegmentRef, Vec<&IndexRule>)],
        author: &str,
    ) -> Result<Uid> {
        let engine = self.pool.engine();
        let data = self.pool.data_path();
        let index = self.pool.index_path();

        let mut txn = Transaction::new(Uid::new());
        let mut names: Vec<&str> = Vec::new();
        let mut objects = 0;
        for (seg, rules) in work {
            if !rules.is_empty() {
                objects += 1;
            }
            for rule in rules {
                let r = build_index(ctx, engine.as_ref(), &data, &index, rule, seg)?;
                txn.append_add_index(r);
                if !names.contains(&rule.name.as_str()) {
                    names.push(&rule.name);
                }
            }
        }
        if !txn.has_changes() {
            return Err(LakeError::EmptyTransaction.context(self.label()));
        }
        txn.append_message(
            author,
            &format!(
                "indexed {} data object{} with {}",
                objects,
                plural(objects),
                names.join(", ")
            ),
            None,
        );
        self.commit(ctx, &txn)?;
        info!(branch = %self.label(), commit = %txn.id, objects, rules = names.len(), "index rules applied");
        Ok(txn.id)
    }

    // -------------------------------------------------------------------------
    // Scans
    // -------------------------------------------------------------------------

    /// Records within `span` (everything when `None`) in pool order, as of
    /// commit `at` or the head
    pub fn scan(
        &self,
        ctx: &Context,
        at: Option<Uid>,
        span: Option<Span>,
        filter: Option<RecordFilter>,
    ) -> Result<Scan> {
        let snap = self.snapshot(ctx, at)?;
        let segments = snap.select(span.as_ref());
        debug!(branch = %self.label(), objects = segments.len(), "scan started");
        let scheduler = Scheduler::new(
            ctx,
            self.pool.engine().clone(),
            self.pool.data_path(),
            self.pool.layout().clone(),
            segments,
            span,
            filter,
            self.pool.lake_config().partition_channel_depth,
        );
        Ok(Scan::new(scheduler))
    }
}

/// Reject a merge whose deletes the parent already made on its own
///
/// A parent that reflects the whole diff is a merge retried after its
/// parent commit landed, not a conflict.
fn check_conflicts(diff: &Transaction, parent_tip: &Snapshot) -> Result<()> {
    let mut overlapping = Vec::new();
    let mut reflected = true;
    for action in &diff.actions {
        match action {
            Action::Delete { id, .. } => {
                if parent_tip.exists(*id) {
                    reflected = false;
                } else {
                    overlapping.push(*id);
                }
            }
            Action::Add { segment, .. } => {
                if !parent_tip.exists(segment.id) {
                    reflected = false;
                }
            }
            _ => {}
        }
    }
    if overlapping.is_empty() || reflected {
        return Ok(());
    }
    let ids: Vec<String> = overlapping.iter().map(|id| id.to_string()).collect();
    Err(LakeError::WriteConflict(format!(
        "{} object{} deleted on both sides: {}",
        overlapping.len(),
        plural(overlapping.len()),
        ids.join(", ")
    )))
}

/// Drop merge actions the parent tip already reflects
fn filter_merge(diff: Transaction, parent_tip: &Snapshot) -> Transaction {
    let mut txn = Transaction::new(diff.id);
    for action in diff.actions {
        match action {
            Action::Delete { id, .. } => {
                if parent_tip.exists(id) {
                    txn.append_delete(id);
                }
            }
            Action::Add { segment, .. } => {
                if !parent_tip.exists(segment.id) {
                    txn.append_add(segment);
                }
            }
            Action::AddIndex { index, .. } => {
                let target = index.segment_id;
                let present = parent_tip.exists(target) || txn.added().any(|s| s.id == target);
                let attached = parent_tip
                    .indexes(target)
                    .iter()
                    .any(|r| r.rule_id == index.rule_id);
                if present && !attached {
                    txn.append_add_index(index);
                }
            }
            Action::CommitMessage { .. } => {}
        }
    }
    txn
}

fn load_message(segments: &[SegmentRef]) -> String {
    let mut message = format!(
        "loaded {} data object{}\n\n",
        segments.len(),
        plural(segments.len())
    );
    for seg in segments.iter().take(MAX_MESSAGE_OBJECTS) {
        message.push_str(&format!(
            "  {} {} record{} in {} data bytes\n",
            seg.id,
            seg.count,
            plural(seg.count as usize),
            seg.size
        ));
    }
    if segments.len() > MAX_MESSAGE_OBJECTS {
        message.push_str("  ...\n");
    }
    message
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
