//! Tests for Commit Log
//!
//! These tests verify:
//! - Snapshots replay adds and deletes from the tail
//! - Snapshots are deterministic and served from the cache
//! - Commit lookups: position, snapshot-of-commit, adds-of-commit
//! - Delete of an absent object surfaces at replay time
//! - Commit messages are listed newest first

use std::sync::Arc;

use branchlake::commit::{CommitLog, Transaction, View};
use branchlake::config::LakeConfig;
use branchlake::context::Context;
use branchlake::error::ErrorKind;
use branchlake::journal::JournalId;
use branchlake::record::Value;
use branchlake::segment::SegmentRef;
use branchlake::storage::{EngineRef, MemoryEngine, Uri};
use branchlake::uid::Uid;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_log() -> CommitLog {
    let engine: EngineRef = Arc::new(MemoryEngine::new());
    CommitLog::create(
        &Context::background(),
        engine,
        Uri::new("/lake/pool/branch/J"),
        JournalId::NIL,
        &LakeConfig::default(),
    )
    .unwrap()
}

fn seg(k: i64) -> SegmentRef {
    SegmentRef {
        id: Uid::new(),
        first: Value::Int(k),
        last: Value::Int(k + 9),
        count: 10,
        row_size: 90,
        size: 300,
    }
}

fn add(log: &CommitLog, segs: &[SegmentRef], message: &str) -> (Uid, JournalId) {
    let mut txn = Transaction::adds(Uid::new(), segs.iter().cloned());
    txn.append_message("tester", message, None);
    let at = log.commit(&Context::background(), &txn).unwrap();
    (txn.id, at)
}

fn delete(log: &CommitLog, ids: &[Uid]) -> (Uid, JournalId) {
    let mut txn = Transaction::deletes(Uid::new(), ids.iter().copied());
    txn.append_message("tester", "delete", None);
    let at = log.commit(&Context::background(), &txn).unwrap();
    (txn.id, at)
}

fn ids_of(view: &impl View) -> Vec<Uid> {
    let mut ids: Vec<Uid> = view.select_all().into_iter().map(|s| s.id).collect();
    ids.sort();
    ids
}

fn sorted(mut ids: Vec<Uid>) -> Vec<Uid> {
    ids.sort();
    ids
}

// =============================================================================
// Snapshot Tests
// =============================================================================

#[test]
fn test_empty_log_tip() {
    let log = setup_log();
    let ctx = Context::background();
    assert!(log.tip(&ctx).unwrap().is_empty());
    assert_eq!(log.tip_position(&ctx).unwrap(), JournalId::NIL);
}

#[test]
fn test_delete_semantics() {
    let log = setup_log();
    let ctx = Context::background();
    let segs: Vec<SegmentRef> = (0..5).map(|i| seg(i * 10)).collect();
    add(&log, &segs, "five objects");

    let (deleted, _) = delete(&log, &[segs[1].id, segs[3].id]);

    let tip = log.tip(&ctx).unwrap();
    let expected = sorted(vec![segs[0].id, segs[2].id, segs[4].id]);
    assert_eq!(ids_of(&*tip), expected);

    let head = log.tip_position(&ctx).unwrap();
    let (snap, live) = log.snapshot_of_commit(&ctx, head, deleted).unwrap();
    assert_eq!(ids_of(&*snap), expected);
    assert!(live);
}

#[test]
fn test_snapshot_at_each_position() {
    let log = setup_log();
    let ctx = Context::background();
    let a = seg(0);
    let b = seg(10);
    let (_, p1) = add(&log, &[a.clone()], "a");
    let (_, p2) = add(&log, &[b.clone()], "b");
    let (_, p3) = delete(&log, &[a.id]);

    assert_eq!(ids_of(&*log.snapshot(&ctx, p1).unwrap()), vec![a.id]);
    assert_eq!(
        ids_of(&*log.snapshot(&ctx, p2).unwrap()),
        sorted(vec![a.id, b.id])
    );
    assert_eq!(ids_of(&*log.snapshot(&ctx, p3).unwrap()), vec![b.id]);
}

#[test]
fn test_snapshot_deterministic_and_cached() {
    let log = setup_log();
    let ctx = Context::background();
    for i in 0..4 {
        add(&log, &[seg(i)], "x");
    }

    let head = log.tip_position(&ctx).unwrap();
    let first = log.snapshot(&ctx, head).unwrap();
    let second = log.snapshot(&ctx, head).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // A second log over the same journal replays to the same state
    let engine: EngineRef = Arc::new(MemoryEngine::new());
    let other = CommitLog::create(
        &ctx,
        engine,
        Uri::new("/other/J"),
        JournalId::NIL,
        &LakeConfig::default(),
    )
    .unwrap();
    for pos in 1..=head.0 {
        let txn = log.read_transaction(&ctx, JournalId(pos)).unwrap();
        other.commit(&ctx, &txn).unwrap();
    }
    assert_eq!(ids_of(&*other.tip(&ctx).unwrap()), ids_of(&*first));
}

#[test]
fn test_delete_of_absent_object_fails_on_replay() {
    let log = setup_log();
    let ctx = Context::background();
    add(&log, &[seg(0)], "one");

    // The commit itself is accepted
    delete(&log, &[Uid::new()]);
    let err = log.tip(&ctx).unwrap_err();
    assert!(err.is(ErrorKind::SegmentNotFound));
}

#[test]
fn test_duplicate_add_fails_on_replay() {
    let log = setup_log();
    let ctx = Context::background();
    let a = seg(0);
    add(&log, &[a.clone()], "one");
    add(&log, &[a], "again");
    assert!(log.tip(&ctx).unwrap_err().is(ErrorKind::SegmentExists));
}

// =============================================================================
// Commit Lookup Tests
// =============================================================================

#[test]
fn test_commit_lookups() {
    let log = setup_log();
    let ctx = Context::background();
    let a = seg(0);
    let b = seg(10);
    let (c1, p1) = add(&log, &[a.clone()], "a");
    let (c2, p2) = add(&log, &[b.clone()], "b");
    let head = log.tip_position(&ctx).unwrap();

    assert_eq!(log.journal_id_of_commit(&ctx, head, c1).unwrap(), p1);
    assert_eq!(log.journal_id_of_commit(&ctx, head, c2).unwrap(), p2);
    assert!(log
        .journal_id_of_commit(&ctx, head, Uid::new())
        .unwrap_err()
        .is(ErrorKind::CommitNotFound));

    assert_eq!(log.adds_of_commit(&ctx, head, c2).unwrap(), vec![b.clone()]);

    // Deleting what c1 added makes it no longer live at the head
    delete(&log, &[a.id]);
    let head = log.tip_position(&ctx).unwrap();
    let (snap, live) = log.snapshot_of_commit(&ctx, head, c1).unwrap();
    assert_eq!(ids_of(&*snap), vec![a.id]);
    assert!(!live);
}

#[test]
fn test_commits_newest_first() {
    let log = setup_log();
    let ctx = Context::background();
    let (c1, _) = add(&log, &[seg(0)], "first");
    let (c2, _) = add(&log, &[seg(10)], "second");

    let head = log.tip_position(&ctx).unwrap();
    let commits = log.commits(&ctx, head).unwrap();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].id, c2);
    assert_eq!(commits[0].message, "second");
    assert_eq!(commits[1].id, c1);
    assert_eq!(commits[1].author, "tester");
    assert_eq!(commits[1].position, JournalId(1));
}

// =============================================================================
// Tail Tests
// =============================================================================

#[test]
fn test_move_tail_hides_older_entries() {
    let log = setup_log();
    let ctx = Context::background();
    let (c1, _) = add(&log, &[seg(0)], "old");
    let b = seg(10);
    let (_, p2) = add(&log, &[b.clone()], "new");

    log.move_tail(&ctx, p2, JournalId(7)).unwrap();
    assert_eq!(log.read_tail(&ctx).unwrap(), (p2, JournalId(7)));
    assert_eq!(ids_of(&*log.tip(&ctx).unwrap()), vec![b.id]);
    assert!(log.snapshot(&ctx, JournalId(1)).unwrap().is_empty());

    let head = log.tip_position(&ctx).unwrap();
    assert!(log
        .journal_id_of_commit(&ctx, head, c1)
        .unwrap_err()
        .is(ErrorKind::CommitNotFound));
}

#[test]
fn test_empty_transaction_rejected() {
    let log = setup_log();
    let txn = Transaction::new(Uid::new());
    let err = log.commit(&Context::background(), &txn).unwrap_err();
    assert!(err.is(ErrorKind::EmptyTransaction));
}
