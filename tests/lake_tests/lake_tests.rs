//! Tests for Pools, Branches and Scans
//!
//! These tests verify:
//! - Load then scan returns records in pool order
//! - Branch fork, merge and rebase
//! - Delete, time travel, tags and index rules
//! - Pool and branch lifecycle in the root and pool tables
//! - Writer object splitting in both input modes

use std::sync::Arc;

use branchlake::commit::View;
use branchlake::config::{InputMode, LakeConfig};
use branchlake::context::Context;
use branchlake::error::ErrorKind;
use branchlake::index::{IndexObject, IndexRule};
use branchlake::journal::JournalId;
use branchlake::lake::{Branch, Pool, RecordFilter, Root, MAIN_BRANCH};
use branchlake::record::{Layout, Order, Record, Value};
use branchlake::span::Span;
use branchlake::storage::{Engine, EngineRef, LocalEngine, MemoryEngine, Uri};
use branchlake::uid::Uid;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Helper Functions
// =============================================================================

const MB: u64 = 1024 * 1024;

/// Print lake events when RUST_LOG is set
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup_root_with(config: LakeConfig) -> (EngineRef, Root) {
    init_tracing();
    let engine: EngineRef = Arc::new(MemoryEngine::new());
    let root = Root::create(&Context::background(), engine.clone(), Uri::new("/lake"), config).unwrap();
    (engine, root)
}

fn setup_root() -> (EngineRef, Root) {
    setup_root_with(LakeConfig::default())
}

fn setup_pool(layout: &str, threshold: u64) -> (EngineRef, Root, Pool, Branch) {
    let (engine, root) = setup_root();
    let ctx = Context::background();
    let pool = root
        .create_pool(&ctx, "P", Layout::parse(layout).unwrap(), Some(threshold))
        .unwrap();
    let main = pool.open_branch(&ctx, MAIN_BRANCH).unwrap();
    (engine, root, pool, main)
}

fn rec(ts: i64) -> Record {
    Record::new().with("ts", ts).with("host", format!("h{}", ts % 3))
}

fn recs(keys: &[i64]) -> Vec<Record> {
    keys.iter().map(|&k| rec(k)).collect()
}

fn load(branch: &Branch, keys: &[i64]) -> Uid {
    branch
        .load(&Context::background(), recs(keys), "tester", None, None)
        .unwrap()
}

fn ts_of(r: &Record) -> i64 {
    match r.get(&"ts".into()) {
        Some(Value::Int(ts)) => *ts,
        other => panic!("unexpected ts {:?}", other),
    }
}

fn scan_keys(branch: &Branch, at: Option<Uid>, span: Option<Span>) -> Vec<i64> {
    branch
        .scan(&Context::background(), at, span, None)
        .unwrap()
        .map(|r| ts_of(&r.unwrap()))
        .collect()
}

// =============================================================================
// Load and Scan Tests
// =============================================================================

#[test]
fn test_create_load_scan() {
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    load(&main, &[2, 3, 1]);
    assert_eq!(scan_keys(&main, None, None), vec![1, 2, 3]);
}

#[test]
fn test_empty_load_fails() {
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    let err = main
        .load(&Context::background(), Vec::new(), "tester", None, None)
        .unwrap_err();
    assert!(err.is(ErrorKind::EmptyTransaction));
}

#[test]
fn test_overlapping_objects_merge_in_order() {
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    let evens: Vec<i64> = (0..50).map(|i| i * 2).collect();
    let odds: Vec<i64> = (0..50).map(|i| i * 2 + 1).collect();
    load(&main, &evens);
    load(&main, &odds);

    let all: Vec<i64> = (0..100).collect();
    assert_eq!(scan_keys(&main, None, None), all);

    let span = Span::new(Value::Int(10), Value::Int(20));
    assert_eq!(scan_keys(&main, None, Some(span)), (10..=20).collect::<Vec<_>>());
}

#[test]
fn test_disjoint_objects_scan_in_order() {
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    load(&main, &[30, 31, 32]);
    load(&main, &[0, 1, 2]);
    load(&main, &[10, 11]);
    assert_eq!(scan_keys(&main, None, None), vec![0, 1, 2, 10, 11, 30, 31, 32]);
}

#[test]
fn test_descending_pool() {
    let (_engine, _root, _pool, main) = setup_pool("ts:desc", MB);
    load(&main, &[5, 1, 9]);
    load(&main, &[3, 7]);
    assert_eq!(scan_keys(&main, None, None), vec![9, 7, 5, 3, 1]);

    let span = Span::new(Value::Int(2), Value::Int(6));
    assert_eq!(scan_keys(&main, None, Some(span)), vec![5, 3]);
}

#[test]
fn test_equal_keys_scan_stably() {
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    let batch: Vec<Record> = (0..5)
        .map(|i| Record::new().with("ts", 1i64).with("n", i as i64))
        .collect();
    main.load(&Context::background(), batch, "tester", None, None)
        .unwrap();

    let ns = |b: &Branch| -> Vec<i64> {
        b.scan(&Context::background(), None, None, None)
            .unwrap()
            .map(|r| match r.unwrap().get(&"n".into()) {
                Some(Value::Int(n)) => *n,
                _ => -1,
            })
            .collect()
    };
    assert_eq!(ns(&main), vec![0, 1, 2, 3, 4]);
    assert_eq!(ns(&main), ns(&main));
}

#[test]
fn test_scan_with_filter() {
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    load(&main, &(0..20).collect::<Vec<_>>());

    let filter: RecordFilter = Arc::new(|r: &Record| ts_of(r) % 5 == 0);
    let mut scan = main
        .scan(&Context::background(), None, None, Some(filter))
        .unwrap();
    let keys: Vec<i64> = scan.by_ref().map(|r| ts_of(&r.unwrap())).collect();
    assert_eq!(keys, vec![0, 5, 10, 15]);
    assert_eq!(scan.stats().records_read(), 20);
    assert!(scan.stats().bytes_read() > 0);
}

#[test]
fn test_cancelled_scan() {
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    load(&main, &[1, 2, 3]);
    let ctx = Context::background();
    ctx.cancel();
    let err = main.scan(&ctx, None, None, None).err().unwrap();
    assert!(err.is(ErrorKind::Cancelled));
}

// =============================================================================
// Writer Tests
// =============================================================================

#[test]
fn test_unsorted_input_splits_at_threshold() {
    let ctx = Context::background();
    let size = rec(0).mem_size() as u64;
    let (_engine, _root, pool, main) = setup_pool("ts", size * 4);
    load(&main, &[9, 3, 7, 1, 5, 8, 2, 6, 0, 4]);

    let snap = main.snapshot(&ctx, None).unwrap();
    let mut counts: Vec<u64> = snap.select_all().iter().map(|s| s.count).collect();
    counts.sort();
    assert_eq!(counts, vec![2, 4, 4]);
    assert_eq!(pool.stats(&*snap).records, 10);
    assert_eq!(scan_keys(&main, None, None), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_sorted_input_keeps_equal_keys_together() {
    let config = LakeConfig::builder().input_mode(InputMode::Sorted).build();
    let (_engine, root) = setup_root_with(config);
    let ctx = Context::background();
    let pool = root
        .create_pool(&ctx, "P", Layout::parse("ts").unwrap(), Some(1))
        .unwrap();
    let main = pool.open_branch(&ctx, MAIN_BRANCH).unwrap();
    load(&main, &[1, 1, 1, 2, 2, 3]);

    let snap = main.snapshot(&ctx, None).unwrap();
    let mut objects: Vec<(Value, u64)> = snap
        .select_all()
        .into_iter()
        .map(|s| (s.first.clone(), s.count))
        .collect();
    objects.sort();
    assert_eq!(
        objects,
        vec![(Value::Int(1), 3), (Value::Int(2), 2), (Value::Int(3), 1)]
    );
}

#[test]
fn test_sorted_input_out_of_order_fails() {
    let config = LakeConfig::builder().input_mode(InputMode::Sorted).build();
    let (_engine, root) = setup_root_with(config);
    let ctx = Context::background();
    let pool = root
        .create_pool(&ctx, "P", Layout::parse("ts").unwrap(), Some(MB))
        .unwrap();
    let main = pool.open_branch(&ctx, MAIN_BRANCH).unwrap();

    let err = main
        .load(&ctx, recs(&[1, 3, 2]), "tester", None, None)
        .unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));
    assert!(main.snapshot(&ctx, None).unwrap().is_empty());
}

// =============================================================================
// Commit History Tests
// =============================================================================

#[test]
fn test_delete_objects() {
    let ctx = Context::background();
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    load(&main, &[1, 2]);
    let c2 = load(&main, &[3, 4]);

    let ids = main.lookup_tags(&ctx, &[c2]).unwrap();
    assert_eq!(ids.len(), 1);
    main.delete(&ctx, &ids, "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2]);

    // Deleting again is accepted but breaks replay
    main.delete(&ctx, &ids, "tester", None).unwrap();
    assert!(main
        .snapshot(&ctx, None)
        .unwrap_err()
        .is(ErrorKind::SegmentNotFound));
}

#[test]
fn test_time_travel() {
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1, 2]);
    let c2 = load(&main, &[3]);
    load(&main, &[4]);

    assert_eq!(scan_keys(&main, Some(c1), None), vec![1, 2]);
    assert_eq!(scan_keys(&main, Some(c2), None), vec![1, 2, 3]);
    assert_eq!(scan_keys(&main, None, None), vec![1, 2, 3, 4]);

    let err = main
        .snapshot(&Context::background(), Some(Uid::new()))
        .unwrap_err();
    assert!(err.is(ErrorKind::CommitNotFound));
}

#[test]
fn test_commit_messages() {
    let ctx = Context::background();
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1]);
    let c2 = main
        .load(&ctx, recs(&[2]), "alice", Some("custom"), Some("meta".to_string()))
        .unwrap();

    let commits = main.commits(&ctx).unwrap();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].id, c2);
    assert_eq!(commits[0].author, "alice");
    assert_eq!(commits[0].message, "custom");
    assert_eq!(commits[0].meta.as_deref(), Some("meta"));
    assert_eq!(commits[1].id, c1);
    assert!(commits[1].message.starts_with("loaded 1 data object\n"));
}

#[test]
fn test_lookup_tags() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1, 2]);
    let snap = main.snapshot(&ctx, None).unwrap();
    let object = snap.select_all()[0].id;

    assert!(pool.object_exists(&ctx, object).unwrap());
    assert_eq!(main.lookup_tags(&ctx, &[object]).unwrap(), vec![object]);
    assert_eq!(main.lookup_tags(&ctx, &[c1]).unwrap(), vec![object]);
    assert_eq!(main.lookup_tags(&ctx, &[c1, object]).unwrap(), vec![object]);

    // A tag pasted in hex form resolves the same way
    let hex = Uid::parse(&c1.to_hex()).unwrap();
    assert_eq!(hex, c1);
    assert_eq!(main.lookup_tags(&ctx, &[hex]).unwrap(), vec![object]);

    let err = main.lookup_tags(&ctx, &[Uid::new()]).unwrap_err();
    assert!(err.is(ErrorKind::CommitNotFound));
}

#[test]
fn test_lookup_tags_on_parent_commit() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();
    let c2 = load(&b, &[2]);

    let object = main.lookup_tags(&ctx, &[c1]).unwrap();
    assert_eq!(b.lookup_tags(&ctx, &[c1]).unwrap(), object);
    assert_eq!(b.lookup_tags(&ctx, &[c2]).unwrap().len(), 1);
    assert_eq!(b.lookup_tags(&ctx, &[c1, c2]).unwrap().len(), 2);

    // A branch commit is not visible from the parent
    assert!(main
        .lookup_tags(&ctx, &[c2])
        .unwrap_err()
        .is(ErrorKind::CommitNotFound));

    b.delete(&ctx, &object, "tester", None).unwrap();
    assert!(b.lookup_tags(&ctx, &[c1]).unwrap().is_empty());
    assert_eq!(scan_keys(&b, None, None), vec![2]);
}

#[test]
fn test_revert_load() {
    let ctx = Context::background();
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    load(&main, &[1]);
    let c2 = load(&main, &[2]);

    let r = main.revert(&ctx, c2, "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1]);
    let commits = main.commits(&ctx).unwrap();
    assert_eq!(commits[0].id, r);
    assert_eq!(commits[0].message, format!("reverted commit {}", c2));

    // Reverting the revert brings the object back
    main.revert(&ctx, r, "tester", Some("undo")).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2]);

    // Nothing left to undo once the objects are gone
    main.revert(&ctx, c2, "tester", None).unwrap();
    let err = main.revert(&ctx, c2, "tester", None).unwrap_err();
    assert!(err.is(ErrorKind::EmptyTransaction));

    let err = main.revert(&ctx, Uid::new(), "tester", None).unwrap_err();
    assert!(err.is(ErrorKind::CommitNotFound));
}

#[test]
fn test_revert_delete() {
    let ctx = Context::background();
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1]);
    load(&main, &[2]);
    let ids = main.lookup_tags(&ctx, &[c1]).unwrap();
    let d = main.delete(&ctx, &ids, "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![2]);

    main.revert(&ctx, d, "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2]);
    assert_eq!(main.lookup_tags(&ctx, &[c1]).unwrap(), ids);
}

#[test]
fn test_revert_parent_commit_on_branch() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();
    load(&b, &[2]);

    b.revert(&ctx, c1, "tester", None).unwrap();
    assert_eq!(scan_keys(&b, None, None), vec![2]);
    assert_eq!(scan_keys(&main, None, None), vec![1]);
}

// =============================================================================
// Branch and Merge Tests
// =============================================================================

#[test]
fn test_two_branches_merge() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1, 2]);

    let b = pool.create_branch(&ctx, "b", main.id(), Some(c1)).unwrap();
    assert_eq!(scan_keys(&b, None, None), vec![1, 2]);

    load(&b, &[3]);
    assert_eq!(scan_keys(&b, None, None), vec![1, 2, 3]);
    assert_eq!(scan_keys(&main, None, None), vec![1, 2]);

    let merged = b.merge(&ctx, None, "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2, 3]);
    assert_eq!(scan_keys(&b, None, None), vec![1, 2, 3]);

    // The branch tail moved past its merged commit onto the rebase note
    let (tail, base) = b.tail(&ctx).unwrap();
    assert_eq!(tail, JournalId(2));
    assert_eq!(base, main.head_position(&ctx).unwrap());
    assert_eq!(
        b.tail_history(&ctx).unwrap(),
        vec![(JournalId(1), JournalId(1)), (JournalId(2), base)]
    );

    let commits = main.commits(&ctx).unwrap();
    assert_eq!(commits[0].id, merged);
    assert_eq!(commits[0].message, "merged b into main");
}

#[test]
fn test_merge_again_after_more_loads() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();

    load(&b, &[2]);
    b.merge(&ctx, None, "tester", None).unwrap();
    load(&main, &[3]);
    load(&b, &[4]);
    b.merge(&ctx, None, "tester", None).unwrap();

    assert_eq!(scan_keys(&main, None, None), vec![1, 2, 3, 4]);
    assert_eq!(scan_keys(&b, None, None), vec![1, 2, 3, 4]);
}

#[test]
fn test_merge_without_changes_is_noop() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();
    load(&b, &[2]);
    b.merge(&ctx, None, "tester", None).unwrap();

    let before = main.head_position(&ctx).unwrap();
    b.merge(&ctx, None, "tester", None).unwrap();
    assert_eq!(main.head_position(&ctx).unwrap(), before);
    assert_eq!(scan_keys(&main, None, None), vec![1, 2]);
}

#[test]
fn test_merge_carries_deletes_of_parent_objects() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1]);
    load(&main, &[2]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();

    let first = main.lookup_tags(&ctx, &[c1]).unwrap();
    b.delete(&ctx, &first, "tester", None).unwrap();
    assert_eq!(scan_keys(&b, None, None), vec![2]);
    assert_eq!(scan_keys(&main, None, None), vec![1, 2]);

    b.merge(&ctx, None, "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![2]);
}

#[test]
fn test_merge_at_commit() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();
    let c2 = load(&b, &[2]);
    load(&b, &[3]);

    b.merge(&ctx, Some(c2), "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2]);
    // Later commits stay on the branch
    assert_eq!(scan_keys(&b, None, None), vec![1, 2, 3]);

    b.merge(&ctx, None, "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2, 3]);
}

#[test]
fn test_merge_main_fails() {
    let (_engine, _root, _pool, main) = setup_pool("ts", MB);
    load(&main, &[1]);
    let err = main
        .merge(&Context::background(), None, "tester", None)
        .unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));
}

#[test]
fn test_branch_sees_parent_commits_by_id() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1]);
    load(&main, &[2]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();

    assert_eq!(scan_keys(&b, Some(c1), None), vec![1]);
}

#[test]
fn test_branch_forked_at_older_commit() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1]);
    load(&main, &[2]);

    let b = pool.create_branch(&ctx, "b", main.id(), Some(c1)).unwrap();
    assert_eq!(scan_keys(&b, None, None), vec![1]);

    // Merging back brings only the branch's changes; main keeps its own
    load(&b, &[3]);
    b.merge(&ctx, None, "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2, 3]);
}

#[test]
fn test_merged_commits_stay_reachable() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();
    let c2 = load(&b, &[2]);
    load(&main, &[5]);

    b.merge(&ctx, None, "tester", None).unwrap();
    assert_eq!(scan_keys(&b, None, None), vec![1, 2, 5]);

    // The merged commit still resolves against the base it was written on
    assert_eq!(scan_keys(&b, Some(c2), None), vec![1, 2]);
    assert_eq!(b.lookup_tags(&ctx, &[c2]).unwrap().len(), 1);

    let messages: Vec<String> = b.commits(&ctx).unwrap().into_iter().map(|c| c.message).collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].starts_with("rebased b onto main at "));
    assert!(messages[1].starts_with("loaded 1 data object"));
}

#[test]
fn test_merge_at_commit_carries_later_commits() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();
    let c2 = load(&b, &[2]);
    let c3 = load(&b, &[3]);

    b.merge(&ctx, Some(c2), "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2]);
    assert_eq!(scan_keys(&b, None, None), vec![1, 2, 3]);
    assert_eq!(scan_keys(&b, Some(c3), None), vec![1, 2, 3]);

    // A commit from an earlier epoch merges nothing new
    b.merge(&ctx, Some(c2), "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2]);
    assert_eq!(scan_keys(&b, None, None), vec![1, 2, 3]);

    b.merge(&ctx, None, "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2, 3]);
}

#[test]
fn test_merge_write_conflict() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();
    let ids = main.lookup_tags(&ctx, &[c1]).unwrap();

    b.delete(&ctx, &ids, "tester", None).unwrap();
    load(&b, &[2]);
    main.delete(&ctx, &ids, "tester", None).unwrap();
    load(&main, &[3]);

    let head = main.head_position(&ctx).unwrap();
    let err = b.merge(&ctx, None, "tester", None).unwrap_err();
    assert!(err.is(ErrorKind::WriteConflict));
    assert_eq!(main.head_position(&ctx).unwrap(), head);
    assert_eq!(scan_keys(&main, None, None), vec![3]);
    assert_eq!(scan_keys(&b, None, None), vec![2]);
}

#[test]
fn test_nested_branch_merges_up() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();
    load(&b, &[2]);
    let c = pool.create_branch(&ctx, "c", b.id(), None).unwrap();
    load(&c, &[3]);

    assert_eq!(scan_keys(&c, None, None), vec![1, 2, 3]);
    assert_eq!(scan_keys(&c, Some(c1), None), vec![1]);
    assert_eq!(c.lookup_tags(&ctx, &[c1]).unwrap().len(), 1);

    c.merge(&ctx, None, "tester", None).unwrap();
    assert_eq!(scan_keys(&b, None, None), vec![1, 2, 3]);
    assert_eq!(scan_keys(&main, None, None), vec![1]);

    b.merge(&ctx, None, "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2, 3]);
    assert_eq!(scan_keys(&c, None, None), vec![1, 2, 3]);
}

#[test]
fn test_grandchild_survives_parent_merge() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();
    let d = pool.create_branch(&ctx, "d", b.id(), None).unwrap();
    load(&b, &[2]);
    let c = pool.create_branch(&ctx, "c", b.id(), None).unwrap();
    load(&b, &[3]);
    assert_eq!(scan_keys(&d, None, None), vec![1]);

    b.merge(&ctx, None, "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2, 3]);

    // Grandchildren keep the view they forked from
    assert_eq!(scan_keys(&c, None, None), vec![1, 2]);
    let reopened = pool.open_branch(&ctx, "c").unwrap();
    assert_eq!(scan_keys(&reopened, None, None), vec![1, 2]);
    assert_eq!(scan_keys(&d, None, None), vec![1]);
    let reopened = pool.open_branch(&ctx, "d").unwrap();
    assert_eq!(scan_keys(&reopened, None, None), vec![1]);
}

#[test]
fn test_grandchild_delete_across_parent_merge() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    let c1 = load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();
    load(&b, &[2]);
    let c = pool.create_branch(&ctx, "c", b.id(), None).unwrap();
    let ids = main.lookup_tags(&ctx, &[c1]).unwrap();

    c.delete(&ctx, &ids, "tester", None).unwrap();
    b.delete(&ctx, &ids, "tester", None).unwrap();
    b.merge(&ctx, None, "tester", None).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![2]);

    // The delete still replays over the position it was made against
    assert!(c.snapshot(&ctx, None).is_ok());
    assert_eq!(scan_keys(&c, None, None), vec![2]);
}

// =============================================================================
// Branch Table Tests
// =============================================================================

#[test]
fn test_branch_lifecycle() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();

    let err = pool.create_branch(&ctx, "b", main.id(), None).unwrap_err();
    assert!(err.is(ErrorKind::BranchExists));

    let names: Vec<String> = pool
        .list_branches(&ctx)
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["b", "main"]);
    assert_eq!(pool.lookup_branch(&ctx, "b").unwrap().parent, Some(main.id()));
    assert_eq!(pool.open_branch_by_id(&ctx, b.id()).unwrap().name(), "b");

    let err = pool.remove_branch(&ctx, MAIN_BRANCH).unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));

    pool.remove_branch(&ctx, "b").unwrap();
    assert!(pool
        .open_branch(&ctx, "b")
        .unwrap_err()
        .is(ErrorKind::BranchNotFound));
}

#[test]
fn test_create_branch_from_missing_parent() {
    let ctx = Context::background();
    let (_engine, _root, pool, _main) = setup_pool("ts", MB);
    let err = pool.create_branch(&ctx, "b", Uid::new(), None).unwrap_err();
    assert!(err.is(ErrorKind::BranchNotFound));
    assert!(pool.lookup_branch(&ctx, "b").is_err());
}

// =============================================================================
// Pool Table Tests
// =============================================================================

#[test]
fn test_pool_lifecycle() {
    let ctx = Context::background();
    let (engine, root) = setup_root();
    let pool = root
        .create_pool(&ctx, "logs", Layout::parse("ts").unwrap(), None)
        .unwrap();
    assert_eq!(pool.config().threshold, LakeConfig::default().default_threshold);

    let err = root
        .create_pool(&ctx, "logs", Layout::parse("ts").unwrap(), None)
        .unwrap_err();
    assert!(err.is(ErrorKind::PoolExists));

    assert_eq!(root.lookup_pool(&ctx, "logs").unwrap().id, pool.id());
    assert_eq!(root.open_pool(&ctx, pool.id()).unwrap().name(), "logs");
    assert_eq!(root.list_pools(&ctx).unwrap().len(), 1);

    let main_tail = pool
        .open_branch(&ctx, MAIN_BRANCH)
        .unwrap()
        .log_path()
        .join("TAIL");
    assert!(engine.exists(&main_tail).unwrap());

    root.remove_pool(&ctx, pool.id()).unwrap();
    assert!(root
        .open_pool(&ctx, pool.id())
        .unwrap_err()
        .is(ErrorKind::PoolNotFound));
    assert!(!engine.exists(&main_tail).unwrap());
    assert!(root.list_pools(&ctx).unwrap().is_empty());
}

#[test]
fn test_pool_without_keys_rejected() {
    let ctx = Context::background();
    let (_engine, root) = setup_root();
    let layout = Layout {
        order: Order::Asc,
        keys: Vec::new(),
    };
    let err = root.create_pool(&ctx, "logs", layout, None).unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));
    assert!(root.list_pools(&ctx).unwrap().is_empty());
}

#[test]
fn test_rename_pool() {
    let ctx = Context::background();
    let (_engine, root) = setup_root();
    let a = root
        .create_pool(&ctx, "a", Layout::parse("ts").unwrap(), Some(MB))
        .unwrap();
    root.create_pool(&ctx, "b", Layout::parse("ts").unwrap(), Some(MB))
        .unwrap();

    let err = root.rename_pool(&ctx, a.id(), "b").unwrap_err();
    assert!(err.is(ErrorKind::PoolExists));

    root.rename_pool(&ctx, a.id(), "c").unwrap();
    assert_eq!(root.open_pool_by_name(&ctx, "c").unwrap().id(), a.id());
    assert!(root
        .lookup_pool(&ctx, "a")
        .unwrap_err()
        .is(ErrorKind::PoolNotFound));
}

#[test]
fn test_pool_stats() {
    let ctx = Context::background();
    let (_engine, _root, pool, main) = setup_pool("ts", MB);
    let empty = pool.stats(&*main.snapshot(&ctx, None).unwrap());
    assert_eq!(empty.objects, 0);
    assert!(empty.span.is_none());

    load(&main, &[5, 9]);
    load(&main, &[1]);
    let stats = pool.stats(&*main.snapshot(&ctx, None).unwrap());
    assert_eq!(stats.objects, 2);
    assert_eq!(stats.records, 3);
    assert!(stats.size > 0);
    assert_eq!(stats.span, Some(Span::new(Value::Int(1), Value::Int(9))));
}

#[test]
fn test_create_or_open() {
    let ctx = Context::background();
    let engine: EngineRef = Arc::new(MemoryEngine::new());
    let root = Root::create_or_open(&ctx, engine.clone(), Uri::new("/lake"), LakeConfig::default())
        .unwrap();
    root.create_pool(&ctx, "logs", Layout::parse("ts").unwrap(), Some(MB))
        .unwrap();

    let again = Root::create_or_open(&ctx, engine, Uri::new("/lake"), LakeConfig::default())
        .unwrap();
    assert_eq!(again.lookup_pool(&ctx, "logs").unwrap().name, "logs");
}

// =============================================================================
// Index Rule Tests
// =============================================================================

#[test]
fn test_index_rules() {
    let ctx = Context::background();
    let (engine, root, pool, main) = setup_pool("ts", MB);
    load(&main, &[0, 1, 2, 3]);

    root.add_index_rules(&ctx, &[IndexRule::field("hosts", "host")])
        .unwrap();
    let rules = root.lookup_index_rules(&ctx, "hosts").unwrap();
    assert_eq!(rules.len(), 1);

    let snap = main.snapshot(&ctx, None).unwrap();
    let ids: Vec<Uid> = snap.select_all().iter().map(|s| s.id).collect();
    main.apply_index_rules(&ctx, &rules, &ids, "tester").unwrap();

    let snap = main.snapshot(&ctx, None).unwrap();
    let refs = snap.indexes(ids[0]);
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].rule_id, rules[0].id);

    let index = IndexObject::open(engine.as_ref(), &pool.index_path(), &refs[0]).unwrap();
    assert!(index.contains(&Value::from("h0")));
    assert!(!index.contains(&Value::from("h7")));
    assert_eq!(index.count(&Value::from("h0")), 2);

    let removed = root.delete_index_rules(&ctx, &[rules[0].id]).unwrap();
    assert_eq!(removed, rules);
    assert!(root
        .lookup_index_rules(&ctx, "hosts")
        .unwrap_err()
        .is(ErrorKind::NoSuchKey));
}

#[test]
fn test_index_merges_from_branch() {
    let ctx = Context::background();
    let (_engine, root, pool, main) = setup_pool("ts", MB);
    load(&main, &[1]);
    let b = pool.create_branch(&ctx, "b", main.id(), None).unwrap();

    root.add_index_rules(&ctx, &[IndexRule::field("hosts", "host")])
        .unwrap();
    let rules = root.all_index_rules(&ctx).unwrap();
    let ids: Vec<Uid> = b
        .snapshot(&ctx, None)
        .unwrap()
        .select_all()
        .iter()
        .map(|s| s.id)
        .collect();
    b.apply_index_rules(&ctx, &rules, &ids, "tester").unwrap();
    assert!(main.snapshot(&ctx, None).unwrap().indexes(ids[0]).is_empty());

    b.merge(&ctx, None, "tester", None).unwrap();
    assert_eq!(main.snapshot(&ctx, None).unwrap().indexes(ids[0]).len(), 1);
}

#[test]
fn test_update_index_covers_unindexed_objects() {
    let ctx = Context::background();
    let (_engine, root, _pool, main) = setup_pool("ts", MB);
    load(&main, &[1]);
    load(&main, &[2]);

    root.add_index_rules(&ctx, &[IndexRule::field("hosts", "host")])
        .unwrap();
    let hosts = root.lookup_index_rules(&ctx, "hosts").unwrap();
    let ids: Vec<Uid> = main
        .snapshot(&ctx, None)
        .unwrap()
        .select_all()
        .iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids.len(), 2);
    main.apply_index_rules(&ctx, &hosts, &ids[..1], "tester").unwrap();

    main.update_index(&ctx, &hosts, "indexer").unwrap();
    let commits = main.commits(&ctx).unwrap();
    assert_eq!(commits[0].message, "indexed 1 data object with hosts");
    let snap = main.snapshot(&ctx, None).unwrap();
    assert_eq!(snap.indexes(ids[0]).len(), 1);
    assert_eq!(snap.indexes(ids[1]).len(), 1);

    let err = main.update_index(&ctx, &hosts, "indexer").unwrap_err();
    assert!(err.is(ErrorKind::EmptyTransaction));

    // A new rule applies to every object
    root.add_index_rules(&ctx, &[IndexRule::field("stamps", "ts")])
        .unwrap();
    let all = root.all_index_rules(&ctx).unwrap();
    main.update_index(&ctx, &all, "indexer").unwrap();
    let snap = main.snapshot(&ctx, None).unwrap();
    assert_eq!(snap.indexes(ids[0]).len(), 2);
    assert_eq!(snap.indexes(ids[1]).len(), 2);
}

// =============================================================================
// Local Engine Tests
// =============================================================================

#[test]
fn test_local_lake_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let path = Uri::from(temp.path());
    let engine: EngineRef = Arc::new(LocalEngine::new());
    let ctx = Context::background();

    {
        let root = Root::create(&ctx, engine.clone(), path.clone(), LakeConfig::default()).unwrap();
        let pool = root
            .create_pool(&ctx, "logs", Layout::parse("ts").unwrap(), Some(MB))
            .unwrap();
        let main = pool.open_branch(&ctx, MAIN_BRANCH).unwrap();
        load(&main, &[3, 1, 2]);
    }

    let root = Root::open(&ctx, engine, path, LakeConfig::default()).unwrap();
    let pool = root.open_pool_by_name(&ctx, "logs").unwrap();
    let main = pool.open_branch(&ctx, MAIN_BRANCH).unwrap();
    assert_eq!(scan_keys(&main, None, None), vec![1, 2, 3]);
}
