//! KV store over a journal

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LakeConfig;
use crate::context::Context;
use crate::error::{ErrorKind, LakeError, Result};
use crate::journal::{JournalId, Queue};
use crate::record::codec::{decode_all, encode_all};
use crate::storage::{EngineRef, Uri};

use super::Entry;

const SNAP: &str = "snap";

/// Precondition checked against the current value before a write
pub type Constraint<'a, T> = &'a dyn Fn(&T) -> bool;

/// Replayed table state
struct Table<T> {
    entries: BTreeMap<String, T>,
    at: JournalId,
    loaded_at: Option<Instant>,
}

impl<T> Table<T> {
    fn apply(&mut self, batch: Vec<Entry<T>>) {
        for entry in batch {
            match entry.value {
                Some(v) => {
                    self.entries.insert(entry.key, v);
                }
                None => {
                    self.entries.remove(&entry.key);
                }
            }
        }
    }
}

/// Persisted table image
#[derive(Serialize, Deserialize)]
struct Snap<T> {
    at: JournalId,
    entries: Vec<(String, T)>,
}

/// A journaled key → value table
///
/// ## Concurrency:
/// - `table`: RwLock; reloads and local applies take the write side
/// - Mutations are linearized by journal position, not by the lock
pub struct KvStore<T> {
    engine: EngineRef,
    queue: Queue,
    table: RwLock<Table<T>>,
    staleness: Duration,
    snapshot_interval: u64,
    max_retries: usize,
    backoff: Duration,
}

impl<T> KvStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Create an empty store at `path`
    pub fn create(ctx: &Context, engine: EngineRef, path: Uri, config: &LakeConfig) -> Result<Self> {
        let queue = Queue::create(ctx, engine.clone(), path, JournalId::NIL, config)?;
        Ok(Self::with_queue(engine, queue, config))
    }

    /// Open the store at `path`
    pub fn open(ctx: &Context, engine: EngineRef, path: Uri, config: &LakeConfig) -> Result<Self> {
        let queue = Queue::open(ctx, engine.clone(), path, config)?;
        Ok(Self::with_queue(engine, queue, config))
    }

    fn with_queue(engine: EngineRef, queue: Queue, config: &LakeConfig) -> Self {
        Self {
            engine,
            queue,
            table: RwLock::new(Table {
                entries: BTreeMap::new(),
                at: JournalId::NIL,
                loaded_at: None,
            }),
            staleness: config.kv_staleness,
            snapshot_interval: config.kv_snapshot_interval,
            max_retries: config.max_retries,
            backoff: config.retry_backoff,
        }
    }

    pub fn path(&self) -> &Uri {
        self.queue.path()
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Replay the journal up to its head
    pub fn load(&self, ctx: &Context) -> Result<()> {
        let head = self.queue.head(ctx)?;
        let mut table = self.table.write();

        if table.at.is_nil() && !head.is_nil() {
            if let Some(snap) = self.read_snap()? {
                if snap.at <= head {
                    debug!(path = %self.path(), at = %snap.at, "kv store loaded snapshot");
                    table.entries = snap.entries.into_iter().collect();
                    table.at = snap.at;
                }
            }
        }

        let mut replayed = 0u64;
        if head > table.at {
            for item in self.queue.entries(ctx, table.at.next(), head) {
                let (id, payload) = item?;
                let batch: Vec<Entry<T>> = decode_all(&payload)?;
                table.apply(batch);
                table.at = id;
                replayed += 1;
            }
        }
        table.loaded_at = Some(Instant::now());

        if replayed > 0 {
            debug!(path = %self.path(), replayed, at = %table.at, "kv store reloaded");
        }
        if replayed > self.snapshot_interval {
            self.write_snap(&table);
        }
        Ok(())
    }

    fn read_snap(&self) -> Result<Option<Snap<T>>> {
        let bytes = match self.engine.get_bytes(&self.path().join(SNAP)) {
            Ok(bytes) => bytes,
            Err(e) if e.is(ErrorKind::ObjectNotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut snaps: Vec<Snap<T>> = decode_all(&bytes)?;
        Ok(snaps.pop())
    }

    fn write_snap(&self, table: &Table<T>) {
        let snap = Snap {
            at: table.at,
            entries: table
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let result = encode_all(std::iter::once(&snap))
            .and_then(|bytes| self.engine.put_bytes(&self.path().join(SNAP), &bytes));
        match result {
            Ok(()) => debug!(path = %self.path(), at = %table.at, "kv store snapshot written"),
            Err(e) => warn!(path = %self.path(), error = %e, "failed to write kv store snapshot"),
        }
    }

    fn load_if_stale(&self, ctx: &Context) -> Result<()> {
        let stale = match self.table.read().loaded_at {
            Some(t) => t.elapsed() > self.staleness,
            None => true,
        };
        if stale {
            self.load(ctx)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Value for `key`, reloading first if the table is stale
    pub fn lookup(&self, ctx: &Context, key: &str) -> Result<T> {
        self.load_if_stale(ctx)?;
        self.table
            .read()
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| LakeError::NoSuchKey(key.to_string()))
    }

    /// Every value, ordered by key
    pub fn all(&self, ctx: &Context) -> Result<Vec<T>> {
        self.load(ctx)?;
        Ok(self.table.read().entries.values().cloned().collect())
    }

    /// Every `(key, value)` pair, ordered by key
    pub fn entries(&self, ctx: &Context) -> Result<Vec<(String, T)>> {
        self.load(ctx)?;
        Ok(self
            .table
            .read()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    pub fn keys(&self, ctx: &Context) -> Result<Vec<String>> {
        self.load(ctx)?;
        Ok(self.table.read().entries.keys().cloned().collect())
    }

    pub fn values(&self, ctx: &Context) -> Result<Vec<T>> {
        self.all(ctx)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Add `key`; `KeyExists` if it is already present
    pub fn insert(&self, ctx: &Context, key: &str, value: T) -> Result<()> {
        self.mutate(ctx, "kv insert", |entries| {
            if entries.contains_key(key) {
                return Err(LakeError::KeyExists(key.to_string()));
            }
            Ok(vec![Entry {
                key: key.to_string(),
                value: Some(value.clone()),
            }])
        })
    }

    /// Replace the value of an existing key
    pub fn update(
        &self,
        ctx: &Context,
        key: &str,
        value: T,
        constraint: Option<Constraint<'_, T>>,
    ) -> Result<()> {
        self.mutate(ctx, "kv update", |entries| {
            check(entries, key, constraint)?;
            Ok(vec![Entry {
                key: key.to_string(),
                value: Some(value.clone()),
            }])
        })
    }

    /// Remove `key`, returning its last value
    pub fn delete(
        &self,
        ctx: &Context,
        key: &str,
        constraint: Option<Constraint<'_, T>>,
    ) -> Result<T> {
        let mut removed = None;
        self.mutate(ctx, "kv delete", |entries| {
            removed = Some(check(entries, key, constraint)?.clone());
            Ok(vec![Entry {
                key: key.to_string(),
                value: None,
            }])
        })?;
        removed.ok_or_else(|| LakeError::NoSuchKey(key.to_string()))
    }

    /// Atomically re-key an entry and replace its value
    pub fn move_key(&self, ctx: &Context, old_key: &str, new_key: &str, value: T) -> Result<()> {
        self.mutate(ctx, "kv move", |entries| {
            check(entries, old_key, None)?;
            if old_key != new_key && entries.contains_key(new_key) {
                return Err(LakeError::KeyExists(new_key.to_string()));
            }
            Ok(vec![
                Entry {
                    key: old_key.to_string(),
                    value: None,
                },
                Entry {
                    key: new_key.to_string(),
                    value: Some(value.clone()),
                },
            ])
        })
    }

    /// Replay, check, commit at the replayed position; retry lost races
    fn mutate<F>(&self, ctx: &Context, what: &'static str, mut build: F) -> Result<()>
    where
        F: FnMut(&BTreeMap<String, T>) -> Result<Vec<Entry<T>>>,
    {
        for attempt in 1..=self.max_retries {
            self.load(ctx)?;
            let (at, batch) = {
                let table = self.table.read();
                (table.at, build(&table.entries)?)
            };
            let payload = encode_all(&batch)?;

            match self.queue.commit_at(ctx, at, &payload) {
                Ok(position) => {
                    let mut table = self.table.write();
                    if table.at == at {
                        table.apply(batch);
                        table.at = position;
                    }
                    return Ok(());
                }
                Err(e) if e.is(ErrorKind::ObjectExists) => {
                    debug!(path = %self.path(), attempt, what, "kv commit collided, retrying");
                    ctx.sleep(self.backoff)?;
                }
                Err(e) => return Err(e),
            }
        }
        warn!(path = %self.path(), what, attempts = self.max_retries, "kv commit gave up");
        Err(LakeError::RetriesExceeded {
            what,
            attempts: self.max_retries,
        })
    }
}

fn check<'a, T>(
    entries: &'a BTreeMap<String, T>,
    key: &str,
    constraint: Option<Constraint<'_, T>>,
) -> Result<&'a T> {
    let current = entries
        .get(key)
        .ok_or_else(|| LakeError::NoSuchKey(key.to_string()))?;
    if let Some(ok) = constraint {
        if !ok(current) {
            return Err(LakeError::ConstraintFailed(key.to_string()));
        }
    }
    Ok(current)
}
