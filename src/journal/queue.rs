//! Journal queue
//!
//! Positions are dense: `[tail..=head]` always exist. A fresh journal has
//! `head = 0` (empty) and `tail = 1`.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::LakeConfig;
use crate::context::Context;
use crate::error::{ErrorKind, LakeError, Result, ResultExt};
use crate::storage::{EngineRef, Uri};

use super::reader::{Entries, JournalReader};
use super::JournalId;

const HEAD: &str = "HEAD";
const TAIL: &str = "TAIL";

/// Handle on one journal directory
///
/// Cheap to clone; all state lives in the engine.
#[derive(Debug, Clone)]
pub struct Queue {
    engine: EngineRef,
    path: Uri,
    max_retries: usize,
    backoff: Duration,
}

impl Queue {
    /// Create a new, empty journal at `path` with base pointer `base`
    ///
    /// Fails with `ObjectExists` if a journal is already there.
    pub fn create(
        ctx: &Context,
        engine: EngineRef,
        path: Uri,
        base: JournalId,
        config: &LakeConfig,
    ) -> Result<Self> {
        ctx.check()?;
        let queue = Self::attach(engine, path, config);
        queue
            .engine
            .put_if_not_exists(&queue.path.join(TAIL), encode_tail(JournalId(1), base).as_bytes())?;
        queue
            .engine
            .put_bytes(&queue.path.join(HEAD), JournalId::NIL.to_string().as_bytes())?;
        debug!(path = %queue.path, %base, "journal created");
        Ok(queue)
    }

    /// Attach to an existing journal; `ObjectNotFound` if there is none
    pub fn open(ctx: &Context, engine: EngineRef, path: Uri, config: &LakeConfig) -> Result<Self> {
        ctx.check()?;
        let queue = Self::attach(engine, path, config);
        let tail = queue.path.join(TAIL);
        if !queue.engine.exists(&tail)? {
            return Err(LakeError::ObjectNotFound(queue.path.to_string()));
        }
        Ok(queue)
    }

    fn attach(engine: EngineRef, path: Uri, config: &LakeConfig) -> Self {
        Self {
            engine,
            path,
            max_retries: config.max_retries,
            backoff: config.retry_backoff,
        }
    }

    pub fn path(&self) -> &Uri {
        &self.path
    }

    fn entry_uri(&self, id: JournalId) -> Uri {
        self.path.join(id.to_string())
    }

    // -------------------------------------------------------------------------
    // Boundaries
    // -------------------------------------------------------------------------

    /// Current head, `NIL` when the journal is empty
    ///
    /// The `HEAD` object is only a hint: a writer that crashed between the
    /// entry and the hint leaves it behind, so scan forward and repair.
    pub fn head(&self, ctx: &Context) -> Result<JournalId> {
        ctx.check()?;
        let hint = match self.engine.get_bytes(&self.path.join(HEAD)) {
            Ok(bytes) => parse_id(&bytes, &self.path)?,
            Err(e) if e.is(ErrorKind::ObjectNotFound) => JournalId::NIL,
            Err(e) => return Err(e),
        };

        let mut head = hint;
        while self.engine.exists(&self.entry_uri(head.next()))? {
            ctx.check()?;
            head = head.next();
        }

        if head != hint {
            debug!(path = %self.path, %hint, %head, "repairing stale journal head");
            self.write_head(head);
        }
        Ok(head)
    }

    /// Current head; `JournalEmpty` when there are no entries
    pub fn read_head(&self, ctx: &Context) -> Result<JournalId> {
        let head = self.head(ctx)?;
        if head.is_nil() {
            return Err(LakeError::JournalEmpty);
        }
        Ok(head)
    }

    /// Current `(tail, base)`, the last line of the `TAIL` object
    pub fn read_tail(&self, ctx: &Context) -> Result<(JournalId, JournalId)> {
        let history = self.tail_history(ctx)?;
        history
            .last()
            .copied()
            .ok_or_else(|| LakeError::Corruption(format!("{}: empty TAIL", self.path)))
    }

    /// Every `(tail, base)` the journal has had, oldest first
    pub fn tail_history(&self, ctx: &Context) -> Result<Vec<(JournalId, JournalId)>> {
        ctx.check()?;
        let bytes = self
            .engine
            .get_bytes(&self.path.join(TAIL))
            .context(|| format!("journal {}", self.path))?;
        let text = String::from_utf8_lossy(&bytes);
        let mut history = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let mut parts = line.split_whitespace();
            let tail = parts.next().and_then(|s| s.parse::<u64>().ok());
            let base = parts.next().and_then(|s| s.parse::<u64>().ok());
            match (tail, base) {
                (Some(tail), Some(base)) => history.push((JournalId(tail), JournalId(base))),
                _ => {
                    return Err(LakeError::Corruption(format!(
                        "{}: bad TAIL line {:?}",
                        self.path, line
                    )))
                }
            }
        }
        if history.is_empty() {
            return Err(LakeError::Corruption(format!("{}: empty TAIL", self.path)));
        }
        Ok(history)
    }

    /// `(head, tail)`
    pub fn boundaries(&self, ctx: &Context) -> Result<(JournalId, JournalId)> {
        let head = self.head(ctx)?;
        let (tail, _) = self.read_tail(ctx)?;
        Ok((head, tail))
    }

    /// Logically drop entries below `tail` and record a new base pointer
    ///
    /// The replaced `(tail, base)` stays in the history. The tail never
    /// moves backwards.
    pub fn move_tail(&self, ctx: &Context, tail: JournalId, base: JournalId) -> Result<()> {
        ctx.check()?;
        if tail.is_nil() {
            return Err(LakeError::InvalidArgument(
                "journal tail cannot be nil".to_string(),
            ));
        }
        let mut history = self.tail_history(ctx)?;
        if let Some((current, _)) = history.last() {
            if tail < *current {
                return Err(LakeError::InvalidArgument(format!(
                    "{}: tail {} is below the current tail {}",
                    self.path, tail, current
                )));
            }
        }
        history.push((tail, base));
        let lines: Vec<String> = history.iter().map(|(t, b)| encode_tail(*t, *b)).collect();
        self.engine
            .put_bytes(&self.path.join(TAIL), lines.join("\n").as_bytes())?;
        debug!(path = %self.path, %tail, %base, "journal tail moved");
        Ok(())
    }

    fn write_head(&self, head: JournalId) {
        if let Err(e) = self
            .engine
            .put_bytes(&self.path.join(HEAD), head.to_string().as_bytes())
        {
            warn!(path = %self.path, error = %e, "failed to update journal head hint");
        }
    }

    // -------------------------------------------------------------------------
    // Commits
    // -------------------------------------------------------------------------

    /// Append `payload` at `expected + 1` only if `expected` is the head
    ///
    /// Returns the new position, or `ObjectExists` if another writer got
    /// there first.
    pub fn commit_at(&self, ctx: &Context, expected: JournalId, payload: &[u8]) -> Result<JournalId> {
        ctx.check()?;
        if !expected.is_nil() && !self.engine.exists(&self.entry_uri(expected))? {
            return Err(LakeError::InvalidArgument(format!(
                "{}: commit after missing position {}",
                self.path, expected
            )));
        }
        let at = expected.next();
        self.engine.put_if_not_exists(&self.entry_uri(at), payload)?;
        self.write_head(at);
        debug!(path = %self.path, position = %at, bytes = payload.len(), "journal commit");
        Ok(at)
    }

    /// Append `payload` at the head, retrying lost races
    pub fn commit(&self, ctx: &Context, payload: &[u8]) -> Result<JournalId> {
        for attempt in 1..=self.max_retries {
            let head = self.head(ctx)?;
            match self.commit_at(ctx, head, payload) {
                Ok(at) => return Ok(at),
                Err(e) if e.is(ErrorKind::ObjectExists) => {
                    debug!(path = %self.path, attempt, "journal commit collided, retrying");
                    ctx.sleep(self.backoff)?;
                }
                Err(e) => return Err(e),
            }
        }
        warn!(path = %self.path, attempts = self.max_retries, "journal commit gave up");
        Err(LakeError::RetriesExceeded {
            what: "journal commit",
            attempts: self.max_retries,
        })
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Payload at one position
    pub fn load(&self, ctx: &Context, id: JournalId) -> Result<Bytes> {
        ctx.check()?;
        let bytes = self
            .engine
            .get_bytes(&self.entry_uri(id))
            .context(|| format!("journal {} position {}", self.path, id))?;
        Ok(Bytes::from(bytes))
    }

    /// Iterate `(position, payload)` over `[from..=to]`, ascending
    pub fn entries(&self, ctx: &Context, from: JournalId, to: JournalId) -> Entries {
        Entries::new(self.clone(), ctx.clone(), from, to)
    }

    /// Byte stream of the payloads in `[from..=to]`, ascending
    pub fn reader(&self, ctx: &Context, from: JournalId, to: JournalId) -> JournalReader {
        JournalReader::new(self.entries(ctx, from, to))
    }
}

fn encode_tail(tail: JournalId, base: JournalId) -> String {
    format!("{} {}", tail, base)
}

fn parse_id(bytes: &[u8], path: &Uri) -> Result<JournalId> {
    let text = String::from_utf8_lossy(bytes);
    text.trim()
        .parse::<u64>()
        .map(JournalId)
        .map_err(|_| LakeError::Corruption(format!("{}: bad HEAD {:?}", path, text)))
}
