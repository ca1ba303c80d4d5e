//! Pools
//!
//! A pool is a named set of branches sharing one sort layout and object
//! threshold. Its directory holds the data objects, their index objects,
//! the branch table and one commit log per branch:
//!
//! ```text
//! <root>/<pool-id>/
//!   ├── data/          <object-id>.row, <object-id>.seek
//!   ├── index/         <rule-id>/<object-id>.idx
//!   ├── branches/      KV journal of BranchConfig
//!   └── <branch-id>/J/ commit log
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::commit::View;
use crate::config::LakeConfig;
use crate::context::Context;
use crate::error::{ErrorKind, LakeError, Result, ResultExt};
use crate::journal::JournalId;
use crate::kvs::KvStore;
use crate::record::Layout;
use crate::segment::row_uri;
use crate::span::Span;
use crate::storage::{EngineRef, Uri};
use crate::uid::Uid;

use super::branch::{Branch, BranchConfig};
use super::writer::Writer;

/// Name of the branch every pool starts with
pub const MAIN_BRANCH: &str = "main";

const POOL_CONFIG_VERSION: u32 = 1;

/// Persistent description of a pool, kept in the root's pool table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub version: u32,
    pub id: Uid,
    pub name: String,
    pub layout: Layout,
    /// Target size of a data object in bytes
    pub threshold: u64,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>, layout: Layout, threshold: u64) -> Self {
        Self {
            version: POOL_CONFIG_VERSION,
            id: Uid::new(),
            name: name.into(),
            layout,
            threshold,
        }
    }
}

/// Totals over the objects of a snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    pub objects: u64,
    pub records: u64,
    /// Bytes of row files
    pub size: u64,
    pub row_size: u64,
    /// Smallest span covering every object, `None` when there are none
    pub span: Option<Span>,
}

struct PoolInner {
    engine: EngineRef,
    path: Uri,
    config: PoolConfig,
    lake: LakeConfig,
    branches: KvStore<BranchConfig>,
}

/// Handle on an open pool; cheap to clone
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.config.name)
            .field("id", &self.inner.config.id)
            .finish()
    }
}

impl Pool {
    /// Lay out a new pool under `root` and create its main branch
    pub(crate) fn create(
        ctx: &Context,
        engine: EngineRef,
        root: &Uri,
        config: PoolConfig,
        lake: &LakeConfig,
    ) -> Result<Self> {
        let path = root.join(config.id.to_string());
        let branches = KvStore::create(ctx, engine.clone(), path.join("branches"), lake)?;
        let pool = Self::with_parts(engine, path, config, lake, branches);
        pool.create_branch_at(ctx, MAIN_BRANCH, None, JournalId::NIL)?;
        info!(pool = %pool.name(), id = %pool.id(), "pool created");
        Ok(pool)
    }

    pub(crate) fn open(
        ctx: &Context,
        engine: EngineRef,
        root: &Uri,
        config: PoolConfig,
        lake: &LakeConfig,
    ) -> Result<Self> {
        let path = root.join(config.id.to_string());
        let branches = KvStore::open(ctx, engine.clone(), path.join("branches"), lake)
            .context(|| config.name.clone())?;
        Ok(Self::with_parts(engine, path, config, lake, branches))
    }

    fn with_parts(
        engine: EngineRef,
        path: Uri,
        config: PoolConfig,
        lake: &LakeConfig,
        branches: KvStore<BranchConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                engine,
                path,
                config,
                lake: lake.clone(),
                branches,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn id(&self) -> Uid {
        self.inner.config.id
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.config.layout
    }

    pub fn path(&self) -> &Uri {
        &self.inner.path
    }

    pub fn data_path(&self) -> Uri {
        self.inner.path.join("data")
    }

    pub fn index_path(&self) -> Uri {
        self.inner.path.join("index")
    }

    pub(crate) fn engine(&self) -> &EngineRef {
        &self.inner.engine
    }

    pub(crate) fn lake_config(&self) -> &LakeConfig {
        &self.inner.lake
    }

    /// Directory of a branch's commit log
    pub(crate) fn branch_path(&self, id: Uid) -> Uri {
        self.inner.path.join(id.to_string())
    }

    /// A writer producing data objects for this pool
    pub fn writer(&self, ctx: &Context) -> Writer {
        Writer::new(
            ctx,
            self.inner.engine.clone(),
            self.data_path(),
            self.inner.config.layout.clone(),
            self.inner.config.threshold,
            self.inner.lake.seek_stride,
            self.inner.lake.input_mode,
        )
    }

    // -------------------------------------------------------------------------
    // Branches
    // -------------------------------------------------------------------------

    /// Fork `name` from branch `parent` at commit `at` (its head if `None`)
    pub fn create_branch(
        &self,
        ctx: &Context,
        name: &str,
        parent: Uid,
        at: Option<Uid>,
    ) -> Result<Branch> {
        let parent = self.open_branch_by_id(ctx, parent)?;
        let head = parent.head_position(ctx)?;
        let position = match at {
            None => head,
            Some(commit) => parent.position_of(ctx, head, commit)?,
        };
        self.create_branch_at(ctx, name, Some(parent.id()), position)
    }

    /// Insert the branch entry, then create its log; undo the entry on failure
    fn create_branch_at(
        &self,
        ctx: &Context,
        name: &str,
        parent: Option<Uid>,
        base: JournalId,
    ) -> Result<Branch> {
        let config = BranchConfig {
            id: Uid::new(),
            name: name.to_string(),
            parent,
        };
        self.inner
            .branches
            .insert(ctx, name, config.clone())
            .map_err(|e| match e.kind() {
                ErrorKind::KeyExists => {
                    LakeError::BranchExists(format!("{}/{}", self.name(), name))
                }
                _ => e,
            })?;

        match Branch::create(ctx, self.clone(), config.clone(), base) {
            Ok(branch) => {
                info!(pool = %self.name(), branch = %name, %base, "branch created");
                Ok(branch)
            }
            Err(e) => {
                let id = config.id;
                if let Err(undo) = self.inner.engine.delete_by_prefix(&self.branch_path(id)) {
                    warn!(error = %undo, branch = %name, "failed to clean up branch log");
                }
                if let Err(undo) =
                    self.inner
                        .branches
                        .delete(ctx, name, Some(&|c: &BranchConfig| c.id == id))
                {
                    warn!(error = %undo, branch = %name, "failed to remove branch entry");
                }
                Err(e)
            }
        }
    }

    pub fn open_branch(&self, ctx: &Context, name: &str) -> Result<Branch> {
        let config = self.lookup_branch(ctx, name)?;
        Branch::open(ctx, self.clone(), config)
    }

    pub fn open_branch_by_id(&self, ctx: &Context, id: Uid) -> Result<Branch> {
        let config = self.lookup_branch_by_id(ctx, id)?;
        Branch::open(ctx, self.clone(), config)
    }

    pub fn lookup_branch(&self, ctx: &Context, name: &str) -> Result<BranchConfig> {
        self.inner
            .branches
            .lookup(ctx, name)
            .map_err(|e| match e.kind() {
                ErrorKind::NoSuchKey => {
                    LakeError::BranchNotFound(format!("{}/{}", self.name(), name))
                }
                _ => e,
            })
    }

    pub fn lookup_branch_by_id(&self, ctx: &Context, id: Uid) -> Result<BranchConfig> {
        self.inner
            .branches
            .values(ctx)?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| LakeError::BranchNotFound(format!("{}/{}", self.name(), id)))
    }

    /// Every branch, ordered by name
    pub fn list_branches(&self, ctx: &Context) -> Result<Vec<BranchConfig>> {
        self.inner.branches.values(ctx)
    }

    /// Remove a branch and its commit log; refused while other branches
    /// were forked from it
    pub fn remove_branch(&self, ctx: &Context, name: &str) -> Result<()> {
        let config = self.lookup_branch(ctx, name)?;
        let branches = self.list_branches(ctx)?;
        if let Some(child) = branches.iter().find(|c| c.parent == Some(config.id)) {
            return Err(LakeError::InvalidArgument(format!(
                "{}/{}: branch has child {}",
                self.name(),
                name,
                child.name
            )));
        }

        let id = config.id;
        self.inner
            .branches
            .delete(ctx, name, Some(&|c: &BranchConfig| c.id == id))
            .map_err(|e| match e.kind() {
                ErrorKind::NoSuchKey | ErrorKind::ConstraintFailed => {
                    LakeError::BranchNotFound(format!("{}/{}", self.name(), name))
                }
                _ => e,
            })?;
        self.inner.engine.delete_by_prefix(&self.branch_path(id))?;
        info!(pool = %self.name(), branch = %name, "branch removed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Objects
    // -------------------------------------------------------------------------

    /// Whether a data object with this id is in storage
    pub fn object_exists(&self, ctx: &Context, id: Uid) -> Result<bool> {
        ctx.check()?;
        self.inner.engine.exists(&row_uri(&self.data_path(), id))
    }

    /// Totals over the objects visible in `snap`
    pub fn stats(&self, snap: &impl View) -> PoolStats {
        let mut stats = PoolStats::default();
        for seg in snap.select_all() {
            stats.objects += 1;
            stats.records += seg.count;
            stats.size += seg.size;
            stats.row_size += seg.row_size;
            match &mut stats.span {
                Some(span) => span.extend(&seg.span()),
                None => stats.span = Some(seg.span()),
            }
        }
        stats
    }
}
