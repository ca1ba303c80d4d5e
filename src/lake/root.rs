//! Lake root
//!
//! The root directory holds two KV tables, the pool table and the index
//! rule table, plus one directory per pool:
//!
//! ```text
//! <root>/
//!   ├── pools/          KV journal of PoolConfig, keyed by name
//!   ├── index_rules/    KV journal of IndexRule, keyed by name/id
//!   └── <pool-id>/
//! ```

use tracing::{info, warn};

use crate::config::LakeConfig;
use crate::context::Context;
use crate::error::{ErrorKind, LakeError, Result};
use crate::index::IndexRule;
use crate::kvs::KvStore;
use crate::record::Layout;
use crate::storage::{EngineRef, Uri};
use crate::uid::Uid;

use super::pool::{Pool, PoolConfig};

const POOLS: &str = "pools";
const INDEX_RULES: &str = "index_rules";

/// Entry point to a lake
pub struct Root {
    engine: EngineRef,
    path: Uri,
    config: LakeConfig,
    pools: KvStore<PoolConfig>,
    rules: KvStore<IndexRule>,
}

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root").field("path", &self.path).finish()
    }
}

impl Root {
    /// Initialize a new lake at `path`
    pub fn create(ctx: &Context, engine: EngineRef, path: Uri, config: LakeConfig) -> Result<Self> {
        let pools = KvStore::create(ctx, engine.clone(), path.join(POOLS), &config)?;
        let rules = KvStore::create(ctx, engine.clone(), path.join(INDEX_RULES), &config)?;
        info!(path = %path, "lake created");
        Ok(Self {
            engine,
            path,
            config,
            pools,
            rules,
        })
    }

    /// Attach to the lake at `path`
    pub fn open(ctx: &Context, engine: EngineRef, path: Uri, config: LakeConfig) -> Result<Self> {
        let pools = KvStore::open(ctx, engine.clone(), path.join(POOLS), &config)?;
        let rules = KvStore::open(ctx, engine.clone(), path.join(INDEX_RULES), &config)?;
        Ok(Self {
            engine,
            path,
            config,
            pools,
            rules,
        })
    }

    pub fn create_or_open(
        ctx: &Context,
        engine: EngineRef,
        path: Uri,
        config: LakeConfig,
    ) -> Result<Self> {
        match Self::open(ctx, engine.clone(), path.clone(), config.clone()) {
            Err(e) if e.is(ErrorKind::ObjectNotFound) => Self::create(ctx, engine, path, config),
            other => other,
        }
    }

    pub fn path(&self) -> &Uri {
        &self.path
    }

    pub fn config(&self) -> &LakeConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Pools
    // -------------------------------------------------------------------------

    /// Register and lay out a new pool; the pool's default threshold
    /// applies when `threshold` is `None`
    pub fn create_pool(
        &self,
        ctx: &Context,
        name: &str,
        layout: Layout,
        threshold: Option<u64>,
    ) -> Result<Pool> {
        layout
            .validate()
            .map_err(|e| e.context(format!("pool {}", name)))?;
        let threshold = threshold.unwrap_or(self.config.default_threshold);
        let config = PoolConfig::new(name, layout, threshold);
        let id = config.id;
        self.pools
            .insert(ctx, name, config.clone())
            .map_err(|e| match e.kind() {
                ErrorKind::KeyExists => LakeError::PoolExists(name.to_string()),
                _ => e,
            })?;

        match Pool::create(ctx, self.engine.clone(), &self.path, config, &self.config) {
            Ok(pool) => Ok(pool),
            Err(e) => {
                if let Err(undo) = self.engine.delete_by_prefix(&self.path.join(id.to_string())) {
                    warn!(error = %undo, pool = %name, "failed to clean up pool directory");
                }
                if let Err(undo) =
                    self.pools
                        .delete(ctx, name, Some(&|c: &PoolConfig| c.id == id))
                {
                    warn!(error = %undo, pool = %name, "failed to remove pool entry");
                }
                Err(e)
            }
        }
    }

    pub fn open_pool(&self, ctx: &Context, id: Uid) -> Result<Pool> {
        let config = self.lookup_pool_by_id(ctx, id)?;
        Pool::open(ctx, self.engine.clone(), &self.path, config, &self.config)
    }

    pub fn open_pool_by_name(&self, ctx: &Context, name: &str) -> Result<Pool> {
        let config = self.lookup_pool(ctx, name)?;
        Pool::open(ctx, self.engine.clone(), &self.path, config, &self.config)
    }

    pub fn lookup_pool(&self, ctx: &Context, name: &str) -> Result<PoolConfig> {
        self.pools.lookup(ctx, name).map_err(|e| match e.kind() {
            ErrorKind::NoSuchKey => LakeError::PoolNotFound(name.to_string()),
            _ => e,
        })
    }

    pub fn lookup_pool_by_id(&self, ctx: &Context, id: Uid) -> Result<PoolConfig> {
        self.pools
            .values(ctx)?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| LakeError::PoolNotFound(id.to_string()))
    }

    /// Every pool, ordered by name
    pub fn list_pools(&self, ctx: &Context) -> Result<Vec<PoolConfig>> {
        self.pools.values(ctx)
    }

    /// Drop the pool's entry, then everything stored under it
    pub fn remove_pool(&self, ctx: &Context, id: Uid) -> Result<()> {
        let config = self.lookup_pool_by_id(ctx, id)?;
        // A concurrent rename moves the entry; the id check catches a
        // different pool reusing the name
        self.pools
            .delete(ctx, &config.name, Some(&|c: &PoolConfig| c.id == id))
            .map_err(|e| match e.kind() {
                ErrorKind::NoSuchKey | ErrorKind::ConstraintFailed => {
                    LakeError::PoolNotFound(config.name.clone())
                }
                _ => e,
            })?;
        self.engine
            .delete_by_prefix(&self.path.join(id.to_string()))?;
        info!(pool = %config.name, %id, "pool removed");
        Ok(())
    }

    pub fn rename_pool(&self, ctx: &Context, id: Uid, new_name: &str) -> Result<()> {
        let config = self.lookup_pool_by_id(ctx, id)?;
        let renamed = PoolConfig {
            name: new_name.to_string(),
            ..config.clone()
        };
        self.pools
            .move_key(ctx, &config.name, new_name, renamed)
            .map_err(|e| match e.kind() {
                ErrorKind::KeyExists => LakeError::PoolExists(new_name.to_string()),
                ErrorKind::NoSuchKey => LakeError::PoolNotFound(config.name.clone()),
                _ => e,
            })?;
        info!(from = %config.name, to = %new_name, "pool renamed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Index rules
    // -------------------------------------------------------------------------

    /// Add rules one at a time; a failure leaves earlier rules in place
    pub fn add_index_rules(&self, ctx: &Context, rules: &[IndexRule]) -> Result<()> {
        for rule in rules {
            self.rules.insert(ctx, &rule.key(), rule.clone())?;
        }
        Ok(())
    }

    /// Remove rules by id, returning the removed rules
    pub fn delete_index_rules(&self, ctx: &Context, ids: &[Uid]) -> Result<Vec<IndexRule>> {
        let all = self.rules.values(ctx)?;
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            let rule = all
                .iter()
                .find(|r| r.id == *id)
                .ok_or_else(|| LakeError::NoSuchKey(format!("index rule {}", id)))?;
            removed.push(self.rules.delete(ctx, &rule.key(), None)?);
        }
        Ok(removed)
    }

    /// Rules named `name`; `NoSuchKey` if there are none
    pub fn lookup_index_rules(&self, ctx: &Context, name: &str) -> Result<Vec<IndexRule>> {
        let rules: Vec<IndexRule> = self
            .rules
            .values(ctx)?
            .into_iter()
            .filter(|r| r.name == name)
            .collect();
        if rules.is_empty() {
            return Err(LakeError::NoSuchKey(name.to_string()));
        }
        Ok(rules)
    }

    /// Every rule, ordered by name then id
    pub fn all_index_rules(&self, ctx: &Context) -> Result<Vec<IndexRule>> {
        self.rules.values(ctx)
    }
}
