//! Configuration for the lake
//!
//! Centralized configuration with sensible defaults. A [`LakeConfig`] is
//! handed to [`crate::Root`] and flows down to every pool and branch.

use std::time::Duration;

/// Main configuration for a lake instance
#[derive(Debug, Clone)]
pub struct LakeConfig {
    // -------------------------------------------------------------------------
    // Pool Configuration
    // -------------------------------------------------------------------------
    /// Threshold used by pools created without an explicit one (in bytes)
    pub default_threshold: u64,

    // -------------------------------------------------------------------------
    // Data Object Configuration
    // -------------------------------------------------------------------------
    /// Bytes of row data between two seek index entries
    pub seek_stride: u64,

    /// How loaded records are written into data objects
    pub input_mode: InputMode,

    // -------------------------------------------------------------------------
    // Journal / KV Configuration
    // -------------------------------------------------------------------------
    /// Attempts made by journal and KV commits before giving up
    pub max_retries: usize,

    /// Sleep between two commit attempts
    pub retry_backoff: Duration,

    /// Age after which a KV lookup reloads the table
    pub kv_staleness: Duration,

    /// Replayed entries after which a KV store writes a snapshot
    pub kv_snapshot_interval: u64,

    /// Replayed snapshots each commit log keeps in memory
    pub snapshot_cache_size: usize,

    // -------------------------------------------------------------------------
    // Scan Configuration
    // -------------------------------------------------------------------------
    /// Depth of the channel between the partitioner and scan workers
    pub partition_channel_depth: usize,
}

/// How a branch writer treats incoming records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Buffer to the pool threshold, stable sort, then write (double buffered)
    Unsorted,

    /// Records already arrive in pool order; write straight through
    Sorted,
}

impl Default for LakeConfig {
    fn default() -> Self {
        Self {
            default_threshold: 500 * 1024 * 1024, // 500 MiB
            seek_stride: 64 * 1024,               // 64 KiB
            input_mode: InputMode::Unsorted,
            max_retries: 10,
            retry_backoff: Duration::from_millis(1),
            kv_staleness: Duration::from_secs(1),
            kv_snapshot_interval: 10,
            snapshot_cache_size: 8,
            partition_channel_depth: 10,
        }
    }
}

impl LakeConfig {
    /// Create a new config builder
    pub fn builder() -> LakeConfigBuilder {
        LakeConfigBuilder::default()
    }
}

/// Builder for LakeConfig
#[derive(Default)]
pub struct LakeConfigBuilder {
    config: LakeConfig,
}

impl LakeConfigBuilder {
    /// Set the threshold for pools created without one (in bytes)
    pub fn default_threshold(mut self, bytes: u64) -> Self {
        self.config.default_threshold = bytes;
        self
    }

    /// Set the seek index stride (in bytes)
    pub fn seek_stride(mut self, bytes: u64) -> Self {
        self.config.seek_stride = bytes;
        self
    }

    /// Set the writer input mode
    pub fn input_mode(mut self, mode: InputMode) -> Self {
        self.config.input_mode = mode;
        self
    }

    /// Set the number of commit attempts
    pub fn max_retries(mut self, count: usize) -> Self {
        self.config.max_retries = count.max(1);
        self
    }

    /// Set the sleep between commit attempts
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    /// Set the KV staleness window
    pub fn kv_staleness(mut self, window: Duration) -> Self {
        self.config.kv_staleness = window;
        self
    }

    /// Set how many replayed entries trigger a KV snapshot
    pub fn kv_snapshot_interval(mut self, entries: u64) -> Self {
        self.config.kv_snapshot_interval = entries;
        self
    }

    /// Set how many snapshots a commit log caches
    pub fn snapshot_cache_size(mut self, entries: usize) -> Self {
        self.config.snapshot_cache_size = entries.max(1);
        self
    }

    /// Set the partition channel depth
    pub fn partition_channel_depth(mut self, depth: usize) -> Self {
        self.config.partition_channel_depth = depth.max(1);
        self
    }

    pub fn build(self) -> LakeConfig {
        self.config
    }
}
