//! # branchlake
//!
//! A branched, log-structured data lake:
//! - Pools of immutable data objects sorted by a pool key
//! - Branches with their own commit logs, forked from and merged into
//!   a parent
//! - Journals with compare-and-swap commits over a plain object store
//! - Seek-indexed range scans merged into pool order
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Root                                │
//! │             (pool table, index rule table)                   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                          Pool                                │
//! │          (layout, threshold, branch table)                   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   Branch    │          │   Writer    │
//!   │ (CommitLog) │          │  (objects)  │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   Journal   │          │ Data object │
//!   │    (CAS)    │          │ + seek index│
//!   └──────┬──────┘          └──────┬──────┘
//!          └────────────┬───────────┘
//!                       ▼
//!               ┌──────────────┐
//!               │    Engine    │
//!               │(local/memory)│
//!               └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod context;
pub mod error;
pub mod uid;

pub mod record;
pub mod span;
pub mod storage;

pub mod journal;
pub mod kvs;

pub mod commit;
pub mod index;
pub mod segment;

pub mod lake;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{InputMode, LakeConfig};
pub use context::Context;
pub use error::{ErrorKind, LakeError, Result};
pub use lake::{Branch, Pool, Root};
pub use record::{Layout, Order, Record, Value};
pub use span::Span;
pub use storage::{Engine, EngineRef, LocalEngine, MemoryEngine, Uri};
pub use uid::Uid;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of branchlake
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
