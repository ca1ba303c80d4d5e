//! Lake Module
//!
//! Pools, branches and the read/write paths over them.
//!
//! ## Write Path
//! ```text
//! records ──▶ Writer ──▶ data objects ──▶ Add txn ──▶ branch commit log
//! ```
//!
//! ## Read Path
//! ```text
//! snapshot ──select──▶ objects ──partition──▶ channel ──▶ SortedScanner ──▶ records
//! ```

mod branch;
mod partition;
mod pool;
mod root;
mod scanner;
mod scheduler;
mod writer;

pub use branch::{Branch, BranchConfig};
pub use partition::{partition_segments, Partition};
pub use pool::{Pool, PoolConfig, PoolStats, MAIN_BRANCH};
pub use root::Root;
pub use scanner::{RecordFilter, ScanStats, SortedScanner};
pub use scheduler::{Scan, Scheduler};
pub use writer::{ImportStats, Writer};
