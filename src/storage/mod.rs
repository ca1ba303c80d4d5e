//! Storage Module
//!
//! Byte-addressable object store the lake is built on.
//!
//! ## Responsibilities
//! - Read, write and delete whole objects named by hierarchical [`Uri`]s
//! - Exclusive create (`put_if_not_exists`), the primitive behind journal CAS
//! - Prefix deletion for dropping a pool's subtree
//!
//! ## Consistency
//! Engines must be strongly consistent for single-object create and read:
//! once `put_if_not_exists` or a writer's `close` returns, every reader sees
//! the complete object.
//!
//! Two engines ship with the crate: [`LocalEngine`] (a directory tree) and
//! [`MemoryEngine`] (an in-process map, handy in tests).

mod local;
mod memory;

use std::fmt;
use std::io::{Read, Seek, Write};
use std::sync::Arc;

pub use local::LocalEngine;
pub use memory::MemoryEngine;

use crate::error::Result;

// =============================================================================
// Uri
// =============================================================================

/// Hierarchical object name, `/`-separated
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uri(String);

impl Uri {
    pub fn new(path: impl Into<String>) -> Self {
        let mut s: String = path.into();
        while s.len() > 1 && s.ends_with('/') {
            s.pop();
        }
        Uri(s)
    }

    /// Child of this uri
    pub fn join(&self, name: impl AsRef<str>) -> Uri {
        let name = name.as_ref().trim_start_matches('/');
        if self.0.is_empty() {
            Uri::new(name)
        } else if self.0.ends_with('/') {
            Uri::new(format!("{}{}", self.0, name))
        } else {
            Uri::new(format!("{}/{}", self.0, name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path element
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&std::path::Path> for Uri {
    fn from(p: &std::path::Path) -> Self {
        Uri::new(p.to_string_lossy().into_owned())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Random-access reader over one object
pub trait ObjectReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> ObjectReader for T {}

/// Streaming writer for one object
///
/// Nothing is visible to readers until `close` returns. Dropping a writer
/// without closing it discards what was written.
pub trait ObjectWriter: Write + Send {
    fn close(self: Box<Self>) -> Result<()>;
}

/// An object store
pub trait Engine: Send + Sync + fmt::Debug {
    /// Open an object for reading; `ObjectNotFound` if it does not exist
    fn get(&self, uri: &Uri) -> Result<Box<dyn ObjectReader>>;

    /// Create or replace an object
    fn put(&self, uri: &Uri) -> Result<Box<dyn ObjectWriter>>;

    /// Create an object only if nothing exists at `uri`; `ObjectExists` otherwise
    fn put_if_not_exists(&self, uri: &Uri, data: &[u8]) -> Result<()>;

    fn exists(&self, uri: &Uri) -> Result<bool>;

    /// Remove one object; missing objects are not an error
    fn delete(&self, uri: &Uri) -> Result<()>;

    /// Remove every object at or below `uri`
    fn delete_by_prefix(&self, uri: &Uri) -> Result<()>;

    /// Size of an object in bytes
    fn size(&self, uri: &Uri) -> Result<u64>;

    /// Names of the objects directly below `uri`, sorted
    fn list(&self, uri: &Uri) -> Result<Vec<String>>;

    /// Read a whole object into memory
    fn get_bytes(&self, uri: &Uri) -> Result<Vec<u8>> {
        let mut reader = self.get(uri)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Write a whole object in one call
    fn put_bytes(&self, uri: &Uri, data: &[u8]) -> Result<()> {
        let mut writer = self.put(uri)?;
        writer.write_all(data)?;
        writer.close()
    }
}

/// Shared engine handle
pub type EngineRef = Arc<dyn Engine>;
