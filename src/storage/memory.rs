//! In-memory engine

use std::collections::BTreeMap;
use std::io::{self, Cursor, Write};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{LakeError, Result};

use super::{Engine, ObjectReader, ObjectWriter, Uri};

type Objects = Arc<RwLock<BTreeMap<String, Bytes>>>;

/// Engine keeping every object in a shared map
#[derive(Debug, Default, Clone)]
pub struct MemoryEngine {
    objects: Objects,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

fn dir_prefix(uri: &Uri) -> String {
    format!("{}/", uri.as_str())
}

impl Engine for MemoryEngine {
    fn get(&self, uri: &Uri) -> Result<Box<dyn ObjectReader>> {
        let objects = self.objects.read();
        let data = objects
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| LakeError::ObjectNotFound(uri.to_string()))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn put(&self, uri: &Uri) -> Result<Box<dyn ObjectWriter>> {
        Ok(Box::new(MemoryWriter {
            objects: Arc::clone(&self.objects),
            key: uri.as_str().to_string(),
            buf: Vec::new(),
        }))
    }

    fn put_if_not_exists(&self, uri: &Uri, data: &[u8]) -> Result<()> {
        let mut objects = self.objects.write();
        if objects.contains_key(uri.as_str()) {
            return Err(LakeError::ObjectExists(uri.to_string()));
        }
        objects.insert(uri.as_str().to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn exists(&self, uri: &Uri) -> Result<bool> {
        Ok(self.objects.read().contains_key(uri.as_str()))
    }

    fn delete(&self, uri: &Uri) -> Result<()> {
        self.objects.write().remove(uri.as_str());
        Ok(())
    }

    fn delete_by_prefix(&self, uri: &Uri) -> Result<()> {
        let prefix = dir_prefix(uri);
        let mut objects = self.objects.write();
        objects.retain(|k, _| k != uri.as_str() && !k.starts_with(&prefix));
        Ok(())
    }

    fn size(&self, uri: &Uri) -> Result<u64> {
        self.objects
            .read()
            .get(uri.as_str())
            .map(|b| b.len() as u64)
            .ok_or_else(|| LakeError::ObjectNotFound(uri.to_string()))
    }

    fn list(&self, uri: &Uri) -> Result<Vec<String>> {
        let prefix = dir_prefix(uri);
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| &k[prefix.len()..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }
}

struct MemoryWriter {
    objects: Objects,
    key: String,
    buf: Vec<u8>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ObjectWriter for MemoryWriter {
    fn close(self: Box<Self>) -> Result<()> {
        let MemoryWriter { objects, key, buf } = *self;
        objects.write().insert(key, Bytes::from(buf));
        Ok(())
    }
}
