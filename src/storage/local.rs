//! Local filesystem engine
//!
//! A uri is used directly as a filesystem path. Writers stage into a
//! sibling temp file and rename on close; exclusive create stages the same
//! way and then hard-links the staged file into place, which fails if the
//! target exists and never exposes a partially written object.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{LakeError, Result};
use crate::uid::Uid;

use super::{Engine, ObjectReader, ObjectWriter, Uri};

/// Engine over the local filesystem
#[derive(Debug, Default, Clone)]
pub struct LocalEngine;

impl LocalEngine {
    pub fn new() -> Self {
        LocalEngine
    }

    fn path(uri: &Uri) -> PathBuf {
        PathBuf::from(uri.as_str())
    }

    fn staging_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.{}.tmp", name, Uid::new()))
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

fn not_found(uri: &Uri, e: io::Error) -> LakeError {
    if e.kind() == io::ErrorKind::NotFound {
        LakeError::ObjectNotFound(uri.to_string())
    } else {
        LakeError::Io(e)
    }
}

impl Engine for LocalEngine {
    fn get(&self, uri: &Uri) -> Result<Box<dyn ObjectReader>> {
        let file = File::open(Self::path(uri)).map_err(|e| not_found(uri, e))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn put(&self, uri: &Uri) -> Result<Box<dyn ObjectWriter>> {
        let target = Self::path(uri);
        Self::ensure_parent(&target)?;
        let staging = Self::staging_path(&target);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)?;
        Ok(Box::new(LocalWriter {
            writer: Some(BufWriter::new(file)),
            staging,
            target,
        }))
    }

    fn put_if_not_exists(&self, uri: &Uri, data: &[u8]) -> Result<()> {
        let target = Self::path(uri);
        Self::ensure_parent(&target)?;
        let staging = Self::staging_path(&target);

        let result = (|| -> Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&staging)?;
            file.write_all(data)?;
            file.sync_all()?;
            match fs::hard_link(&staging, &target) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Err(LakeError::ObjectExists(uri.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })();

        if let Err(e) = fs::remove_file(&staging) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %e, "failed to remove staging file");
            }
        }
        result
    }

    fn exists(&self, uri: &Uri) -> Result<bool> {
        match fs::metadata(Self::path(uri)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, uri: &Uri) -> Result<()> {
        match fs::remove_file(Self::path(uri)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_by_prefix(&self, uri: &Uri) -> Result<()> {
        let path = Self::path(uri);
        let meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn size(&self, uri: &Uri) -> Result<u64> {
        let meta = fs::metadata(Self::path(uri)).map_err(|e| not_found(uri, e))?;
        Ok(meta.len())
    }

    fn list(&self, uri: &Uri) -> Result<Vec<String>> {
        let entries = match fs::read_dir(Self::path(uri)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // Skip staging files
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

/// Writer staging into a temp file until `close`
struct LocalWriter {
    writer: Option<BufWriter<File>>,
    staging: PathBuf,
    target: PathBuf,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "writer closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl ObjectWriter for LocalWriter {
    fn close(mut self: Box<Self>) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer
                .into_inner()
                .map_err(|e| LakeError::Io(e.into_error()))?;
            file.sync_all()?;
        }
        fs::rename(&self.staging, &self.target)?;
        Ok(())
    }
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        // Still holding the file means close was never called
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.staging);
        }
    }
}
