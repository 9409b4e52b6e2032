use super::{validate_key, Storage};
use crate::utils::errors::{PkiError, Result};
use crate::utils::paths::PkiPaths;
use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::fs;

const TEMP_SUFFIX: &str = ".tmp";

/// Storage backed by one file per key under a root directory.
///
/// Each write goes to its own uniquely named sibling temp file, which is then
/// renamed over the target, so a reader sees either the old value or a new one.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        PkiPaths::ensure_dir_exists(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        if key.ends_with('/') || key.ends_with(TEMP_SUFFIX) {
            return Err(PkiError::Storage(format!("invalid storage key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

fn storage_err(action: &str, key: &str, err: std::io::Error) -> PkiError {
    PkiError::Storage(format!("failed to {action} '{key}': {err}"))
}

#[async_trait]
impl Storage for LocalStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err("read", key, e)),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err("create parent of", key, e))?;
        }

        // Each write gets its own temp file so concurrent writers never share one
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        let data = value.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::Builder::new()
                .prefix(".")
                .suffix(TEMP_SUFFIX)
                .tempfile_in(&parent)?;
            temp.write_all(&data)?;
            temp.as_file().sync_all()?;
            temp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| PkiError::Storage(format!("write task for '{key}' failed: {e}")))?
        .map_err(|e| storage_err("commit", key, e))?;

        tracing::trace!("Stored {} bytes at {}", value.len(), key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err("delete", key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        if !prefix.is_empty() {
            validate_key(prefix)?;
        }

        // A prefix without a trailing slash lists the directory it names part of
        let (dir, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (self.root.join(&prefix[..idx]), &prefix[idx + 1..]),
            None => (self.root.clone(), prefix),
        };

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err("list", prefix, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err("list", prefix, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(name_prefix) || name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| storage_err("list", prefix, e))?;
            let child = &name[name_prefix.len()..];
            if file_type.is_dir() {
                names.push(format!("{child}/"));
            } else {
                names.push(child.to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}
