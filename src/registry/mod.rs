//! Registry of file-based containers.
//!
//! Embedded engines have no server process, so a container is just a name
//! bound to a database file somewhere on disk. This registry keeps those
//! bindings in `registry/sqlite.json`:
//!
//! ```json
//! {"version": 1, "entries": [{"name": "app", "filePath": "/abs/app.sqlite",
//!   "created": "...", "lastVerified": "..."}]}
//! ```
//!
//! A file path belongs to at most one name. Entries whose file has vanished
//! are orphans and can be listed or pruned.

use crate::config::Context;
use crate::error::{Error, Result};
use crate::fsutil::{self, FileLock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub name: String,
    pub file_path: PathBuf,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    #[serde(default)]
    entries: Vec<RegistryEntry>,
}

impl Default for RegistryFile {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            entries: Vec::new(),
        }
    }
}

/// Absolute form of `path` without requiring it to exist.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    // Resolve symlinks in the parent when possible so two spellings of one
    // file compare equal.
    match (abs.parent(), abs.file_name()) {
        (Some(parent), Some(name)) => match fs::canonicalize(parent) {
            Ok(parent) => Ok(parent.join(name)),
            Err(_) => Ok(abs),
        },
        _ => Ok(abs),
    }
}

#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileRegistry {
    /// Registry for the SQLite engine under `ctx`.
    pub fn new(ctx: &Context) -> Self {
        Self::at(ctx.registry_dir().join("sqlite.json"))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<RegistryFile> {
        if !self.path.exists() {
            return Ok(RegistryFile::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(RegistryFile::default());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, file: &RegistryFile) -> Result<()> {
        fsutil::atomic_write(&self.path, &serde_json::to_vec_pretty(file)?)
    }

    /// Run a read-modify-write cycle under the registry lock.
    fn modify<T>(&self, f: impl FnOnce(&mut RegistryFile) -> Result<T>) -> Result<T> {
        let _lock = FileLock::acquire(&self.lock_path)?;
        let mut file = self.load()?;
        let out = f(&mut file)?;
        self.save(&file)?;
        Ok(out)
    }

    pub fn list(&self) -> Result<Vec<RegistryEntry>> {
        Ok(self.load()?.entries)
    }

    pub fn get(&self, name: &str) -> Result<Option<RegistryEntry>> {
        Ok(self.load()?.entries.into_iter().find(|e| e.name == name))
    }

    pub fn find_by_path(&self, path: &Path) -> Result<Option<RegistryEntry>> {
        let path = absolute_path(path)?;
        Ok(self
            .load()?
            .entries
            .into_iter()
            .find(|e| e.file_path == path))
    }

    /// Bind `name` to `file_path`.
    pub fn register(&self, name: &str, file_path: &Path) -> Result<RegistryEntry> {
        let file_path = absolute_path(file_path)?;
        self.modify(|file| {
            if let Some(existing) = file.entries.iter().find(|e| e.file_path == file_path) {
                return Err(Error::FilePathInUse {
                    path: file_path.clone(),
                    existing: existing.name.clone(),
                });
            }
            if file.entries.iter().any(|e| e.name == name) {
                return Err(Error::AlreadyExists {
                    engine: "sqlite".to_string(),
                    name: name.to_string(),
                });
            }
            let now = Utc::now();
            let entry = RegistryEntry {
                name: name.to_string(),
                file_path: file_path.clone(),
                created: now,
                last_verified: Some(now),
            };
            file.entries.push(entry.clone());
            Ok(entry)
        })
    }

    /// Drop an entry. Returns whether one existed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        self.modify(|file| {
            let before = file.entries.len();
            file.entries.retain(|e| e.name != name);
            Ok(file.entries.len() != before)
        })
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<RegistryEntry> {
        self.modify(|file| {
            if file.entries.iter().any(|e| e.name == new) {
                return Err(Error::AlreadyExists {
                    engine: "sqlite".to_string(),
                    name: new.to_string(),
                });
            }
            let entry = file
                .entries
                .iter_mut()
                .find(|e| e.name == old)
                .ok_or_else(|| Error::RegistryEntryNotFound(old.to_string()))?;
            entry.name = new.to_string();
            Ok(entry.clone())
        })
    }

    /// Point `name` at a new file, keeping path uniqueness.
    pub fn update_path(&self, name: &str, new_path: &Path) -> Result<RegistryEntry> {
        let new_path = absolute_path(new_path)?;
        self.modify(|file| {
            if let Some(other) = file
                .entries
                .iter()
                .find(|e| e.file_path == new_path && e.name != name)
            {
                return Err(Error::FilePathInUse {
                    path: new_path.clone(),
                    existing: other.name.clone(),
                });
            }
            let entry = file
                .entries
                .iter_mut()
                .find(|e| e.name == name)
                .ok_or_else(|| Error::RegistryEntryNotFound(name.to_string()))?;
            entry.file_path = new_path.clone();
            entry.last_verified = Some(Utc::now());
            Ok(entry.clone())
        })
    }

    /// Record that the file was seen on disk just now.
    pub fn touch_verified(&self, name: &str) -> Result<()> {
        self.modify(|file| {
            let entry = file
                .entries
                .iter_mut()
                .find(|e| e.name == name)
                .ok_or_else(|| Error::RegistryEntryNotFound(name.to_string()))?;
            entry.last_verified = Some(Utc::now());
            Ok(())
        })
    }

    /// Entries whose backing file no longer exists.
    pub fn find_orphans(&self) -> Result<Vec<RegistryEntry>> {
        Ok(self
            .load()?
            .entries
            .into_iter()
            .filter(|e| !e.file_path.exists())
            .collect())
    }

    /// Remove and return every orphaned entry.
    pub fn remove_orphans(&self) -> Result<Vec<RegistryEntry>> {
        self.modify(|file| {
            let (orphans, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut file.entries)
                .into_iter()
                .partition(|e| !e.file_path.exists());
            file.entries = kept;
            for orphan in &orphans {
                tracing::info!(
                    "Removing orphaned registry entry '{}' ({})",
                    orphan.name,
                    orphan.file_path.display()
                );
            }
            Ok(orphans)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_file_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlite.json");
        fs::write(&path, "").unwrap();
        assert!(FileRegistry::at(&path).list().unwrap().is_empty());
    }

    #[test]
    fn persisted_shape() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::at(dir.path().join("sqlite.json"));
        let db = dir.path().join("app.sqlite");
        registry.register("app", &db).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(registry.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["entries"][0]["name"], "app");
        assert!(raw["entries"][0]["filePath"].as_str().unwrap().ends_with("app.sqlite"));
        assert!(raw["entries"][0]["lastVerified"].is_string());
    }
}
