//! Key/value persistence for session state.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Storage for session values, keyed by cookie-style names.
///
/// Writes may be buffered until [`SessionRepository::flush`].
pub trait SessionRepository: Send {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&mut self, name: &str, value: String);
    fn remove(&mut self, name: &str);

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-process repository. Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    values: HashMap<String, String>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SessionRepository for MemoryRepository {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: String) {
        self.values.insert(name.to_string(), value);
    }

    fn remove(&mut self, name: &str) {
        self.values.remove(name);
    }
}

/// Repository backed by a JSON object on disk, written on `flush`.
#[derive(Debug)]
pub struct FileRepository {
    path: PathBuf,
    values: BTreeMap<String, String>,
    dirty: bool,
}

impl FileRepository {
    /// Open the repository at `path`, loading existing values if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values: BTreeMap<String, String> = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read session file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse session file {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = values.len(), "Session repository opened");

        Ok(Self {
            path,
            values,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionRepository for FileRepository {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: String) {
        if self.values.get(name) != Some(&value) {
            self.values.insert(name.to_string(), value);
            self.dirty = true;
        }
    }

    fn remove(&mut self, name: &str) {
        if self.values.remove(name).is_some() {
            self.dirty = true;
        }
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if self.values.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
        } else {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(&self.values)?;
            std::fs::write(&self.path, contents)
                .with_context(|| format!("Failed to write session file {}", self.path.display()))?;
        }
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_repository() {
        let mut repo = MemoryRepository::new();
        assert!(repo.get("session_token").is_none());
        repo.set("session_token", "abc".to_string());
        assert_eq!(repo.get("session_token").as_deref(), Some("abc"));
        repo.remove("session_token");
        assert!(repo.is_empty());
    }

    #[test]
    fn test_file_repository_persists_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let mut repo = FileRepository::open(&path).unwrap();
        repo.set("access_token", "tok".to_string());
        assert!(!path.exists());
        repo.flush().unwrap();
        assert!(path.exists());

        let reopened = FileRepository::open(&path).unwrap();
        assert_eq!(reopened.get("access_token").as_deref(), Some("tok"));
    }

    #[test]
    fn test_file_repository_removes_file_when_emptied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut repo = FileRepository::open(&path).unwrap();
        repo.set("user", "{}".to_string());
        repo.flush().unwrap();
        repo.remove("user");
        repo.flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_file_repository_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(FileRepository::open(&path).is_err());
    }
}
