//! Shared Storage: the directory tree every executor reads and writes.
//!
//! Components never build paths themselves; they ask for `resolve(area, key)`.
//! The tree may be a local directory or a network mount shared by several
//! hosts, which is why remote slots get a `PathMapping`.

use crate::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    Status,
    Results,
    Logs,
}

impl Area {
    pub const ALL: [Area; 3] = [Area::Status, Area::Results, Area::Logs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Area::Status => "status",
            Area::Results => "results",
            Area::Logs => "logs",
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Area {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(Area::Status),
            "results" => Ok(Area::Results),
            "logs" => Ok(Area::Logs),
            other => Err(StorageError::UnknownArea(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedStorage {
    root: PathBuf,
}

impl SharedStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage scoped to one run directory below this root.
    pub fn for_run(&self, run_id: &str) -> Result<Self, StorageError> {
        validate_key(run_id)?;
        Ok(Self::new(self.root.join(run_id)))
    }

    pub fn area_path(&self, area: Area) -> PathBuf {
        self.root.join(area.as_str())
    }

    pub fn resolve(&self, area: Area, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.area_path(area).join(key))
    }

    /// Create the area directory if absent and return its path.
    pub fn ensure(&self, area: Area) -> Result<PathBuf, StorageError> {
        let path = self.area_path(area);
        std::fs::create_dir_all(&path).map_err(|e| StorageError::io(&path, e))?;
        Ok(path)
    }

    pub fn ensure_all(&self) -> Result<(), StorageError> {
        for area in Area::ALL {
            self.ensure(area)?;
        }
        Ok(())
    }

    /// Create (if needed) the directory for `key` inside `area`.
    pub fn ensure_dir(&self, area: Area, key: &str) -> Result<PathBuf, StorageError> {
        let path = self.resolve(area, key)?;
        std::fs::create_dir_all(&path).map_err(|e| StorageError::io(&path, e))?;
        Ok(path)
    }
}

/// A key names one file or directory directly inside an area.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0');
    if bad {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

/// Rewrites paths under the local storage root to where a remote host
/// mounts the same tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    local_root: PathBuf,
    remote_root: PathBuf,
}

impl PathMapping {
    pub fn new(local_root: impl Into<PathBuf>, remote_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            remote_root: remote_root.into(),
        }
    }

    pub fn translate(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.local_root) {
            Ok(rest) => self.remote_root.join(rest),
            Err(_) => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_path_escapes() {
        let storage = SharedStorage::new("/srv/weave");
        assert!(storage.resolve(Area::Status, "../etc").is_err());
        assert!(storage.resolve(Area::Status, "a/b").is_err());
        assert_eq!(
            storage.resolve(Area::Results, "recon:resolve").unwrap(),
            PathBuf::from("/srv/weave/results/recon:resolve")
        );
    }

    #[test]
    fn mapping_only_touches_paths_under_root() {
        let mapping = PathMapping::new("/srv/weave", "/mnt/weave");
        assert_eq!(
            mapping.translate(Path::new("/srv/weave/run_1/results/a:b")),
            PathBuf::from("/mnt/weave/run_1/results/a:b")
        );
        assert_eq!(
            mapping.translate(Path::new("/usr/share/wordlist.txt")),
            PathBuf::from("/usr/share/wordlist.txt")
        );
    }
}
