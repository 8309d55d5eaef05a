//! Status records: one file per task or module id, the file suffix is the
//! state. A plain directory listing tells an outside viewer where a run is.

use crate::storage::{Area, SharedStorage};
use crate::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Pending,
    Running,
    Done,
    Failed,
}

impl State {
    pub const ALL: [State; 4] = [State::Pending, State::Running, State::Done, State::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Running => "running",
            State::Done => "done",
            State::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done | State::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown state '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub state: State,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct StatusStore {
    storage: SharedStorage,
}

impl StatusStore {
    pub fn new(storage: SharedStorage) -> Result<Self, StorageError> {
        storage.ensure(Area::Status)?;
        Ok(Self { storage })
    }

    fn state_path(&self, id: &str, state: State) -> Result<PathBuf, StorageError> {
        self.storage
            .resolve(Area::Status, &format!("{}.{}", id, state.as_str()))
    }

    fn temp_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        self.storage.resolve(Area::Status, &format!(".{}.tmp", id))
    }

    fn existing(&self, id: &str) -> Result<Vec<(State, PathBuf)>, StorageError> {
        let mut found = Vec::new();
        for state in State::ALL {
            let path = self.state_path(id, state)?;
            if path.exists() {
                found.push((state, path));
            }
        }
        Ok(found)
    }

    /// Move `id` to `state` with `body` as the record text.
    ///
    /// The body goes to a hidden temp file first. The previous state file is
    /// renamed onto the new name, then the temp file is renamed over it, so
    /// every step is one atomic rename and exactly one state file is visible
    /// throughout.
    pub fn write(&self, id: &str, state: State, body: &str) -> Result<(), StorageError> {
        let target = self.state_path(id, state)?;
        let temp = self.temp_path(id)?;
        fs::write(&temp, body).map_err(|e| StorageError::io(&temp, e))?;

        let existing = self.existing(id)?;
        if !existing.iter().any(|(s, _)| *s == state) {
            if let Some((_, previous)) = existing.first() {
                fs::rename(previous, &target).map_err(|e| StorageError::io(previous, e))?;
            }
        }
        fs::rename(&temp, &target).map_err(|e| StorageError::io(&temp, e))?;

        // Leftovers only exist after a crash mid-transition.
        for (old_state, path) in self.existing(id)? {
            if old_state != state {
                fs::remove_file(&path).map_err(|e| StorageError::io(&path, e))?;
            }
        }

        tracing::debug!("status {} -> {}", id, state);
        Ok(())
    }

    pub fn read(&self, id: &str) -> Result<Option<StatusRecord>, StorageError> {
        let Some((state, path)) = self.existing(id)?.into_iter().next() else {
            return Ok(None);
        };
        let body = fs::read_to_string(&path).map_err(|e| StorageError::io(&path, e))?;
        Ok(Some(StatusRecord { state, body }))
    }

    /// Every state file currently present for `id`.
    pub fn state_files(&self, id: &str) -> Result<Vec<PathBuf>, StorageError> {
        Ok(self.existing(id)?.into_iter().map(|(_, p)| p).collect())
    }

    /// All ids with a state, as a directory listing sees them.
    pub fn list(&self) -> Result<Vec<(String, State)>, StorageError> {
        let dir = self.storage.area_path(Area::Status);
        let entries = fs::read_dir(&dir).map_err(|e| StorageError::io(&dir, e))?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if let Some((id, suffix)) = name.rsplit_once('.') {
                if let Ok(state) = suffix.parse::<State>() {
                    records.push((id.to_string(), state));
                }
            }
        }
        records.sort();
        Ok(records)
    }
}
