//! Optional cache-state persistence: a JSON snapshot of the Control State
//! Cache written atomically (write to a temp file, then rename) with up to
//! `backup_count` rotated prior snapshots kept alongside it. Default-off;
//! the Event Buffer is never persisted -- a restart always starts every
//! change group's sequence numbering back at zero.

use crate::model::ControlState;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to read snapshot {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to write snapshot {path}: {source}")]
    Write { path: String, source: io::Error },
    #[error("failed to parse snapshot {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

/// Loads a cache snapshot from `path`. Returns an empty vector if the file
/// does not exist yet (first run with persistence newly enabled).
pub fn load_snapshot(path: &Path) -> Result<Vec<ControlState>, PersistenceError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|source| PersistenceError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| PersistenceError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Writes `entries` to `path` atomically: serialize to a sibling `.tmp`
/// file, then rename over the destination. Before overwriting, rotates up
/// to `backup_count` prior snapshots (`path.1`, `path.2`, ...; the oldest
/// beyond `backup_count` is discarded).
pub fn save_snapshot(path: &Path, entries: &[ControlState], backup_count: u32) -> Result<(), PersistenceError> {
    let write_err = |source: io::Error| PersistenceError::Write {
        path: path.display().to_string(),
        source,
    };

    let json = serde_json::to_string_pretty(entries).map_err(|source| PersistenceError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    if backup_count > 0 && path.exists() {
        rotate_backups(path, backup_count).map_err(write_err)?;
    }

    let tmp_path = tmp_path_for(path);
    std::fs::write(&tmp_path, json).map_err(write_err)?;
    std::fs::rename(&tmp_path, path).map_err(write_err)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn backup_path(path: &Path, index: u32) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(format!(".{index}"));
    PathBuf::from(backup)
}

fn rotate_backups(path: &Path, backup_count: u32) -> io::Result<()> {
    let oldest = backup_path(path, backup_count);
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }
    for index in (1..backup_count).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            std::fs::rename(&from, backup_path(path, index + 1))?;
        }
    }
    std::fs::rename(path, backup_path(path, 1))
}
