// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic, validated persistence for orchestration and workflow records.
//!
//! Writes go to a sibling temp file, fsync, then rename over the target —
//! a crash leaves either the prior complete version or no change, and
//! readers never observe a partial file. Transient I/O failures are retried
//! on a short backoff schedule. On read, records are decoded into their
//! strongly-typed shapes; enumeration skips undecodable files (logged),
//! direct reads fail loudly.

use crate::layout;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sf_core::limits::{INDEX_MAX_SESSIONS, IO_RETRY_BACKOFF_MS};
use sf_core::{OrchestrationExecution, OrchestrationId, PidFile, SessionId, WorkflowExecution, WorkflowId};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid record at {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Handle on one project's workflow state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    project_path: PathBuf,
}

impl StateStore {
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self { project_path: project_path.into() }
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    // ---- orchestrations ----

    /// Direct read. `Ok(None)` if absent; decode failures are errors.
    pub fn read_orchestration(
        &self,
        id: &OrchestrationId,
    ) -> Result<Option<OrchestrationExecution>, StorageError> {
        read_json(&layout::orchestration_path(&self.project_path, id))
    }

    pub fn write_orchestration(
        &self,
        record: &OrchestrationExecution,
    ) -> Result<(), StorageError> {
        write_json_atomic(&layout::orchestration_path(&self.project_path, &record.id), record)
    }

    /// All decodable orchestration records; invalid files are skipped with a warning.
    pub fn list_orchestrations(&self) -> Result<Vec<OrchestrationExecution>, StorageError> {
        let dir = layout::workflows_dir(&self.project_path);
        let mut out = Vec::new();
        for entry in read_dir_or_empty(&dir)? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if !name.starts_with(layout::ORCHESTRATION_PREFIX) || !name.ends_with(".json") {
                continue;
            }
            match read_json::<OrchestrationExecution>(&path) {
                Ok(Some(record)) => out.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping invalid orchestration record"),
            }
        }
        Ok(out)
    }

    // ---- workflows ----

    /// Direct read of a session-assigned workflow record.
    pub fn read_workflow(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<WorkflowExecution>, StorageError> {
        read_json(&layout::metadata_path(&self.project_path, session_id))
    }

    /// Direct read of a pre-session (pending) workflow record.
    pub fn read_pending_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowExecution>, StorageError> {
        read_json(&layout::pending_path(&self.project_path, workflow_id))
    }

    /// Write a workflow record to its canonical location and return the path.
    ///
    /// Session-assigned records live at `<sessionId>/metadata.json`; the
    /// stale `pending-*.json` file from before assignment is removed.
    pub fn write_workflow(&self, record: &WorkflowExecution) -> Result<PathBuf, StorageError> {
        let path = match &record.session_id {
            Some(session_id) => {
                let path = layout::metadata_path(&self.project_path, session_id);
                write_json_atomic(&path, record)?;
                let pending = layout::pending_path(&self.project_path, &record.id);
                if pending.exists() {
                    fs::remove_file(&pending)?;
                }
                path
            }
            None => {
                let path = layout::pending_path(&self.project_path, &record.id);
                write_json_atomic(&path, record)?;
                path
            }
        };
        Ok(path)
    }

    /// All decodable workflow records — session metadata plus pending files.
    /// Invalid files are skipped with a warning.
    pub fn list_workflows(&self) -> Result<Vec<WorkflowExecution>, StorageError> {
        let dir = layout::workflows_dir(&self.project_path);
        let mut out = Vec::new();
        for entry in read_dir_or_empty(&dir)? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let candidate = if path.is_dir() {
                path.join(layout::METADATA_FILE)
            } else if name.starts_with(layout::PENDING_PREFIX) && name.ends_with(".json") {
                path.clone()
            } else {
                continue;
            };
            if !candidate.exists() {
                continue;
            }
            match read_json::<WorkflowExecution>(&candidate) {
                Ok(Some(record)) => out.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %candidate.display(), error = %e, "skipping invalid workflow record"),
            }
        }
        Ok(out)
    }

    // ---- pid files ----

    pub fn read_pid_file(&self, session_id: &SessionId) -> Result<Option<PidFile>, StorageError> {
        read_json(&layout::pid_path(&self.project_path, session_id))
    }

    pub fn write_pid_file(
        &self,
        session_id: &SessionId,
        pid_file: &PidFile,
    ) -> Result<(), StorageError> {
        write_json_atomic(&layout::pid_path(&self.project_path, session_id), pid_file)
    }

    // ---- index ----

    /// Replace `index.json` with the given records, capped at the most
    /// recent [`INDEX_MAX_SESSIONS`]. The caller is responsible for dedup
    /// and ordering; the cap is enforced here as a backstop.
    pub fn write_index(&self, records: &[WorkflowExecution]) -> Result<(), StorageError> {
        let capped = &records[..records.len().min(INDEX_MAX_SESSIONS)];
        write_json_atomic(&layout::index_path(&self.project_path), &capped)
    }

    /// Read the derived index. Missing or corrupt files yield an empty list —
    /// the index is a cache, never a source of truth.
    pub fn read_index(&self) -> Vec<WorkflowExecution> {
        match read_json::<Vec<WorkflowExecution>>(&layout::index_path(&self.project_path)) {
            Ok(Some(records)) => records,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "corrupt index.json, treating as empty");
                Vec::new()
            }
        }
    }

    // ---- backups ----

    /// Rotate a `.bak` copy of the given record file before a risky
    /// mutation. Keeps `.bak`, `.bak.2`, `.bak.3`; the oldest is dropped.
    /// Returns the backup path, or `None` when the source doesn't exist.
    pub fn create_backup(&self, path: &Path) -> Result<Option<PathBuf>, StorageError> {
        if !path.exists() {
            return Ok(None);
        }
        let bak_path = rotate_bak_path(path);
        fs::copy(path, &bak_path)?;
        Ok(Some(bak_path))
    }
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
pub(crate) fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    // Remove the oldest if at capacity
    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    // Shift existing backups up by one
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

/// Directory listing that treats a missing directory as empty.
fn read_dir_or_empty(dir: &Path) -> Result<Vec<fs::DirEntry>, StorageError> {
    match fs::read_dir(dir) {
        Ok(entries) => Ok(entries.filter_map(|e| e.ok()).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Read and decode a JSON record. `Ok(None)` when the file doesn't exist;
/// decode failures surface as [`StorageError::Invalid`].
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&contents).map(Some).map_err(|e| StorageError::Invalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Write JSON atomically: temp sibling, fsync, rename. Transient I/O
/// failures are retried up to 3 times on the [`IO_RETRY_BACKOFF_MS`]
/// schedule; serialization failures are not retryable.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let mut last_err = match try_write(path, value) {
        Ok(()) => return Ok(()),
        Err(StorageError::Json(e)) => return Err(StorageError::Json(e)),
        Err(e) => e,
    };
    for backoff_ms in IO_RETRY_BACKOFF_MS {
        warn!(path = %path.display(), error = %last_err, backoff_ms, "write failed, retrying");
        std::thread::sleep(std::time::Duration::from_millis(backoff_ms));
        match try_write(path, value) {
            Ok(()) => return Ok(()),
            Err(StorageError::Json(e)) => return Err(StorageError::Json(e)),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn try_write<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");

    // Write pretty-printed (two-space indent) for human diffability,
    // then sync before the rename commits it.
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
