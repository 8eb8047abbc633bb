// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-project directory layout and session-log discovery.
//!
//! ```text
//! <project>/.specflow/workflows/
//!   orchestration-<uuid>.json    one OrchestrationExecution
//!   <sessionId>/metadata.json    one WorkflowExecution (session known)
//!   <sessionId>/pid.json         spawner-written PID handoff
//!   pending-<uuid>.json          one WorkflowExecution (pre-session)
//!   index.json                   derived cache, never a source of truth
//! ```

use sf_core::{OrchestrationId, SessionId, WorkflowId};
use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".specflow";
pub const WORKFLOWS_DIR: &str = "workflows";
pub const ORCHESTRATION_PREFIX: &str = "orchestration-";
pub const PENDING_PREFIX: &str = "pending-";
pub const METADATA_FILE: &str = "metadata.json";
pub const PID_FILE: &str = "pid.json";
pub const INDEX_FILE: &str = "index.json";

/// Root of a project's workflow state.
pub fn workflows_dir(project_path: &Path) -> PathBuf {
    project_path.join(STATE_DIR).join(WORKFLOWS_DIR)
}

pub fn orchestration_path(project_path: &Path, id: &OrchestrationId) -> PathBuf {
    workflows_dir(project_path).join(format!("{ORCHESTRATION_PREFIX}{id}.json"))
}

pub fn session_dir(project_path: &Path, session_id: &SessionId) -> PathBuf {
    workflows_dir(project_path).join(session_id.as_str())
}

pub fn metadata_path(project_path: &Path, session_id: &SessionId) -> PathBuf {
    session_dir(project_path, session_id).join(METADATA_FILE)
}

pub fn pid_path(project_path: &Path, session_id: &SessionId) -> PathBuf {
    session_dir(project_path, session_id).join(PID_FILE)
}

pub fn pending_path(project_path: &Path, workflow_id: &WorkflowId) -> PathBuf {
    workflows_dir(project_path).join(format!("{PENDING_PREFIX}{workflow_id}.json"))
}

pub fn index_path(project_path: &Path) -> PathBuf {
    workflows_dir(project_path).join(INDEX_FILE)
}

/// Base directory for the child's session journals.
///
/// Uses `CLAUDE_LOCAL_STATE_DIR` if set (tests point it at a temp dir),
/// otherwise `~/.claude` — matching the child's own default.
pub fn claude_base() -> PathBuf {
    std::env::var("CLAUDE_LOCAL_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs::home_dir().unwrap_or_default().join(".claude"))
}

/// Find the session journal for a project session, if one exists.
///
/// Journals live at `<base>/projects/<munged-project-path>/<session>.jsonl`.
/// Falls back to the most recently modified journal in the project's
/// directory when the exact session file is missing.
pub fn session_log_path(project_path: &Path, session_id: &SessionId) -> Option<PathBuf> {
    session_log_path_in(project_path, session_id, &claude_base())
}

/// Testable core of [`session_log_path`].
pub fn session_log_path_in(
    project_path: &Path,
    session_id: &SessionId,
    claude_base: &Path,
) -> Option<PathBuf> {
    let project_dir = claude_base.join("projects").join(munge_project_path(project_path));
    if !project_dir.exists() {
        return None;
    }

    let session_file = project_dir.join(format!("{session_id}.jsonl"));
    if session_file.exists() {
        return Some(session_file);
    }

    // Fallback: most recent journal for the project
    std::fs::read_dir(&project_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "jsonl").unwrap_or(false))
        .max_by_key(|e| e.metadata().ok().and_then(|m| m.modified().ok()))
        .map(|e| e.path())
}

/// The child munges the project path into a directory name by replacing
/// every non-alphanumeric character with `-`.
pub fn munge_project_path(path: &Path) -> String {
    path.display()
        .to_string()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

#[cfg(test)]
#[path = "layout_tests.rs"]
mod tests;
