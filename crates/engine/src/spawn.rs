// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detached child spawning for workflow sessions.
//!
//! The session ID is generated up front and handed to the child via
//! `--session-id`, so the journal location is known before the child says
//! anything. The spawner returns as soon as the process exists; the PID
//! handoff file is the manager's responsibility.

use crate::error::EngineError;
use async_trait::async_trait;
use sf_core::SessionId;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{SystemTime, UNIX_EPOCH};

/// Everything needed to launch one workflow child.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    /// Command identifier, rendered as the child's slash-command prompt.
    pub skill: String,
    pub session_id: SessionId,
    pub project_path: PathBuf,
    /// Extra prompt context (e.g. batch task summary for healers).
    pub context: Option<String>,
    /// Previous session to resume instead of starting fresh.
    pub resume_session_id: Option<SessionId>,
    pub timeout_ms: Option<u64>,
}

/// Result of a successful spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedChild {
    pub pid: u32,
    /// OS start time in seconds since epoch, for PID-reuse protection.
    pub start_time_secs: u64,
}

/// Seam over child-process creation.
#[async_trait]
pub trait ProcessSpawner: Send + Sync + 'static {
    async fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedChild, EngineError>;
}

/// Spawns a detached `claude` process in its own process group.
#[derive(Debug, Clone)]
pub struct ClaudeSpawner {
    binary: String,
}

impl ClaudeSpawner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// The argv this request resolves to (without the program itself).
    pub fn build_args(request: &SpawnRequest) -> Vec<String> {
        let mut args = vec!["-p".to_string(), render_prompt(request)];
        args.push("--session-id".to_string());
        args.push(request.session_id.to_string());
        if let Some(resume) = &request.resume_session_id {
            args.push("--resume".to_string());
            args.push(resume.to_string());
        }
        args
    }
}

impl Default for ClaudeSpawner {
    fn default() -> Self {
        Self::new(crate::probe::CHILD_BINARY)
    }
}

/// Render the prompt for a skill: the slash command plus optional context.
fn render_prompt(request: &SpawnRequest) -> String {
    match &request.context {
        Some(context) => format!("/{} {}", request.skill, context),
        None => format!("/{}", request.skill),
    }
}

#[async_trait]
impl ProcessSpawner for ClaudeSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedChild, EngineError> {
        let mut command = tokio::process::Command::new(&self.binary);
        command
            .args(Self::build_args(request))
            .current_dir(&request.project_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Own process group: the child survives a supervisor restart
            // and never receives our terminal signals.
            .process_group(0)
            .kill_on_drop(false);

        tracing::info!(
            session_id = %request.session_id,
            skill = %request.skill,
            cwd = %request.project_path.display(),
            "spawning workflow child"
        );

        let child = command.spawn().map_err(|e| EngineError::Spawn(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| EngineError::Spawn("child exited before pid was read".to_string()))?;

        Ok(SpawnedChild { pid, start_time_secs: process_start_time(pid) })
    }
}

/// Best-effort OS start time for a freshly spawned PID; falls back to the
/// current wall clock when the process table has no answer.
fn process_start_time(pid: u32) -> u64 {
    let mut system = sysinfo::System::new();
    system.refresh_processes_specifics(
        sysinfo::ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid)]),
        true,
        sysinfo::ProcessRefreshKind::nothing(),
    );
    system
        .process(sysinfo::Pid::from_u32(pid))
        .map(|p| p.start_time())
        .unwrap_or_else(|| {
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
        })
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
