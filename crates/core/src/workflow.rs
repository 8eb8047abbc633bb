// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow execution record: one spawned child-process session.

use crate::clock::Clock;
use crate::orchestration::OrchestrationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a workflow execution.
    pub struct WorkflowId;
}

crate::define_id! {
    /// Child session identifier, assigned once the spawned process reports it.
    pub struct SessionId;
}

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created but not yet spawned
    Pending,
    /// Child process is actively working
    Running,
    /// Child is idle, waiting for operator input
    WaitingForInput,
    /// Session file has gone quiet past the stale threshold
    Stale,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Killed on request
    Cancelled,
}

impl WorkflowStatus {
    /// Whether this status is terminal (no further transitions expected)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    /// Whether a workflow in this status counts toward the one-active-per-
    /// orchestration invariant.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Running | WorkflowStatus::WaitingForInput | WorkflowStatus::Stale
        )
    }

    pub fn is_terminal_success(&self) -> bool {
        matches!(self, WorkflowStatus::Completed)
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, WorkflowStatus::Failed | WorkflowStatus::Cancelled)
    }
}

crate::simple_display! {
    WorkflowStatus {
        Pending => "pending",
        Running => "running",
        WaitingForInput => "waiting_for_input",
        Stale => "stale",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// A spawned child-process session executing a skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: WorkflowId,
    /// Assigned post-spawn, once the child reports its session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration_id: Option<OrchestrationId>,
    /// Command identifier the child executes (e.g. "design", "heal").
    pub skill: String,
    pub status: WorkflowStatus,
    /// Legacy single-PID field kept for records written by older dashboards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bash_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Append-only activity breadcrumbs shown by the dashboard.
    #[serde(default)]
    pub logs: Vec<String>,
}

impl WorkflowExecution {
    /// Create a new pending workflow record.
    pub fn new(
        project_id: impl Into<String>,
        skill: impl Into<String>,
        orchestration_id: Option<OrchestrationId>,
        clock: &impl Clock,
    ) -> Self {
        let now = clock.now_utc();
        Self {
            id: WorkflowId::new(),
            session_id: None,
            project_id: project_id.into(),
            orchestration_id,
            skill: skill.into(),
            status: WorkflowStatus::Pending,
            pid: None,
            bash_pid: None,
            claude_pid: None,
            started_at: now,
            updated_at: now,
            cost_usd: 0.0,
            error: None,
            logs: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// All PIDs recorded on this workflow, deduplicated. The PID file is the
    /// primary handoff; these fields are the fallback evidence.
    pub fn tracked_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = [self.bash_pid, self.claude_pid, self.pid]
            .into_iter()
            .flatten()
            .collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }

    /// Append an activity line and bump `updated_at`.
    pub fn append_log(&mut self, line: impl Into<String>, now: DateTime<Utc>) {
        self.logs.push(line.into());
        self.updated_at = now;
    }

    /// Mark terminal with an error, bumping `updated_at`.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = WorkflowStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = now;
    }
}

crate::builder! {
    pub struct WorkflowExecutionBuilder => WorkflowExecution {
        into {
            project_id: String = "proj-1",
            skill: String = "design",
        }
        set {
            id: WorkflowId = WorkflowId::new(),
            status: WorkflowStatus = WorkflowStatus::Running,
            started_at: chrono::DateTime<chrono::Utc> = chrono::DateTime::UNIX_EPOCH,
            updated_at: chrono::DateTime<chrono::Utc> = chrono::DateTime::UNIX_EPOCH,
            cost_usd: f64 = 0.0,
            logs: Vec<String> = Vec::new(),
        }
        option {
            session_id: SessionId = None,
            orchestration_id: OrchestrationId = None,
            pid: u32 = None,
            bash_pid: u32 = None,
            claude_pid: u32 = None,
            error: String = None,
        }
    }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
