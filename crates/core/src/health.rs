// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process health types shared by the evaluator, runner, and reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collapsed liveness verdict for a workflow's child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Alive,
    Stale,
    Dead,
}

crate::simple_display! {
    HealthStatus {
        Alive => "alive",
        Stale => "stale",
        Dead => "dead",
    }
}

/// Evidence-backed health evaluation result.
///
/// `pid_alive` is `None` when no PID information was available — the runner
/// treats that combined with a `running` status as an unclear check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHealth {
    pub health_status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_file_age_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_alive: Option<bool>,
}

impl ProcessHealth {
    pub fn alive() -> Self {
        Self { health_status: HealthStatus::Alive, session_file_age_ms: None, pid_alive: None }
    }
}

/// Contents of `<sessionId>/pid.json` — the handoff contract between the
/// spawner and everything that probes liveness later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PidFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bash_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

impl PidFile {
    /// All PIDs recorded in the file, deduplicated.
    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = [self.bash_pid, self.claude_pid].into_iter().flatten().collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
