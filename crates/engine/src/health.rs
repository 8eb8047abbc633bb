// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health evaluation: PID evidence + session-file freshness → alive/stale/dead.

use crate::external::FileActivityTracker;
use crate::probe::ProcessProbe;
use sf_core::limits::STALE_THRESHOLD_MS;
use sf_core::{Clock, HealthStatus, ProcessHealth, WorkflowExecution, WorkflowStatus};
use sf_storage::{layout, StateStore};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Combines the process probe with session-file freshness.
///
/// Decision rules, evaluated in order:
/// 1. no PID information and `pending` → alive (not yet spawned)
/// 2. tracked PIDs exist and none are alive → dead
/// 3. session file mtime older than the stale threshold → stale
/// 4. otherwise alive
#[derive(Clone)]
pub struct HealthEvaluator<C: Clock> {
    clock: C,
    probe: Arc<dyn ProcessProbe>,
    activity: Arc<dyn FileActivityTracker>,
    stale_threshold_ms: u64,
}

impl<C: Clock> HealthEvaluator<C> {
    pub fn new(
        clock: C,
        probe: Arc<dyn ProcessProbe>,
        activity: Arc<dyn FileActivityTracker>,
    ) -> Self {
        Self { clock, probe, activity, stale_threshold_ms: STALE_THRESHOLD_MS }
    }

    pub fn with_stale_threshold_ms(mut self, ms: u64) -> Self {
        self.stale_threshold_ms = ms;
        self
    }

    pub fn stale_threshold_ms(&self) -> u64 {
        self.stale_threshold_ms
    }

    /// Evaluate a workflow's process health from on-disk evidence.
    ///
    /// The PID file is the primary evidence; the record's own PID fields are
    /// the fallback for records written before the file existed.
    pub async fn evaluate(
        &self,
        workflow: &WorkflowExecution,
        store: &StateStore,
    ) -> Result<ProcessHealth, crate::EngineError> {
        let pids = self.tracked_pids(workflow, store)?;

        if pids.is_empty() && workflow.status == WorkflowStatus::Pending {
            return Ok(ProcessHealth::alive());
        }

        let pid_alive = if pids.is_empty() {
            None
        } else {
            Some(pids.iter().any(|pid| self.probe.is_pid_alive(*pid)))
        };

        if pid_alive == Some(false) {
            return Ok(ProcessHealth {
                health_status: HealthStatus::Dead,
                session_file_age_ms: None,
                pid_alive,
            });
        }

        let session_file_age_ms = self.session_file_age_ms(workflow, store).await;
        if let Some(age) = session_file_age_ms {
            if age > self.stale_threshold_ms {
                return Ok(ProcessHealth {
                    health_status: HealthStatus::Stale,
                    session_file_age_ms,
                    pid_alive,
                });
            }
        }

        Ok(ProcessHealth { health_status: HealthStatus::Alive, session_file_age_ms, pid_alive })
    }

    fn tracked_pids(
        &self,
        workflow: &WorkflowExecution,
        store: &StateStore,
    ) -> Result<Vec<u32>, crate::EngineError> {
        if let Some(session_id) = &workflow.session_id {
            if let Some(pid_file) = store.read_pid_file(session_id)? {
                let pids = pid_file.pids();
                if !pids.is_empty() {
                    return Ok(pids);
                }
            }
        }
        Ok(workflow.tracked_pids())
    }

    /// Age of the session journal in ms, falling back to the project's last
    /// file change when the journal is missing.
    async fn session_file_age_ms(
        &self,
        workflow: &WorkflowExecution,
        store: &StateStore,
    ) -> Option<u64> {
        let now_ms = self.clock.epoch_ms();

        if let Some(session_id) = &workflow.session_id {
            if let Some(path) = layout::session_log_path(store.project_path(), session_id) {
                if let Some(mtime_ms) = file_mtime_ms(&path) {
                    return Some(now_ms.saturating_sub(mtime_ms));
                }
            }
        }

        self.activity
            .last_file_change_time(store.project_path())
            .await
            .map(|change_ms| now_ms.saturating_sub(change_ms))
    }
}

fn file_mtime_ms(path: &std::path::Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.duration_since(UNIX_EPOCH).ok()?.as_millis() as u64)
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
