// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup reconciliation: re-derive authoritative status from on-disk
//! evidence after a supervisor restart.
//!
//! One-shot and idempotent — running it twice with no external changes
//! updates nothing the second time. Orphaned child processes are reported,
//! never killed: the only kill path is [`cleanup_orphaned_process`], and it
//! only accepts PIDs that appear in a dashboard-written PID file.

use crate::error::EngineError;
use crate::external::FileActivityTracker;
use crate::health::HealthEvaluator;
use crate::manager::WorkflowManager;
use crate::orchestrations::OrchestrationStore;
use crate::probe::ProcessProbe;
use crate::spawn::ProcessSpawner;
use parking_lot::Mutex;
use serde::Serialize;
use sf_core::limits::{MAX_ORCHESTRATION_AGE_MS, ORPHAN_GRACE_PERIOD_MS, STALE_THRESHOLD_MS};
use sf_core::{Clock, HealthStatus, OrchestrationStatus, WorkflowId, WorkflowStatus};
use sf_storage::StateStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Summary of one reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationResult {
    pub projects_checked: usize,
    pub workflows_checked: usize,
    pub workflows_updated: usize,
    pub orchestrations_checked: usize,
    pub orchestrations_updated: usize,
    pub orphans_found: usize,
    /// Always 0: reconciliation never kills. Kept in the result shape so
    /// dashboards can assert the policy.
    pub orphans_killed: usize,
    pub errors: Vec<String>,
}

/// An untracked child-binary process old enough to matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    pub pid: u32,
    pub age_ms: u64,
}

/// Dependencies for a reconciliation sweep.
#[derive(Clone)]
pub struct ReconcileDeps<C: Clock> {
    pub probe: Arc<dyn ProcessProbe>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub activity: Arc<dyn FileActivityTracker>,
    pub clock: C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchState {
    Idle,
    InProgress,
    Done,
}

// Process-scoped reconciliation latch. This is the one sanctioned
// process-wide state object; `reset_reconciliation` exists for tests.
static LATCH: Mutex<LatchState> = Mutex::new(LatchState::Idle);

/// Run reconciliation at most once per process. Returns `None` when a
/// sweep already ran (or is running) in this process.
pub async fn ensure_reconciliation<C: Clock>(
    projects: &[(String, PathBuf)],
    deps: &ReconcileDeps<C>,
) -> Option<ReconciliationResult> {
    {
        let mut latch = LATCH.lock();
        if *latch != LatchState::Idle {
            return None;
        }
        *latch = LatchState::InProgress;
    }
    let result = reconcile_workflows(projects, deps).await;
    *LATCH.lock() = LatchState::Done;
    Some(result)
}

/// Reset the latch. Testing hook.
pub fn reset_reconciliation() {
    *LATCH.lock() = LatchState::Idle;
}

/// The full sweep over every registered project.
pub async fn reconcile_workflows<C: Clock>(
    projects: &[(String, PathBuf)],
    deps: &ReconcileDeps<C>,
) -> ReconciliationResult {
    let mut result = ReconciliationResult::default();
    let mut tracked_pids: Vec<u32> = Vec::new();

    for (project_id, project_path) in projects {
        result.projects_checked += 1;
        if let Err(e) = reconcile_project(project_id, project_path, deps, &mut result, &mut tracked_pids).await
        {
            result.errors.push(format!("{project_id}: {e}"));
        }
    }

    // Orphan detection is report-only. The supervisor never assumes it can
    // re-parent or reap processes it did not track.
    let orphans = orphan_scan(&tracked_pids, deps);
    result.orphans_found = orphans.len();
    for orphan in &orphans {
        tracing::warn!(pid = orphan.pid, age_ms = orphan.age_ms, "orphaned child process detected");
    }

    tracing::info!(
        projects = result.projects_checked,
        workflows_updated = result.workflows_updated,
        orchestrations_updated = result.orchestrations_updated,
        orphans = result.orphans_found,
        "reconciliation complete"
    );
    result
}

async fn reconcile_project<C: Clock>(
    project_id: &str,
    project_path: &std::path::Path,
    deps: &ReconcileDeps<C>,
    result: &mut ReconciliationResult,
    tracked_pids: &mut Vec<u32>,
) -> Result<(), EngineError> {
    tracing::debug!(project_id, path = %project_path.display(), "reconciling project");
    let store = StateStore::new(project_path);
    let manager = WorkflowManager::new(
        store.clone(),
        deps.probe.clone(),
        deps.spawner.clone(),
        deps.clock.clone(),
    );
    let orchestrations = OrchestrationStore::new(store.clone(), deps.clock.clone());
    let evaluator =
        HealthEvaluator::new(deps.clock.clone(), deps.probe.clone(), deps.activity.clone());
    let now = deps.clock.now_utc();

    // Step 1: re-derive workflow status from process evidence.
    for mut workflow in store.list_workflows()? {
        result.workflows_checked += 1;

        // Collect tracked PIDs (PID file + legacy field) for orphan matching.
        if let Some(session_id) = &workflow.session_id {
            if let Some(pid_file) = store.read_pid_file(session_id)? {
                tracked_pids.extend(pid_file.pids());
            }
        }
        tracked_pids.extend(workflow.tracked_pids());

        if !workflow.is_active() {
            continue;
        }
        let health = evaluator.evaluate(&workflow, &store).await?;
        match health.health_status {
            HealthStatus::Dead => {
                workflow.status = WorkflowStatus::Failed;
                workflow.error =
                    Some("Process terminated unexpectedly (detected on startup)".to_string());
                workflow.append_log("[RECONCILE] Process dead, marking as failed", now);
                store.write_workflow(&workflow)?;
                result.workflows_updated += 1;
            }
            HealthStatus::Stale if workflow.status != WorkflowStatus::Stale => {
                let minutes = STALE_THRESHOLD_MS / 60_000;
                workflow.status = WorkflowStatus::Stale;
                workflow.error =
                    Some(format!("Session inactive (no updates in {minutes}+ minutes)"));
                workflow.append_log("[RECONCILE] Session stale", now);
                store.write_workflow(&workflow)?;
                result.workflows_updated += 1;
            }
            _ => {}
        }
    }

    // Step 2: the index is derived; recompute it from metadata wholesale.
    manager.rebuild_index()?;

    // Step 3: re-evaluate orchestrations against their linked workflows.
    for ex in store.list_orchestrations()? {
        result.orchestrations_checked += 1;
        if !matches!(
            ex.status,
            OrchestrationStatus::Running
                | OrchestrationStatus::Paused
                | OrchestrationStatus::WaitingMerge
        ) {
            continue;
        }

        let linked = match ex.expected_workflow() {
            Some(id) => manager.get_workflow(id)?,
            None => None,
        };
        if let Some(linked) = linked {
            if linked.status.is_terminal_failure() {
                let session = linked
                    .session_id
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| linked.id.to_string());
                let error = linked.error.clone().unwrap_or_else(|| linked.status.to_string());
                orchestrations.fail_with(
                    &ex.id,
                    format!("Linked workflow {session}: {error}"),
                    "reconcile_failed",
                )?;
                result.orchestrations_updated += 1;
                continue;
            }
        }

        let age_ms = now.signed_duration_since(ex.updated_at).num_milliseconds().max(0) as u64;
        if ex.status == OrchestrationStatus::Running && age_ms > MAX_ORCHESTRATION_AGE_MS {
            let hours = MAX_ORCHESTRATION_AGE_MS / 3_600_000;
            orchestrations.fail_with(
                &ex.id,
                format!("No progress in over {hours} hours"),
                "reconcile_stale",
            )?;
            result.orchestrations_updated += 1;
        }
    }

    Ok(())
}

/// Candidates not in the tracked set and older than the grace period.
fn orphan_scan<C: Clock>(tracked_pids: &[u32], deps: &ReconcileDeps<C>) -> Vec<OrphanReport> {
    let now_secs = deps.clock.epoch_ms() / 1000;
    deps.probe
        .enumerate_candidates()
        .into_iter()
        .filter(|c| !tracked_pids.contains(&c.pid))
        .filter_map(|c| {
            let age_ms = now_secs.saturating_sub(c.start_time_secs) * 1000;
            (age_ms >= ORPHAN_GRACE_PERIOD_MS).then_some(OrphanReport { pid: c.pid, age_ms })
        })
        .collect()
}

/// Standalone orphan query for the dashboard: same scan as the reconciler,
/// without touching any records.
pub async fn find_orphaned_claude_processes<C: Clock>(
    projects: &[(String, PathBuf)],
    deps: &ReconcileDeps<C>,
) -> Vec<OrphanReport> {
    let mut tracked: Vec<u32> = Vec::new();
    for (_, project_path) in projects {
        let store = StateStore::new(project_path);
        let Ok(workflows) = store.list_workflows() else { continue };
        for workflow in workflows {
            if let Some(session_id) = &workflow.session_id {
                if let Ok(Some(pid_file)) = store.read_pid_file(session_id) {
                    tracked.extend(pid_file.pids());
                }
            }
            tracked.extend(workflow.tracked_pids());
        }
    }
    orphan_scan(&tracked, deps)
}

/// Guarded kill for a user-initiated cleanup request.
///
/// Only PIDs that appear in a dashboard-written PID file may be
/// terminated, and only past the orphan grace period. Returns whether a
/// kill was issued.
pub async fn cleanup_orphaned_process<C: Clock>(
    projects: &[(String, PathBuf)],
    deps: &ReconcileDeps<C>,
    pid: u32,
    age_ms: u64,
    workflow_id: Option<WorkflowId>,
) -> Result<bool, EngineError> {
    if age_ms < ORPHAN_GRACE_PERIOD_MS {
        return Err(EngineError::precondition(
            "cleanup_orphaned_process",
            format!("process younger than the grace period ({age_ms}ms)"),
        ));
    }

    // The PID must be tracked by a dashboard-written PID file.
    let mut tracked = false;
    'projects: for (_, project_path) in projects {
        let store = StateStore::new(project_path);
        for workflow in store.list_workflows()? {
            if let Some(requested) = workflow_id {
                if workflow.id != requested {
                    continue;
                }
            }
            if let Some(session_id) = &workflow.session_id {
                if let Some(pid_file) = store.read_pid_file(session_id)? {
                    if pid_file.pids().contains(&pid) {
                        tracked = true;
                        break 'projects;
                    }
                }
            }
        }
    }
    if !tracked {
        tracing::warn!(pid, "refusing to kill untracked process");
        return Ok(false);
    }

    tracing::info!(pid, "cleaning up tracked orphan process");
    deps.probe.kill(pid, false);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    if deps.probe.is_pid_alive(pid) {
        deps.probe.kill(pid, true);
    }
    Ok(true)
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
