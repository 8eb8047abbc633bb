// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow lifecycle: spawn, observe ownership, kill, rebuild the index.
//!
//! The manager owns the child processes; PID files are the handoff contract.
//! Metadata files are the source of truth — the in-memory map only memoizes
//! where each workflow's record lives so lookups stay O(1) after load.

use crate::error::EngineError;
use crate::probe::ProcessProbe;
use crate::spawn::{ProcessSpawner, SpawnRequest};
use parking_lot::Mutex;
use sf_core::limits::{INDEX_MAX_SESSIONS, KILL_GRACE_MS, KILL_POLL_MS};
use sf_core::{
    Clock, OrchestrationId, PidFile, SessionId, WorkflowExecution, WorkflowId, WorkflowStatus,
};
use sf_storage::StateStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Parameters for [`WorkflowManager::start_workflow`].
#[derive(Debug, Clone)]
pub struct StartWorkflow {
    pub project_id: String,
    pub skill: String,
    pub timeout_ms: Option<u64>,
    pub resume_session_id: Option<SessionId>,
    pub orchestration_id: Option<OrchestrationId>,
    /// Extra prompt context (healers get the batch summary).
    pub context: Option<String>,
}

impl StartWorkflow {
    pub fn new(project_id: impl Into<String>, skill: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            skill: skill.into(),
            timeout_ms: None,
            resume_session_id: None,
            orchestration_id: None,
            context: None,
        }
    }
}

/// Where a workflow's record currently lives.
#[derive(Debug, Clone)]
enum RecordKey {
    Pending,
    Session(SessionId),
}

#[derive(Clone)]
pub struct WorkflowManager<C: Clock> {
    store: StateStore,
    probe: Arc<dyn ProcessProbe>,
    spawner: Arc<dyn ProcessSpawner>,
    clock: C,
    locations: Arc<Mutex<HashMap<WorkflowId, RecordKey>>>,
}

impl<C: Clock> WorkflowManager<C> {
    pub fn new(
        store: StateStore,
        probe: Arc<dyn ProcessProbe>,
        spawner: Arc<dyn ProcessSpawner>,
        clock: C,
    ) -> Self {
        Self { store, probe, spawner, clock, locations: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Look up a workflow by id. Reads the record fresh from disk so
    /// dashboard-side updates are always visible.
    pub fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowExecution>, EngineError> {
        let key = self.locations.lock().get(id).cloned();
        let record = match key {
            Some(RecordKey::Session(session_id)) => self.store.read_workflow(&session_id)?,
            Some(RecordKey::Pending) => self.store.read_pending_workflow(id)?,
            None => None,
        };
        if record.is_some() {
            return Ok(record);
        }
        // Cache miss or moved record: rescan metadata.
        self.rebuild_locations()?;
        let key = self.locations.lock().get(id).cloned();
        match key {
            Some(RecordKey::Session(session_id)) => Ok(self.store.read_workflow(&session_id)?),
            Some(RecordKey::Pending) => Ok(self.store.read_pending_workflow(id)?),
            None => Ok(None),
        }
    }

    /// Workflows linked to the orchestration that are still in an active
    /// state (`running`, `waiting_for_input`, `stale`). Reads metadata
    /// fresh — this query backs the one-active-workflow invariant.
    pub fn find_active_by_orchestration(
        &self,
        project_id: &str,
        orchestration_id: &OrchestrationId,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        let mut active: Vec<_> = self
            .store
            .list_workflows()?
            .into_iter()
            .filter(|w| {
                w.project_id == project_id
                    && w.orchestration_id.as_ref() == Some(orchestration_id)
                    && w.is_active()
            })
            .collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(active)
    }

    /// Spawn a detached child and persist the workflow records.
    ///
    /// Order matters for crash recovery: the pending record exists before
    /// the child does, and the PID file is written before this returns.
    /// Idempotency is the runner's spawn-intent guard, not enforced here.
    pub async fn start_workflow(
        &self,
        params: StartWorkflow,
    ) -> Result<WorkflowExecution, EngineError> {
        let mut workflow = WorkflowExecution::new(
            params.project_id.clone(),
            params.skill.clone(),
            params.orchestration_id,
            &self.clock,
        );
        self.store.write_workflow(&workflow)?;
        self.locations.lock().insert(workflow.id, RecordKey::Pending);

        let session_id = SessionId::new();
        let request = SpawnRequest {
            skill: params.skill,
            session_id,
            project_path: self.store.project_path().to_path_buf(),
            context: params.context,
            resume_session_id: params.resume_session_id,
            timeout_ms: params.timeout_ms,
        };

        let spawned = match self.spawner.spawn(&request).await {
            Ok(spawned) => spawned,
            Err(e) => {
                workflow.mark_failed(format!("spawn failed: {e}"), self.clock.now_utc());
                self.store.write_workflow(&workflow)?;
                return Err(e);
            }
        };

        // PID file first: liveness evidence must exist before anyone can
        // observe the running record.
        self.store.write_pid_file(
            &session_id,
            &PidFile {
                bash_pid: None,
                claude_pid: Some(spawned.pid),
                started_at: self.clock.now_utc(),
            },
        )?;

        workflow.session_id = Some(session_id);
        workflow.status = WorkflowStatus::Running;
        workflow.pid = Some(spawned.pid);
        workflow.claude_pid = Some(spawned.pid);
        workflow.updated_at = self.clock.now_utc();
        self.store.write_workflow(&workflow)?;
        self.locations.lock().insert(workflow.id, RecordKey::Session(session_id));

        tracing::info!(
            workflow_id = %workflow.id,
            session_id = %session_id,
            pid = spawned.pid,
            skill = %workflow.skill,
            "workflow started"
        );
        Ok(workflow)
    }

    /// Persist an updated workflow record (write-through).
    pub fn record_workflow(&self, workflow: &WorkflowExecution) -> Result<(), EngineError> {
        self.store.write_workflow(workflow)?;
        let key = match &workflow.session_id {
            Some(session_id) => RecordKey::Session(*session_id),
            None => RecordKey::Pending,
        };
        self.locations.lock().insert(workflow.id, key);
        Ok(())
    }

    /// Kill a workflow's child: SIGTERM, bounded wait, then SIGKILL.
    /// Marks the record cancelled. Safe to call on already-terminal
    /// workflows — they are returned unchanged.
    pub async fn kill_workflow(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<WorkflowExecution>, EngineError> {
        let Some(mut workflow) = self.get_workflow(id)? else {
            return Ok(None);
        };
        if workflow.is_terminal() {
            return Ok(Some(workflow));
        }

        let pids = self.tracked_pids(&workflow)?;
        for pid in &pids {
            if self.probe.is_pid_alive(*pid) {
                self.probe.kill(*pid, false);
            }
        }

        // Bounded graceful wait, then escalate.
        let deadline = self.clock.now() + Duration::from_millis(KILL_GRACE_MS);
        while self.clock.now() < deadline
            && pids.iter().any(|pid| self.probe.is_pid_alive(*pid))
        {
            tokio::time::sleep(Duration::from_millis(KILL_POLL_MS)).await;
        }
        for pid in &pids {
            if self.probe.is_pid_alive(*pid) {
                tracing::warn!(workflow_id = %id, pid = *pid, "child ignored SIGTERM, sending SIGKILL");
                self.probe.kill(*pid, true);
            }
        }

        workflow.status = WorkflowStatus::Cancelled;
        workflow.append_log("killed on request", self.clock.now_utc());
        self.record_workflow(&workflow)?;
        Ok(Some(workflow))
    }

    /// Recompute `index.json` from metadata: most-recent record per session,
    /// sorted by `updated_at` descending, capped at 50. The index is a
    /// derived cache; metadata files stay authoritative.
    pub fn rebuild_index(&self) -> Result<usize, EngineError> {
        let mut by_session: HashMap<SessionId, WorkflowExecution> = HashMap::new();
        for workflow in self.store.list_workflows()? {
            let Some(session_id) = workflow.session_id else { continue };
            match by_session.get(&session_id) {
                Some(existing) if existing.updated_at >= workflow.updated_at => {}
                _ => {
                    by_session.insert(session_id, workflow);
                }
            }
        }
        let mut records: Vec<_> = by_session.into_values().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records.truncate(INDEX_MAX_SESSIONS);
        let count = records.len();
        self.store.write_index(&records)?;
        Ok(count)
    }

    fn tracked_pids(&self, workflow: &WorkflowExecution) -> Result<Vec<u32>, EngineError> {
        if let Some(session_id) = &workflow.session_id {
            if let Some(pid_file) = self.store.read_pid_file(session_id)? {
                let pids = pid_file.pids();
                if !pids.is_empty() {
                    return Ok(pids);
                }
            }
        }
        Ok(workflow.tracked_pids())
    }

    fn rebuild_locations(&self) -> Result<(), EngineError> {
        let mut locations = HashMap::new();
        for workflow in self.store.list_workflows()? {
            let key = match &workflow.session_id {
                Some(session_id) => RecordKey::Session(*session_id),
                None => RecordKey::Pending,
            };
            locations.insert(workflow.id, key);
        }
        *self.locations.lock() = locations;
        Ok(())
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
