// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed mutators over the durable `OrchestrationExecution` record.
//!
//! Every mutator reads the current state, validates its precondition,
//! applies the change, bumps `updated_at`, appends to the decision log
//! where appropriate, and writes atomically. Missing records yield
//! `Ok(None)`; precondition violations are structured errors the caller
//! decides about; bug-like conditions fail loud.

use crate::error::EngineError;
use crate::external::BatchPlan;
use sf_core::{
    Clock, OrchestrationExecution, OrchestrationId, OrchestrationStatus, Phase, RecoveryContext,
    RecoveryOption, WorkflowExecution, WorkflowId,
};
use sf_storage::StateStore;

type OpResult = Result<Option<OrchestrationExecution>, EngineError>;

#[derive(Clone)]
pub struct OrchestrationStore<C: Clock> {
    store: StateStore,
    clock: C,
}

impl<C: Clock> OrchestrationStore<C> {
    pub fn new(store: StateStore, clock: C) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn get(&self, id: &OrchestrationId) -> OpResult {
        Ok(self.store.read_orchestration(id)?)
    }

    /// Persist a CLI-created record (also used by tests to seed state).
    pub fn create(&self, record: &OrchestrationExecution) -> Result<(), EngineError> {
        self.store.write_orchestration(record)?;
        Ok(())
    }

    /// Move a pending orchestration into `running` when its runner attaches.
    pub fn start(&self, id: &OrchestrationId) -> OpResult {
        self.mutate(id, "start", |ex, now| {
            if ex.status != OrchestrationStatus::Pending {
                return Err(EngineError::precondition(
                    "start",
                    format!("status is {}", ex.status),
                ));
            }
            ex.status = OrchestrationStatus::Running;
            ex.log_decision("started", "runner attached", now);
            Ok(())
        })
    }

    /// Advance `currentPhase` along the fixed order. `verify → merge`
    /// requires `autoMerge`; use [`Self::trigger_merge`] otherwise.
    pub fn transition_to_next_phase(&self, id: &OrchestrationId) -> OpResult {
        self.mutate(id, "transition_to_next_phase", |ex, now| {
            require_non_terminal(ex, "transition_to_next_phase")?;
            let from = ex.current_phase;
            let Some(next) = from.next() else {
                return Err(EngineError::precondition(
                    "transition_to_next_phase",
                    "already past the last phase",
                ));
            };
            if from == Phase::Verify && !ex.config.auto_merge {
                return Err(EngineError::precondition(
                    "transition_to_next_phase",
                    "verify -> merge requires autoMerge or an explicit merge trigger",
                ));
            }
            ex.current_phase = next;
            ex.log_decision("phase_transition", format!("{from} -> {next}"), now);
            Ok(())
        })
    }

    /// Record a workflow id in the slot the current phase expects — the
    /// phase slot for single-workflow phases, the current batch during
    /// implement (also appended to the ordered implement list).
    pub fn link_workflow_execution(
        &self,
        id: &OrchestrationId,
        workflow_id: WorkflowId,
    ) -> OpResult {
        self.mutate(id, "link_workflow_execution", |ex, now| {
            require_non_terminal(ex, "link_workflow_execution")?;
            let phase = ex.current_phase;
            match phase {
                Phase::Implement => {
                    let Some(batch) = ex.batches.current_batch_mut() else {
                        return Err(EngineError::precondition(
                            "link_workflow_execution",
                            "implement phase has no current batch",
                        ));
                    };
                    batch.workflow_execution_id = Some(workflow_id);
                    ex.executions.implement.push(workflow_id);
                }
                Phase::Done => {
                    return Err(EngineError::precondition(
                        "link_workflow_execution",
                        "done phase links no workflows",
                    ));
                }
                _ => {
                    ex.executions.set_slot(phase, workflow_id);
                }
            }
            ex.log_decision("workflow_linked", format!("{phase}: {workflow_id}"), now);
            Ok(())
        })
    }

    /// Accumulate cost. Deltas are non-negative by contract; a negative
    /// delta is a bug upstream and fails loud. No decision entry — this
    /// runs every poll and would flood the log.
    pub fn add_cost(&self, id: &OrchestrationId, delta: f64) -> OpResult {
        if delta < 0.0 || delta.is_nan() {
            return Err(EngineError::Invariant(format!("negative cost delta: {delta}")));
        }
        self.mutate(id, "add_cost", |ex, _now| {
            require_non_terminal(ex, "add_cost")?;
            ex.total_cost_usd += delta;
            Ok(())
        })
    }

    /// Seed batch tracking from a parsed plan. Only valid while implement
    /// has no batches yet.
    pub fn update_batches(&self, id: &OrchestrationId, plan: &BatchPlan) -> OpResult {
        self.mutate(id, "update_batches", |ex, now| {
            if ex.current_phase != Phase::Implement {
                return Err(EngineError::precondition(
                    "update_batches",
                    format!("phase is {}", ex.current_phase),
                ));
            }
            if !ex.batches.items.is_empty() {
                return Err(EngineError::precondition("update_batches", "batches already set"));
            }
            ex.batches.items = plan.batches.clone();
            ex.batches.current = 0;
            ex.batches.completed.clear();
            ex.log_decision("batch_plan_set", format!("{} batches", ex.batches.items.len()), now);
            Ok(())
        })
    }

    /// Mark the current batch complete and advance the cursor. The linked
    /// workflow record proves terminal success. When the last batch
    /// finishes, the phase moves on to verify.
    pub fn complete_batch(&self, id: &OrchestrationId, workflow: &WorkflowExecution) -> OpResult {
        self.mutate(id, "complete_batch", |ex, now| {
            if ex.current_phase != Phase::Implement {
                return Err(EngineError::precondition(
                    "complete_batch",
                    format!("phase is {}", ex.current_phase),
                ));
            }
            let Some(batch) = ex.batches.current_batch() else {
                return Err(EngineError::Invariant(format!(
                    "batch cursor {} out of range ({} items)",
                    ex.batches.current,
                    ex.batches.items.len()
                )));
            };
            if batch.workflow_execution_id != Some(workflow.id) {
                return Err(EngineError::precondition(
                    "complete_batch",
                    "workflow is not linked to the current batch",
                ));
            }
            if !workflow.status.is_terminal_success() {
                return Err(EngineError::precondition(
                    "complete_batch",
                    format!("linked workflow is {}", workflow.status),
                ));
            }
            let index = batch.index;
            ex.batches.completed.push(ex.batches.current);
            ex.log_decision("batch_complete", format!("batch {index}"), now);
            if ex.batches.completed.len() == ex.batches.items.len() {
                ex.current_phase = Phase::Verify;
                ex.log_decision("phase_transition", "implement -> verify", now);
            } else {
                ex.batches.current += 1;
            }
            Ok(())
        })
    }

    /// Whether the current batch still has heal budget.
    pub fn can_heal_batch(&self, id: &OrchestrationId) -> Result<bool, EngineError> {
        let Some(ex) = self.store.read_orchestration(id)? else {
            return Ok(false);
        };
        Ok(ex
            .batches
            .current_batch()
            .map(|b| b.heal_attempts < ex.config.max_heal_attempts)
            .unwrap_or(false))
    }

    /// Count a heal attempt against the current batch. The caller escalates
    /// through [`Self::set_needs_attention`] once the budget is exceeded.
    pub fn increment_heal_attempt(&self, id: &OrchestrationId) -> OpResult {
        self.mutate(id, "increment_heal_attempt", |ex, now| {
            let budget = ex.config.max_heal_attempts;
            let Some(batch) = ex.batches.current_batch_mut() else {
                return Err(EngineError::precondition(
                    "increment_heal_attempt",
                    "no current batch",
                ));
            };
            if batch.heal_attempts >= budget {
                return Err(EngineError::precondition(
                    "increment_heal_attempt",
                    format!("heal budget exhausted ({budget})"),
                ));
            }
            batch.heal_attempts += 1;
            let attempt = batch.heal_attempts;
            let index = batch.index;
            ex.log_decision("heal_attempt", format!("batch {index} attempt {attempt}"), now);
            Ok(())
        })
    }

    /// Record a healer workflow against the current batch: marks it healed,
    /// relinks it to the healer, and appends to the healer list.
    pub fn heal_batch(&self, id: &OrchestrationId, healer_id: WorkflowId) -> OpResult {
        self.mutate(id, "heal_batch", |ex, now| {
            let Some(batch) = ex.batches.current_batch_mut() else {
                return Err(EngineError::precondition("heal_batch", "no current batch"));
            };
            if batch.heal_attempts == 0 {
                return Err(EngineError::precondition(
                    "heal_batch",
                    "no heal attempt recorded for the current batch",
                ));
            }
            batch.healed = true;
            batch.workflow_execution_id = Some(healer_id);
            let index = batch.index;
            ex.executions.healers.push(healer_id);
            ex.log_decision("batch_heal", format!("batch {index} healer {healer_id}"), now);
            Ok(())
        })
    }

    /// Escalate to the operator. Populates the recovery context and parks
    /// the orchestration until `resume`.
    pub fn set_needs_attention(
        &self,
        id: &OrchestrationId,
        issue: impl Into<String>,
        options: Vec<RecoveryOption>,
        failed_workflow_id: Option<WorkflowId>,
    ) -> OpResult {
        let issue = issue.into();
        self.mutate(id, "set_needs_attention", move |ex, now| {
            require_non_terminal(ex, "set_needs_attention")?;
            ex.status = OrchestrationStatus::NeedsAttention;
            ex.recovery_context =
                Some(RecoveryContext { issue: issue.clone(), options, failed_workflow_id });
            ex.log_decision("escalate_needs_attention", issue, now);
            Ok(())
        })
    }

    /// Pause observation. The child, if any, keeps running.
    pub fn pause(&self, id: &OrchestrationId) -> OpResult {
        self.mutate(id, "pause", |ex, now| {
            if ex.status != OrchestrationStatus::Running {
                return Err(EngineError::precondition(
                    "pause",
                    format!("status is {}", ex.status),
                ));
            }
            ex.status = OrchestrationStatus::Paused;
            ex.log_decision("pause", "operator paused", now);
            Ok(())
        })
    }

    /// Resume from paused or needs-attention; clears the recovery context.
    pub fn resume(&self, id: &OrchestrationId) -> OpResult {
        self.mutate(id, "resume", |ex, now| {
            if !matches!(
                ex.status,
                OrchestrationStatus::Paused | OrchestrationStatus::NeedsAttention
            ) {
                return Err(EngineError::precondition(
                    "resume",
                    format!("status is {}", ex.status),
                ));
            }
            ex.status = OrchestrationStatus::Running;
            ex.recovery_context = None;
            ex.log_decision("resume", "operator resumed", now);
            Ok(())
        })
    }

    /// Verify succeeded without autoMerge: park until an explicit trigger.
    pub fn await_merge(&self, id: &OrchestrationId) -> OpResult {
        self.mutate(id, "await_merge", |ex, now| {
            if ex.current_phase != Phase::Verify {
                return Err(EngineError::precondition(
                    "await_merge",
                    format!("phase is {}", ex.current_phase),
                ));
            }
            require_non_terminal(ex, "await_merge")?;
            ex.status = OrchestrationStatus::WaitingMerge;
            ex.log_decision("await_merge", "verify succeeded, waiting for merge trigger", now);
            Ok(())
        })
    }

    /// Explicit merge trigger. The verify workflow record proves terminal
    /// success.
    pub fn trigger_merge(&self, id: &OrchestrationId, verify: &WorkflowExecution) -> OpResult {
        self.mutate(id, "trigger_merge", |ex, now| {
            if ex.current_phase != Phase::Verify {
                return Err(EngineError::precondition(
                    "trigger_merge",
                    format!("phase is {}", ex.current_phase),
                ));
            }
            if ex.executions.verify != Some(verify.id) {
                return Err(EngineError::precondition(
                    "trigger_merge",
                    "workflow is not the linked verify workflow",
                ));
            }
            if !verify.status.is_terminal_success() {
                return Err(EngineError::precondition(
                    "trigger_merge",
                    format!("verify workflow is {}", verify.status),
                ));
            }
            ex.current_phase = Phase::Merge;
            ex.status = OrchestrationStatus::Running;
            ex.log_decision("merge_triggered", "verify -> merge", now);
            Ok(())
        })
    }

    /// Terminal success: merge finished.
    pub fn complete(&self, id: &OrchestrationId) -> OpResult {
        self.mutate(id, "complete", |ex, now| {
            require_non_terminal(ex, "complete")?;
            if ex.current_phase != Phase::Merge && ex.current_phase != Phase::Done {
                return Err(EngineError::precondition(
                    "complete",
                    format!("phase is {}", ex.current_phase),
                ));
            }
            ex.current_phase = Phase::Done;
            ex.status = OrchestrationStatus::Completed;
            ex.completed_at = Some(now);
            ex.recovery_context = None;
            ex.log_decision("completed", "merge succeeded", now);
            Ok(())
        })
    }

    /// Terminal failure with the standard decision id.
    pub fn fail(&self, id: &OrchestrationId, message: impl Into<String>) -> OpResult {
        self.fail_with(id, message, "failed")
    }

    /// Terminal failure with an explicit decision id (`reconcile_failed`,
    /// `reconcile_stale`).
    pub fn fail_with(
        &self,
        id: &OrchestrationId,
        message: impl Into<String>,
        decision: &'static str,
    ) -> OpResult {
        let message = message.into();
        self.mutate(id, "fail", move |ex, now| {
            require_non_terminal(ex, "fail")?;
            ex.status = OrchestrationStatus::Failed;
            ex.error_message = Some(message.clone());
            ex.completed_at = Some(now);
            ex.recovery_context = None;
            ex.log_decision(decision, message, now);
            Ok(())
        })
    }

    /// Append a decision entry without any other state change
    /// (e.g. `spawn_suppressed_duplicate`).
    pub fn note(
        &self,
        id: &OrchestrationId,
        decision: &'static str,
        reason: impl Into<String>,
    ) -> OpResult {
        let reason = reason.into();
        self.mutate(id, "note", move |ex, now| {
            ex.log_decision(decision, reason, now);
            Ok(())
        })
    }

    /// Shared read-validate-mutate-persist path.
    fn mutate(
        &self,
        id: &OrchestrationId,
        operation: &'static str,
        apply: impl FnOnce(&mut OrchestrationExecution, chrono::DateTime<chrono::Utc>) -> Result<(), EngineError>,
    ) -> OpResult {
        let Some(mut ex) = self.store.read_orchestration(id)? else {
            return Ok(None);
        };
        let now = self.clock.now_utc();
        apply(&mut ex, now)?;
        ex.updated_at = now;
        if let Err(violation) = ex.check_invariants() {
            return Err(EngineError::Invariant(format!("{operation}: {violation}")));
        }
        self.store.write_orchestration(&ex)?;
        Ok(Some(ex))
    }
}

fn require_non_terminal(
    ex: &OrchestrationExecution,
    operation: &'static str,
) -> Result<(), EngineError> {
    if ex.is_terminal() {
        return Err(EngineError::precondition(
            operation,
            format!("orchestration is terminal ({})", ex.status),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[path = "orchestrations_tests.rs"]
mod tests;
