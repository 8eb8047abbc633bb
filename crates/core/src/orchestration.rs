// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestration record and phase state machine.
//!
//! An `OrchestrationExecution` is a durable pipeline of phase-ordered
//! workflows (design → analyze → implement → verify → merge). It is created
//! by the CLI and from then on mutated exclusively through typed store
//! operations; every mutation bumps `updated_at` and appends to the
//! decision log where appropriate.

use crate::clock::Clock;
use crate::limits;
use crate::workflow::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

crate::define_id! {
    /// Unique identifier for an orchestration execution.
    pub struct OrchestrationId;
}

/// Status of an orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    /// Created, runner not yet driving it
    Pending,
    /// Runner is actively driving phases
    Running,
    /// Operator paused observation (children are not killed)
    Paused,
    /// Verify succeeded; waiting for an explicit merge trigger
    WaitingMerge,
    /// Escalated; waiting for an operator decision
    NeedsAttention,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
}

impl OrchestrationStatus {
    /// Whether this status is terminal (no further transitions expected)
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestrationStatus::Completed | OrchestrationStatus::Failed)
    }
}

crate::simple_display! {
    OrchestrationStatus {
        Pending => "pending",
        Running => "running",
        Paused => "paused",
        WaitingMerge => "waiting_merge",
        NeedsAttention => "needs_attention",
        Completed => "completed",
        Failed => "failed",
    }
}

/// Pipeline phase. The order is fixed; `next` encodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Design,
    Analyze,
    Implement,
    Verify,
    Merge,
    Done,
}

impl Phase {
    /// The phase that follows this one, or `None` past the end.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Design => Some(Phase::Analyze),
            Phase::Analyze => Some(Phase::Implement),
            Phase::Implement => Some(Phase::Verify),
            Phase::Verify => Some(Phase::Merge),
            Phase::Merge => Some(Phase::Done),
            Phase::Done => None,
        }
    }

    /// Phases that link exactly one workflow (everything except implement/done).
    pub fn expects_single_workflow(&self) -> bool {
        matches!(self, Phase::Design | Phase::Analyze | Phase::Verify | Phase::Merge)
    }
}

crate::simple_display! {
    Phase {
        Design => "design",
        Analyze => "analyze",
        Implement => "implement",
        Verify => "verify",
        Merge => "merge",
        Done => "done",
    }
}

/// Closed set of orchestration tuning knobs. No arbitrary key passthrough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationConfig {
    pub batch_size: u32,
    pub max_heal_attempts: u32,
    pub polling_interval_ms: u64,
    pub max_polling_attempts: u32,
    pub auto_merge: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            batch_size: limits::DEFAULT_BATCH_SIZE,
            max_heal_attempts: limits::DEFAULT_MAX_HEAL_ATTEMPTS,
            polling_interval_ms: limits::DEFAULT_POLLING_INTERVAL_MS,
            max_polling_attempts: limits::DEFAULT_MAX_POLLING_ATTEMPTS,
            auto_merge: false,
        }
    }
}

/// Per-phase workflow linkage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseExecutions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<WorkflowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyze: Option<WorkflowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<WorkflowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<WorkflowId>,
    /// Ordered list of implement-phase workflows (one per batch attempt).
    #[serde(default)]
    pub implement: Vec<WorkflowId>,
    /// Healer workflows spawned for failed batches.
    #[serde(default)]
    pub healers: Vec<WorkflowId>,
}

impl PhaseExecutions {
    /// The linked workflow for a single-workflow phase.
    pub fn slot(&self, phase: Phase) -> Option<&WorkflowId> {
        match phase {
            Phase::Design => self.design.as_ref(),
            Phase::Analyze => self.analyze.as_ref(),
            Phase::Verify => self.verify.as_ref(),
            Phase::Merge => self.merge.as_ref(),
            Phase::Implement | Phase::Done => None,
        }
    }

    /// Record a workflow id in a single-workflow phase slot.
    /// Returns false for implement/done, which have no single slot.
    pub fn set_slot(&mut self, phase: Phase, id: WorkflowId) -> bool {
        let slot = match phase {
            Phase::Design => &mut self.design,
            Phase::Analyze => &mut self.analyze,
            Phase::Verify => &mut self.verify,
            Phase::Merge => &mut self.merge,
            Phase::Implement | Phase::Done => return false,
        };
        *slot = Some(id);
        true
    }
}

/// One batch of implementation tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub index: usize,
    pub task_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_execution_id: Option<WorkflowId>,
    #[serde(default)]
    pub heal_attempts: u32,
    #[serde(default)]
    pub healed: bool,
}

impl Batch {
    pub fn new(index: usize, task_ids: Vec<String>) -> Self {
        Self { index, task_ids, workflow_execution_id: None, heal_attempts: 0, healed: false }
    }
}

/// Batch progress through the implement phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTracking {
    #[serde(default)]
    pub items: Vec<Batch>,
    /// Cursor into `items`. Meaningful only while `items` is non-empty.
    #[serde(default)]
    pub current: usize,
    /// Indexes of completed batches, in completion order.
    #[serde(default)]
    pub completed: Vec<usize>,
}

impl BatchTracking {
    pub fn current_batch(&self) -> Option<&Batch> {
        self.items.get(self.current)
    }

    pub fn current_batch_mut(&mut self) -> Option<&mut Batch> {
        self.items.get_mut(self.current)
    }

    pub fn all_completed(&self) -> bool {
        !self.items.is_empty() && self.completed.len() == self.items.len()
    }
}

/// One append-only decision log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub timestamp: DateTime<Utc>,
    /// Stable lowercase identifier, e.g. `phase_transition`, `batch_complete`.
    pub decision: String,
    pub reason: String,
}

/// Recovery choices offered to the operator while needs-attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOption {
    Retry,
    Skip,
    Abort,
}

crate::simple_display! {
    RecoveryOption {
        Retry => "retry",
        Skip => "skip",
        Abort => "abort",
    }
}

/// Populated iff `status = needs_attention`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryContext {
    pub issue: String,
    pub options: Vec<RecoveryOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_workflow_id: Option<WorkflowId>,
}

/// A durable multi-phase pipeline of workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationExecution {
    pub id: OrchestrationId,
    pub project_id: String,
    pub project_path: PathBuf,
    pub status: OrchestrationStatus,
    pub config: OrchestrationConfig,
    pub current_phase: Phase,
    #[serde(default)]
    pub executions: PhaseExecutions,
    #[serde(default)]
    pub batches: BatchTracking,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decision_log: Vec<DecisionLogEntry>,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_context: Option<RecoveryContext>,
}

impl OrchestrationExecution {
    /// Create a fresh orchestration in the design phase.
    pub fn new(
        project_id: impl Into<String>,
        project_path: impl Into<PathBuf>,
        config: OrchestrationConfig,
        clock: &impl Clock,
    ) -> Self {
        let now = clock.now_utc();
        Self {
            id: OrchestrationId::new(),
            project_id: project_id.into(),
            project_path: project_path.into(),
            status: OrchestrationStatus::Pending,
            config,
            current_phase: Phase::Design,
            executions: PhaseExecutions::default(),
            batches: BatchTracking::default(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            decision_log: Vec::new(),
            total_cost_usd: 0.0,
            error_message: None,
            recovery_context: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The workflow the runner expects to be active for the current phase:
    /// the phase slot, or the current batch's link during implement.
    pub fn expected_workflow(&self) -> Option<&WorkflowId> {
        match self.current_phase {
            Phase::Implement => {
                self.batches.current_batch().and_then(|b| b.workflow_execution_id.as_ref())
            }
            phase => self.executions.slot(phase),
        }
    }

    /// Append a decision entry. The log is append-only; nothing ever
    /// truncates or reorders it.
    pub fn log_decision(
        &mut self,
        decision: impl Into<String>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.decision_log.push(DecisionLogEntry {
            timestamp: now,
            decision: decision.into(),
            reason: reason.into(),
        });
    }

    /// Check the record-local invariants, returning the first violation.
    ///
    /// The one-active-workflow-per-orchestration invariant needs workflow
    /// records and is enforced by the manager query instead.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.status == OrchestrationStatus::Completed {
            if self.completed_at.is_none() {
                return Err("completed without completed_at".into());
            }
            if self.current_phase != Phase::Done {
                return Err(format!("completed but phase is {}", self.current_phase));
            }
        }
        if self.current_phase == Phase::Implement
            && !self.batches.items.is_empty()
            && self.batches.current >= self.batches.items.len()
        {
            return Err(format!(
                "batch cursor {} out of range ({} items)",
                self.batches.current,
                self.batches.items.len()
            ));
        }
        for batch in &self.batches.items {
            if batch.heal_attempts > self.config.max_heal_attempts {
                return Err(format!(
                    "batch {} exceeds heal budget: {} > {}",
                    batch.index, batch.heal_attempts, self.config.max_heal_attempts
                ));
            }
        }
        let needs_attention = self.status == OrchestrationStatus::NeedsAttention;
        if needs_attention != self.recovery_context.is_some() {
            return Err("recovery_context must be set iff needs_attention".into());
        }
        if self.updated_at < self.started_at {
            return Err("updated_at precedes started_at".into());
        }
        if self.total_cost_usd < 0.0 {
            return Err("negative total cost".into());
        }
        Ok(())
    }
}

crate::builder! {
    pub struct OrchestrationExecutionBuilder => OrchestrationExecution {
        into {
            project_id: String = "proj-1",
            project_path: PathBuf = "/tmp/test",
        }
        set {
            id: OrchestrationId = OrchestrationId::new(),
            status: OrchestrationStatus = OrchestrationStatus::Running,
            config: OrchestrationConfig = OrchestrationConfig::default(),
            current_phase: Phase = Phase::Design,
            executions: PhaseExecutions = PhaseExecutions::default(),
            batches: BatchTracking = BatchTracking::default(),
            started_at: chrono::DateTime<chrono::Utc> = chrono::DateTime::UNIX_EPOCH,
            updated_at: chrono::DateTime<chrono::Utc> = chrono::DateTime::UNIX_EPOCH,
            decision_log: Vec<DecisionLogEntry> = Vec::new(),
            total_cost_usd: f64 = 0.0,
        }
        option {
            completed_at: chrono::DateTime<chrono::Utc> = None,
            error_message: String = None,
            recovery_context: RecoveryContext = None,
        }
    }
}

#[cfg(test)]
#[path = "orchestration_tests.rs"]
mod tests;
