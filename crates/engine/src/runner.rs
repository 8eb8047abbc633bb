// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Polling runner: drives exactly one orchestration.
//!
//! Each tick reads the orchestration fresh, decides between spawn /
//! observe / escalate for the current phase, and sleeps one poll interval.
//! Concurrent runners on the same orchestration are forbidden — single-task
//! ownership is the serialization mechanism. Every sleep races the
//! cancellation token; on cancel the in-flight mutation completes and the
//! runner exits without further writes.

use crate::error::EngineError;
use crate::external::BatchParser;
use crate::health::HealthEvaluator;
use crate::manager::{StartWorkflow, WorkflowManager};
use crate::notify::{EscalationNotice, Notifier};
use crate::orchestrations::OrchestrationStore;
use sf_core::limits::STALE_FAIL_THRESHOLD;
use sf_core::{
    Clock, OrchestrationExecution, OrchestrationId, OrchestrationStatus, Phase, ProcessHealth,
    RecoveryOption, HealthStatus, WorkflowExecution, WorkflowId, WorkflowStatus,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything a runner needs from the outside.
#[derive(Clone)]
pub struct RunnerDeps<C: Clock> {
    pub orchestrations: OrchestrationStore<C>,
    pub workflows: WorkflowManager<C>,
    pub health: HealthEvaluator<C>,
    pub batch_parser: Arc<dyn BatchParser>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: C,
}

/// Runner tuning. `intent_window_ms = None` means 2 × polling interval.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    pub intent_window_ms: Option<u64>,
}

/// A recent spawn attempt, used to suppress duplicates when a poll races a
/// slow filesystem write.
#[derive(Debug, Clone, PartialEq)]
struct SpawnIntent {
    skill: String,
    context: Option<String>,
    at_ms: u64,
}

/// State carried by one runner task.
pub struct RunnerContext<C: Clock> {
    project_id: String,
    project_path: PathBuf,
    orchestration_id: OrchestrationId,
    polling_interval: Duration,
    max_polling_attempts: u32,
    consecutive_unclear_checks: u32,
    intent_window_ms: u64,
    last_intent: Option<SpawnIntent>,
    consecutive_stale_polls: u32,
    attention_waits: u64,
    last_cost: HashMap<WorkflowId, f64>,
    cancel: CancellationToken,
    deps: RunnerDeps<C>,
}

/// What one tick decided to do (exposed for tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Finished,
    Waited,
    Acted,
}

impl<C: Clock> RunnerContext<C> {
    pub fn new(
        orchestration: &OrchestrationExecution,
        deps: RunnerDeps<C>,
        cancel: CancellationToken,
        config: RunnerConfig,
    ) -> Self {
        let polling_interval = Duration::from_millis(orchestration.config.polling_interval_ms);
        let intent_window_ms = config
            .intent_window_ms
            .unwrap_or(orchestration.config.polling_interval_ms.saturating_mul(2));
        Self {
            project_id: orchestration.project_id.clone(),
            project_path: orchestration.project_path.clone(),
            orchestration_id: orchestration.id,
            polling_interval,
            max_polling_attempts: orchestration.config.max_polling_attempts,
            consecutive_unclear_checks: 0,
            intent_window_ms,
            last_intent: None,
            consecutive_stale_polls: 0,
            attention_waits: 0,
            last_cost: HashMap::new(),
            cancel,
            deps,
        }
    }

    /// Drive the orchestration until it is terminal or the task is cancelled.
    pub async fn run(mut self) -> Result<(), EngineError> {
        // A freshly created orchestration attaches here.
        if let Some(ex) = self.deps.orchestrations.get(&self.orchestration_id)? {
            if ex.status == OrchestrationStatus::Pending {
                self.deps.orchestrations.start(&self.orchestration_id)?;
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(orchestration_id = %self.orchestration_id, "runner cancelled");
                return Ok(());
            }
            match self.tick().await {
                Ok(Tick::Finished) => return Ok(()),
                Ok(Tick::Waited | Tick::Acted) => {}
                Err(e) => {
                    // Recover at the loop boundary: a failed tick left no
                    // partial on-disk state, so log and keep polling.
                    tracing::warn!(
                        orchestration_id = %self.orchestration_id,
                        error = %e,
                        "tick failed"
                    );
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(orchestration_id = %self.orchestration_id, "runner cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.polling_interval) => {}
            }
        }
    }

    async fn tick(&mut self) -> Result<Tick, EngineError> {
        let Some(ex) = self.deps.orchestrations.get(&self.orchestration_id)? else {
            tracing::warn!(orchestration_id = %self.orchestration_id, "orchestration disappeared");
            return Ok(Tick::Finished);
        };
        if ex.is_terminal() {
            return Ok(Tick::Finished);
        }
        match ex.status {
            OrchestrationStatus::NeedsAttention => {
                // Wait for external resume; each wait is a cancellation point.
                self.attention_waits += 1;
                tracing::debug!(
                    orchestration_id = %self.orchestration_id,
                    waits = self.attention_waits,
                    "waiting for operator"
                );
                return Ok(Tick::Waited);
            }
            OrchestrationStatus::Paused | OrchestrationStatus::WaitingMerge => {
                return Ok(Tick::Waited);
            }
            OrchestrationStatus::Pending => {
                self.deps.orchestrations.start(&self.orchestration_id)?;
                return Ok(Tick::Acted);
            }
            OrchestrationStatus::Running => {}
            OrchestrationStatus::Completed | OrchestrationStatus::Failed => {
                return Ok(Tick::Finished);
            }
        }

        if ex.current_phase == Phase::Done {
            // Merge already succeeded; finalize if a crash interrupted it.
            self.deps.orchestrations.complete(&self.orchestration_id)?;
            return Ok(Tick::Finished);
        }

        // One active workflow per orchestration, ever (I8).
        let active = self
            .deps
            .workflows
            .find_active_by_orchestration(&self.project_id, &self.orchestration_id)?;
        if active.len() > 1 {
            self.escalate(
                "duplicate active workflows",
                vec![RecoveryOption::Retry, RecoveryOption::Abort],
                Some(active[0].id),
            )
            .await?;
            return Ok(Tick::Acted);
        }

        match ex.expected_workflow().copied() {
            Some(workflow_id) => self.observe(&ex, workflow_id).await,
            None => self.spawn_for_phase(&ex).await,
        }
    }

    // ---- spawning ----

    async fn spawn_for_phase(&mut self, ex: &OrchestrationExecution) -> Result<Tick, EngineError> {
        let phase = ex.current_phase;
        if phase == Phase::Implement && ex.batches.items.is_empty() {
            let plan = self
                .deps
                .batch_parser
                .parse_batches(&self.project_path, ex.config.batch_size)
                .await;
            match plan {
                Some(plan) if !plan.batches.is_empty() => {
                    self.deps.orchestrations.update_batches(&self.orchestration_id, &plan)?;
                    return Ok(Tick::Acted);
                }
                _ => {
                    self.escalate(
                        "no batches to implement",
                        vec![RecoveryOption::Retry, RecoveryOption::Abort],
                        None,
                    )
                    .await?;
                    return Ok(Tick::Acted);
                }
            }
        }

        let context = if phase == Phase::Implement {
            ex.batches.current_batch().map(batch_summary)
        } else {
            None
        };

        let Some(workflow) = self.guarded_spawn(phase_skill(phase), context).await? else {
            return Ok(Tick::Waited);
        };
        self.deps.orchestrations.link_workflow_execution(&self.orchestration_id, workflow.id)?;
        Ok(Tick::Acted)
    }

    /// Spawn with the duplicate-intent guard: an identical intent inside the
    /// window suppresses the spawn and leaves a decision entry.
    async fn guarded_spawn(
        &mut self,
        skill: &str,
        context: Option<String>,
    ) -> Result<Option<WorkflowExecution>, EngineError> {
        let now_ms = self.deps.clock.epoch_ms();
        if let Some(intent) = &self.last_intent {
            if intent.skill == skill
                && intent.context == context
                && now_ms.saturating_sub(intent.at_ms) < self.intent_window_ms
            {
                tracing::warn!(
                    orchestration_id = %self.orchestration_id,
                    skill,
                    "duplicate spawn intent inside window, suppressing"
                );
                self.deps.orchestrations.note(
                    &self.orchestration_id,
                    "spawn_suppressed_duplicate",
                    format!("skill {skill}"),
                )?;
                return Ok(None);
            }
        }
        self.last_intent =
            Some(SpawnIntent { skill: skill.to_string(), context: context.clone(), at_ms: now_ms });

        let mut params = StartWorkflow::new(self.project_id.clone(), skill);
        params.orchestration_id = Some(self.orchestration_id);
        params.context = context;
        let workflow = self.deps.workflows.start_workflow(params).await?;
        Ok(Some(workflow))
    }

    // ---- observation ----

    async fn observe(
        &mut self,
        ex: &OrchestrationExecution,
        workflow_id: WorkflowId,
    ) -> Result<Tick, EngineError> {
        let Some(workflow) = self.deps.workflows.get_workflow(&workflow_id)? else {
            // Linked but no record on disk: unclear evidence.
            return self.unclear_check("linked workflow record missing").await;
        };

        self.accrue_cost(&workflow)?;

        if workflow.status.is_terminal_success() {
            self.consecutive_unclear_checks = 0;
            self.consecutive_stale_polls = 0;
            self.on_success(ex, &workflow).await?;
            return Ok(Tick::Acted);
        }
        if workflow.status.is_terminal_failure() {
            self.consecutive_unclear_checks = 0;
            self.consecutive_stale_polls = 0;
            self.apply_failure_policy(ex, &workflow).await?;
            return Ok(Tick::Acted);
        }

        let health = match self
            .deps
            .health
            .evaluate(&workflow, self.deps.workflows.store())
            .await
        {
            Ok(health) => health,
            Err(e) => {
                // I/O trouble while probing is an unclear outcome.
                return self.unclear_check(&format!("health probe error: {e}")).await;
            }
        };

        if workflow.status == WorkflowStatus::Running && health.pid_alive.is_none() {
            return self.unclear_check("running with no PID evidence").await;
        }
        self.consecutive_unclear_checks = 0;

        match health.health_status {
            HealthStatus::Alive => {
                self.consecutive_stale_polls = 0;
                Ok(Tick::Waited)
            }
            HealthStatus::Stale => self.on_stale(ex, workflow, &health).await,
            HealthStatus::Dead => {
                let mut failed = workflow;
                failed.mark_failed("Process terminated unexpectedly", self.deps.clock.now_utc());
                self.deps.workflows.record_workflow(&failed)?;
                self.apply_failure_policy(ex, &failed).await?;
                Ok(Tick::Acted)
            }
        }
    }

    async fn on_stale(
        &mut self,
        ex: &OrchestrationExecution,
        mut workflow: WorkflowExecution,
        health: &ProcessHealth,
    ) -> Result<Tick, EngineError> {
        self.consecutive_stale_polls += 1;

        if workflow.status != WorkflowStatus::Stale {
            // Record the stale observation once.
            workflow.status = WorkflowStatus::Stale;
            let age_min = health.session_file_age_ms.unwrap_or_default() / 60_000;
            workflow.error = Some(format!("Session inactive (no updates in {age_min}+ minutes)"));
            workflow.updated_at = self.deps.clock.now_utc();
            self.deps.workflows.record_workflow(&workflow)?;
        }

        if self.consecutive_stale_polls >= STALE_FAIL_THRESHOLD {
            workflow.mark_failed("stale past threshold", self.deps.clock.now_utc());
            self.deps.workflows.record_workflow(&workflow)?;
            self.consecutive_stale_polls = 0;
            self.apply_failure_policy(ex, &workflow).await?;
        }
        Ok(Tick::Acted)
    }

    /// Indeterminate outcome: count it, escalate at the circuit-breaker
    /// threshold. Any clear decision resets the counter.
    async fn unclear_check(&mut self, reason: &str) -> Result<Tick, EngineError> {
        self.consecutive_unclear_checks += 1;
        tracing::debug!(
            orchestration_id = %self.orchestration_id,
            reason,
            count = self.consecutive_unclear_checks,
            "unclear health check"
        );
        if self.consecutive_unclear_checks >= self.max_polling_attempts {
            self.consecutive_unclear_checks = 0;
            self.escalate(
                format!("health indeterminate: {reason}"),
                vec![RecoveryOption::Retry, RecoveryOption::Abort],
                None,
            )
            .await?;
            return Ok(Tick::Acted);
        }
        Ok(Tick::Waited)
    }

    // ---- outcomes ----

    async fn on_success(
        &mut self,
        ex: &OrchestrationExecution,
        workflow: &WorkflowExecution,
    ) -> Result<(), EngineError> {
        match ex.current_phase {
            Phase::Design | Phase::Analyze => {
                self.deps.orchestrations.transition_to_next_phase(&self.orchestration_id)?;
            }
            Phase::Implement => {
                // Advances the cursor; moves to verify after the last batch.
                self.deps.orchestrations.complete_batch(&self.orchestration_id, workflow)?;
            }
            Phase::Verify => {
                if ex.config.auto_merge {
                    self.deps.orchestrations.transition_to_next_phase(&self.orchestration_id)?;
                } else {
                    self.deps.orchestrations.await_merge(&self.orchestration_id)?;
                }
            }
            Phase::Merge => {
                self.deps.orchestrations.complete(&self.orchestration_id)?;
            }
            Phase::Done => {}
        }
        Ok(())
    }

    async fn apply_failure_policy(
        &mut self,
        ex: &OrchestrationExecution,
        workflow: &WorkflowExecution,
    ) -> Result<(), EngineError> {
        let issue = workflow
            .error
            .clone()
            .unwrap_or_else(|| format!("workflow {} {}", workflow.id, workflow.status));

        if ex.current_phase != Phase::Implement {
            self.escalate(
                format!("{} phase failed: {issue}", ex.current_phase),
                vec![RecoveryOption::Retry, RecoveryOption::Abort],
                Some(workflow.id),
            )
            .await?;
            return Ok(());
        }

        if self.deps.orchestrations.can_heal_batch(&self.orchestration_id)? {
            self.deps.orchestrations.increment_heal_attempt(&self.orchestration_id)?;
            let context = ex.batches.current_batch().map(batch_summary);
            if let Some(healer) = self.guarded_spawn("heal", context).await? {
                self.deps.orchestrations.heal_batch(&self.orchestration_id, healer.id)?;
            }
        } else {
            self.escalate(
                format!("heal budget exhausted: {issue}"),
                vec![RecoveryOption::Retry, RecoveryOption::Skip, RecoveryOption::Abort],
                Some(workflow.id),
            )
            .await?;
        }
        Ok(())
    }

    async fn escalate(
        &mut self,
        issue: impl Into<String>,
        options: Vec<RecoveryOption>,
        failed_workflow_id: Option<WorkflowId>,
    ) -> Result<(), EngineError> {
        let issue = issue.into();
        tracing::warn!(
            orchestration_id = %self.orchestration_id,
            issue = %issue,
            "escalating to needs_attention"
        );
        let notice = EscalationNotice::new(self.orchestration_id, issue.clone(), options.clone());
        self.deps.orchestrations.set_needs_attention(
            &self.orchestration_id,
            issue,
            options,
            failed_workflow_id,
        )?;
        // Best-effort: the notifier logs its own failures.
        self.deps.notifier.escalated(&notice).await;
        Ok(())
    }

    /// Accrue the delta between the workflow's reported cost and the last
    /// observed value, clamped at zero so total cost never decreases.
    fn accrue_cost(&mut self, workflow: &WorkflowExecution) -> Result<(), EngineError> {
        let last = self.last_cost.get(&workflow.id).copied().unwrap_or(0.0);
        let delta = (workflow.cost_usd - last).max(0.0);
        if delta > 0.0 {
            self.deps.orchestrations.add_cost(&self.orchestration_id, delta)?;
            self.last_cost.insert(workflow.id, workflow.cost_usd);
        }
        Ok(())
    }
}

/// Skill identifier for each phase's workflow.
fn phase_skill(phase: Phase) -> &'static str {
    match phase {
        Phase::Design => "design",
        Phase::Analyze => "analyze",
        Phase::Implement => "implement",
        Phase::Verify => "verify",
        Phase::Merge => "merge",
        Phase::Done => "done",
    }
}

/// Short human summary of a batch, used as healer/implement prompt context.
fn batch_summary(batch: &sf_core::Batch) -> String {
    format!("batch {}: {}", batch.index, batch.task_ids.join(", "))
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
