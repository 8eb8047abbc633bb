// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sf_core::{Batch, FakeClock, OrchestrationConfig, WorkflowStatus};
use std::time::Duration;

struct Fixture {
    _dir: tempfile::TempDir,
    clock: FakeClock,
    store: OrchestrationStore<FakeClock>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let store = OrchestrationStore::new(StateStore::new(dir.path()), clock.clone());
    Fixture { _dir: dir, clock, store }
}

fn seed(f: &Fixture, config: OrchestrationConfig) -> OrchestrationId {
    let mut ex = OrchestrationExecution::new("proj", "/tmp/proj", config, &f.clock);
    ex.status = OrchestrationStatus::Running;
    f.store.create(&ex).unwrap();
    ex.id
}

fn seed_implement(f: &Fixture, batches: usize) -> OrchestrationId {
    let id = seed(f, OrchestrationConfig::default());
    let mut ex = f.store.get(&id).unwrap().unwrap();
    ex.current_phase = Phase::Implement;
    ex.batches.items = (0..batches).map(|i| Batch::new(i, vec![format!("t{i}")])).collect();
    f.store.create(&ex).unwrap();
    id
}

fn completed_workflow(id: WorkflowId) -> WorkflowExecution {
    let mut wf = WorkflowExecution::builder().build();
    wf.id = id;
    wf.status = WorkflowStatus::Completed;
    wf
}

#[test]
fn missing_orchestration_yields_none() {
    let f = fixture();
    assert!(f.store.transition_to_next_phase(&OrchestrationId::new()).unwrap().is_none());
    assert!(f.store.pause(&OrchestrationId::new()).unwrap().is_none());
}

#[test]
fn start_moves_pending_to_running() {
    let f = fixture();
    let ex = OrchestrationExecution::new(
        "proj",
        "/tmp/proj",
        OrchestrationConfig::default(),
        &f.clock,
    );
    f.store.create(&ex).unwrap();

    let started = f.store.start(&ex.id).unwrap().unwrap();
    assert_eq!(started.status, OrchestrationStatus::Running);
    assert_eq!(started.decision_log.last().unwrap().decision, "started");

    // Starting twice violates the precondition.
    assert!(matches!(
        f.store.start(&ex.id),
        Err(EngineError::Precondition { .. })
    ));
}

#[test]
fn phase_transition_follows_order_and_logs() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());

    let ex = f.store.transition_to_next_phase(&id).unwrap().unwrap();
    assert_eq!(ex.current_phase, Phase::Analyze);
    let entry = ex.decision_log.last().unwrap();
    assert_eq!(entry.decision, "phase_transition");
    assert_eq!(entry.reason, "design -> analyze");
}

#[test]
fn verify_to_merge_requires_auto_merge() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());
    let mut ex = f.store.get(&id).unwrap().unwrap();
    ex.current_phase = Phase::Verify;
    f.store.create(&ex).unwrap();

    assert!(matches!(
        f.store.transition_to_next_phase(&id),
        Err(EngineError::Precondition { .. })
    ));

    let config = OrchestrationConfig { auto_merge: true, ..OrchestrationConfig::default() };
    let id = seed(&f, config);
    let mut ex = f.store.get(&id).unwrap().unwrap();
    ex.current_phase = Phase::Verify;
    f.store.create(&ex).unwrap();
    let ex = f.store.transition_to_next_phase(&id).unwrap().unwrap();
    assert_eq!(ex.current_phase, Phase::Merge);
}

#[test]
fn terminal_orchestrations_reject_mutation() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());
    f.store.fail(&id, "boom").unwrap().unwrap();

    assert!(matches!(
        f.store.transition_to_next_phase(&id),
        Err(EngineError::Precondition { .. })
    ));
    assert!(matches!(f.store.add_cost(&id, 1.0), Err(EngineError::Precondition { .. })));
    assert!(matches!(f.store.fail(&id, "again"), Err(EngineError::Precondition { .. })));
}

#[test]
fn link_records_in_phase_slot() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());
    let wf = WorkflowId::new();

    let ex = f.store.link_workflow_execution(&id, wf).unwrap().unwrap();
    assert_eq!(ex.executions.design, Some(wf));
    assert_eq!(ex.decision_log.last().unwrap().decision, "workflow_linked");
}

#[test]
fn link_records_in_current_batch_during_implement() {
    let f = fixture();
    let id = seed_implement(&f, 2);
    let wf = WorkflowId::new();

    let ex = f.store.link_workflow_execution(&id, wf).unwrap().unwrap();
    assert_eq!(ex.batches.items[0].workflow_execution_id, Some(wf));
    assert_eq!(ex.executions.implement, vec![wf]);
}

#[test]
fn add_cost_accumulates_and_rejects_negative() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());

    f.store.add_cost(&id, 0.5).unwrap();
    let ex = f.store.add_cost(&id, 0.25).unwrap().unwrap();
    assert_eq!(ex.total_cost_usd, 0.75);

    assert!(matches!(f.store.add_cost(&id, -0.1), Err(EngineError::Invariant(_))));
}

#[test]
fn add_cost_does_not_log_decisions() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());
    let before = f.store.get(&id).unwrap().unwrap().decision_log.len();
    f.store.add_cost(&id, 1.0).unwrap();
    let after = f.store.get(&id).unwrap().unwrap().decision_log.len();
    assert_eq!(before, after);
}

#[test]
fn update_batches_only_once_and_only_in_implement() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());
    let plan = BatchPlan::new(vec![Batch::new(0, vec!["t1".into()])]);

    // Design phase: rejected.
    assert!(matches!(
        f.store.update_batches(&id, &plan),
        Err(EngineError::Precondition { .. })
    ));

    let mut ex = f.store.get(&id).unwrap().unwrap();
    ex.current_phase = Phase::Implement;
    f.store.create(&ex).unwrap();

    let ex = f.store.update_batches(&id, &plan).unwrap().unwrap();
    assert_eq!(ex.batches.items.len(), 1);
    assert_eq!(ex.batches.current, 0);
    assert_eq!(ex.decision_log.last().unwrap().decision, "batch_plan_set");

    // Second seeding: rejected.
    assert!(matches!(
        f.store.update_batches(&id, &plan),
        Err(EngineError::Precondition { .. })
    ));
}

#[test]
fn complete_batch_advances_cursor_then_phase() {
    let f = fixture();
    let id = seed_implement(&f, 2);

    let wf0 = WorkflowId::new();
    f.store.link_workflow_execution(&id, wf0).unwrap();
    let ex = f.store.complete_batch(&id, &completed_workflow(wf0)).unwrap().unwrap();
    assert_eq!(ex.batches.completed, vec![0]);
    assert_eq!(ex.batches.current, 1);
    assert_eq!(ex.current_phase, Phase::Implement);

    let wf1 = WorkflowId::new();
    f.store.link_workflow_execution(&id, wf1).unwrap();
    let ex = f.store.complete_batch(&id, &completed_workflow(wf1)).unwrap().unwrap();
    assert_eq!(ex.batches.completed, vec![0, 1]);
    assert_eq!(ex.current_phase, Phase::Verify);
    let decisions: Vec<_> = ex.decision_log.iter().map(|e| e.decision.as_str()).collect();
    assert!(decisions.contains(&"batch_complete"));
    assert_eq!(ex.decision_log.last().unwrap().reason, "implement -> verify");
}

#[test]
fn complete_batch_requires_linked_successful_workflow() {
    let f = fixture();
    let id = seed_implement(&f, 1);
    let linked = WorkflowId::new();
    f.store.link_workflow_execution(&id, linked).unwrap();

    // Unlinked workflow.
    assert!(matches!(
        f.store.complete_batch(&id, &completed_workflow(WorkflowId::new())),
        Err(EngineError::Precondition { .. })
    ));

    // Linked but failed workflow.
    let mut failed = completed_workflow(linked);
    failed.status = WorkflowStatus::Failed;
    assert!(matches!(
        f.store.complete_batch(&id, &failed),
        Err(EngineError::Precondition { .. })
    ));
}

#[test]
fn heal_flow_respects_budget() {
    let f = fixture();
    let id = seed_implement(&f, 1);

    assert!(f.store.can_heal_batch(&id).unwrap());
    f.store.increment_heal_attempt(&id).unwrap();
    assert!(f.store.can_heal_batch(&id).unwrap());
    f.store.increment_heal_attempt(&id).unwrap();
    // Default budget is 2: exhausted now.
    assert!(!f.store.can_heal_batch(&id).unwrap());
    assert!(matches!(
        f.store.increment_heal_attempt(&id),
        Err(EngineError::Precondition { .. })
    ));
}

#[test]
fn heal_batch_marks_healed_and_relinks() {
    let f = fixture();
    let id = seed_implement(&f, 1);
    let original = WorkflowId::new();
    f.store.link_workflow_execution(&id, original).unwrap();
    f.store.increment_heal_attempt(&id).unwrap();

    let healer = WorkflowId::new();
    let ex = f.store.heal_batch(&id, healer).unwrap().unwrap();
    assert!(ex.batches.items[0].healed);
    assert_eq!(ex.batches.items[0].workflow_execution_id, Some(healer));
    assert_eq!(ex.executions.healers, vec![healer]);
    assert_eq!(ex.batches.items[0].heal_attempts, 1);
}

#[test]
fn heal_batch_requires_a_prior_attempt() {
    let f = fixture();
    let id = seed_implement(&f, 1);
    assert!(matches!(
        f.store.heal_batch(&id, WorkflowId::new()),
        Err(EngineError::Precondition { .. })
    ));
}

#[test]
fn needs_attention_sets_and_resume_clears_recovery_context() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());
    let failed = WorkflowId::new();

    let ex = f
        .store
        .set_needs_attention(
            &id,
            "heal budget exhausted",
            vec![RecoveryOption::Retry, RecoveryOption::Skip, RecoveryOption::Abort],
            Some(failed),
        )
        .unwrap()
        .unwrap();
    assert_eq!(ex.status, OrchestrationStatus::NeedsAttention);
    let ctx = ex.recovery_context.as_ref().unwrap();
    assert_eq!(ctx.failed_workflow_id, Some(failed));
    assert_eq!(ctx.options.len(), 3);
    assert_eq!(ex.decision_log.last().unwrap().decision, "escalate_needs_attention");

    let ex = f.store.resume(&id).unwrap().unwrap();
    assert_eq!(ex.status, OrchestrationStatus::Running);
    assert!(ex.recovery_context.is_none());
}

#[test]
fn pause_resume_cycle() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());

    let ex = f.store.pause(&id).unwrap().unwrap();
    assert_eq!(ex.status, OrchestrationStatus::Paused);
    // Pausing a paused orchestration is a precondition violation.
    assert!(matches!(f.store.pause(&id), Err(EngineError::Precondition { .. })));

    let ex = f.store.resume(&id).unwrap().unwrap();
    assert_eq!(ex.status, OrchestrationStatus::Running);
    assert!(matches!(f.store.resume(&id), Err(EngineError::Precondition { .. })));
}

#[test]
fn trigger_merge_requires_successful_linked_verify() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());
    let mut ex = f.store.get(&id).unwrap().unwrap();
    ex.current_phase = Phase::Verify;
    f.store.create(&ex).unwrap();

    let verify = WorkflowId::new();
    f.store.link_workflow_execution(&id, verify).unwrap();
    f.store.await_merge(&id).unwrap();

    let ex = f.store.trigger_merge(&id, &completed_workflow(verify)).unwrap().unwrap();
    assert_eq!(ex.current_phase, Phase::Merge);
    assert_eq!(ex.status, OrchestrationStatus::Running);
    assert_eq!(ex.decision_log.last().unwrap().decision, "merge_triggered");
}

#[test]
fn complete_sets_terminal_state() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());
    let mut ex = f.store.get(&id).unwrap().unwrap();
    ex.current_phase = Phase::Merge;
    f.store.create(&ex).unwrap();

    let ex = f.store.complete(&id).unwrap().unwrap();
    assert_eq!(ex.status, OrchestrationStatus::Completed);
    assert_eq!(ex.current_phase, Phase::Done);
    assert!(ex.completed_at.is_some());
    assert_eq!(ex.decision_log.last().unwrap().decision, "completed");
}

#[test]
fn fail_with_custom_decision() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());

    let ex = f.store.fail_with(&id, "Linked workflow S: oom", "reconcile_failed").unwrap().unwrap();
    assert_eq!(ex.status, OrchestrationStatus::Failed);
    assert_eq!(ex.error_message.as_deref(), Some("Linked workflow S: oom"));
    assert_eq!(ex.decision_log.last().unwrap().decision, "reconcile_failed");
}

#[test]
fn every_mutation_bumps_updated_at() {
    let f = fixture();
    let id = seed(&f, OrchestrationConfig::default());
    let before = f.store.get(&id).unwrap().unwrap().updated_at;

    f.clock.advance(Duration::from_secs(7));
    let ex = f.store.add_cost(&id, 0.1).unwrap().unwrap();
    assert_eq!(ex.updated_at, before + chrono::TimeDelta::seconds(7));
    assert!(ex.updated_at >= ex.started_at);
}

// ---- property tests ----

mod properties {
    use super::*;
    use proptest::prelude::*;

    /// One randomly chosen mutator application.
    #[derive(Debug, Clone)]
    enum Op {
        Transition,
        Link,
        AddCost(f64),
        CompleteBatch,
        IncrementHeal,
        Heal,
        NeedsAttention,
        Pause,
        Resume,
        Fail,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Transition),
            Just(Op::Link),
            (0.0f64..2.0).prop_map(Op::AddCost),
            Just(Op::CompleteBatch),
            Just(Op::IncrementHeal),
            Just(Op::Heal),
            Just(Op::NeedsAttention),
            Just(Op::Pause),
            Just(Op::Resume),
            Just(Op::Fail),
        ]
    }

    fn apply(f: &Fixture, id: &OrchestrationId, op: &Op) -> f64 {
        // Precondition failures are expected outcomes here; invariant
        // violations would mean the store persisted a bad state.
        let mut spent = 0.0;
        let result = match op {
            Op::Transition => f.store.transition_to_next_phase(id),
            Op::Link => f.store.link_workflow_execution(id, WorkflowId::new()),
            Op::AddCost(delta) => {
                let result = f.store.add_cost(id, *delta);
                if result.is_ok() {
                    spent = *delta;
                }
                result
            }
            Op::CompleteBatch => {
                let linked = f
                    .store
                    .get(id)
                    .ok()
                    .flatten()
                    .and_then(|ex| ex.batches.current_batch().and_then(|b| b.workflow_execution_id));
                match linked {
                    Some(wf) => f.store.complete_batch(id, &completed_workflow(wf)),
                    None => Ok(None),
                }
            }
            Op::IncrementHeal => f.store.increment_heal_attempt(id),
            Op::Heal => f.store.heal_batch(id, WorkflowId::new()),
            Op::NeedsAttention => f.store.set_needs_attention(
                id,
                "issue",
                vec![RecoveryOption::Retry, RecoveryOption::Abort],
                None,
            ),
            Op::Pause => f.store.pause(id),
            Op::Resume => f.store.resume(id),
            Op::Fail => f.store.fail(id, "boom"),
        };
        match result {
            Ok(_) | Err(EngineError::Precondition { .. }) => spent,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        // P1: every persisted state satisfies the record invariants.
        // P4: the decision log is prefix-preserving across mutations.
        // P5: total cost equals the sum of accepted non-negative deltas.
        #[test]
        fn invariants_hold_after_any_mutation_sequence(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let f = fixture();
            let id = seed_implement(&f, 2);
            let mut expected_cost = 0.0;
            let mut prior_log: Vec<String> = Vec::new();

            for op in &ops {
                expected_cost += apply(&f, &id, op);
                let ex = f.store.get(&id).unwrap().unwrap();

                prop_assert!(ex.check_invariants().is_ok(), "violated: {:?}", ex.check_invariants());

                let log: Vec<String> = ex.decision_log.iter().map(|e| e.decision.clone()).collect();
                prop_assert!(log.len() >= prior_log.len());
                prop_assert_eq!(&log[..prior_log.len()], &prior_log[..]);
                prior_log = log;

                prop_assert!((ex.total_cost_usd - expected_cost).abs() < 1e-9);
            }
        }
    }
}
