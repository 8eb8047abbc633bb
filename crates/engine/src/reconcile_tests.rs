// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::manager::StartWorkflow;
use crate::test_helpers::{FakeActivity, FakeProbe, FakeSpawner};
use sf_core::{FakeClock, OrchestrationConfig, OrchestrationExecution, Phase, SessionId, WorkflowExecution};
use std::time::Duration;

struct Fixture {
    dir: tempfile::TempDir,
    clock: FakeClock,
    probe: Arc<FakeProbe>,
    deps: ReconcileDeps<FakeClock>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let probe = Arc::new(FakeProbe::default());
    let spawner = Arc::new(FakeSpawner::new(probe.clone()));
    let deps = ReconcileDeps {
        probe: probe.clone(),
        spawner,
        activity: Arc::new(FakeActivity::none()),
        clock: clock.clone(),
    };
    Fixture { dir, clock, probe, deps }
}

fn projects(f: &Fixture) -> Vec<(String, std::path::PathBuf)> {
    vec![("proj".to_string(), f.dir.path().to_path_buf())]
}

fn store(f: &Fixture) -> StateStore {
    StateStore::new(f.dir.path())
}

/// Persist a running workflow with a session and a PID file.
fn seed_running_workflow(f: &Fixture, pid: u32) -> WorkflowExecution {
    let store = store(f);
    let mut wf = WorkflowExecution::new("proj", "implement", None, &f.clock);
    let session = SessionId::new();
    wf.session_id = Some(session);
    wf.status = WorkflowStatus::Running;
    wf.pid = Some(pid);
    wf.claude_pid = Some(pid);
    store.write_workflow(&wf).unwrap();
    store
        .write_pid_file(
            &session,
            &sf_core::PidFile { bash_pid: None, claude_pid: Some(pid), started_at: f.clock.now_utc() },
        )
        .unwrap();
    wf
}

#[tokio::test]
async fn dead_workflow_is_marked_failed_with_startup_error() {
    let f = fixture();
    let wf = seed_running_workflow(&f, 99_999); // never alive on the fake probe

    let result = reconcile_workflows(&projects(&f), &f.deps).await;
    assert_eq!(result.workflows_checked, 1);
    assert_eq!(result.workflows_updated, 1);
    assert!(result.errors.is_empty());

    let session = wf.session_id.unwrap();
    let read = store(&f).read_workflow(&session).unwrap().unwrap();
    assert_eq!(read.status, WorkflowStatus::Failed);
    assert!(read.error.unwrap().starts_with("Process terminated unexpectedly"));
    assert!(read.logs.iter().any(|l| l == "[RECONCILE] Process dead, marking as failed"));

    // Index was rebuilt from metadata.
    let index = store(&f).read_index();
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].id, wf.id);
}

#[tokio::test]
async fn stale_workflow_is_marked_stale() {
    let f = fixture();
    let wf = seed_running_workflow(&f, 4242);
    f.probe.set_alive(4242);

    // Project activity stopped 20 minutes ago.
    let quiet_since = f.clock.epoch_ms();
    f.clock.advance(Duration::from_secs(20 * 60));
    let mut deps = f.deps.clone();
    deps.activity = Arc::new(FakeActivity::at(quiet_since));

    let result = reconcile_workflows(&projects(&f), &deps).await;
    assert_eq!(result.workflows_updated, 1);

    let read = store(&f).read_workflow(&wf.session_id.unwrap()).unwrap().unwrap();
    assert_eq!(read.status, WorkflowStatus::Stale);
    assert!(read.error.unwrap().starts_with("Session inactive"));
}

#[tokio::test]
async fn orchestration_fails_when_linked_workflow_failed() {
    let f = fixture();
    let store = store(&f);

    let mut wf = WorkflowExecution::new("proj", "implement", None, &f.clock);
    let session = SessionId::new();
    wf.session_id = Some(session);
    wf.mark_failed("oom", f.clock.now_utc());
    store.write_workflow(&wf).unwrap();

    let mut ex = OrchestrationExecution::new(
        "proj",
        f.dir.path(),
        OrchestrationConfig::default(),
        &f.clock,
    );
    ex.status = sf_core::OrchestrationStatus::Running;
    ex.current_phase = Phase::Implement;
    let mut batch = sf_core::Batch::new(0, vec!["t1".into()]);
    batch.workflow_execution_id = Some(wf.id);
    ex.batches.items = vec![batch];
    store.write_orchestration(&ex).unwrap();

    let result = reconcile_workflows(&projects(&f), &f.deps).await;
    assert_eq!(result.orchestrations_checked, 1);
    assert_eq!(result.orchestrations_updated, 1);

    let read = store.read_orchestration(&ex.id).unwrap().unwrap();
    assert_eq!(read.status, sf_core::OrchestrationStatus::Failed);
    let message = read.error_message.unwrap();
    assert!(message.starts_with("Linked workflow"));
    assert!(message.contains("oom"));
    assert_eq!(read.decision_log.last().unwrap().decision, "reconcile_failed");
}

#[tokio::test]
async fn ancient_running_orchestration_is_failed_as_stale() {
    let f = fixture();
    let store = store(&f);

    let mut ex = OrchestrationExecution::new(
        "proj",
        f.dir.path(),
        OrchestrationConfig::default(),
        &f.clock,
    );
    ex.status = sf_core::OrchestrationStatus::Running;
    store.write_orchestration(&ex).unwrap();

    f.clock.advance(Duration::from_secs(5 * 60 * 60)); // 5h > 4h limit
    let result = reconcile_workflows(&projects(&f), &f.deps).await;
    assert_eq!(result.orchestrations_updated, 1);

    let read = store.read_orchestration(&ex.id).unwrap().unwrap();
    assert_eq!(read.status, sf_core::OrchestrationStatus::Failed);
    assert_eq!(read.decision_log.last().unwrap().decision, "reconcile_stale");
}

#[tokio::test]
async fn reconcile_twice_updates_nothing_the_second_time() {
    let f = fixture();
    seed_running_workflow(&f, 99_999);

    let mut ex = OrchestrationExecution::new(
        "proj",
        f.dir.path(),
        OrchestrationConfig::default(),
        &f.clock,
    );
    ex.status = sf_core::OrchestrationStatus::Running;
    store(&f).write_orchestration(&ex).unwrap();
    f.clock.advance(Duration::from_secs(5 * 60 * 60));

    let first = reconcile_workflows(&projects(&f), &f.deps).await;
    assert!(first.workflows_updated > 0);
    assert!(first.orchestrations_updated > 0);

    let second = reconcile_workflows(&projects(&f), &f.deps).await;
    assert_eq!(second.workflows_updated, 0);
    assert_eq!(second.orchestrations_updated, 0);
}

#[tokio::test]
async fn orphans_are_reported_never_killed() {
    let f = fixture();
    // Two tracked children.
    seed_running_workflow(&f, 5001);
    seed_running_workflow(&f, 5002);
    f.probe.set_alive(5001);
    f.probe.set_alive(5002);
    f.probe.add_candidate(5001, f.clock.epoch_ms() / 1000);
    f.probe.add_candidate(5002, f.clock.epoch_ms() / 1000);

    // One unrelated child-binary process, started 10 minutes ago.
    let started = f.clock.epoch_ms() / 1000;
    f.probe.set_alive(7777);
    f.probe.add_candidate(7777, started);
    f.clock.advance(Duration::from_secs(10 * 60));

    let result = reconcile_workflows(&projects(&f), &f.deps).await;
    assert_eq!(result.orphans_found, 1);
    assert_eq!(result.orphans_killed, 0);
    assert!(f.probe.is_pid_alive(7777), "reconciliation must not kill");
    assert!(f.probe.kills().is_empty());
}

#[tokio::test]
async fn young_candidates_are_never_orphans() {
    let f = fixture();
    f.probe.set_alive(7777);
    // Started 1 minute ago: inside the grace period.
    f.probe.add_candidate(7777, f.clock.epoch_ms() / 1000);
    f.clock.advance(Duration::from_secs(60));

    let result = reconcile_workflows(&projects(&f), &f.deps).await;
    assert_eq!(result.orphans_found, 0);
}

#[tokio::test]
async fn find_orphans_matches_reconcile_scan() {
    let f = fixture();
    seed_running_workflow(&f, 5001);
    f.probe.set_alive(5001);
    f.probe.add_candidate(5001, f.clock.epoch_ms() / 1000);
    f.probe.set_alive(7777);
    f.probe.add_candidate(7777, f.clock.epoch_ms() / 1000);
    f.clock.advance(Duration::from_secs(10 * 60));

    let orphans = find_orphaned_claude_processes(&projects(&f), &f.deps).await;
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].pid, 7777);
}

#[tokio::test]
async fn cleanup_refuses_untracked_pids() {
    let f = fixture();
    f.probe.set_alive(7777);

    let killed = cleanup_orphaned_process(
        &projects(&f),
        &f.deps,
        7777,
        ORPHAN_GRACE_PERIOD_MS + 1,
        None,
    )
    .await
    .unwrap();
    assert!(!killed);
    assert!(f.probe.kills().is_empty());
}

#[tokio::test]
async fn cleanup_refuses_young_processes() {
    let f = fixture();
    let err = cleanup_orphaned_process(&projects(&f), &f.deps, 7777, 1_000, None).await;
    assert!(matches!(err, Err(EngineError::Precondition { .. })));
}

#[tokio::test]
async fn cleanup_kills_dashboard_tracked_pids() {
    let f = fixture();
    let wf = seed_running_workflow(&f, 5001);
    f.probe.set_alive(5001);

    let killed = cleanup_orphaned_process(
        &projects(&f),
        &f.deps,
        5001,
        ORPHAN_GRACE_PERIOD_MS + 1,
        Some(wf.id),
    )
    .await
    .unwrap();
    assert!(killed);
    assert_eq!(f.probe.kills(), vec![(5001, false)]);
}

#[tokio::test]
#[serial_test::serial(reconcile_latch)]
async fn latch_runs_at_most_once_per_process() {
    reset_reconciliation();
    let f = fixture();

    assert!(ensure_reconciliation(&projects(&f), &f.deps).await.is_some());
    assert!(ensure_reconciliation(&projects(&f), &f.deps).await.is_none());

    reset_reconciliation();
    assert!(ensure_reconciliation(&projects(&f), &f.deps).await.is_some());
    reset_reconciliation();
}

#[tokio::test]
async fn manager_spawned_children_are_tracked_not_orphans() {
    let f = fixture();
    let store = store(&f);
    let manager = WorkflowManager::new(
        store,
        f.probe.clone(),
        f.deps.spawner.clone(),
        f.clock.clone(),
    );
    let wf = manager.start_workflow(StartWorkflow::new("proj", "design")).await.unwrap();
    let pid = wf.claude_pid.unwrap();
    f.probe.add_candidate(pid, f.clock.epoch_ms() / 1000);
    f.clock.advance(Duration::from_secs(10 * 60));

    let result = reconcile_workflows(&projects(&f), &f.deps).await;
    assert_eq!(result.orphans_found, 0);
}
