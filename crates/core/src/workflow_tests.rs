// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;

#[yare::parameterized(
    pending   = { WorkflowStatus::Pending, false, false },
    running   = { WorkflowStatus::Running, false, true },
    waiting   = { WorkflowStatus::WaitingForInput, false, true },
    stale     = { WorkflowStatus::Stale, false, true },
    completed = { WorkflowStatus::Completed, true, false },
    failed    = { WorkflowStatus::Failed, true, false },
    cancelled = { WorkflowStatus::Cancelled, true, false },
)]
fn status_classification(status: WorkflowStatus, terminal: bool, active: bool) {
    assert_eq!(status.is_terminal(), terminal);
    assert_eq!(status.is_active(), active);
}

#[test]
fn only_completed_is_terminal_success() {
    assert!(WorkflowStatus::Completed.is_terminal_success());
    assert!(!WorkflowStatus::Failed.is_terminal_success());
    assert!(WorkflowStatus::Failed.is_terminal_failure());
    assert!(WorkflowStatus::Cancelled.is_terminal_failure());
    assert!(!WorkflowStatus::Running.is_terminal_failure());
}

#[test]
fn status_serializes_snake_case() {
    assert_eq!(
        serde_json::to_string(&WorkflowStatus::WaitingForInput).unwrap(),
        "\"waiting_for_input\""
    );
}

#[test]
fn new_workflow_is_pending() {
    let clock = FakeClock::new();
    let wf = WorkflowExecution::new("proj", "design", None, &clock);
    assert_eq!(wf.status, WorkflowStatus::Pending);
    assert!(wf.session_id.is_none());
    assert_eq!(wf.started_at, wf.updated_at);
    assert_eq!(wf.cost_usd, 0.0);
}

#[test]
fn tracked_pids_dedups() {
    let wf = WorkflowExecution::builder()
        .pid(4242u32)
        .claude_pid(4242u32)
        .bash_pid(4241u32)
        .build();
    assert_eq!(wf.tracked_pids(), vec![4241, 4242]);
}

#[test]
fn tracked_pids_empty_without_pid_info() {
    let wf = WorkflowExecution::builder().build();
    assert!(wf.tracked_pids().is_empty());
}

#[test]
fn append_log_bumps_updated_at() {
    let clock = FakeClock::new();
    let mut wf = WorkflowExecution::builder().build();
    clock.advance(std::time::Duration::from_secs(5));
    wf.append_log("[RECONCILE] Process dead, marking as failed", clock.now_utc());
    assert_eq!(wf.logs.len(), 1);
    assert_eq!(wf.updated_at, clock.now_utc());
}

#[test]
fn mark_failed_sets_error() {
    let clock = FakeClock::new();
    let mut wf = WorkflowExecution::builder().build();
    wf.mark_failed("oom", clock.now_utc());
    assert_eq!(wf.status, WorkflowStatus::Failed);
    assert_eq!(wf.error.as_deref(), Some("oom"));
}

#[test]
fn record_serializes_camel_case() {
    let wf = WorkflowExecution::builder()
        .session_id(SessionId::new())
        .claude_pid(99u32)
        .build();
    let json = serde_json::to_value(&wf).unwrap();
    assert!(json.get("sessionId").is_some());
    assert!(json.get("claudePid").is_some());
    assert!(json.get("costUsd").is_some());
    assert!(json.get("session_id").is_none());
}

#[test]
fn record_roundtrips_through_json() {
    let wf = WorkflowExecution::builder()
        .session_id(SessionId::new())
        .orchestration_id(crate::orchestration::OrchestrationId::new())
        .cost_usd(0.42)
        .error("boom")
        .build();
    let json = serde_json::to_string_pretty(&wf).unwrap();
    let parsed: WorkflowExecution = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.id, wf.id);
    assert_eq!(parsed.session_id, wf.session_id);
    assert_eq!(parsed.cost_usd, wf.cost_usd);
    assert_eq!(parsed.error, wf.error);
}
