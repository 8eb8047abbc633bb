// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn pid_file_pids_dedup_and_sort() {
    let file = PidFile {
        bash_pid: Some(100),
        claude_pid: Some(42),
        started_at: DateTime::UNIX_EPOCH,
    };
    assert_eq!(file.pids(), vec![42, 100]);

    let same = PidFile {
        bash_pid: Some(42),
        claude_pid: Some(42),
        started_at: DateTime::UNIX_EPOCH,
    };
    assert_eq!(same.pids(), vec![42]);
}

#[test]
fn pid_file_serializes_camel_case() {
    let file = PidFile { bash_pid: Some(1), claude_pid: None, started_at: DateTime::UNIX_EPOCH };
    let json = serde_json::to_value(&file).unwrap();
    assert!(json.get("bashPid").is_some());
    assert!(json.get("startedAt").is_some());
    assert!(json.get("claudePid").is_none());
}

#[test]
fn pid_file_tolerates_partial_records() {
    let parsed: PidFile =
        serde_json::from_str(r#"{"startedAt":"2026-01-01T00:00:00Z"}"#).unwrap();
    assert!(parsed.pids().is_empty());
}

#[test]
fn health_status_serializes_snake_case() {
    assert_eq!(serde_json::to_string(&HealthStatus::Stale).unwrap(), "\"stale\"");
    assert_eq!(format!("{}", HealthStatus::Dead), "dead");
}

#[test]
fn process_health_alive_has_no_evidence() {
    let health = ProcessHealth::alive();
    assert_eq!(health.health_status, HealthStatus::Alive);
    assert!(health.pid_alive.is_none());
    assert!(health.session_file_age_ms.is_none());
}
