// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sf-engine: Process supervision for the Specflow orchestration core.
//!
//! Wires together the probe (PID liveness), health evaluator (probe +
//! session-file freshness), workflow manager (spawn/kill/index), the
//! orchestration store (typed mutators over the durable record), the
//! polling runner that drives one orchestration, and the one-shot startup
//! reconciler.

pub mod error;
pub mod external;
pub mod health;
pub mod manager;
pub mod notify;
pub mod orchestrations;
pub mod probe;
pub mod reconcile;
pub mod runner;
pub mod spawn;

#[cfg(any(test, feature = "test-support"))]
pub mod test_helpers;

pub use error::EngineError;
pub use external::{BatchParser, BatchPlan, FileActivityTracker};
pub use health::HealthEvaluator;
pub use manager::{StartWorkflow, WorkflowManager};
pub use notify::{DesktopNotifier, EscalationNotice, Notifier};
pub use orchestrations::OrchestrationStore;
pub use probe::{CandidateProcess, ProcessProbe, SystemProbe};
pub use reconcile::{
    cleanup_orphaned_process, ensure_reconciliation, find_orphaned_claude_processes,
    reconcile_workflows, reset_reconciliation, OrphanReport, ReconcileDeps, ReconciliationResult,
};
pub use runner::{RunnerConfig, RunnerContext, RunnerDeps};
pub use spawn::{ClaudeSpawner, ProcessSpawner, SpawnRequest, SpawnedChild};
