// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timeout and threshold constants shared across the supervisor.

/// Session file older than this is considered stale (10 minutes).
pub const STALE_THRESHOLD_MS: u64 = 10 * 60 * 1000;

/// Candidate processes younger than this are never reported as orphans (5 minutes).
pub const ORPHAN_GRACE_PERIOD_MS: u64 = 5 * 60 * 1000;

/// Running orchestrations with no updates for longer than this are failed
/// during startup reconciliation (4 hours).
pub const MAX_ORCHESTRATION_AGE_MS: u64 = 4 * 60 * 60 * 1000;

/// Consecutive stale observations before the runner fails a workflow.
pub const STALE_FAIL_THRESHOLD: u32 = 3;

/// Maximum number of sessions kept in the derived `index.json`.
pub const INDEX_MAX_SESSIONS: usize = 50;

/// Backoff schedule for transient I/O retries (spec'd as 3 attempts).
pub const IO_RETRY_BACKOFF_MS: [u64; 3] = [10, 50, 200];

/// Grace window after SIGTERM before escalating to SIGKILL (5 seconds).
pub const KILL_GRACE_MS: u64 = 5_000;

/// Poll step while waiting for a signalled process to exit.
pub const KILL_POLL_MS: u64 = 100;

/// Default runner polling interval.
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 5_000;

/// Default ceiling on consecutive unclear health checks before escalation.
pub const DEFAULT_MAX_POLLING_ATTEMPTS: u32 = 10;

/// Default batch size when the batch file does not specify one.
pub const DEFAULT_BATCH_SIZE: u32 = 5;

/// Default heal budget per batch.
pub const DEFAULT_MAX_HEAL_ATTEMPTS: u32 = 2;
