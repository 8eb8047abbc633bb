// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fakes shared by engine unit tests and workspace integration tests.

use crate::error::EngineError;
use crate::external::{BatchParser, BatchPlan, FileActivityTracker};
use crate::notify::{EscalationNotice, Notifier};
use crate::probe::{CandidateProcess, ProcessProbe};
use crate::spawn::{ProcessSpawner, SpawnRequest, SpawnedChild};
use async_trait::async_trait;
use parking_lot::Mutex;
use sf_core::Batch;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Probe over an in-memory process table.
#[derive(Debug, Default)]
pub struct FakeProbe {
    alive: Mutex<HashSet<u32>>,
    candidates: Mutex<Vec<CandidateProcess>>,
    killed: Mutex<Vec<(u32, bool)>>,
    term_immune: Mutex<HashSet<u32>>,
}

impl FakeProbe {
    pub fn set_alive(&self, pid: u32) {
        self.alive.lock().insert(pid);
    }

    pub fn set_dead(&self, pid: u32) {
        self.alive.lock().remove(&pid);
    }

    /// Simulate a child that ignores SIGTERM (only SIGKILL removes it).
    pub fn ignore_sigterm(&self, pid: u32) {
        self.term_immune.lock().insert(pid);
    }

    pub fn add_candidate(&self, pid: u32, start_time_secs: u64) {
        self.candidates.lock().push(CandidateProcess { pid, start_time_secs });
    }

    pub fn kills(&self) -> Vec<(u32, bool)> {
        self.killed.lock().clone()
    }
}

impl ProcessProbe for FakeProbe {
    fn is_pid_alive(&self, pid: u32) -> bool {
        self.alive.lock().contains(&pid)
    }

    fn enumerate_candidates(&self) -> Vec<CandidateProcess> {
        self.candidates.lock().clone()
    }

    fn kill(&self, pid: u32, force: bool) -> bool {
        self.killed.lock().push((pid, force));
        if !force && self.term_immune.lock().contains(&pid) {
            return true;
        }
        self.alive.lock().remove(&pid)
    }
}

/// Spawner that fabricates PIDs and registers them as alive on a probe.
pub struct FakeSpawner {
    probe: Arc<FakeProbe>,
    next_pid: AtomicU32,
    fail_next: AtomicBool,
    requests: Mutex<Vec<SpawnRequest>>,
}

impl FakeSpawner {
    pub fn new(probe: Arc<FakeProbe>) -> Self {
        Self {
            probe,
            next_pid: AtomicU32::new(10_000),
            fail_next: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.lock().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ProcessSpawner for FakeSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedChild, EngineError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Spawn("forced failure".to_string()));
        }
        self.requests.lock().push(request.clone());
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.probe.set_alive(pid);
        Ok(SpawnedChild { pid, start_time_secs: 1 })
    }
}

/// Activity tracker returning a fixed last-change time.
#[derive(Debug, Clone, Copy)]
pub struct FakeActivity(Option<u64>);

impl FakeActivity {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(epoch_ms: u64) -> Self {
        Self(Some(epoch_ms))
    }
}

#[async_trait]
impl FileActivityTracker for FakeActivity {
    async fn last_file_change_time(&self, _project_path: &Path) -> Option<u64> {
        self.0
    }
}

/// Batch parser returning a canned plan.
pub struct FakeBatchParser(Mutex<Option<BatchPlan>>);

impl FakeBatchParser {
    pub fn with_plan(batches: Vec<Batch>) -> Self {
        Self(Mutex::new(Some(BatchPlan::new(batches))))
    }

    pub fn empty() -> Self {
        Self(Mutex::new(None))
    }
}

#[async_trait]
impl BatchParser for FakeBatchParser {
    async fn parse_batches(
        &self,
        _project_path: &Path,
        _fallback_batch_size: u32,
    ) -> Option<BatchPlan> {
        self.0.lock().clone()
    }
}

/// Notifier that records every escalation notice it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<EscalationNotice>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<EscalationNotice> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn escalated(&self, notice: &EscalationNotice) {
        self.sent.lock().push(notice.clone());
    }
}
