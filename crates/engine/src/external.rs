// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seams for external collaborators the core consumes but does not own:
//! the batch-file parser and the project file-activity tracker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sf_core::Batch;
use std::path::Path;

/// Parsed implementation plan: the batches the implement phase will run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
}

impl BatchPlan {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches }
    }
}

/// Parses the project's batch file into a plan.
///
/// Returns `None` when no batch file exists or it yields no tasks — the
/// runner escalates in that case rather than guessing.
#[async_trait]
pub trait BatchParser: Send + Sync + 'static {
    async fn parse_batches(
        &self,
        project_path: &Path,
        fallback_batch_size: u32,
    ) -> Option<BatchPlan>;
}

/// Reports the last file change inside a project tree (epoch ms).
///
/// Used by the health evaluator as a freshness signal when the session
/// journal itself is absent.
#[async_trait]
pub trait FileActivityTracker: Send + Sync + 'static {
    async fn last_file_change_time(&self, project_path: &Path) -> Option<u64>;
}
