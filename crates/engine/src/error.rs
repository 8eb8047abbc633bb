// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the supervision engine

use thiserror::Error;

/// Errors that can occur while supervising orchestrations and workflows.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] sf_storage::StorageError),
    /// A typed mutator was called against a state that forbids it
    /// (e.g. transitioning a terminal orchestration). The caller decides.
    #[error("precondition failed for {operation}: {reason}")]
    Precondition { operation: &'static str, reason: String },
    /// Bug-like condition that must fail loud, never be swallowed
    /// (negative cost delta, out-of-range batch cursor).
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("probe error: {0}")]
    Probe(String),
}

impl EngineError {
    pub(crate) fn precondition(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Precondition { operation, reason: reason.into() }
    }
}
