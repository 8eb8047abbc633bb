// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project registry shape (`$HOME/.specflow/registry.json`).
//!
//! Registry fields are snake_case on disk, unlike the camelCase
//! orchestration and workflow records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// A project registered with the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredProject {
    pub path: PathBuf,
    pub name: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Optional registry-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_folders: Option<Vec<String>>,
}

/// The full registry document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub projects: HashMap<String, RegisteredProject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<RegistryConfig>,
}

impl Registry {
    /// (project id, project path) pairs, sorted by id for stable iteration.
    pub fn project_paths(&self) -> Vec<(String, PathBuf)> {
        let mut out: Vec<_> =
            self.projects.iter().map(|(id, p)| (id.clone(), p.path.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
