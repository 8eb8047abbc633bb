// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry loading (`$HOME/.specflow/registry.json`).

use crate::store::StorageError;
use sf_core::Registry;
use std::path::PathBuf;
use tracing::warn;

/// Path to the registry document.
///
/// `SPECFLOW_HOME` overrides the home directory so tests can point the
/// supervisor at a temp tree.
pub fn registry_path() -> PathBuf {
    let home = std::env::var("SPECFLOW_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs::home_dir().unwrap_or_default());
    home.join(crate::layout::STATE_DIR).join("registry.json")
}

/// Load the registry. A missing file is an empty registry; a corrupt one is
/// logged and treated as empty rather than taking the supervisor down.
pub fn load_registry() -> Result<Registry, StorageError> {
    let path = registry_path();
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Registry::default()),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&contents) {
        Ok(registry) => Ok(registry),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt registry, treating as empty");
            Ok(Registry::default())
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
