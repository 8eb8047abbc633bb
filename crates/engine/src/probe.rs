// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OS process probing: PID liveness, child-binary enumeration, kill.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::ffi::OsStr;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// Binary name the supervisor's children run under.
pub const CHILD_BINARY: &str = "claude";

/// A process that matches the child binary name, with its OS start time
/// (seconds since epoch, at least second precision). The start time guards
/// against PID reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateProcess {
    pub pid: u32,
    pub start_time_secs: u64,
}

/// Seam over the OS process table.
pub trait ProcessProbe: Send + Sync + 'static {
    /// Signal-0 liveness check. Permission denied means the process exists
    /// but belongs to someone else — that counts as alive.
    fn is_pid_alive(&self, pid: u32) -> bool;

    /// OS-level list of processes matching the child binary name.
    fn enumerate_candidates(&self) -> Vec<CandidateProcess>;

    /// Send SIGTERM (or SIGKILL when `force`). Returns whether the signal
    /// was delivered.
    fn kill(&self, pid: u32, force: bool) -> bool;
}

/// Probe backed by `nix` signals and `sysinfo` enumeration.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    child_binary: String,
}

impl SystemProbe {
    pub fn new(child_binary: impl Into<String>) -> Self {
        Self { child_binary: child_binary.into() }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new(CHILD_BINARY)
    }
}

impl ProcessProbe for SystemProbe {
    fn is_pid_alive(&self, pid: u32) -> bool {
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            // EPERM: exists but not ours — alive. ESRCH: does not exist.
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn enumerate_candidates(&self) -> Vec<CandidateProcess> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
        system
            .processes()
            .iter()
            .filter(|(_, process)| process.name() == OsStr::new(&self.child_binary))
            .map(|(pid, process)| CandidateProcess {
                pid: pid.as_u32(),
                start_time_secs: process.start_time(),
            })
            .collect()
    }

    fn kill(&self, pid: u32, force: bool) -> bool {
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        kill(Pid::from_raw(pid as i32), signal).is_ok()
    }
}

#[cfg(test)]
#[path = "probe_tests.rs"]
mod tests;
