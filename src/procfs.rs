//! Introspection over the `/proc` views of a process.
//!
//! The engine consumes `/proc/<pid>/task` for thread enumeration,
//! `/proc/<pid>/status` for the scheduler state, and
//! `/proc/<pid>/{cmdline,comm}` to locate processes by name when
//! attaching to an application that was started externally.

use std::fs;
use std::path::PathBuf;

use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{DebuggerError, Result};

/// Scheduler state of a process, parsed from the first token after
/// `State:` in `/proc/<pid>/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    Running,
    Sleeping,
    DiskSleep,
    Stopped,
    TracingStop,
    Zombie,
    Dead,
    Unknown,
}

impl ProcessState {
    pub fn from_char(c: char) -> Self {
        match c {
            'R' => ProcessState::Running,
            'S' => ProcessState::Sleeping,
            'D' => ProcessState::DiskSleep,
            'T' => ProcessState::Stopped,
            't' => ProcessState::TracingStop,
            'Z' => ProcessState::Zombie,
            'X' | 'x' => ProcessState::Dead,
            _ => ProcessState::Unknown,
        }
    }

    /// True for targets a debugger can pick up: stopped by a signal (the
    /// debug-wait state of an app launch) or already in a tracing stop.
    pub fn is_stopped(self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::TracingStop)
    }
}

/// String match mode for process lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Sensitive,
    Insensitive,
}

fn contains(haystack: &str, needle: &str, mode: MatchMode) -> bool {
    if needle.is_empty() {
        return false;
    }
    match mode {
        MatchMode::Sensitive => haystack.contains(needle),
        MatchMode::Insensitive => haystack.to_lowercase().contains(&needle.to_lowercase()),
    }
}

pub fn proc_path(pid: Pid, entry: &str) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/{entry}"))
}

/// Enumerates the thread ids of a process, ascending.
pub fn thread_ids(pid: Pid) -> Result<Vec<Pid>> {
    let task_dir = proc_path(pid, "task");
    let mut tids = Vec::new();
    for entry in fs::read_dir(&task_dir)? {
        let entry = entry?;
        match entry.file_name().to_string_lossy().parse::<i32>() {
            Ok(tid) => tids.push(Pid::from_raw(tid)),
            Err(_) => warn!(
                "non-numeric entry in {}: {:?}",
                task_dir.display(),
                entry.file_name()
            ),
        }
    }
    tids.sort();
    debug!("process {pid} has {} thread(s)", tids.len());
    Ok(tids)
}

/// Reads the scheduler state of a process.
pub fn process_state(pid: Pid) -> Result<ProcessState> {
    let status = fs::read_to_string(proc_path(pid, "status"))?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("State:") {
            let c = rest.trim_start().chars().next().unwrap_or('?');
            return Ok(ProcessState::from_char(c));
        }
    }
    warn!("no State line in status of process {pid}");
    Ok(ProcessState::Unknown)
}

/// Reads the argument vector of a process (`\0`-joined in the kernel view).
pub fn cmdline(pid: Pid) -> Result<Vec<String>> {
    let raw = fs::read(proc_path(pid, "cmdline"))?;
    Ok(raw
        .split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect())
}

/// Reads the short name of a process.
pub fn comm(pid: Pid) -> Result<String> {
    let raw = fs::read_to_string(proc_path(pid, "comm"))?;
    Ok(raw.trim_end().to_string())
}

/// Finds every process whose cmdline or short name contains `name`.
///
/// Unreadable `/proc` entries (processes that died mid-scan, or entries
/// the debugger may not inspect) are skipped silently.
pub fn find_processes(name: &str, mode: MatchMode) -> Result<Vec<Pid>> {
    if name.is_empty() {
        return Err(DebuggerError::InvalidArgument(
            "process name must not be empty".to_string(),
        ));
    }

    let mut found = Vec::new();
    for entry in fs::read_dir("/proc")? {
        let entry = entry?;
        let Ok(raw_pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        let pid = Pid::from_raw(raw_pid);

        let cmdline_hit = cmdline(pid)
            .map(|argv| argv.iter().any(|arg| contains(arg, name, mode)))
            .unwrap_or(false);
        let comm_hit = comm(pid)
            .map(|short| contains(&short, name, mode))
            .unwrap_or(false);

        if cmdline_hit || comm_hit {
            found.push(pid);
        }
    }
    found.sort();
    debug!("found {} process(es) matching {name:?}", found.len());
    Ok(found)
}

#[cfg(test)]
mod test {
    use super::*;
    use nix::unistd::getpid;

    #[test]
    fn test_state_parse_table() {
        assert_eq!(ProcessState::from_char('R'), ProcessState::Running);
        assert_eq!(ProcessState::from_char('S'), ProcessState::Sleeping);
        assert_eq!(ProcessState::from_char('D'), ProcessState::DiskSleep);
        assert_eq!(ProcessState::from_char('T'), ProcessState::Stopped);
        assert_eq!(ProcessState::from_char('t'), ProcessState::TracingStop);
        assert_eq!(ProcessState::from_char('Z'), ProcessState::Zombie);
        assert_eq!(ProcessState::from_char('X'), ProcessState::Dead);
        assert_eq!(ProcessState::from_char('?'), ProcessState::Unknown);
        assert!(ProcessState::Stopped.is_stopped());
        assert!(ProcessState::TracingStop.is_stopped());
        assert!(!ProcessState::Running.is_stopped());
    }

    #[test]
    fn test_own_process_is_visible() {
        let me = getpid();
        let tids = thread_ids(me).unwrap();
        assert!(tids.contains(&me));
        assert_ne!(process_state(me).unwrap(), ProcessState::Unknown);
        assert!(!comm(me).unwrap().is_empty());
        assert!(!cmdline(me).unwrap().is_empty());
    }

    #[test]
    fn test_match_modes() {
        assert!(contains("com.example.app", "Example", MatchMode::Insensitive));
        assert!(!contains("com.example.app", "Example", MatchMode::Sensitive));
        assert!(contains("com.example.app", "example", MatchMode::Sensitive));
        assert!(!contains("anything", "", MatchMode::Sensitive));
    }
}
