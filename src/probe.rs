//! Process probe: liveness, parentage, children, and RSS for one PID.
//!
//! Primary source is `/proc/<pid>/stat` (field layout per `proc(5)`); when
//! that path is unavailable the probe falls back to shelling out to `ps`.
//! Both paths parse tolerantly — a field we can't make sense of becomes
//! "unknown", never a hard error.

use std::fs;
use std::process::Command;

use crate::job_control;

/// Parsed subset of `/proc/<pid>/stat`'s fields that the supervisor needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: libc::pid_t,
    pub ppid: libc::pid_t,
    pub pgrp: libc::pid_t,
}

/// `true` if `pid` currently exists.
pub fn is_alive(pid: libc::pid_t) -> bool {
    job_control::is_alive(pid)
}

/// The process group id of `pid`, if still resolvable.
pub fn pgid_of(pid: libc::pid_t) -> Option<libc::pid_t> {
    job_control::process_group_id(pid).ok()
}

/// RSS in kilobytes, best-effort.
pub fn rss_kb(pid: libc::pid_t) -> Option<u64> {
    if let Some(info) = read_proc_stat(pid) {
        return statm_rss_kb(info.pid).or(None);
    }
    ps_rss_kb(pid)
}

fn statm_rss_kb(pid: libc::pid_t) -> Option<u64> {
    let contents = fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let pages: u64 = contents.split_whitespace().nth(1)?.parse().ok()?;
    let page_size_kb = 4; // standard 4 KiB pages; tolerant fallback if wrong.
    Some(pages * page_size_kb)
}

/// Direct children of `pid`, discovered by scanning `/proc/*/stat` for a
/// matching `ppid` field, falling back to `ps --ppid`.
pub fn children_of(pid: libc::pid_t) -> Vec<libc::pid_t> {
    if let Some(children) = proc_children_of(pid) {
        return children;
    }
    ps_children_of(pid)
}

/// All transitive descendants of the process group led by `pgid`: every
/// pid in the process group plus everything reachable by walking the
/// parent-PID relation down from those pids.
pub fn descendants_of(pgid: libc::pid_t) -> Vec<libc::pid_t> {
    let mut seen = std::collections::HashSet::new();
    let mut stack = vec![pgid];
    let mut out = Vec::new();

    while let Some(pid) = stack.pop() {
        if !seen.insert(pid) {
            continue;
        }
        out.push(pid);
        for child in children_of(pid) {
            if !seen.contains(&child) {
                stack.push(child);
            }
        }
    }

    out
}

fn read_proc_stat(pid: libc::pid_t) -> Option<ProcessInfo> {
    let contents = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_proc_stat(&contents)
}

/// `comm` (2nd field) is parenthesized and may itself contain spaces or
/// parens, so we split on the *last* `)` before tokenizing the remainder —
/// the same trick the kernel's own `proc(5)` docs recommend.
fn parse_proc_stat(contents: &str) -> Option<ProcessInfo> {
    let close_paren = contents.rfind(')')?;
    let pid_str = contents.split('(').next()?.trim();
    let pid: libc::pid_t = pid_str.parse().ok()?;

    let rest = contents.get(close_paren + 1..)?;
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    let ppid: libc::pid_t = fields.next()?.parse().ok()?;
    let pgrp: libc::pid_t = fields.next()?.parse().ok()?;

    Some(ProcessInfo { pid, ppid, pgrp })
}

fn proc_children_of(pid: libc::pid_t) -> Option<Vec<libc::pid_t>> {
    let entries = fs::read_dir("/proc").ok()?;
    let mut children = Vec::new();

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(candidate_pid) = name.to_str().and_then(|s| s.parse::<libc::pid_t>().ok())
        else {
            continue;
        };
        if let Some(info) = read_proc_stat(candidate_pid) {
            if info.ppid == pid {
                children.push(candidate_pid);
            }
        }
    }

    Some(children)
}

fn ps_children_of(pid: libc::pid_t) -> Vec<libc::pid_t> {
    let Ok(output) = Command::new("ps")
        .args(["--ppid", &pid.to_string(), "-o", "pid="])
        .output()
    else {
        return Vec::new();
    };

    parse_ps_pid_column(&String::from_utf8_lossy(&output.stdout))
}

fn ps_rss_kb(pid: libc::pid_t) -> Option<u64> {
    let output = Command::new("ps")
        .args(["-o", "rss=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}

/// Tolerant line parser: skip any header, accept blank lines, treat any
/// line that doesn't parse as a pid as noise rather than a fatal error.
fn parse_ps_pid_column(output: &str) -> Vec<libc::pid_t> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<libc::pid_t>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_comm() {
        let info = parse_proc_stat("123 (sleep) S 1 123 123 0 -1 ...").unwrap();
        assert_eq!(info.pid, 123);
        assert_eq!(info.ppid, 1);
        assert_eq!(info.pgrp, 123);
    }

    #[test]
    fn tolerates_parens_and_spaces_in_comm() {
        let info = parse_proc_stat("456 (my (weird) prog) R 10 456 456 0 -1 ...").unwrap();
        assert_eq!(info.pid, 456);
        assert_eq!(info.ppid, 10);
        assert_eq!(info.pgrp, 456);
    }

    #[test]
    fn rejects_truncated_stat() {
        assert!(parse_proc_stat("789 (x) R").is_none());
    }

    #[test]
    fn ps_output_skips_header_and_blanks() {
        let output = "  PID\n\n  123\n456\nnot-a-pid\n";
        assert_eq!(parse_ps_pid_column(output), vec![123, 456]);
    }

    #[test]
    fn current_process_is_alive() {
        let pid = std::process::id() as libc::pid_t;
        assert!(is_alive(pid));
    }
}
