//! Blocking waits on other processes before a benchmark starts.
//!
//! Waiting is by pid only. If a watched process exits and the operating
//! system hands its pid to an unrelated process before the next poll, the
//! wait continues on the new process; if the pid is reused between two runs
//! of the harness, an earlier waiter may also return too early. Both are
//! accepted limitations of pid polling.

use std::time::Duration;

use chrono::Local;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::config::Config;

pub const POLL_INTERVAL: Duration = Duration::from_secs(45);

/// Name or command-line fragment identifying other instances of this harness.
pub const HARNESS_SIGNATURE: &str = "perc-bench";

/// Notice threshold in polls, scaled by a multiplier doubled on every notice.
const NOTICE_BASE_POLLS: u64 = 60;

/// A process as seen in a snapshot of the process table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
    pub cmdline: String,
}

/// The view of the operating system's processes the waiter needs.
pub trait ProcessTable {
    fn exists(&mut self, pid: u32) -> bool;
    fn snapshot(&mut self) -> Vec<ProcessEntry>;
}

/// [`ProcessTable`] backed by `sysinfo`.
pub struct SystemProcessTable {
    sys: System,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn exists(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        self.sys
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.sys.process(pid).is_some()
    }

    fn snapshot(&mut self) -> Vec<ProcessEntry> {
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
        );
        self.sys
            .processes()
            .values()
            .map(|process| ProcessEntry {
                pid: process.pid().as_u32(),
                parent: process.parent().map(|pid| pid.as_u32()),
                name: process.name().to_string_lossy().into_owned(),
                cmdline: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" "),
            })
            .collect()
    }
}

/// Decides on which polls a "still waiting" notice is printed: the first
/// one, then once the poll count exceeds a threshold that doubles every time
/// it is crossed.
#[derive(Debug)]
pub struct NoticeCadence {
    polls: u64,
    multiplier: u64,
}

impl NoticeCadence {
    pub fn new() -> Self {
        Self {
            polls: 0,
            multiplier: 1,
        }
    }

    /// Call once per poll that found the process still alive.
    pub fn tick(&mut self) -> bool {
        let notify = self.polls == 0 || self.polls > NOTICE_BASE_POLLS * self.multiplier;
        if notify {
            self.multiplier *= 2;
            self.polls = 1;
        }
        self.polls += 1;
        notify
    }
}

impl Default for NoticeCadence {
    fn default() -> Self {
        Self::new()
    }
}

/// Block until all prerequisites in `config` are met: first the explicit
/// pids, then every other running instance of this harness.
pub fn await_prerequisites(config: &Config, table: &mut impl ProcessTable) {
    wait_for_processes(table, &config.await_pids, config.poll_interval);

    if config.await_tests {
        let entries = table.snapshot();
        let others = sibling_harnesses(&entries, std::process::id(), HARNESS_SIGNATURE);
        log::info!("found {} other harness process(es): {:?}", others.len(), others);
        wait_for_processes(table, &others, config.poll_interval);
    }
}

pub fn wait_for_processes(table: &mut impl ProcessTable, pids: &[u32], poll_interval: Duration) {
    for &pid in pids {
        wait_for_process(table, pid, poll_interval);
    }
}

/// Sleep in `poll_interval` steps until `pid` no longer exists. Unbounded.
///
/// Returns the number of polls that found the process alive.
pub fn wait_for_process(table: &mut impl ProcessTable, pid: u32, poll_interval: Duration) -> u64 {
    let mut cadence = NoticeCadence::new();
    let mut alive_polls = 0;
    while table.exists(pid) {
        if cadence.tick() {
            println!(
                "Waiting for PID {} to finish. ({})",
                pid,
                Local::now().format("%Y-%m-%d %H:%M:%S")
            );
        }
        alive_polls += 1;
        std::thread::sleep(poll_interval);
    }
    log::debug!("PID {} is gone after {} poll(s)", pid, alive_polls);
    alive_polls
}

/// Pids of processes whose name or command line carries `signature`,
/// excluding `self_pid` and its parent.
pub fn sibling_harnesses(entries: &[ProcessEntry], self_pid: u32, signature: &str) -> Vec<u32> {
    let parent_pid = entries
        .iter()
        .find(|entry| entry.pid == self_pid)
        .and_then(|entry| entry.parent);

    let mut pids: Vec<u32> = entries
        .iter()
        .filter(|entry| entry.pid != self_pid && Some(entry.pid) != parent_pid)
        .filter(|entry| entry.name.contains(signature) || entry.cmdline.contains(signature))
        .map(|entry| entry.pid)
        .collect();
    pids.sort_unstable();
    pids
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Each pid stays alive for a fixed number of `exists` calls.
    #[derive(Default)]
    struct FakeTable {
        remaining: HashMap<u32, u32>,
        entries: Vec<ProcessEntry>,
        exists_calls: Vec<u32>,
    }

    impl FakeTable {
        fn alive_for(mut self, pid: u32, polls: u32) -> Self {
            self.remaining.insert(pid, polls);
            self
        }
    }

    impl ProcessTable for FakeTable {
        fn exists(&mut self, pid: u32) -> bool {
            self.exists_calls.push(pid);
            match self.remaining.get_mut(&pid) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        }

        fn snapshot(&mut self) -> Vec<ProcessEntry> {
            self.entries.clone()
        }
    }

    fn entry(pid: u32, parent: Option<u32>, name: &str, cmdline: &str) -> ProcessEntry {
        ProcessEntry {
            pid,
            parent,
            name: name.to_string(),
            cmdline: cmdline.to_string(),
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::new("percolator", ".");
        config.poll_interval = Duration::ZERO;
        config
    }

    #[test]
    fn nothing_to_wait_for_returns_immediately() {
        let mut table = FakeTable::default().alive_for(42, 1000);
        let config = fast_config();

        await_prerequisites(&config, &mut table);
        assert!(table.exists_calls.is_empty());
    }

    #[test]
    fn missing_pid_is_not_waited_on() {
        let mut table = FakeTable::default();
        assert_eq!(wait_for_process(&mut table, 4242, Duration::ZERO), 0);
        assert_eq!(table.exists_calls, vec![4242]);
    }

    #[test]
    fn waits_until_pid_disappears() {
        let mut table = FakeTable::default().alive_for(17, 3);
        assert_eq!(wait_for_process(&mut table, 17, Duration::ZERO), 3);
        assert_eq!(table.exists_calls.len(), 4);
    }

    #[test]
    fn explicit_pids_waited_in_order() {
        let mut table = FakeTable::default().alive_for(10, 1).alive_for(20, 2);
        let mut config = fast_config();
        config.await_pids = vec![10, 20];

        await_prerequisites(&config, &mut table);
        assert_eq!(table.exists_calls, vec![10, 10, 20, 20, 20]);
    }

    #[test]
    fn await_tests_waits_for_sibling_harnesses() {
        let me = std::process::id();
        let mut table = FakeTable::default().alive_for(900, 2);
        table.entries = vec![
            entry(me, Some(1), "perc-bench", "perc-bench -a"),
            entry(900, Some(1), "perc-bench", "perc-bench -r 5"),
            entry(901, Some(1), "bash", "bash"),
        ];
        let mut config = fast_config();
        config.await_tests = true;

        await_prerequisites(&config, &mut table);
        assert_eq!(table.exists_calls, vec![900, 900, 900]);
    }

    #[test]
    fn siblings_exclude_self_and_parent() {
        let entries = vec![
            entry(100, Some(50), "perc-bench", "perc-bench -a"),
            entry(50, Some(1), "sh", "sh -c perc-bench -a"),
            entry(200, Some(1), "perc-bench", "perc-bench"),
            entry(300, Some(1), "python3", "python3 run.py"),
        ];
        assert_eq!(sibling_harnesses(&entries, 100, "perc-bench"), vec![200]);
    }

    #[test]
    fn siblings_match_on_command_line() {
        let entries = vec![
            entry(100, None, "self", ""),
            entry(7, Some(1), "sh", "sh /opt/bin/perc-bench --runs 3"),
            entry(3, Some(1), "perc-bench", ""),
        ];
        assert_eq!(sibling_harnesses(&entries, 100, "perc-bench"), vec![3, 7]);
    }

    #[test]
    fn siblings_without_self_entry_still_exclude_self() {
        let entries = vec![entry(100, None, "perc-bench", "perc-bench")];
        assert!(sibling_harnesses(&entries, 100, "perc-bench").is_empty());
    }

    #[test]
    fn cadence_notifies_first_poll_then_backs_off() {
        let mut cadence = NoticeCadence::new();
        let notices: Vec<usize> = (0..400).filter(|_| cadence.tick()).collect();
        // The threshold doubles on the first notice already: 120 polls, then 240.
        assert_eq!(notices, vec![0, 120, 360]);
    }
}
