//! Resource sampling for a sandboxed child
//!
//! The sandboxed child leads its own process group, and usage is summed over
//! every live member of that group. On Linux each member's
//! `/proc/<pid>/stat` gives CPU time (including reaped children) and
//! `/proc/<pid>/status` gives resident memory. Elsewhere only elapsed time is
//! known and the wall clock is the sole enforced ceiling.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Point-in-time measurement of a child process
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsageSnapshot {
    /// User plus system CPU time
    pub cpu_time: Duration,
    /// CPU time relative to elapsed time, in percent
    pub cpu_percent: f64,
    /// Resident set size in bytes
    pub memory_bytes: u64,
    pub elapsed: Duration,
}

impl ResourceUsageSnapshot {
    /// Fold another sample into a running peak
    pub fn absorb(&mut self, other: &ResourceUsageSnapshot) {
        self.cpu_time = self.cpu_time.max(other.cpu_time);
        self.cpu_percent = self.cpu_percent.max(other.cpu_percent);
        self.memory_bytes = self.memory_bytes.max(other.memory_bytes);
        self.elapsed = self.elapsed.max(other.elapsed);
    }
}

#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    pid: u32,
    started: Instant,
    clock_ticks: u64,
}

impl ResourceMonitor {
    pub fn new(pid: u32, started: Instant) -> Self {
        Self {
            pid,
            started,
            clock_ticks: clock_ticks_per_second(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Current usage of the whole group; CPU and memory read as zero when
    /// unavailable
    pub fn sample(&self) -> ResourceUsageSnapshot {
        let elapsed = self.elapsed();
        let (cpu_time, memory_bytes) = self.read_group();
        let cpu_time = cpu_time.unwrap_or_default();
        let memory_bytes = memory_bytes.unwrap_or(0);
        let cpu_percent = if elapsed.is_zero() {
            0.0
        } else {
            cpu_time.as_secs_f64() / elapsed.as_secs_f64() * 100.0
        };
        ResourceUsageSnapshot {
            cpu_time,
            cpu_percent,
            memory_bytes,
            elapsed,
        }
    }

    #[cfg(target_os = "linux")]
    fn read_group(&self) -> (Option<Duration>, Option<u64>) {
        let mut ticks: Option<u64> = None;
        let mut rss: Option<u64> = None;
        for pid in self.group_members() {
            let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
                continue;
            };
            let Some(line) = parse_stat(&stat) else {
                continue;
            };
            if pid != self.pid && line.pgrp != self.pid {
                continue;
            }
            *ticks.get_or_insert(0) += line.cpu_ticks;
            if let Some(bytes) = std::fs::read_to_string(format!("/proc/{}/status", pid))
                .ok()
                .and_then(|status| parse_rss_bytes(&status))
            {
                *rss.get_or_insert(0) += bytes;
            }
        }
        (ticks.map(|t| ticks_to_duration(t, self.clock_ticks)), rss)
    }

    /// Candidate pids; the leader alone when `/proc` cannot be listed
    #[cfg(target_os = "linux")]
    fn group_members(&self) -> Vec<u32> {
        match std::fs::read_dir("/proc") {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
                .collect(),
            Err(e) => {
                log::debug!("cannot list /proc: {}", e);
                vec![self.pid]
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn read_group(&self) -> (Option<Duration>, Option<u64>) {
        (None, None)
    }
}

#[cfg(unix)]
fn clock_ticks_per_second() -> u64 {
    // SAFETY: sysconf only reads a configuration value
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

#[cfg(not(unix))]
fn clock_ticks_per_second() -> u64 {
    100
}

fn ticks_to_duration(ticks: u64, per_second: u64) -> Duration {
    let per_second = per_second.max(1);
    Duration::from_secs(ticks / per_second)
        + Duration::from_nanos((ticks % per_second) * 1_000_000_000 / per_second)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatLine {
    pgrp: u32,
    /// utime + stime + cutime + cstime
    cpu_ticks: u64,
}

/// Process group and CPU ticks from a `/proc/<pid>/stat` line
///
/// The command name may contain spaces and parentheses, so fields are counted
/// from the last `)`.
fn parse_stat(stat: &str) -> Option<StatLine> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is field 3 (state); pgrp is field 5, utime..cstime are 14 to 17
    let pgrp: u32 = fields.get(2)?.parse().ok()?;
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let reaped: u64 = fields[13..fields.len().min(15)]
        .iter()
        .filter_map(|f| f.parse::<u64>().ok())
        .sum();
    Some(StatLine {
        pgrp,
        cpu_ticks: utime + stime + reaped,
    })
}

/// VmRSS from `/proc/<pid>/status`, in bytes
fn parse_rss_bytes(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kb * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_with_odd_command_name() {
        let stat = "4242 (sh (x) y) R 1 4240 4242 0 -1 4194304 120 0 0 0 250 50 7 3 20 0 1 0 100 1000 200";
        assert_eq!(
            parse_stat(stat),
            Some(StatLine {
                pgrp: 4240,
                cpu_ticks: 310
            })
        );
    }

    #[test]
    fn test_parse_stat_truncated() {
        assert_eq!(parse_stat("4242 (sh) R 1 2"), None);
    }

    #[test]
    fn test_parse_status_rss() {
        let status = "Name:\tsh\nVmPeak:\t  9000 kB\nVmRSS:\t  2048 kB\nThreads:\t1\n";
        assert_eq!(parse_rss_bytes(status), Some(2048 * 1024));
        assert_eq!(parse_rss_bytes("Name:\tzombie\n"), None);
    }

    #[test]
    fn test_ticks_to_duration() {
        assert_eq!(ticks_to_duration(250, 100), Duration::from_millis(2500));
    }

    #[test]
    fn test_absorb_keeps_peaks() {
        let mut peak = ResourceUsageSnapshot {
            memory_bytes: 10,
            cpu_time: Duration::from_millis(5),
            ..Default::default()
        };
        peak.absorb(&ResourceUsageSnapshot {
            memory_bytes: 4,
            cpu_time: Duration::from_millis(9),
            ..Default::default()
        });
        assert_eq!(peak.memory_bytes, 10);
        assert_eq!(peak.cpu_time, Duration::from_millis(9));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_samples_own_process() {
        let monitor = ResourceMonitor::new(std::process::id(), Instant::now());
        let sample = monitor.sample();
        assert!(sample.memory_bytes > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_group_usage_includes_background_members() {
        use std::os::unix::process::CommandExt;
        use std::process::{Command, Stdio};

        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 5 & sleep 5 & wait")
            .stdout(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();
        let monitor = ResourceMonitor::new(child.id(), Instant::now());
        std::thread::sleep(Duration::from_millis(200));

        let leader_rss = std::fs::read_to_string(format!("/proc/{}/status", child.id()))
            .ok()
            .and_then(|s| parse_rss_bytes(&s))
            .unwrap_or(0);
        let group = monitor.sample();
        assert!(group.memory_bytes > leader_rss, "{} <= {}", group.memory_bytes, leader_rss);

        // SAFETY: the child leads its own group
        unsafe { libc::kill(-(child.id() as libc::pid_t), libc::SIGKILL) };
        child.wait().unwrap();
    }
}
