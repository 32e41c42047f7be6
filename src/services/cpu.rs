//! CPU usage service
//!
//! Reads `/proc/stat` (whole system) and `/proc/<pid>/stat` (target app)
//! over the remote shell and converts jiffy deltas between ticks into
//! percentages. The first poll has no baseline and emits 0 for both
//! series.

use super::{PerfService, Sample};
use crate::agent::AgentLink;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

/// CPU polling service
pub struct CpuPerfService {
    pid: u32,
    last_total: Option<CpuTimes>,
    last_app: Option<u64>,
}

impl CpuPerfService {
    /// Create a service for the target app's PID
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            last_total: None,
            last_app: None,
        }
    }
}

/// Parse the aggregate `cpu` line of `/proc/stat`
///
/// Fields after the label are user, nice, system, idle, iowait, irq,
/// softirq, ... — all jiffies. Busy time is everything except idle and
/// iowait.
fn parse_proc_stat(output: &str) -> Option<CpuTimes> {
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&"cpu") {
            continue;
        }
        if tokens.len() < 5 {
            // Truncated line: end of data
            return None;
        }
        let fields: Vec<u64> = tokens[1..]
            .iter()
            .map_while(|t| t.parse::<u64>().ok())
            .collect();
        if fields.len() < 4 {
            return None;
        }
        let total: u64 = fields.iter().sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        return Some(CpuTimes {
            busy: total - idle,
            total,
        });
    }
    None
}

/// Parse utime+stime out of `/proc/<pid>/stat`
///
/// The comm field is parenthesized and may contain spaces, so tokenizing
/// starts after the closing paren; utime and stime are then the 12th and
/// 13th fields.
fn parse_pid_stat(output: &str) -> Option<u64> {
    let rest = output.rsplit_once(')')?.1;
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() < 13 {
        return None;
    }
    let utime = tokens[11].parse::<u64>().ok()?;
    let stime = tokens[12].parse::<u64>().ok()?;
    Some(utime + stime)
}

impl PerfService for CpuPerfService {
    fn name(&self) -> &'static str {
        "CPU"
    }

    fn uses_agent_link(&self) -> bool {
        // Shell-only: a successful poll says nothing about the agent socket
        false
    }

    fn poll(&mut self, link: &mut AgentLink) -> Result<Vec<Sample>> {
        let total_out = link.exec_shell("cat /proc/stat")?;
        let app_out = link.exec_shell(&format!("cat /proc/{}/stat", self.pid))?;

        let times = parse_proc_stat(&total_out)
            .ok_or_else(|| Error::Shell("truncated /proc/stat output".into()))?;
        let app = parse_pid_stat(&app_out)
            .ok_or_else(|| Error::Shell("truncated process stat output".into()))?;

        let (app_pct, total_pct) = match (self.last_total, self.last_app) {
            (Some(prev), Some(prev_app)) if times.total > prev.total => {
                let window = (times.total - prev.total) as f64;
                let busy = times.busy.saturating_sub(prev.busy) as f64;
                let app_busy = app.saturating_sub(prev_app) as f64;
                (app_busy / window * 100.0, busy / window * 100.0)
            }
            _ => (0.0, 0.0),
        };
        self.last_total = Some(times);
        self.last_app = Some(app);

        Ok(vec![
            Sample::new("App", app_pct),
            Sample::new("Total", total_pct),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adb::ScriptedShell;
    use crate::transport::MockTransport;

    const STAT_T0: &str = "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 50 0 50 350 50 0 0 0 0 0\n";
    const STAT_T1: &str = "cpu  150 0 150 800 150 0 0 0 0 0\ncpu0 75 0 75 400 75 0 0 0 0 0\n";

    fn pid_stat(utime: u64, stime: u64) -> String {
        format!(
            "4242 (com.example:app worker) S 1 4242 0 0 -1 4194560 1000 0 0 0 {} {} 0 0 20 0 30 0 100 0 0",
            utime, stime
        )
    }

    fn link_with(shell: ScriptedShell) -> AgentLink {
        AgentLink::new(Box::new(MockTransport::new()), Box::new(shell))
    }

    #[test]
    fn test_parse_proc_stat() {
        let times = parse_proc_stat(STAT_T0).unwrap();
        assert_eq!(times.total, 1000);
        assert_eq!(times.busy, 200);
    }

    #[test]
    fn test_parse_pid_stat_with_spaced_comm() {
        assert_eq!(parse_pid_stat(&pid_stat(40, 20)), Some(60));
    }

    #[test]
    fn test_parse_pid_stat_truncated() {
        assert_eq!(parse_pid_stat("4242 (app) S 1 4242"), None);
    }

    #[test]
    fn test_bootstrap_emits_zero() {
        let shell = ScriptedShell::new();
        shell.push_ok(STAT_T0);
        shell.push_ok(&pid_stat(10, 10));
        let mut link = link_with(shell);
        let mut svc = CpuPerfService::new(4242);

        let samples = svc.poll(&mut link).unwrap();
        assert_eq!(samples[0], Sample::new("App", 0.0));
        assert_eq!(samples[1], Sample::new("Total", 0.0));
    }

    #[test]
    fn test_jiffy_deltas_to_percent() {
        let shell = ScriptedShell::new();
        shell.push_ok(STAT_T0);
        shell.push_ok(&pid_stat(10, 10));
        shell.push_ok(STAT_T1);
        shell.push_ok(&pid_stat(40, 20));
        let mut link = link_with(shell);
        let mut svc = CpuPerfService::new(4242);

        svc.poll(&mut link).unwrap();
        let samples = svc.poll(&mut link).unwrap();

        // Window 250 jiffies; app went 20 -> 60, busy 200 -> 300
        assert_eq!(samples[0], Sample::new("App", 16.0));
        assert_eq!(samples[1], Sample::new("Total", 40.0));
    }

    #[test]
    fn test_missing_process_is_no_data() {
        let shell = ScriptedShell::new();
        shell.push_ok(STAT_T0);
        shell.push_ok(""); // process exited, cat printed nothing
        let mut link = link_with(shell);
        let mut svc = CpuPerfService::new(4242);

        let err = svc.poll(&mut link).unwrap_err();
        assert!(matches!(err, Error::Shell(_)));
        assert!(!err.is_link_failure());
    }
}
