//! Network traffic service
//!
//! Each tick assembles a snapshot of cumulative counters from two places:
//! the target app's totals via the agent's binary `network <uid>` command,
//! and one entry per active interface from the kernel's network device
//! statistics. Cumulative counters are turned into per-tick deltas against
//! the stored per-source baselines.
//!
//! Baseline rules:
//! - a source seen for the first time emits a zero delta (there is no
//!   "before" to subtract from) and its record becomes the baseline
//! - otherwise the delta is `new - stored` and the new record replaces the
//!   baseline unconditionally; a counter reset therefore produces exactly
//!   one negative-delta tick and self-heals on the next
//! - sources absent from a snapshot keep their baseline, so a transient
//!   interface disappearance does not lose history
//! - an empty snapshot skips the tick: a baseline is only ever replaced by
//!   a real observation

use super::{PerfService, Sample};
use crate::agent::AgentLink;
use crate::agent::wire::{self, CounterRecord};
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Synthetic source name for the target app's total traffic
pub const APP_SOURCE: &str = "App";

/// Bytes per kilobyte for sink scaling
const KB: f64 = 1024.0;

/// Per-tick counter deltas for one source
///
/// Signed: a counter reset shows up as one negative tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub rx_bytes: i64,
    pub rx_packets: i64,
    pub tx_bytes: i64,
    pub tx_packets: i64,
}

/// Network polling service
pub struct NetworkPerfService {
    uid: u32,
    baselines: HashMap<String, CounterRecord>,
}

impl NetworkPerfService {
    /// Create a service for the target app's UID with empty per-source
    /// state
    pub fn new(uid: u32) -> Self {
        Self {
            uid,
            baselines: HashMap::new(),
        }
    }

    /// Collect this tick's snapshot: app totals first, then interfaces
    fn fetch_snapshot(&self, link: &mut AgentLink) -> Result<Vec<(String, CounterRecord)>> {
        let mut snapshot = Vec::new();

        match link.send_command(&format!("network {}", self.uid)) {
            Ok(reply) => match wire::decode_counter_record(&reply) {
                Ok(record) => snapshot.push((APP_SOURCE.to_string(), record)),
                Err(e) => log::debug!("Network: unusable app counter reply: {}", e),
            },
            Err(e) if e.is_link_failure() => return Err(e),
            Err(e) => log::debug!("Network: app counters unavailable: {}", e),
        }

        match self.interface_sources(link) {
            Ok(mut interfaces) => snapshot.append(&mut interfaces),
            Err(e) => log::debug!("Network: interface counters unavailable: {}", e),
        }

        Ok(snapshot)
    }

    /// Enumerate active interfaces, then read their counters from
    /// `/proc/net/dev` restricted by the name filter
    fn interface_sources(&self, link: &AgentLink) -> Result<Vec<(String, CounterRecord)>> {
        let listing = link.exec_shell("netstat -i")?;
        let active = wire::parse_active_interfaces(&listing);
        if active.is_empty() {
            return Ok(Vec::new());
        }

        let pattern = active.join("|");
        let table = link.exec_shell(&format!("cat /proc/net/dev | grep -E '{}'", pattern))?;
        Ok(wire::parse_net_dev(&table, &active))
    }
}

/// Convert a snapshot into per-source deltas against the stored baselines
///
/// Pure with respect to everything but `baselines`, which it updates with
/// the snapshot's records. Output order follows the snapshot.
fn diff_against_baselines(
    baselines: &mut HashMap<String, CounterRecord>,
    snapshot: &[(String, CounterRecord)],
) -> Vec<(String, CounterDelta)> {
    let mut deltas = Vec::with_capacity(snapshot.len());
    for (name, record) in snapshot {
        let delta = match baselines.get(name) {
            None => CounterDelta::default(),
            Some(prev) => CounterDelta {
                rx_bytes: record.rx_bytes as i64 - prev.rx_bytes as i64,
                rx_packets: record.rx_packets as i64 - prev.rx_packets as i64,
                tx_bytes: record.tx_bytes as i64 - prev.tx_bytes as i64,
                tx_packets: record.tx_packets as i64 - prev.tx_packets as i64,
            },
        };
        baselines.insert(name.clone(), *record);
        deltas.push((name.clone(), delta));
    }
    deltas
}

impl PerfService for NetworkPerfService {
    fn name(&self) -> &'static str {
        "Network"
    }

    fn poll(&mut self, link: &mut AgentLink) -> Result<Vec<Sample>> {
        let snapshot = self.fetch_snapshot(link)?;
        if snapshot.is_empty() {
            // Skip the tick outright; baselines stay untouched
            return Err(Error::Shell("no counter sources this tick".into()));
        }

        let deltas = diff_against_baselines(&mut self.baselines, &snapshot);
        let mut samples = Vec::with_capacity(deltas.len() * 2);
        for (name, delta) in deltas {
            samples.push(Sample::new(
                format!("{} Recv", name),
                delta.rx_bytes as f64 / KB,
            ));
            samples.push(Sample::new(
                format!("{} Send", name),
                delta.tx_bytes as f64 / KB,
            ));
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adb::ScriptedShell;
    use crate::transport::MockTransport;

    fn record_bytes(record: &CounterRecord) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&record.rx_bytes.to_le_bytes());
        out.extend_from_slice(&record.rx_packets.to_le_bytes());
        out.extend_from_slice(&record.tx_bytes.to_le_bytes());
        out.extend_from_slice(&record.tx_packets.to_le_bytes());
        out
    }

    fn snapshot_of(entries: &[(&str, CounterRecord)]) -> Vec<(String, CounterRecord)> {
        entries
            .iter()
            .map(|(name, record)| (name.to_string(), *record))
            .collect()
    }

    #[test]
    fn test_bootstrap_delta_is_zero() {
        let mut baselines = HashMap::new();
        let snapshot = snapshot_of(&[("wlan0", CounterRecord::new(987_654, 321, 123_456, 78))]);

        let deltas = diff_against_baselines(&mut baselines, &snapshot);
        assert_eq!(deltas, vec![("wlan0".to_string(), CounterDelta::default())]);
        assert_eq!(
            baselines.get("wlan0"),
            Some(&CounterRecord::new(987_654, 321, 123_456, 78))
        );
    }

    #[test]
    fn test_delta_between_ticks() {
        let mut baselines = HashMap::new();
        diff_against_baselines(
            &mut baselines,
            &snapshot_of(&[("App", CounterRecord::new(1000, 10, 500, 5))]),
        );
        let deltas = diff_against_baselines(
            &mut baselines,
            &snapshot_of(&[("App", CounterRecord::new(1500, 13, 700, 7))]),
        );

        assert_eq!(
            deltas[0].1,
            CounterDelta {
                rx_bytes: 500,
                rx_packets: 3,
                tx_bytes: 200,
                tx_packets: 2,
            }
        );
        // Baseline is replaced, not accumulated
        assert_eq!(
            baselines.get("App"),
            Some(&CounterRecord::new(1500, 13, 700, 7))
        );
    }

    #[test]
    fn test_counter_reset_yields_one_negative_tick() {
        let mut baselines = HashMap::new();
        diff_against_baselines(
            &mut baselines,
            &snapshot_of(&[("wlan0", CounterRecord::new(5000, 50, 4000, 40))]),
        );
        // Device rebooted: counters restart near zero
        let deltas = diff_against_baselines(
            &mut baselines,
            &snapshot_of(&[("wlan0", CounterRecord::new(100, 1, 80, 1))]),
        );
        assert_eq!(deltas[0].1.rx_bytes, -4900);
        assert_eq!(deltas[0].1.tx_bytes, -3920);

        // Next tick is correct again
        let deltas = diff_against_baselines(
            &mut baselines,
            &snapshot_of(&[("wlan0", CounterRecord::new(300, 3, 180, 2))]),
        );
        assert_eq!(deltas[0].1.rx_bytes, 200);
        assert_eq!(deltas[0].1.tx_bytes, 100);
    }

    #[test]
    fn test_absent_source_keeps_baseline() {
        let mut baselines = HashMap::new();
        diff_against_baselines(
            &mut baselines,
            &snapshot_of(&[("wlan0", CounterRecord::new(1000, 10, 500, 5))]),
        );

        // Tick 2: wlan0 missing from the snapshot
        diff_against_baselines(
            &mut baselines,
            &snapshot_of(&[("App", CounterRecord::new(10, 1, 10, 1))]),
        );
        assert_eq!(
            baselines.get("wlan0"),
            Some(&CounterRecord::new(1000, 10, 500, 5))
        );

        // Tick 3: wlan0 reappears with advanced counters; the delta spans
        // the gap rather than bootstrapping again
        let deltas = diff_against_baselines(
            &mut baselines,
            &snapshot_of(&[("wlan0", CounterRecord::new(1600, 16, 800, 8))]),
        );
        assert_eq!(
            deltas[0].1,
            CounterDelta {
                rx_bytes: 600,
                rx_packets: 6,
                tx_bytes: 300,
                tx_packets: 3,
            }
        );
    }

    const NETSTAT: &str = "\
Iface      MTU    RX-OK RX-ERR RX-DRP RX-OVR    TX-OK TX-ERR TX-DRP TX-OVR Flg
wlan0     1500    91043      0      0 0         36909      0      0      0 BMRU
";

    fn net_dev(rx: u64, tx: u64) -> String {
        format!("wlan0: {} 100 0 0 0 0 0 0 {} 50 0 0 0 0 0 0\n", rx, tx)
    }

    #[test]
    fn test_poll_emits_scaled_series_per_source() {
        let mock = MockTransport::new();
        let shell = ScriptedShell::new();

        // Tick 1: bootstrap
        mock.inject_reply(&record_bytes(&CounterRecord::new(1000, 10, 500, 5)));
        shell.push_ok(NETSTAT);
        shell.push_ok(&net_dev(2048, 1024));
        // Tick 2: advance
        mock.inject_reply(&record_bytes(&CounterRecord::new(1500, 13, 700, 7)));
        shell.push_ok(NETSTAT);
        shell.push_ok(&net_dev(4096, 2048));

        let mut link = AgentLink::new(Box::new(mock), Box::new(shell));
        let mut svc = NetworkPerfService::new(10153);

        let samples = svc.poll(&mut link).unwrap();
        assert_eq!(samples.len(), 4);
        assert!(samples.iter().all(|s| s.value == 0.0));

        let samples = svc.poll(&mut link).unwrap();
        let by_series: HashMap<&str, f64> =
            samples.iter().map(|s| (s.series.as_str(), s.value)).collect();
        // 500 and 200 bytes for the app, 2048 and 1024 for wlan0
        assert!((by_series["App Recv"] - 0.488).abs() < 0.001);
        assert!((by_series["App Send"] - 0.195).abs() < 0.001);
        assert_eq!(by_series["wlan0 Recv"], 2.0);
        assert_eq!(by_series["wlan0 Send"], 1.0);
    }

    #[test]
    fn test_empty_snapshot_skips_tick() {
        let mock = MockTransport::new();
        let shell = ScriptedShell::new();

        // Seed a baseline on tick 1
        mock.inject_reply(&record_bytes(&CounterRecord::new(1000, 10, 500, 5)));
        shell.push_ok(NETSTAT);
        shell.push_ok(&net_dev(2048, 1024));

        // Tick 2: empty agent reply and an unreachable shell
        mock.inject_reply(b"");
        shell.push_err("device unreachable");

        let mut link = AgentLink::new(Box::new(mock), Box::new(shell));
        let mut svc = NetworkPerfService::new(10153);

        svc.poll(&mut link).unwrap();
        let before = svc.baselines.clone();

        let err = svc.poll(&mut link).unwrap_err();
        assert!(matches!(err, Error::Shell(_)));
        assert_eq!(svc.baselines, before);
    }
}
