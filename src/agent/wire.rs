//! Agent wire protocol
//!
//! Requests are one-line ASCII commands, `"<verb> <arg> ..."`, terminated by
//! a single newline. Replies are raw binary: counter records are four
//! consecutive little-endian u64 fields (rx_bytes, rx_packets, tx_bytes,
//! tx_packets), 32 bytes when well-formed. A short reply decodes with the
//! missing trailing fields as zero; decoding never panics.
//!
//! Shell output parsing is line-oriented: each line is whitespace-tokenized
//! and a line with fewer than the expected token count ends the data, since
//! remote shell output may be truncated or carry trailing blanks.

use crate::error::{Error, Result};

/// Well-formed counter record length in bytes
pub const COUNTER_RECORD_LEN: usize = 32;

/// Cumulative traffic counters for one source
///
/// Counters are monotonically non-decreasing while the source is not reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterRecord {
    /// Received bytes
    pub rx_bytes: u64,
    /// Received packets
    pub rx_packets: u64,
    /// Sent bytes
    pub tx_bytes: u64,
    /// Sent packets
    pub tx_packets: u64,
}

impl CounterRecord {
    /// Construct a record from explicit counter values
    pub fn new(rx_bytes: u64, rx_packets: u64, tx_bytes: u64, tx_packets: u64) -> Self {
        Self {
            rx_bytes,
            rx_packets,
            tx_bytes,
            tx_packets,
        }
    }
}

fn le_u64_at(data: &[u8], offset: usize) -> u64 {
    if data.len() >= offset + 8 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    } else {
        // Missing or partial trailing field reads as zero
        0
    }
}

/// Decode a counter record reply
///
/// Only an empty reply is an error; short buffers decode with the absent
/// fields as zero.
pub fn decode_counter_record(data: &[u8]) -> Result<CounterRecord> {
    if data.is_empty() {
        return Err(Error::Decode("empty counter reply".into()));
    }
    Ok(CounterRecord {
        rx_bytes: le_u64_at(data, 0),
        rx_packets: le_u64_at(data, 8),
        tx_bytes: le_u64_at(data, 16),
        tx_packets: le_u64_at(data, 24),
    })
}

/// Decode a single little-endian u64 reply (cumulative frame counter)
pub fn decode_u64(data: &[u8]) -> Result<u64> {
    if data.is_empty() {
        return Err(Error::Decode("empty reply".into()));
    }
    Ok(le_u64_at(data, 0))
}

/// Encode a command line for the agent
///
/// Arguments are non-negative integers or bare identifiers, so plain
/// formatting is sufficient; the trailing newline delimits the request.
pub fn encode_command(verb: &str, args: &[&str]) -> Vec<u8> {
    let mut line = String::from(verb);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line.push('\n');
    line.into_bytes()
}

/// Parse `/proc/net/dev` style counter tables, keeping only interfaces
/// named in `filter`
///
/// Each data line is `<name>: rx_bytes rx_packets ... tx_bytes tx_packets
/// ...` with tx_bytes/tx_packets at offsets 8 and 9 after the name. The
/// name may be glued to the first counter (`eth0:12345`), so the colon is
/// split off before tokenizing.
pub fn parse_net_dev(output: &str, filter: &[String]) -> Vec<(String, CounterRecord)> {
    let mut records = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let Some((name, rest)) = line.split_once(':') else {
            // Header lines carry no colon-terminated interface name
            continue;
        };
        let name = name.trim();
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        if tokens.len() < 10 {
            // Truncated line: end of data, not an error
            break;
        }
        if !filter.iter().any(|f| f == name) {
            continue;
        }
        let parse = |idx: usize| tokens[idx].parse::<u64>().unwrap_or(0);
        records.push((
            name.to_string(),
            CounterRecord::new(parse(0), parse(1), parse(8), parse(9)),
        ));
    }
    records
}

/// Parse `netstat -i` output into the set of interfaces with nonzero
/// activity
///
/// Columns are `Iface MTU RX-OK RX-ERR RX-DRP RX-OVR TX-OK ...`; header or
/// malformed lines are skipped by the numeric parse.
pub fn parse_active_interfaces(output: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 7 {
            continue;
        }
        let (Ok(rx_ok), Ok(tx_ok)) = (tokens[2].parse::<u64>(), tokens[6].parse::<u64>()) else {
            continue;
        };
        if rx_ok + tx_ok == 0 {
            continue;
        }
        let name = tokens[0].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
