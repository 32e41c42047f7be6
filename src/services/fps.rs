//! Frame rate service
//!
//! The agent reports a cumulative frame count for the target app; the rate
//! is the count delta over one polling interval. The first poll has no
//! baseline and emits 0.

use super::{PerfService, Sample};
use crate::agent::{AgentLink, wire};
use crate::error::Result;
use std::time::Duration;

/// FPS polling service
pub struct FpsPerfService {
    uid: u32,
    interval: Duration,
    last_frames: Option<u64>,
}

impl FpsPerfService {
    /// Create a service for the target app's UID
    pub fn new(uid: u32, interval: Duration) -> Self {
        Self {
            uid,
            interval,
            last_frames: None,
        }
    }
}

impl PerfService for FpsPerfService {
    fn name(&self) -> &'static str {
        "FPS"
    }

    fn poll(&mut self, link: &mut AgentLink) -> Result<Vec<Sample>> {
        let reply = link.send_command(&format!("fps {}", self.uid))?;
        let frames = wire::decode_u64(&reply)?;

        let value = match self.last_frames {
            None => 0.0,
            Some(prev) => {
                // A restarted counter reads lower than the baseline; one
                // zero sample instead of a huge negative rate.
                let delta = frames.saturating_sub(prev);
                delta as f64 / self.interval.as_secs_f64()
            }
        };
        self.last_frames = Some(frames);

        Ok(vec![Sample::new("FPS", value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adb::ScriptedShell;
    use crate::transport::MockTransport;

    fn mock_link(mock: &MockTransport) -> AgentLink {
        AgentLink::new(Box::new(mock.clone()), Box::new(ScriptedShell::new()))
    }

    fn inject_frames(mock: &MockTransport, frames: u64) {
        mock.inject_reply(&frames.to_le_bytes());
    }

    #[test]
    fn test_bootstrap_emits_zero() {
        let mock = MockTransport::new();
        inject_frames(&mock, 90_000);
        let mut link = mock_link(&mock);
        let mut svc = FpsPerfService::new(10153, Duration::from_millis(500));

        let samples = svc.poll(&mut link).unwrap();
        assert_eq!(samples, vec![Sample::new("FPS", 0.0)]);
    }

    #[test]
    fn test_frame_delta_over_interval() {
        let mock = MockTransport::new();
        inject_frames(&mock, 1000);
        inject_frames(&mock, 1030);
        let mut link = mock_link(&mock);
        let mut svc = FpsPerfService::new(10153, Duration::from_millis(500));

        svc.poll(&mut link).unwrap();
        let samples = svc.poll(&mut link).unwrap();
        // 30 frames over 0.5 s
        assert_eq!(samples[0].value, 60.0);
    }

    #[test]
    fn test_counter_reset_reads_as_zero() {
        let mock = MockTransport::new();
        inject_frames(&mock, 5000);
        inject_frames(&mock, 12);
        let mut link = mock_link(&mock);
        let mut svc = FpsPerfService::new(10153, Duration::from_millis(500));

        svc.poll(&mut link).unwrap();
        let samples = svc.poll(&mut link).unwrap();
        assert_eq!(samples[0].value, 0.0);
    }
}
