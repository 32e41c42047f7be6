//! Polling services and the scheduler that drives them
//!
//! One scheduler thread runs all services of a session sequentially each
//! tick, so the shared agent socket never sees interleaved commands. Each
//! service keeps its own tick counter, incremented exactly once per
//! successful poll: skipped ticks leave no gaps in the series index.
//!
//! Error policy at the tick boundary:
//! - link-class failures are logged, skipped, and counted toward the
//!   session liveness signal; the counter resets only when a service
//!   that exercises the agent socket succeeds, since a shell-only poll
//!   says nothing about the agent's health
//! - anything else (empty shell output, malformed reply) is "no data this
//!   tick" and logged at debug level
//!
//! Nothing a `poll()` returns can terminate the loop; only `stop()` does.

mod cpu;
mod fps;
mod network;

pub use cpu::CpuPerfService;
pub use fps::FpsPerfService;
pub use network::NetworkPerfService;

use crate::agent::AgentLink;
use crate::error::{Error, Result};
use crate::metrics::{MetricPoint, TelemetrySink};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Consecutive link failures before the agent is presumed offline
pub const LINK_FAILURE_THRESHOLD: u32 = 6;

/// One tick-less metric value produced by a service poll
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Series name within the service's chart
    pub series: String,
    /// Metric value
    pub value: f64,
}

impl Sample {
    /// Construct a sample
    pub fn new(series: impl Into<String>, value: f64) -> Self {
        Self {
            series: series.into(),
            value,
        }
    }
}

/// One metric-specific poll step
///
/// Implementations own whatever per-source state they need across ticks;
/// the scheduler owns timing, tick numbering, and delivery.
pub trait PerfService: Send {
    /// Chart name the samples belong to
    fn name(&self) -> &'static str;

    /// Fetch raw data over the link and turn it into samples
    fn poll(&mut self, link: &mut AgentLink) -> Result<Vec<Sample>>;

    /// Whether `poll` talks to the agent socket
    ///
    /// Only successes of such services clear the consecutive
    /// link-failure counter.
    fn uses_agent_link(&self) -> bool {
        true
    }
}

struct ServiceSlot {
    service: Box<dyn PerfService>,
    tick: u64,
}

/// Fixed-interval polling loop bound to one session
pub struct PollingScheduler {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    link_failures: Arc<AtomicU32>,
}

impl PollingScheduler {
    /// Spawn the polling thread
    pub fn start(
        link: Arc<Mutex<AgentLink>>,
        services: Vec<Box<dyn PerfService>>,
        sink: Arc<dyn TelemetrySink>,
        interval: Duration,
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let link_failures = Arc::new(AtomicU32::new(0));

        let thread_shutdown = Arc::clone(&shutdown);
        let thread_failures = Arc::clone(&link_failures);
        let handle = thread::Builder::new()
            .name("perf-poller".to_string())
            .spawn(move || {
                let mut slots: Vec<ServiceSlot> = services
                    .into_iter()
                    .map(|service| ServiceSlot { service, tick: 0 })
                    .collect();
                log::info!(
                    "Polling loop started ({} services, {:?} interval)",
                    slots.len(),
                    interval
                );

                loop {
                    let cycle_start = Instant::now();
                    if thread_shutdown.load(Ordering::Relaxed) {
                        break;
                    }

                    {
                        let mut link = link.lock();
                        run_tick(&mut slots, &mut link, sink.as_ref(), &thread_failures);
                    }

                    let elapsed = cycle_start.elapsed();
                    if elapsed < interval {
                        thread::sleep(interval - elapsed);
                    } else {
                        log::warn!(
                            "Poll cycle overrun: {:?} (target: {:?})",
                            elapsed,
                            interval
                        );
                    }
                }

                log::info!("Polling loop stopped");
            })
            .map_err(Error::Io)?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            link_failures,
        })
    }

    /// Stop the loop and wait for it to exit
    ///
    /// Safe to call from any thread and idempotent; after it returns no
    /// further poll tick executes.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Whether the polling thread is still attached
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Current run of consecutive link failures (liveness signal)
    pub fn consecutive_link_failures(&self) -> u32 {
        self.link_failures.load(Ordering::Relaxed)
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run one tick across all services, sequentially
fn run_tick(
    slots: &mut [ServiceSlot],
    link: &mut AgentLink,
    sink: &dyn TelemetrySink,
    link_failures: &AtomicU32,
) {
    for slot in slots.iter_mut() {
        match slot.service.poll(link) {
            Ok(samples) => {
                if slot.service.uses_agent_link() {
                    link_failures.store(0, Ordering::Relaxed);
                }
                let tick = slot.tick;
                slot.tick += 1;
                if samples.is_empty() {
                    continue;
                }
                let points: Vec<MetricPoint> = samples
                    .into_iter()
                    .map(|s| MetricPoint::new(tick, s.series, s.value))
                    .collect();
                sink.add_data(slot.service.name(), &points);
            }
            Err(e) if e.is_link_failure() => {
                let failures = link_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures == LINK_FAILURE_THRESHOLD {
                    log::warn!(
                        "{}: {} consecutive link failures, agent presumed offline",
                        slot.service.name(),
                        failures
                    );
                } else {
                    log::warn!("{}: poll skipped: {}", slot.service.name(), e);
                }
            }
            Err(e) => {
                log::debug!("{}: no data this tick: {}", slot.service.name(), e);
            }
        }
    }
}
