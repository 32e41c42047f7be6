//! Metric points and the telemetry sink seam
//!
//! The core only produces data; whatever renders it (chart widget, TUI,
//! plain stdout) sits behind [`TelemetrySink`] and decides for itself how
//! points cross into its execution context.

/// One emitted metric value
///
/// `tick` is the per-session polling index starting at 0, not wall-clock
/// time; it is assigned by the scheduler on successful polls only.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    /// Polling tick index (x-coordinate)
    pub tick: u64,
    /// Series name within the chart (e.g. `"wlan0 Recv"`)
    pub series: String,
    /// Metric value (KB, percent, frames per second, ...)
    pub value: f64,
}

impl MetricPoint {
    /// Construct a point
    pub fn new(tick: u64, series: impl Into<String>, value: f64) -> Self {
        Self {
            tick,
            series: series.into(),
            value,
        }
    }
}

/// Receiver for metric batches
///
/// One call per chart per tick; all series of that tick arrive together.
/// Implementations must tolerate being called from the polling thread.
pub trait TelemetrySink: Send + Sync {
    /// Deliver one tick's points for the named chart
    fn add_data(&self, chart: &str, points: &[MetricPoint]);
}
