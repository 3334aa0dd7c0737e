//! Stage latency bookkeeping for the control worker

use std::fmt;
use std::time::Duration;
use tracing::debug;

const RECENT_WINDOW: usize = 5;
const REPORT_EVERY: u64 = 100;

/// Running latency statistics for one pipeline stage
#[derive(Debug, Clone)]
pub struct LatencyMonitor {
    name: &'static str,
    recent: [Duration; RECENT_WINDOW],
    recent_index: usize,
    total: Duration,
    min: Duration,
    max: Duration,
    count: u64,
}

impl LatencyMonitor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            recent: [Duration::ZERO; RECENT_WINDOW],
            recent_index: 0,
            total: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
            count: 0,
        }
    }

    /// Zero-length samples are ignored.
    pub fn record(&mut self, sample: Duration) {
        if sample.is_zero() {
            return;
        }
        self.total += sample;
        self.count += 1;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        self.recent[self.recent_index] = sample;
        self.recent_index = (self.recent_index + 1) % RECENT_WINDOW;

        if self.count % REPORT_EVERY == 0 {
            debug!("{}", self);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        u32::try_from(self.count).ok().map(|n| self.total / n)
    }

    pub fn min(&self) -> Option<Duration> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<Duration> {
        (self.count > 0).then_some(self.max)
    }

    /// Mean over the last few recorded samples
    pub fn recent_mean(&self) -> Duration {
        let valid: Vec<Duration> = self.recent.iter().copied().filter(|d| !d.is_zero()).collect();
        match u32::try_from(valid.len()) {
            Ok(n) if n > 0 => valid.iter().sum::<Duration>() / n,
            _ => Duration::ZERO,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.name);
    }
}

impl fmt::Display for LatencyMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.mean(), self.min(), self.max()) {
            (Some(mean), Some(min), Some(max)) => write!(
                f,
                "{}: count={}, mean={:?}, recent={:?}, min={:?}, max={:?}",
                self.name,
                self.count,
                mean,
                self.recent_mean(),
                min,
                max
            ),
            _ => write!(f, "{}: no samples", self.name),
        }
    }
}

/// The set of monitors the control worker keeps
#[derive(Debug, Clone)]
pub struct PipelineLatency {
    pub input_interval: LatencyMonitor,
    pub filtering: LatencyMonitor,
    pub command_generation: LatencyMonitor,
    pub send: LatencyMonitor,
    pub full_path: LatencyMonitor,
}

impl Default for PipelineLatency {
    fn default() -> Self {
        Self {
            input_interval: LatencyMonitor::new("input interval"),
            filtering: LatencyMonitor::new("filtering"),
            command_generation: LatencyMonitor::new("command generation"),
            send: LatencyMonitor::new("send"),
            full_path: LatencyMonitor::new("full path"),
        }
    }
}

impl PipelineLatency {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn report(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}",
            self.full_path, self.input_interval, self.filtering, self.command_generation, self.send
        )
    }
}
