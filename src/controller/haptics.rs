//! Haptic feedback triggers
//!
//! The pipeline never waits on the presentation side: pulses are pushed with
//! `try_send` and dropped when the consumer lags behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HapticPulse {
    /// Commanded rotation reversed; motors held off for the settle window
    DirectionChange,
    /// Transition between stopped and moving
    StartStop,
    /// Stick entered the edge buffer
    EdgeReached,
}

impl HapticPulse {
    pub fn duration(self) -> Duration {
        match self {
            HapticPulse::DirectionChange => Duration::from_millis(100),
            HapticPulse::StartStop => Duration::from_millis(40),
            HapticPulse::EdgeReached => Duration::from_millis(30),
        }
    }
}

/// Fire-and-forget sender for haptic pulses
#[derive(Debug, Clone)]
pub struct HapticSink {
    sender: mpsc::Sender<HapticPulse>,
    enabled: Arc<AtomicBool>,
}

impl HapticSink {
    pub fn new(sender: mpsc::Sender<HapticPulse>, enabled: bool) -> Self {
        Self {
            sender,
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn pulse(&self, pulse: HapticPulse) {
        if !self.is_enabled() {
            return;
        }
        if let Err(e) = self.sender.try_send(pulse) {
            debug!("Dropping haptic pulse {:?}: {}", pulse, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_match_feedback_table() {
        assert_eq!(HapticPulse::DirectionChange.duration().as_millis(), 100);
        assert_eq!(HapticPulse::StartStop.duration().as_millis(), 40);
        assert_eq!(HapticPulse::EdgeReached.duration().as_millis(), 30);
    }

    #[test]
    fn disabled_sink_drops_pulses() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = HapticSink::new(tx, false);
        sink.pulse(HapticPulse::StartStop);
        assert!(rx.try_recv().is_err());

        sink.set_enabled(true);
        sink.pulse(HapticPulse::EdgeReached);
        assert_eq!(rx.try_recv().ok(), Some(HapticPulse::EdgeReached));
    }

    #[test]
    fn full_channel_never_blocks() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = HapticSink::new(tx, true);
        for _ in 0..10 {
            sink.pulse(HapticPulse::StartStop);
        }
    }
}
