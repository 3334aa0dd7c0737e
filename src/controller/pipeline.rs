//! Joystick to motor command shaping
//!
//! [`CommandShaper`] is the synchronous core of the control worker: it takes
//! the latest joystick sample, runs it through the filter, dead zone, edge
//! buffer and direction interlock, and yields the command that should be in
//! effect. The lock-free hand-off types ([`LatestSample`], [`CommandSlot`],
//! [`DirectionDelay`]) connect it to callers on other threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::command::{ControlCommand, Direction, MAX_THRUST};
use super::filter::InputFilter;
use super::haptics::{HapticPulse, HapticSink};

/// Radius around the centre treated as released
pub const CENTER_DEAD_ZONE: f32 = 0.05;
/// Margin below full deflection; samples beyond it are rescaled
pub const EDGE_BUFFER_ZONE: f32 = 0.05;
/// Thrust below this is snapped to the zero command
pub const ZERO_THRUST_THRESHOLD: u8 = 3;
/// Steering below this magnitude drives both sides equally
pub const STRAIGHT_THRESHOLD: f32 = 0.1;

pub const DEFAULT_DIRECTION_CHANGE_DELAY_MS: u64 = 150;
pub const MIN_DIRECTION_CHANGE_DELAY_MS: u64 = 50;
pub const MAX_DIRECTION_CHANGE_DELAY_MS: u64 = 200;

const EMPTY_SAMPLE: u64 = u64::MAX;

/// Single-value mailbox holding only the most recent joystick sample
///
/// Writers overwrite, the worker takes and clears. Both axes are packed into
/// one `u64` so a sample is never torn.
#[derive(Debug)]
pub struct LatestSample {
    bits: AtomicU64,
}

impl Default for LatestSample {
    fn default() -> Self {
        Self {
            bits: AtomicU64::new(EMPTY_SAMPLE),
        }
    }
}

impl LatestSample {
    /// Stores a sample, replacing any unread one. NaN axes become 0 and values
    /// are clamped to `[-1, 1]`.
    pub fn store(&self, x: f32, y: f32) {
        self.bits.store(pack(sanitize(x), sanitize(y)), Ordering::Release);
    }

    pub fn take(&self) -> Option<(f32, f32)> {
        match self.bits.swap(EMPTY_SAMPLE, Ordering::AcqRel) {
            EMPTY_SAMPLE => None,
            bits => Some(unpack(bits)),
        }
    }

    pub fn clear(&self) {
        self.bits.store(EMPTY_SAMPLE, Ordering::Release);
    }
}

fn sanitize(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(-1.0, 1.0)
    }
}

fn pack(x: f32, y: f32) -> u64 {
    (u64::from(x.to_bits()) << 32) | u64::from(y.to_bits())
}

fn unpack(bits: u64) -> (f32, f32) {
    let x = f32::from_bits((bits >> 32) as u32);
    let y = f32::from_bits(bits as u32);
    (x, y)
}

/// Atomic holder for the last command handed to the transport
#[derive(Debug)]
pub struct CommandSlot {
    key: AtomicU64,
}

impl Default for CommandSlot {
    fn default() -> Self {
        let slot = Self {
            key: AtomicU64::new(0),
        };
        slot.store(&ControlCommand::zero());
        slot
    }
}

impl CommandSlot {
    pub fn store(&self, command: &ControlCommand) {
        let mut bytes = [0u8; 8];
        bytes[..6].copy_from_slice(&command.key());
        self.key.store(u64::from_le_bytes(bytes), Ordering::Release);
    }

    pub fn load(&self) -> ControlCommand {
        let bytes = self.key.load(Ordering::Acquire).to_le_bytes();
        let mut key = [0u8; 6];
        key.copy_from_slice(&bytes[..6]);
        ControlCommand::from_key(key)
    }
}

/// Settle window for direction reversals, adjustable while running
#[derive(Debug, Clone)]
pub struct DirectionDelay {
    millis: Arc<AtomicU64>,
}

impl Default for DirectionDelay {
    fn default() -> Self {
        Self::new(DEFAULT_DIRECTION_CHANGE_DELAY_MS)
    }
}

impl DirectionDelay {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(clamp_delay(millis))),
        }
    }

    /// Returns the value actually applied after clamping.
    pub fn set(&self, millis: u64) -> u64 {
        let clamped = clamp_delay(millis);
        self.millis.store(clamped, Ordering::Relaxed);
        clamped
    }

    pub fn millis(&self) -> u64 {
        self.millis.load(Ordering::Relaxed)
    }

    pub fn get(&self) -> Duration {
        Duration::from_millis(self.millis())
    }
}

fn clamp_delay(millis: u64) -> u64 {
    millis.clamp(MIN_DIRECTION_CHANGE_DELAY_MS, MAX_DIRECTION_CHANGE_DELAY_MS)
}

/// Whether `candidate` must go out given the last sent command
pub fn should_send(candidate: &ControlCommand, last_sent: &ControlCommand, forced: bool) -> bool {
    forced || candidate != last_sent
}

/// Filter, dead zone, edge buffer and direction interlock in one place
pub struct CommandShaper {
    filter: Box<dyn InputFilter>,
    delay: DirectionDelay,
    at_edge: bool,
    reversal_started: Option<Instant>,
}

impl CommandShaper {
    pub fn new(filter: Box<dyn InputFilter>, delay: DirectionDelay) -> Self {
        Self {
            filter,
            delay,
            at_edge: false,
            reversal_started: None,
        }
    }

    pub fn reset(&mut self) {
        self.filter.reset();
        self.at_edge = false;
        self.reversal_started = None;
    }

    pub fn is_interlocked(&self) -> bool {
        self.reversal_started.is_some()
    }

    /// Filtered sample after dead zone and edge handling
    pub fn condition(&mut self, x: f32, y: f32, haptics: &HapticSink) -> (f32, f32) {
        let (mut x, mut y) = self.filter.update_xy(x, y);
        let length = x.hypot(y);

        if length < CENTER_DEAD_ZONE {
            self.filter.reset();
            return (0.0, 0.0);
        }

        let max_length = 1.0 - EDGE_BUFFER_ZONE;
        if length > max_length {
            let scale = max_length / length;
            x *= scale;
            y *= scale;
            if !self.at_edge {
                self.at_edge = true;
                haptics.pulse(HapticPulse::EdgeReached);
            }
        } else {
            self.at_edge = false;
        }
        (x, y)
    }

    /// Command for an already conditioned sample
    pub fn command_for(
        &mut self,
        x: f32,
        y: f32,
        now: Instant,
        last_sent: &ControlCommand,
        haptics: &HapticSink,
    ) -> ControlCommand {
        let thrust = (x.hypot(y) * 100.0).round().clamp(0.0, f32::from(MAX_THRUST)) as u8;
        if thrust < ZERO_THRUST_THRESHOLD {
            return ControlCommand::zero();
        }

        let forward = y >= 0.0;
        if last_sent.reverses_for(forward) {
            match self.reversal_started {
                None => {
                    debug!("Direction change requested, holding motors for {:?}", self.delay.get());
                    self.reversal_started = Some(now);
                    haptics.pulse(HapticPulse::DirectionChange);
                    return ControlCommand::zero();
                }
                Some(started) if now.saturating_duration_since(started) < self.delay.get() => {
                    return ControlCommand::zero();
                }
                Some(_) => {
                    debug!("Direction change settled");
                    self.reversal_started = None;
                }
            }
        } else {
            self.reversal_started = None;
        }

        let (left, right) = if x.abs() < STRAIGHT_THRESHOLD {
            (thrust, thrust)
        } else if x < 0.0 {
            (scale_thrust(thrust, 1.0 + x), thrust)
        } else {
            (thrust, scale_thrust(thrust, 1.0 - x))
        };

        let direction = Direction::from_forward(forward);
        ControlCommand::drive(left, right, direction, direction)
    }

    /// Full shaping of a raw sample
    pub fn derive(
        &mut self,
        x: f32,
        y: f32,
        now: Instant,
        last_sent: &ControlCommand,
        haptics: &HapticSink,
    ) -> ControlCommand {
        let (x, y) = self.condition(x, y, haptics);
        self.command_for(x, y, now, last_sent, haptics)
    }
}

fn scale_thrust(thrust: u8, ratio: f32) -> u8 {
    (f32::from(thrust) * ratio)
        .round()
        .clamp(0.0, f32::from(MAX_THRUST)) as u8
}
