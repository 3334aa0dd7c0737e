//! Motor command value type
//!
//! A [`ControlCommand`] is the unit the control pipeline produces and the
//! encoder turns into a `SHIPMOTRO` frame. Commands are immutable, compare by
//! their six wire fields only, and the zero command is the single safe state
//! the pipeline falls back to on every stop or failure path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Instant;

/// Highest thrust value a side can be commanded with
pub const MAX_THRUST: u8 = 100;

/// Rotation direction of one thruster (`DIR*` on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Reverse,
    Forward,
}

impl Direction {
    pub fn from_forward(forward: bool) -> Self {
        if forward {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    /// Wire value: 1 = forward, 0 = reverse
    pub fn wire(self) -> u8 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => 0,
        }
    }
}

/// Motor driver enable line (`EN*` on the wire, active low)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotorEnable {
    On,
    Off,
}

impl MotorEnable {
    /// Wire value: 0 = motor enabled, 1 = motor disabled
    pub fn wire(self) -> u8 {
        match self {
            MotorEnable::On => 0,
            MotorEnable::Off => 1,
        }
    }
}

/// Composite key over the six wire fields, used for equality and caching
pub type CommandKey = [u8; 6];

/// Differential-thrust command for the two thrusters
///
/// Equality and hashing only look at thrust, direction and enable of both
/// sides; the creation time is carried for diagnostics.
#[derive(Clone, Copy)]
pub struct ControlCommand {
    left_thrust: u8,
    right_thrust: u8,
    left_direction: Direction,
    right_direction: Direction,
    left_enable: MotorEnable,
    right_enable: MotorEnable,
    created_at: Instant,
}

impl ControlCommand {
    /// Builds a command with both motors enabled. Thrusts above
    /// [`MAX_THRUST`] are clamped.
    pub fn drive(
        left_thrust: u8,
        right_thrust: u8,
        left_direction: Direction,
        right_direction: Direction,
    ) -> Self {
        Self::from_parts(
            left_thrust,
            right_thrust,
            left_direction,
            right_direction,
            MotorEnable::On,
            MotorEnable::On,
        )
    }

    pub fn from_parts(
        left_thrust: u8,
        right_thrust: u8,
        left_direction: Direction,
        right_direction: Direction,
        left_enable: MotorEnable,
        right_enable: MotorEnable,
    ) -> Self {
        Self {
            left_thrust: left_thrust.min(MAX_THRUST),
            right_thrust: right_thrust.min(MAX_THRUST),
            left_direction,
            right_direction,
            left_enable,
            right_enable,
            created_at: Instant::now(),
        }
    }

    /// The stopped state: no thrust, both directions forward, both motors
    /// disabled.
    pub fn zero() -> Self {
        Self::from_parts(
            0,
            0,
            Direction::Forward,
            Direction::Forward,
            MotorEnable::Off,
            MotorEnable::Off,
        )
    }

    pub fn is_zero(&self) -> bool {
        self.left_thrust == 0
            && self.right_thrust == 0
            && self.left_direction == Direction::Forward
            && self.right_direction == Direction::Forward
            && self.left_enable == MotorEnable::Off
            && self.right_enable == MotorEnable::Off
    }

    pub fn left_thrust(&self) -> u8 {
        self.left_thrust
    }

    pub fn right_thrust(&self) -> u8 {
        self.right_thrust
    }

    pub fn left_direction(&self) -> Direction {
        self.left_direction
    }

    pub fn right_direction(&self) -> Direction {
        self.right_direction
    }

    pub fn left_enable(&self) -> MotorEnable {
        self.left_enable
    }

    pub fn right_enable(&self) -> MotorEnable {
        self.right_enable
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// True when driving in the requested direction would reverse either
    /// thruster relative to this command.
    pub fn reverses_for(&self, forward: bool) -> bool {
        let wanted = Direction::from_forward(forward);
        self.left_direction != wanted || self.right_direction != wanted
    }

    /// Inverse of [`ControlCommand::key`]. Unknown wire values map to
    /// reverse / disabled.
    pub fn from_key(key: CommandKey) -> Self {
        let [lt, ldir, len, rt, rdir, ren] = key;
        let enable = |v: u8| if v == 0 { MotorEnable::On } else { MotorEnable::Off };
        Self::from_parts(
            lt,
            rt,
            Direction::from_forward(ldir == 1),
            Direction::from_forward(rdir == 1),
            enable(len),
            enable(ren),
        )
    }

    pub fn key(&self) -> CommandKey {
        [
            self.left_thrust,
            self.left_direction.wire(),
            self.left_enable.wire(),
            self.right_thrust,
            self.right_direction.wire(),
            self.right_enable.wire(),
        ]
    }
}

impl Default for ControlCommand {
    fn default() -> Self {
        Self::zero()
    }
}

impl PartialEq for ControlCommand {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ControlCommand {}

impl Hash for ControlCommand {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlCommand")
            .field("left_thrust", &self.left_thrust)
            .field("right_thrust", &self.right_thrust)
            .field("left_direction", &self.left_direction)
            .field("right_direction", &self.right_direction)
            .field("left_enable", &self.left_enable)
            .field("right_enable", &self.right_enable)
            .field("is_zero", &self.is_zero())
            .finish()
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "L{}{:?}/{:?} R{}{:?}/{:?}",
            self.left_thrust,
            self.left_direction,
            self.left_enable,
            self.right_thrust,
            self.right_direction,
            self.right_enable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn zero_command_is_stopped_and_disabled() {
        let zero = ControlCommand::zero();
        assert!(zero.is_zero());
        assert_eq!(zero.key(), [0, 1, 1, 0, 1, 1]);
    }

    #[test]
    fn enabled_command_with_no_thrust_is_not_zero() {
        let cmd = ControlCommand::drive(0, 0, Direction::Forward, Direction::Forward);
        assert!(!cmd.is_zero());
        assert_ne!(cmd, ControlCommand::zero());
    }

    #[test]
    fn equality_ignores_creation_time() {
        let a = ControlCommand::drive(40, 55, Direction::Forward, Direction::Forward);
        sleep(Duration::from_millis(2));
        let b = ControlCommand::drive(40, 55, Direction::Forward, Direction::Forward);
        assert!(b.created_at() > a.created_at());
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn key_restores_command() {
        let cmd = ControlCommand::drive(12, 87, Direction::Reverse, Direction::Forward);
        assert_eq!(ControlCommand::from_key(cmd.key()), cmd);
        assert!(ControlCommand::from_key([0, 1, 1, 0, 1, 1]).is_zero());
    }

    #[test]
    fn thrust_is_clamped() {
        let cmd = ControlCommand::drive(250, 101, Direction::Reverse, Direction::Reverse);
        assert_eq!(cmd.left_thrust(), MAX_THRUST);
        assert_eq!(cmd.right_thrust(), MAX_THRUST);
    }

    #[test]
    fn reversal_detection_checks_both_sides() {
        let mixed = ControlCommand::drive(30, 30, Direction::Forward, Direction::Reverse);
        assert!(mixed.reverses_for(true));
        assert!(mixed.reverses_for(false));

        let zero = ControlCommand::zero();
        assert!(!zero.reverses_for(true));
        assert!(zero.reverses_for(false));
    }
}
