//! Command to wire text encoding with a precomputed table and a bounded memo

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::messages::MotorFrame;
use crate::controller::{CommandKey, ControlCommand, Direction};

/// Wire text of the zero command, used when encoding fails
pub const ZERO_COMMAND_JSON: &str =
    r#"{"SHIPMOTRO":{"CH1":0,"DIR1":1,"EN1":1,"CH2":0,"DIR2":1,"EN2":1}}"#;

pub const DEFAULT_MEMO_CAPACITY: usize = 50;

const TURN_POWERS: [u8; 3] = [30, 60, 90];
const TURN_PERCENTS: [u8; 3] = [25, 50, 75];

/// Straight runs in steps of ten plus a coarse grid of forward turns
pub fn common_commands() -> Vec<ControlCommand> {
    let mut commands = vec![ControlCommand::zero()];

    for power in (10..=100).step_by(10) {
        commands.push(ControlCommand::drive(
            power,
            power,
            Direction::Forward,
            Direction::Forward,
        ));
        commands.push(ControlCommand::drive(
            power,
            power,
            Direction::Reverse,
            Direction::Reverse,
        ));
    }

    for power in TURN_POWERS {
        for percent in TURN_PERCENTS {
            let weakened = (u16::from(power) * u16::from(100 - percent) / 100) as u8;
            commands.push(ControlCommand::drive(
                weakened,
                power,
                Direction::Forward,
                Direction::Forward,
            ));
            commands.push(ControlCommand::drive(
                power,
                weakened,
                Direction::Forward,
                Direction::Forward,
            ));
        }
    }
    commands
}

struct EncoderState {
    table: HashMap<CommandKey, Arc<str>>,
    memo: HashMap<CommandKey, Arc<str>>,
}

/// Shared encoder used by the control worker
///
/// The lock is only held for a map lookup or insert, never while a command
/// is being derived.
pub struct CommandEncoder {
    state: Mutex<EncoderState>,
    memo_capacity: usize,
}

impl Default for CommandEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_MEMO_CAPACITY)
    }
}

impl CommandEncoder {
    pub fn new(memo_capacity: usize) -> Self {
        let table = build_table();
        info!("Command encoder ready with {} precomputed frames", table.len());
        Self {
            state: Mutex::new(EncoderState {
                table,
                memo: HashMap::new(),
            }),
            memo_capacity: memo_capacity.max(1),
        }
    }

    pub fn encode(&self, command: &ControlCommand) -> Arc<str> {
        let key = command.key();
        {
            let state = self.state.lock();
            if let Some(text) = state.table.get(&key).or_else(|| state.memo.get(&key)) {
                return Arc::clone(text);
            }
        }

        let text: Arc<str> = match MotorFrame::from(command).to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                error!("Failed to encode {}: {}, sending zero command", command, e);
                return ZERO_COMMAND_JSON.into();
            }
        };

        let mut state = self.state.lock();
        if state.memo.len() >= self.memo_capacity {
            let zero = ControlCommand::zero().key();
            state.memo.retain(|k, _| *k == zero);
            debug!("Command memo reached capacity, evicted to minimal set");
        }
        state.memo.insert(key, Arc::clone(&text));
        text
    }

    /// Drops all cached encodings and rebuilds the precomputed table
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.memo.clear();
        state.table = build_table();
        info!("Command caches cleared");
    }

    pub fn table_len(&self) -> usize {
        self.state.lock().table.len()
    }

    pub fn memo_len(&self) -> usize {
        self.state.lock().memo.len()
    }
}

fn build_table() -> HashMap<CommandKey, Arc<str>> {
    common_commands()
        .into_iter()
        .filter_map(|cmd| match MotorFrame::from(&cmd).to_json() {
            Ok(json) => Some((cmd.key(), Arc::from(json))),
            Err(e) => {
                error!("Skipping precomputed frame for {}: {}", cmd, e);
                None
            }
        })
        .collect()
}
