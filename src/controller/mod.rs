//! Joystick control pipeline
//!
//! 1. [`filter`] - smoothing strategies
//! 2. [`command`] - motor command value type
//! 3. [`pipeline`] - dead zone, edge buffer and direction interlock
//! 4. [`haptics`] - feedback pulses
//! 5. [`monitor`] - stage latency statistics
//! 6. [`controller_handle`] - worker task and public API
//!
//! # Architecture
//!
//! ```text
//! update_sample ──► [LatestSample] ──► Filter ──► Shaper ──► Encoder ──► Transport
//!                                                    │
//!                                                    └──► HapticSink
//! ```

pub mod command;
pub mod controller_handle;
pub mod filter;
pub mod haptics;
pub mod monitor;
pub mod pipeline;

pub use command::{CommandKey, ControlCommand, Direction, MotorEnable, MAX_THRUST};
pub use controller_handle::{ControlError, ControlHandle, ControlSettings};
pub use filter::{FilterKind, InputFilter, KalmanFilter, LagFilter, PassThrough};
pub use haptics::{HapticPulse, HapticSink};
pub use monitor::{LatencyMonitor, PipelineLatency};
pub use pipeline::CommandShaper;
