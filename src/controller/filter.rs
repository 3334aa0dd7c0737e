//! Single-axis smoothing strategies for joystick samples
//!
//! Every strategy implements [`InputFilter`]. The pipeline owns exactly one
//! boxed filter and only swaps it while stopped.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lower bound for the lag coefficient; anything smaller would freeze the
/// output.
pub const MIN_ALPHA: f32 = 0.01;
pub const MAX_ALPHA: f32 = 1.0;
pub const DEFAULT_ALPHA: f32 = 0.7;

const KALMAN_PROCESS_NOISE: f32 = 0.01;
const KALMAN_MEASUREMENT_NOISE: f32 = 0.1;
const KALMAN_INITIAL_ERROR: f32 = 1.0;

/// Smoothing capability shared by all strategies
pub trait InputFilter: Send + 'static {
    /// Forgets all history; the next sample passes through unchanged.
    fn reset(&mut self);

    /// Filters a scalar stream. Uses the primary (x) channel state.
    fn update(&mut self, value: f32) -> f32;

    /// Filters both joystick axes independently.
    fn update_xy(&mut self, x: f32, y: f32) -> (f32, f32);

    fn kind(&self) -> FilterKind;
}

/// Selectable strategy, as stored in settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    None,
    #[default]
    Lag,
    Kalman,
}

impl FilterKind {
    /// Maps the numeric codes used by the settings screen
    /// (0 = none, 1 = lag, 2 = kalman). Unknown codes select the lag filter.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => FilterKind::None,
            2 => FilterKind::Kalman,
            _ => FilterKind::Lag,
        }
    }

    pub fn build(self, alpha: f32) -> Box<dyn InputFilter> {
        match self {
            FilterKind::None => Box::new(PassThrough),
            FilterKind::Lag => Box::new(LagFilter::new(alpha)),
            FilterKind::Kalman => Box::new(KalmanFilter::new()),
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterKind::None => write!(f, "none"),
            FilterKind::Lag => write!(f, "lag"),
            FilterKind::Kalman => write!(f, "kalman"),
        }
    }
}

/// Returns samples unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl InputFilter for PassThrough {
    fn reset(&mut self) {}

    fn update(&mut self, value: f32) -> f32 {
        value
    }

    fn update_xy(&mut self, x: f32, y: f32) -> (f32, f32) {
        (x, y)
    }

    fn kind(&self) -> FilterKind {
        FilterKind::None
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LagAxis {
    last: Option<f32>,
}

impl LagAxis {
    fn step(&mut self, alpha: f32, input: f32) -> f32 {
        let out = match self.last {
            Some(prev) => alpha * input + (1.0 - alpha) * prev,
            None => input,
        };
        self.last = Some(out);
        out
    }
}

/// First-order lag: `y[n] = a*x[n] + (1-a)*y[n-1]`, seeded with the first
/// sample.
#[derive(Debug, Clone, Copy)]
pub struct LagFilter {
    alpha: f32,
    x: LagAxis,
    y: LagAxis,
}

impl LagFilter {
    pub fn new(alpha: f32) -> Self {
        let alpha = if alpha.is_finite() {
            alpha.clamp(MIN_ALPHA, MAX_ALPHA)
        } else {
            DEFAULT_ALPHA
        };
        Self {
            alpha,
            x: LagAxis::default(),
            y: LagAxis::default(),
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }
}

impl InputFilter for LagFilter {
    fn reset(&mut self) {
        self.x = LagAxis::default();
        self.y = LagAxis::default();
    }

    fn update(&mut self, value: f32) -> f32 {
        self.x.step(self.alpha, value)
    }

    fn update_xy(&mut self, x: f32, y: f32) -> (f32, f32) {
        (self.x.step(self.alpha, x), self.y.step(self.alpha, y))
    }

    fn kind(&self) -> FilterKind {
        FilterKind::Lag
    }
}

#[derive(Debug, Clone, Copy)]
struct KalmanAxis {
    estimate: f32,
    error: f32,
    seeded: bool,
}

impl Default for KalmanAxis {
    fn default() -> Self {
        Self {
            estimate: 0.0,
            error: KALMAN_INITIAL_ERROR,
            seeded: false,
        }
    }
}

impl KalmanAxis {
    fn step(&mut self, measurement: f32) -> f32 {
        if !self.seeded {
            self.estimate = measurement;
            self.seeded = true;
            return measurement;
        }
        // predict
        let prior_error = self.error + KALMAN_PROCESS_NOISE;
        // correct
        let gain = prior_error / (prior_error + KALMAN_MEASUREMENT_NOISE);
        self.estimate += gain * (measurement - self.estimate);
        self.error = (1.0 - gain) * prior_error;
        self.estimate
    }
}

/// Scalar Kalman filter per axis with fixed noise constants
#[derive(Debug, Default, Clone, Copy)]
pub struct KalmanFilter {
    x: KalmanAxis,
    y: KalmanAxis,
}

impl KalmanFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InputFilter for KalmanFilter {
    fn reset(&mut self) {
        self.x = KalmanAxis::default();
        self.y = KalmanAxis::default();
    }

    fn update(&mut self, value: f32) -> f32 {
        self.x.step(value)
    }

    fn update_xy(&mut self, x: f32, y: f32) -> (f32, f32) {
        (self.x.step(x), self.y.step(y))
    }

    fn kind(&self) -> FilterKind {
        FilterKind::Kalman
    }
}
