//! # PID controller
//!
//! A discrete PID controller with a saturated output. The controller is stepped once per
//! telemetry sample, so there is no notion of time step: the integral is the plain sum of all
//! errors and the derivative the difference between consecutive errors.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Serialize;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Lower bound of the controller output.
pub const OUTPUT_MIN: f64 = -1.0;

/// Upper bound of the controller output.
pub const OUTPUT_MAX: f64 = 1.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A PID controller
#[derive(Debug, Serialize, Clone, Default)]
pub struct PidController {
    /// Proportional gain
    k_p: f64,

    /// Integral gain
    k_i: f64,

    /// Dervative gain
    k_d: f64,

    /// The most recent error
    p_error: f64,

    /// Sum of all errors seen since the last `init`
    i_error: f64,

    /// Difference between the last two errors
    d_error: f64,

    /// Optional symmetric bound on `i_error`. `None` leaves the integral unbounded.
    #[serde(skip)]
    i_error_limit: Option<f64>
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PidController {

    /// Create a new controller with the given gains and zeroed error memories.
    pub fn new(k_p: f64, k_i: f64, k_d: f64) -> Self {
        let mut ctrl = Self::default();
        ctrl.init(k_p, k_i, k_d);
        ctrl
    }

    /// Bound the integral memory to `[-limit, limit]`, or remove the bound with `None`.
    ///
    /// A non-finite limit leaves the integral unbounded.
    pub fn with_integral_limit(mut self, limit: Option<f64>) -> Self {
        self.i_error_limit = limit.filter(|l| l.is_finite()).map(f64::abs);
        self
    }

    /// Set the gains and zero the error memories.
    pub fn init(&mut self, k_p: f64, k_i: f64, k_d: f64) {
        self.set_gains([k_p, k_i, k_d]);

        self.p_error = 0.0;
        self.i_error = 0.0;
        self.d_error = 0.0;
    }

    /// Feed the latest error sample into the error memories.
    pub fn update_error(&mut self, error: f64) {
        // The derivative uses the previous error, so must be set before p_error is overwritten
        self.d_error = error - self.p_error;
        self.p_error = error;
        self.i_error += error;

        if let Some(limit) = self.i_error_limit {
            self.i_error = self.i_error.clamp(-limit, limit);
        }
    }

    /// Get the controller output for the current error memories.
    ///
    /// The output is always within `[OUTPUT_MIN, OUTPUT_MAX]`.
    pub fn total_error(&self) -> f64 {
        let out = -(
            self.k_p * self.p_error
            + self.k_d * self.d_error
            + self.k_i * self.i_error
        );

        // NaN survives clamp, so map it to no demand
        if out.is_nan() {
            return 0.0
        }

        out.clamp(OUTPUT_MIN, OUTPUT_MAX)
    }

    /// Replace the proportional gain.
    pub fn set_k_p(&mut self, k_p: f64) {
        self.k_p = k_p;
    }

    /// Replace the integral gain.
    pub fn set_k_i(&mut self, k_i: f64) {
        self.k_i = k_i;
    }

    /// Replace the derivative gain.
    pub fn set_k_d(&mut self, k_d: f64) {
        self.k_d = k_d;
    }

    /// Replace all three gains, ordered `[k_p, k_i, k_d]`. Error memories are kept.
    pub fn set_gains(&mut self, gains: [f64; 3]) {
        self.set_k_p(gains[0]);
        self.set_k_i(gains[1]);
        self.set_k_d(gains[2]);
    }

    /// The current gains, ordered `[k_p, k_i, k_d]`.
    pub fn gains(&self) -> [f64; 3] {
        [self.k_p, self.k_i, self.k_d]
    }

    pub fn p_error(&self) -> f64 {
        self.p_error
    }

    pub fn i_error(&self) -> f64 {
        self.i_error
    }

    pub fn d_error(&self) -> f64 {
        self.d_error
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
