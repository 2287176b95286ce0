//! # Twiddle gain tuner
//!
//! Twiddle is a coordinate ascent search over the three PID gains. It works in windows of
//! [`WINDOW_LEN`] samples, accumulating the squared error over each window. The first window
//! only measures a baseline. After that, one gain at a time is nudged up by its step size and
//! the next window's error compared against the best seen so far:
//!
//! 1. `Probe`: increase the gain by its step.
//! 2. `EvaluateIncrease`: if the error improved keep the new gain and grow the step, moving on
//!    to the next gain. Otherwise try the other direction by subtracting twice the step.
//! 3. `EvaluateDecrease`: if the error improved keep it and grow the step, otherwise restore
//!    the original gain and shrink the step. Either way move on to the next gain.
//!
//! The probe is applied on the first sample of a window rather than at the end of the previous
//! one, so the window that follows measures the probed gain.
//!
//! The search finishes once the sum of the step sizes drops below the tolerance.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info};
use serde::Serialize;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of samples in one evaluation window.
pub const WINDOW_LEN: u32 = 8;

/// Number of parameters being searched over.
pub const NUM_PARAMS: usize = 3;

/// Step scale applied after a successful perturbation.
const STEP_GROW: f64 = 1.1;

/// Step scale applied when neither direction helped.
const STEP_SHRINK: f64 = 0.9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Twiddle tuner state for one channel.
#[derive(Debug, Clone)]
pub struct Twiddle {
    /// Label of the channel being tuned, used in logs and archives.
    label: String,

    /// Search stops once the sum of `deltas` falls below this.
    tolerance: f64,

    /// Candidate gains, `[k_p, k_i, k_d]`.
    params: [f64; NUM_PARAMS],

    /// Step size of each gain.
    deltas: [f64; NUM_PARAMS],

    /// Squared error accumulated over the current window.
    error_accum: f64,

    /// Lowest window error seen so far.
    best_error: f64,

    /// Samples seen in the current window.
    window_count: u32,

    /// Number of windows completed.
    num_windows: u64,

    /// Index of the gain being perturbed.
    param_index: usize,

    phase: Phase,

    active: bool,

    /// Set once the baseline window has completed.
    calibrated: bool
}

/// Summary of a completed window.
///
/// Fields are kept flat so the report can be archived as a CSV row.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WindowReport {
    pub label: String,
    pub window: u64,
    pub step: TwiddleStep,
    pub param_index: usize,
    pub window_error: f64,
    pub best_error: f64,
    pub k_p: f64,
    pub k_i: f64,
    pub k_d: f64,
    pub delta_k_p: f64,
    pub delta_k_i: f64,
    pub delta_k_d: f64
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Where in the search of the current gain the tuner is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// The gain is about to be increased by its step.
    Probe,

    /// The gain has been increased, the current window measures the result.
    EvaluateIncrease,

    /// The gain has been decreased, the current window measures the result.
    EvaluateDecrease
}

/// The action taken at the end of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TwiddleStep {
    /// Baseline window, no gain changed.
    Calibrate,

    /// The increase helped and was kept.
    IncreaseKept,

    /// The increase didn't help, the decrease will be tried.
    TryDecrease,

    /// The decrease helped and was kept.
    DecreaseKept,

    /// Neither direction helped, gain restored and step shrunk.
    Revert
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Twiddle {

    /// Create a new tuner starting from `params` with step sizes `deltas`.
    pub fn new(
        tolerance: f64,
        params: [f64; NUM_PARAMS],
        deltas: [f64; NUM_PARAMS],
        label: &str
    ) -> Self {
        Self {
            label: label.to_string(),
            tolerance,
            params,
            deltas,
            error_accum: 0.0,
            best_error: std::f64::INFINITY,
            window_count: 0,
            num_windows: 0,
            param_index: 0,
            phase: Phase::Probe,
            active: true,
            calibrated: false
        }
    }

    /// Feed an error sample into the tuner.
    ///
    /// Returns a report when the sample completes a window. Does nothing once tuning has
    /// finished.
    pub fn update_error(&mut self, error: f64) -> Option<WindowReport> {
        if !self.active {
            return None
        }

        // Termination is checked before the sample is used
        if self.deltas.iter().sum::<f64>() < self.tolerance {
            self.active = false;
            info!(
                "Twiddle {} finished: Kp: {} Ki: {} Kd: {}",
                self.label, self.params[0], self.params[1], self.params[2]
            );
            return None
        }

        // Start of a window with a pending probe
        if self.calibrated && self.phase == Phase::Probe {
            self.probe();
        }

        self.error_accum += error.powi(2);

        self.window_count += 1;
        if self.window_count < WINDOW_LEN {
            return None
        }

        // ---- WINDOW BOUNDARY ----

        self.window_count = 0;
        self.num_windows += 1;

        let window_error = self.error_accum;
        self.error_accum = 0.0;

        let step = if !self.calibrated {
            self.best_error = window_error;
            self.calibrated = true;
            TwiddleStep::Calibrate
        }
        // The probe was applied when this window opened, so only the evaluate phases remain
        else if self.phase == Phase::EvaluateDecrease {
            self.evaluate_decrease(window_error)
        }
        else {
            self.evaluate_increase(window_error)
        };

        let report = self.window_report(step, window_error);
        debug!("{:?}", report);

        Some(report)
    }

    /// The current candidate gains, which may be a value being probed.
    pub fn params(&self) -> [f64; NUM_PARAMS] {
        self.params
    }

    /// Returns true once the search has finished.
    pub fn is_done(&self) -> bool {
        !self.active
    }

    pub fn deltas(&self) -> [f64; NUM_PARAMS] {
        self.deltas
    }

    pub fn best_error(&self) -> f64 {
        self.best_error
    }

    pub fn param_index(&self) -> usize {
        self.param_index
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Judge the increased gain at the end of its window.
    fn evaluate_increase(&mut self, window_error: f64) -> TwiddleStep {
        let i = self.param_index;

        if window_error < self.best_error {
            self.best_error = window_error;
            self.deltas[i] *= STEP_GROW;
            self.next_param();
            TwiddleStep::IncreaseKept
        }
        else {
            self.params[i] -= 2.0 * self.deltas[i];
            self.phase = Phase::EvaluateDecrease;
            TwiddleStep::TryDecrease
        }
    }

    /// Judge the decreased gain at the end of its window, then move on to the next gain.
    fn evaluate_decrease(&mut self, window_error: f64) -> TwiddleStep {
        let i = self.param_index;

        let step = if window_error < self.best_error {
            self.best_error = window_error;
            self.deltas[i] *= STEP_GROW;
            TwiddleStep::DecreaseKept
        }
        else {
            self.params[i] += self.deltas[i];
            self.deltas[i] *= STEP_SHRINK;
            TwiddleStep::Revert
        };

        self.next_param();
        step
    }

    /// Increase the current gain by its step.
    fn probe(&mut self) {
        self.params[self.param_index] += self.deltas[self.param_index];
        self.phase = Phase::EvaluateIncrease;
    }

    /// Move on to the next gain.
    fn next_param(&mut self) {
        self.param_index = (self.param_index + 1) % NUM_PARAMS;
        self.phase = Phase::Probe;
    }

    fn window_report(&self, step: TwiddleStep, window_error: f64) -> WindowReport {
        WindowReport {
            label: self.label.clone(),
            window: self.num_windows,
            step,
            param_index: self.param_index,
            window_error,
            best_error: self.best_error,
            k_p: self.params[0],
            k_i: self.params[1],
            k_d: self.params[2],
            delta_k_p: self.deltas[0],
            delta_k_i: self.deltas[1],
            delta_k_d: self.deltas[2]
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
