//! Control loop state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{info, trace};
use serde::Serialize;

// Internal
use super::*;
use crate::{
    pid::PidController,
    twiddle::{Twiddle, WindowReport}
};
use comms_if::sim::Telemetry;
use util::{
    module::State,
    archive::{Archived, Archiver, ArchiveError},
    session::Session
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Label of the steering channel.
pub const STEERING_LABEL: &str = "steering";

/// Label of the speed channel.
pub const SPEED_LABEL: &str = "speed";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The control loop, holding the steering and speed channels.
pub struct CtrlLoop {
    params: Params,

    /// Set while auto-tuning was requested and hasn't yet finished on every channel.
    auto_tune: bool,

    mode: CtrlMode,

    steering: Channel,

    speed: Channel,

    report: StatusReport,
    arch_report: Archiver,

    /// Set by each processed sample, cleared once its reports are archived.
    report_pending: bool
}

/// A PID controller with its tuner.
pub struct Channel {
    pid: PidController,

    twiddle: Twiddle,

    /// If true the tuner is fed every sample and its gains injected into the controller.
    tuning: bool,

    /// Report of the window completed on the last sample, if any.
    window_report: Option<WindowReport>,
    arch_window_report: Archiver
}

/// Data needed to initialise the control loop.
#[derive(Debug, Clone)]
pub struct InitData {
    /// Parameter file, relative to the params directory.
    pub params_file: String,

    /// Channels to auto-tune, if any.
    pub tune: Option<TuneTarget>
}

/// The status report for one sample.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct StatusReport {
    pub mode: CtrlMode,

    /// Steering channel error
    pub cte: f64,

    /// Speed channel error, measured minus target
    pub speed_error: f64,

    /// Steering controller output
    pub steering: f64,

    /// Speed controller output
    pub throttle: f64,

    pub tuning_steering: bool,

    pub tuning_speed: bool
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CtrlLoop {
    /// Create a new control loop, tuning the channels selected by `tune`.
    ///
    /// Tuned channels start from their `tune_init_gains`, the others use their fixed gains.
    pub fn new(params: Params, tune: Option<TuneTarget>) -> Self {
        let tune_steering = tune.map(|t| t.steering()).unwrap_or(false);
        let tune_speed = tune.map(|t| t.speed()).unwrap_or(false);

        let steering = Channel::new(
            STEERING_LABEL, &params.steering, params.tune_tolerance, tune_steering
        );
        let speed = Channel::new(
            SPEED_LABEL, &params.speed, params.tune_tolerance, tune_speed
        );

        let auto_tune = tune.is_some();

        Self {
            params,
            auto_tune,
            mode: match auto_tune {
                true => CtrlMode::Tuning,
                false => CtrlMode::Idle
            },
            steering,
            speed,
            report: StatusReport::default(),
            arch_report: Archiver::default(),
            report_pending: false
        }
    }

    pub fn mode(&self) -> CtrlMode {
        self.mode
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn steering(&self) -> &Channel {
        &self.steering
    }

    pub fn speed(&self) -> &Channel {
        &self.speed
    }

    /// Window reports produced by the last sample.
    pub fn window_reports(&self) -> impl Iterator<Item = &WindowReport> {
        self.steering.window_report.iter()
            .chain(self.speed.window_report.iter())
    }
}

impl Default for CtrlLoop {
    fn default() -> Self {
        Self::new(Params::default(), None)
    }
}

impl State for CtrlLoop {
    type InitData = InitData;
    type InitError = CtrlLoopError;

    type InputData = Telemetry;
    type OutputData = Action;
    type StatusReport = StatusReport;
    type ProcError = CtrlLoopError;

    /// Initialise the control loop from its parameter file, creating the archives in the
    /// session.
    fn init(&mut self, init_data: Self::InitData, session: &Session)
        -> Result<(), Self::InitError>
    {
        let params: Params = util::params::load(&init_data.params_file)
            .map_err(CtrlLoopError::ParamLoadError)?;

        *self = Self::new(params, init_data.tune);

        self.arch_report = Archiver::from_path(session, "ctrl_loop/status.csv")
            .map_err(CtrlLoopError::ArchiveError)?;

        for channel in [&mut self.steering, &mut self.speed].iter_mut() {
            if channel.tuning {
                channel.arch_window_report = Archiver::from_path(
                    session,
                    format!("ctrl_loop/{}_twiddle.csv", channel.twiddle.label())
                ).map_err(CtrlLoopError::ArchiveError)?;
            }
        }

        match init_data.tune {
            Some(t) => info!("Auto tuning PID gains ({:?})", t),
            None => info!("Using fixed PID gains")
        }

        Ok(())
    }

    /// Process one telemetry sample.
    ///
    /// Samples containing non-finite values are rejected without touching any state.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        if !input_data.cte.is_finite() || !input_data.speed.is_finite() {
            return Err(CtrlLoopError::NonFiniteTelemetry {
                cte: input_data.cte,
                speed: input_data.speed
            })
        }

        let cte = input_data.cte;
        let speed_error = input_data.speed - self.params.target_speed;

        let steering = self.steering.proc(cte);
        let throttle = self.speed.proc(speed_error);

        // Tuning has finished on every channel that was tuned
        let action = if self.auto_tune && !self.steering.tuning && !self.speed.tuning {
            self.auto_tune = false;
            self.mode = CtrlMode::Done;

            info!("Auto tuning complete, resetting the simulator");
            info!("    Steering gains: {:?}", self.steering.pid.gains());
            info!("    Speed gains: {:?}", self.speed.pid.gains());

            Action::Reset
        }
        else {
            self.mode = match self.auto_tune {
                true => CtrlMode::Tuning,
                false => CtrlMode::Idle
            };

            Action::Actuate { steering, throttle }
        };

        self.report = StatusReport {
            mode: self.mode,
            cte,
            speed_error,
            steering,
            throttle,
            tuning_steering: self.steering.tuning,
            tuning_speed: self.speed.tuning
        };

        self.report_pending = true;

        trace!("CtrlLoop output: {:?}", action);

        Ok((action, self.report))
    }
}

impl Archived for CtrlLoop {
    /// Archive the reports of the last processed sample. Does nothing if no sample has been
    /// processed since the last call.
    fn write(&mut self) -> Result<(), ArchiveError> {
        if !self.report_pending {
            return Ok(())
        }
        self.report_pending = false;

        self.arch_report.serialise(self.report)?;
        self.steering.write()?;
        self.speed.write()
    }
}

impl Channel {
    fn new(label: &str, params: &ChannelParams, tolerance: f64, tuning: bool) -> Self {
        let gains = match tuning {
            true => params.tune_init_gains,
            false => params.gains()
        };

        Self {
            pid: PidController::new(gains[0], gains[1], gains[2])
                .with_integral_limit(params.i_error_limit),
            twiddle: Twiddle::new(tolerance, params.tune_init_gains, params.tune_deltas, label),
            tuning,
            window_report: None,
            arch_window_report: Archiver::default()
        }
    }

    /// Step the channel with a new error, returning the controller output.
    fn proc(&mut self, error: f64) -> f64 {
        self.pid.update_error(error);

        self.window_report = None;

        if self.tuning {
            self.window_report = self.twiddle.update_error(error);
            self.pid.set_gains(self.twiddle.params());

            if self.twiddle.is_done() {
                self.tuning = false;
                info!(
                    "Tuning of the {} channel complete: {:?}",
                    self.twiddle.label(),
                    self.twiddle.params()
                );
            }
        }

        self.pid.total_error()
    }

    pub fn pid(&self) -> &PidController {
        &self.pid
    }

    pub fn twiddle(&self) -> &Twiddle {
        &self.twiddle
    }

    /// Returns true while the channel's tuner is running.
    pub fn is_tuning(&self) -> bool {
        self.tuning
    }
}

impl Archived for Channel {
    fn write(&mut self) -> Result<(), ArchiveError> {
        match self.window_report {
            Some(ref r) => self.arch_window_report.serialise(r),
            None => Ok(())
        }
    }
}

impl Default for StatusReport {
    fn default() -> Self {
        Self {
            mode: CtrlMode::Idle,
            cte: 0.0,
            speed_error: 0.0,
            steering: 0.0,
            throttle: 0.0,
            tuning_steering: false,
            tuning_speed: false
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::twiddle::TwiddleStep;

    fn sample(cte: f64, speed: f64) -> Telemetry {
        Telemetry {
            cte,
            speed,
            steering_angle: None
        }
    }

    /// Params whose tuners finish on their first sample, since the tolerance exceeds the sum
    /// of the default steps.
    fn instant_tune_params() -> Params {
        Params {
            tune_tolerance: 10.0,
            ..Params::default()
        }
    }

    #[test]
    fn test_idle_actuates() {
        let mut ctrl = CtrlLoop::default();
        let params = Params::default();

        let mut steering_ref = PidController::new(
            params.steering.k_p, params.steering.k_i, params.steering.k_d
        );
        let mut speed_ref = PidController::new(
            params.speed.k_p, params.speed.k_i, params.speed.k_d
        );

        for (cte, speed) in [(0.76, 0.0), (0.5, 12.0), (-0.2, 38.5), (0.0, 41.0)].iter() {
            steering_ref.update_error(*cte);
            speed_ref.update_error(speed - 40.0);

            let (action, report) = ctrl.proc(&sample(*cte, *speed)).unwrap();

            assert_eq!(action, Action::Actuate {
                steering: steering_ref.total_error(),
                throttle: speed_ref.total_error()
            });
            assert_eq!(report.mode, CtrlMode::Idle);
            assert_eq!(report.cte, *cte);
            assert_eq!(report.speed_error, speed - 40.0);
            assert_eq!(ctrl.window_reports().count(), 0);
        }

        assert_eq!(ctrl.steering().pid().gains(), params.steering.gains());
        assert_eq!(ctrl.speed().pid().gains(), params.speed.gains());
    }

    #[test]
    fn test_reset_sent_once() {
        let mut ctrl = CtrlLoop::new(instant_tune_params(), Some(TuneTarget::Steering));

        let (action, report) = ctrl.proc(&sample(0.1, 30.0)).unwrap();
        assert_eq!(action, Action::Reset);
        assert_eq!(report.mode, CtrlMode::Done);
        assert!(ctrl.steering().twiddle().is_done());

        // The tuner never moved so its initial gains were injected
        assert_eq!(ctrl.steering().pid().gains(), [0.0; 3]);

        for _ in 0..50 {
            let (action, report) = ctrl.proc(&sample(0.1, 30.0)).unwrap();
            match action {
                Action::Actuate { .. } => (),
                Action::Reset => panic!("Reset sent more than once")
            }
            assert_eq!(report.mode, CtrlMode::Idle);
        }
    }

    #[test]
    fn test_untuned_channel_keeps_gains() {
        let params = Params {
            tune_tolerance: 0.0,
            ..Params::default()
        };
        let mut ctrl = CtrlLoop::new(params.clone(), Some(TuneTarget::Speed));

        assert_eq!(ctrl.speed().pid().gains(), [0.0; 3]);
        assert!(ctrl.speed().is_tuning());
        assert!(!ctrl.steering().is_tuning());

        for _ in 0..40 {
            let (action, report) = ctrl.proc(&sample(0.3, 35.0)).unwrap();
            assert!(matches!(action, Action::Actuate { .. }));
            assert_eq!(report.mode, CtrlMode::Tuning);
            assert!(report.tuning_speed);
            assert!(!report.tuning_steering);
        }

        assert_eq!(ctrl.steering().pid().gains(), params.steering.gains());
        assert_eq!(ctrl.speed().pid().gains(), ctrl.speed().twiddle().params());
    }

    #[test]
    fn test_gains_injected() {
        let params = Params {
            tune_tolerance: 0.0,
            ..Params::default()
        };
        let mut ctrl = CtrlLoop::new(params.clone(), Some(TuneTarget::Both));

        // Baseline window
        for i in 0..8 {
            ctrl.proc(&sample(0.5, 40.5)).unwrap();
            if i < 7 {
                assert_eq!(ctrl.window_reports().count(), 0);
            }
        }
        let steps: Vec<TwiddleStep> = ctrl.window_reports().map(|r| r.step).collect();
        assert_eq!(steps, vec![TwiddleStep::Calibrate, TwiddleStep::Calibrate]);

        // The probe is visible in the controller on the sample that applies it
        ctrl.proc(&sample(0.5, 40.5)).unwrap();
        assert_eq!(
            ctrl.steering().pid().gains(),
            [params.steering.tune_deltas[0], 0.0, 0.0]
        );
        assert_eq!(
            ctrl.speed().pid().gains(),
            [params.speed.tune_deltas[0], 0.0, 0.0]
        );
    }

    #[test]
    fn test_reset_after_all_channels_done() {
        // Steering finishes at once, speed has to shrink its steps first
        let mut params = Params {
            tune_tolerance: 0.5,
            ..Params::default()
        };
        params.steering.tune_deltas = [0.1, 0.1, 0.1];
        params.speed.tune_deltas = [0.2, 0.2, 0.2];

        let mut ctrl = CtrlLoop::new(params, Some(TuneTarget::Both));

        let mut resets = 0;
        let mut samples = 0;
        while samples < 10_000 {
            let (action, report) = ctrl.proc(&sample(0.2, 42.0)).unwrap();
            samples += 1;

            assert!(!report.tuning_steering);

            match action {
                Action::Reset => {
                    resets += 1;
                    assert!(!report.tuning_speed);
                },
                Action::Actuate { steering, throttle } => {
                    assert!(steering.abs() <= 1.0 && throttle.abs() <= 1.0);
                    if resets == 0 {
                        assert_eq!(report.mode, CtrlMode::Tuning);
                    }
                    else {
                        assert_eq!(report.mode, CtrlMode::Idle);
                    }
                }
            }
        }

        assert_eq!(resets, 1);
        assert!(ctrl.speed().twiddle().is_done());
        assert!(ctrl.speed().twiddle().deltas().iter().sum::<f64>() < 0.5);
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut ctrl = CtrlLoop::default();
        ctrl.proc(&sample(0.4, 10.0)).unwrap();

        let before = ctrl.steering().pid().clone();

        match ctrl.proc(&sample(std::f64::NAN, 10.0)) {
            Err(CtrlLoopError::NonFiniteTelemetry { .. }) => (),
            r => panic!("Expected a non-finite error, got {:?}", r)
        }
        match ctrl.proc(&sample(0.1, std::f64::INFINITY)) {
            Err(CtrlLoopError::NonFiniteTelemetry { .. }) => (),
            r => panic!("Expected a non-finite error, got {:?}", r)
        }

        assert_eq!(ctrl.steering().pid().p_error(), before.p_error());
        assert_eq!(ctrl.steering().pid().i_error(), before.i_error());
        assert_eq!(ctrl.steering().pid().d_error(), before.d_error());
    }

    #[test]
    fn test_write_once_per_sample() {
        let dir = std::env::temp_dir().join("drive_ctrl_write_once_test");
        std::fs::remove_dir_all(&dir).ok();

        let params = Params {
            tune_tolerance: 0.0,
            ..Params::default()
        };
        let mut ctrl = CtrlLoop::new(params, Some(TuneTarget::Steering));
        ctrl.arch_report = Archiver::from_file_path(dir.join("status.csv")).unwrap();
        ctrl.steering.arch_window_report = Archiver::from_file_path(
            dir.join("steering_twiddle.csv")
        ).unwrap();

        // Nothing processed yet
        ctrl.write().unwrap();

        // The eighth sample closes the calibration window
        for _ in 0..8 {
            ctrl.proc(&sample(0.5, 40.0)).unwrap();
            ctrl.write().unwrap();
        }
        assert_eq!(ctrl.window_reports().count(), 1);

        // A frame which never reaches the loop, then a rejected sample
        ctrl.write().unwrap();
        assert!(ctrl.proc(&sample(std::f64::NAN, 40.0)).is_err());
        ctrl.write().unwrap();

        let count_lines = |name: &str| {
            std::fs::read_to_string(dir.join(name)).unwrap().lines().count()
        };

        // Header plus one row per processed sample or window
        assert_eq!(count_lines("status.csv"), 9);
        assert_eq!(count_lines("steering_twiddle.csv"), 2);
    }

    #[test]
    fn test_nan_integral_limit_from_file() {
        let params: Params = util::params::from_str(
            "[steering]\n\
             k_p = 0.1\n\
             k_i = 0.01\n\
             k_d = 1.0\n\
             tune_deltas = [0.04, 0.0004, 1.0]\n\
             i_error_limit = nan\n"
        ).unwrap();
        assert!(params.steering.i_error_limit.map(f64::is_nan).unwrap_or(false));

        let mut ctrl = CtrlLoop::new(params, None);
        for _ in 0..3 {
            ctrl.proc(&sample(0.5, 40.0)).unwrap();
        }
        assert_eq!(ctrl.steering().pid().i_error(), 1.5);
    }

    #[test]
    fn test_write_without_session() {
        let mut ctrl = CtrlLoop::new(instant_tune_params(), Some(TuneTarget::Both));
        ctrl.proc(&sample(0.1, 40.0)).unwrap();
        ctrl.write().unwrap();
    }
}
