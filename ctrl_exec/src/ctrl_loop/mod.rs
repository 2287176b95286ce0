//! # Control loop module
//!
//! The control loop turns each telemetry sample into a steering and throttle demand. It holds
//! two channels, each a PID controller paired with a Twiddle tuner:
//!
//! - Steering, driven by the cross-track error.
//! - Speed, driven by the difference between the measured and target speeds.
//!
//! When auto-tuning is requested for a channel, every sample is also fed to that channel's
//! tuner and the tuner's current candidate gains are copied into the controller. Once every
//! tuned channel has finished, the loop asks the simulator to reset a single time and then
//! carries on driving with the tuned gains.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod params;
pub mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Serialize;
use std::str::FromStr;

// Internal
pub use params::{Params, ChannelParams};
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Which channels to auto-tune, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneTarget {
    Steering,
    Speed,
    Both
}

/// The action the control loop wants taken for a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Drive with the given demands, each in `[-1, 1]`.
    Actuate {
        steering: f64,
        throttle: f64
    },

    /// Tuning has just finished, restart the run.
    Reset
}

/// Execution mode of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CtrlMode {
    /// No tuning, plain actuation.
    Idle,

    /// At least one channel is being tuned.
    Tuning,

    /// All tuned channels finished on this sample. The reset is sent and the loop goes back
    /// to `Idle`.
    Done
}

/// Possible errors that can occur during control loop processing.
#[derive(Debug, thiserror::Error)]
pub enum CtrlLoopError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("Could not create archive: {0}")]
    ArchiveError(util::archive::ArchiveError),

    #[error("Telemetry contains a non-finite value (cte: {cte}, speed: {speed})")]
    NonFiniteTelemetry {
        cte: f64,
        speed: f64
    }
}

/// Error parsing a [`TuneTarget`].
#[derive(Debug, thiserror::Error)]
#[error("Expected 1 (steering), 2 (speed), another integer (both), or a channel name, found \"{0}\"")]
pub struct ParseTuneTargetError(String);

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TuneTarget {
    /// Returns true if the steering channel is tuned.
    pub fn steering(&self) -> bool {
        matches!(self, TuneTarget::Steering | TuneTarget::Both)
    }

    /// Returns true if the speed channel is tuned.
    pub fn speed(&self) -> bool {
        matches!(self, TuneTarget::Speed | TuneTarget::Both)
    }
}

impl FromStr for TuneTarget {
    type Err = ParseTuneTargetError;

    /// `1` selects steering and `2` speed. Any other integer selects both channels. The names
    /// `steering`, `speed`, `both` and `all` are accepted too.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Ok(n) = s.parse::<i64>() {
            return Ok(match n {
                1 => TuneTarget::Steering,
                2 => TuneTarget::Speed,
                _ => TuneTarget::Both
            })
        }

        match s.to_lowercase().as_str() {
            "steering" => Ok(TuneTarget::Steering),
            "speed" => Ok(TuneTarget::Speed),
            "both" | "all" => Ok(TuneTarget::Both),
            _ => Err(ParseTuneTargetError(s.to_string()))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tune_target_from_str() {
        assert_eq!("1".parse::<TuneTarget>().unwrap(), TuneTarget::Steering);
        assert_eq!("2".parse::<TuneTarget>().unwrap(), TuneTarget::Speed);
        assert_eq!("3".parse::<TuneTarget>().unwrap(), TuneTarget::Both);
        assert_eq!("0".parse::<TuneTarget>().unwrap(), TuneTarget::Both);
        assert_eq!("-7".parse::<TuneTarget>().unwrap(), TuneTarget::Both);
        assert_eq!("Speed".parse::<TuneTarget>().unwrap(), TuneTarget::Speed);
        assert_eq!("all".parse::<TuneTarget>().unwrap(), TuneTarget::Both);
        assert!("fast".parse::<TuneTarget>().is_err());

        assert!(TuneTarget::Steering.steering());
        assert!(!TuneTarget::Steering.speed());
        assert!(TuneTarget::Both.steering() && TuneTarget::Both.speed());
    }
}
