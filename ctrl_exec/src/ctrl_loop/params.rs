//! Control loop parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the control loop.
///
/// Any value missing from the parameter file takes its default.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Params {

    /// Speed the throttle controller holds.
    pub target_speed: f64,

    /// Twiddle stops once the sum of its step sizes falls below this.
    pub tune_tolerance: f64,

    /// Steering controller, driven by the cross-track error.
    pub steering: ChannelParams,

    /// Throttle controller, driven by the speed error.
    pub speed: ChannelParams
}

/// Parameters for one controller channel.
#[derive(Deserialize, Debug, Clone)]
pub struct ChannelParams {

    /// Proportional gain used when the channel isn't being tuned
    pub k_p: f64,

    /// Integral gain used when the channel isn't being tuned
    pub k_i: f64,

    /// Derivative gain used when the channel isn't being tuned
    pub k_d: f64,

    /// Gains Twiddle starts searching from, `[k_p, k_i, k_d]`.
    #[serde(default)]
    pub tune_init_gains: [f64; 3],

    /// Initial Twiddle step sizes, `[k_p, k_i, k_d]`.
    pub tune_deltas: [f64; 3],

    /// Optional bound on the integral memory. When absent the integral is unbounded.
    #[serde(default)]
    pub i_error_limit: Option<f64>
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            target_speed: 40.0,
            tune_tolerance: 0.001,
            steering: ChannelParams {
                k_p: 0.112403,
                k_i: 0.00125197,
                k_d: 2.88999,
                tune_init_gains: [0.0; 3],
                tune_deltas: [0.04, 0.0004, 1.0],
                i_error_limit: None
            },
            speed: ChannelParams {
                k_p: 0.968039,
                k_i: 0.00026506,
                k_d: 2.59908,
                tune_init_gains: [0.0; 3],
                tune_deltas: [0.2, 0.0001, 0.4],
                i_error_limit: None
            }
        }
    }
}

impl ChannelParams {
    /// The fixed gains, `[k_p, k_i, k_d]`.
    pub fn gains(&self) -> [f64; 3] {
        [self.k_p, self.k_i, self.k_d]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_file() {
        let params: Params = util::params::from_str(
            "target_speed = 30.0\n\
             \n\
             [steering]\n\
             k_p = 0.2\n\
             k_i = 0.0008\n\
             k_d = 3.0\n\
             tune_deltas = [0.05, 0.001, 0.5]\n\
             i_error_limit = 100.0\n"
        ).unwrap();

        assert_eq!(params.target_speed, 30.0);
        assert_eq!(params.tune_tolerance, 0.001);
        assert_eq!(params.steering.gains(), [0.2, 0.0008, 3.0]);
        assert_eq!(params.steering.tune_init_gains, [0.0; 3]);
        assert_eq!(params.steering.i_error_limit, Some(100.0));
        assert_eq!(params.speed.gains(), Params::default().speed.gains());
    }
}
