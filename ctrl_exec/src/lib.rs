//! # Control library.
//!
//! This library allows other crates in the workspace (and the benchmarks) to access items
//! defined inside the control crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// PID controller - converts an error signal into a saturated actuator demand
pub mod pid;

/// Twiddle - coordinate descent tuner for PID gains
pub mod twiddle;

/// Control loop module - drives the steering and speed channels from telemetry
pub mod ctrl_loop;

/// Simulator server - recieves telemetry from the simulator and answers with commands
pub mod sim_server;
