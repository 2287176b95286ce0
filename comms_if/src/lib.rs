//! # Communications interface crate.
//!
//! Provides the communications interfaces between the drive controller and the driving
//! simulator.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Simulator event frames (telemetry in, steering/reset/manual out)
pub mod sim;

/// Network module
pub mod net;
