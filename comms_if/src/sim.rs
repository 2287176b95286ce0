//! # Simulator frames
//!
//! The driving simulator speaks socket.io event framing: every event is a text message starting
//! with `42` followed by a JSON array `[event_name, payload]`. Inbound we only care about the
//! `telemetry` event, outbound we send `steer`, `reset` and `manual` events.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;
use serde_json::Value;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Prefix of a socket.io event message ("4" message, "2" event).
pub const EVENT_PREFIX: &str = "42";

/// Name of the inbound telemetry event.
pub const TELEMETRY_EVENT: &str = "telemetry";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single telemetry sample from the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    /// Cross-track error, the lateral deviation from the intended path.
    pub cte: f64,

    /// Current speed of the vehicle.
    pub speed: f64,

    /// Steering angle reported by the simulator, if present.
    pub steering_angle: Option<f64>
}

#[derive(Serialize)]
struct SteerPayload {
    steering_angle: f64,
    throttle: f64
}

#[derive(Serialize)]
struct EmptyPayload {}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum SimFrame {
    /// Not an event message, no response is expected.
    Ignored,

    /// An event with no usable data, the vehicle is being driven manually.
    Manual,

    /// A telemetry sample.
    Telemetry(Telemetry),

    /// Some other event carrying data, which the controller doesn't handle.
    Other(String)
}

/// A response to send back to the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimResponse {
    /// No response frame.
    None,

    /// Actuation command, both values in `[-1, 1]`.
    Steer {
        steering_angle: f64,
        throttle: f64
    },

    /// Restart the simulation.
    Reset,

    /// Acknowledge manual driving.
    Manual
}

/// Errors which can occur when decoding or encoding simulator frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Frame does not start with an event name")]
    MissingEventName,

    #[error("Telemetry is missing the \"{0}\" field")]
    MissingField(&'static str),

    #[error("Telemetry field \"{field}\" is not a number: {value}")]
    InvalidNumber {
        field: &'static str,
        value: String
    },

    #[error("Could not serialize the response: {0}")]
    SerializationError(serde_json::Error)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimFrame {
    /// Decode a raw message from the simulator.
    ///
    /// A frame whose payload can't be found is treated as manual driving rather than an error.
    /// Errors are only returned for telemetry events that can't be decoded.
    pub fn parse(msg: &str) -> Result<Self, FrameError> {
        if msg.len() <= EVENT_PREFIX.len() || !msg.starts_with(EVENT_PREFIX) {
            return Ok(SimFrame::Ignored)
        }

        let payload = match extract_payload(msg) {
            Some(p) => p,
            None => return Ok(SimFrame::Manual)
        };

        let val: Value = serde_json::from_str(payload)
            .map_err(FrameError::InvalidJson)?;

        let event = val[0].as_str().ok_or(FrameError::MissingEventName)?;

        if event != TELEMETRY_EVENT {
            return Ok(SimFrame::Other(event.to_string()))
        }

        let data = &val[1];

        Ok(SimFrame::Telemetry(Telemetry {
            cte: parse_number(data, "cte")?,
            speed: parse_number(data, "speed")?,
            steering_angle: match data.get("steering_angle") {
                Some(_) => parse_number(data, "steering_angle").ok(),
                None => None
            }
        }))
    }
}

impl SimResponse {
    /// Encode the response as a message, or `None` if there is nothing to send.
    pub fn to_frame(&self) -> Result<Option<String>, FrameError> {
        let body = match *self {
            SimResponse::None => return Ok(None),
            SimResponse::Steer { steering_angle, throttle } => serde_json::to_string(
                &("steer", SteerPayload { steering_angle, throttle })
            ),
            SimResponse::Reset => serde_json::to_string(&("reset", EmptyPayload {})),
            SimResponse::Manual => serde_json::to_string(&("manual", EmptyPayload {}))
        }.map_err(FrameError::SerializationError)?;

        Ok(Some(format!("{}{}", EVENT_PREFIX, body)))
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Find the JSON payload of an event message.
///
/// Returns `None` if the message contains `null` anywhere, or if it has no `[...]` section.
/// Otherwise the slice from the first `[` to the last `]` inclusive is returned.
pub fn extract_payload(msg: &str) -> Option<&str> {
    if msg.contains("null") {
        return None
    }

    let start = msg.find('[')?;
    let end = msg.rfind(']')?;

    if end < start {
        return None
    }

    Some(&msg[start..=end])
}

/// Read a numeric telemetry field, which the simulator sends as a decimal string.
fn parse_number(data: &Value, field: &'static str) -> Result<f64, FrameError> {
    match data.get(field) {
        Some(Value::String(s)) => s.trim().parse::<f64>()
            .map_err(|_| FrameError::InvalidNumber { field, value: s.clone() }),
        Some(Value::Number(n)) => n.as_f64()
            .ok_or_else(|| FrameError::InvalidNumber { field, value: n.to_string() }),
        Some(v) => Err(FrameError::InvalidNumber { field, value: v.to_string() }),
        None => Err(FrameError::MissingField(field))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
