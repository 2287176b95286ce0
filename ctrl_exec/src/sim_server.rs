//! # Simulator Server Module
//!
//! This module abstracts over the networking side of the control executable. The simulator
//! connects to the server and sends one message per frame, each of which must be answered before
//! the next arrives.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{zmq, MonitoredSocket, SocketOptions, MonitoredSocketError, NetParams},
    sim::{SimFrame, SimResponse, FrameError}
};
use log::{debug, info, warn};

use crate::ctrl_loop::{Action, CtrlLoop};
use util::module::State;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the control executable.
pub struct SimServer {

    /// REP socket the simulator's messages arrive on
    socket: MonitoredSocket,

    /// Connection state at the last call to [`SimServer::recv`]
    was_connected: bool,

    /// True between receiving a request and successfully replying to it
    awaiting_reply: bool
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`SimServer`]
#[derive(thiserror::Error, Debug)]
pub enum SimServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not read from the simulator: {0}")]
    RecvError(zmq::Error),

    #[error("Could not send data to the simulator: {0}")]
    SendError(zmq::Error),

    #[error("Could not encode the response: {0}")]
    FrameError(FrameError)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimServer {

    /// Create a new instance of the simulator server.
    ///
    /// This function will not wait for the simulator to connect before returning.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, SimServerError> {

        let socket_options = SocketOptions {
            bind: true,
            recv_timeout: params.poll_timeout_ms,
            send_timeout: 10,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(
            ctx,
            zmq::REP,
            socket_options,
            &params.sim_endpoint
        )?;

        info!("Listening for the simulator on {}", params.sim_endpoint);

        Ok(Self {
            socket,
            was_connected: false,
            awaiting_reply: false
        })
    }

    /// Receive the next message from the simulator.
    ///
    /// Returns `None` if nothing arrived within the poll timeout. If a message is returned the
    /// user should call [`SimServer::send_response`] before receiving again. A request left
    /// unanswered, for example because the reply failed to send, is answered with an empty
    /// message first so the socket can receive again.
    pub fn recv(&mut self) -> Result<Option<String>, SimServerError> {
        let connected = self.socket.connected();
        if connected != self.was_connected {
            match connected {
                true => info!("Connected"),
                false => info!("Disconnected")
            }
            self.was_connected = connected;
        }

        if self.awaiting_reply {
            match self.socket.send(&b""[..], 0) {
                Ok(_) => self.awaiting_reply = false,
                Err(zmq::Error::EAGAIN) => return Ok(None),
                Err(e) => return Err(SimServerError::SendError(e))
            }
        }

        match self.socket.recv_bytes(0) {
            Ok(b) => {
                self.awaiting_reply = true;
                Ok(Some(String::from_utf8_lossy(&b).into_owned()))
            },
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(SimServerError::RecvError(e))
        }
    }

    /// Send a response to the last message received.
    ///
    /// [`SimResponse::None`] is sent as an empty message, since every request must be answered.
    pub fn send_response(&mut self, response: &SimResponse) -> Result<(), SimServerError> {
        let frame = response.to_frame()
            .map_err(SimServerError::FrameError)?
            .unwrap_or_default();

        self.socket.send(frame.as_bytes(), 0)
            .map_err(SimServerError::SendError)?;
        self.awaiting_reply = false;

        Ok(())
    }
}

impl From<MonitoredSocketError> for SimServerError {
    fn from(e: MonitoredSocketError) -> Self {
        SimServerError::SocketError(e)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Decide the response to a message from the simulator, stepping the control loop if it carries
/// telemetry.
///
/// Telemetry that can't be decoded or processed is skipped and answered as manual driving, so the
/// simulator keeps sending frames.
pub fn respond(ctrl: &mut CtrlLoop, msg: &str) -> SimResponse {
    let frame = match SimFrame::parse(msg) {
        Ok(f) => f,
        Err(e) => {
            warn!("Could not decode simulator message: {}", e);
            return SimResponse::Manual
        }
    };

    match frame {
        SimFrame::Ignored => SimResponse::None,
        SimFrame::Other(event) => {
            debug!("Ignoring \"{}\" event", event);
            SimResponse::None
        },
        SimFrame::Manual => SimResponse::Manual,
        SimFrame::Telemetry(tm) => match ctrl.proc(&tm) {
            Ok((Action::Actuate { steering, throttle }, _)) => SimResponse::Steer {
                steering_angle: steering,
                throttle
            },
            Ok((Action::Reset, _)) => SimResponse::Reset,
            Err(e) => {
                warn!("Skipping telemetry sample: {}", e);
                SimResponse::Manual
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::ctrl_loop::{Params, TuneTarget};

    /// Server bound on an inproc endpoint with a connected client.
    fn server_and_client(ctx: &zmq::Context, name: &str) -> (SimServer, zmq::Socket) {
        let params = NetParams {
            sim_endpoint: format!("inproc://{}", name),
            poll_timeout_ms: 100
        };
        let server = SimServer::new(ctx, &params).unwrap();

        let client = ctx.socket(zmq::REQ).unwrap();
        client.set_rcvtimeo(1000).unwrap();
        client.connect(&params.sim_endpoint).unwrap();

        (server, client)
    }

    const TELEMETRY: &str =
        r#"42["telemetry",{"cte":"0.7598","speed":"0.4380","steering_angle":"0.0000"}]"#;

    #[test]
    fn test_respond_telemetry() {
        let mut ctrl = CtrlLoop::default();

        match respond(&mut ctrl, TELEMETRY) {
            SimResponse::Steer { steering_angle, throttle } => {
                // Positive error steers negative, slow speed throttles up
                assert!(steering_angle < 0.0 && steering_angle >= -1.0);
                assert_eq!(throttle, 1.0);
            },
            r => panic!("Expected a steer response, got {:?}", r)
        }

        assert_eq!(ctrl.steering().pid().p_error(), 0.7598);
    }

    #[test]
    fn test_respond_non_telemetry() {
        let mut ctrl = CtrlLoop::default();

        assert_eq!(respond(&mut ctrl, "2"), SimResponse::None);
        assert_eq!(respond(&mut ctrl, "42"), SimResponse::None);
        assert_eq!(respond(&mut ctrl, "42[\"telemetry\",null]"), SimResponse::Manual);
        assert_eq!(respond(&mut ctrl, "42[\"other\",{\"a\":1}]"), SimResponse::None);

        // Nothing reached the controllers
        assert_eq!(ctrl.steering().pid().i_error(), 0.0);
    }

    #[test]
    fn test_respond_bad_telemetry() {
        let mut ctrl = CtrlLoop::default();

        assert_eq!(
            respond(&mut ctrl, r#"42["telemetry",{"cte":"abc","speed":"1.0"}]"#),
            SimResponse::Manual
        );
        assert_eq!(
            respond(&mut ctrl, r#"42["telemetry",{"speed":"1.0"}]"#),
            SimResponse::Manual
        );
        assert_eq!(
            respond(&mut ctrl, r#"42["telemetry",{"cte":"NaN","speed":"1.0"}]"#),
            SimResponse::Manual
        );
        assert_eq!(respond(&mut ctrl, "42[\"telemetry\",{"), SimResponse::Manual);

        assert_eq!(ctrl.steering().pid().i_error(), 0.0);
    }

    #[test]
    fn test_respond_reset() {
        let params = Params {
            tune_tolerance: 10.0,
            ..Params::default()
        };
        let mut ctrl = CtrlLoop::new(params, Some(TuneTarget::Both));

        assert_eq!(respond(&mut ctrl, TELEMETRY), SimResponse::Reset);
        assert!(matches!(respond(&mut ctrl, TELEMETRY), SimResponse::Steer { .. }));
    }

    #[test]
    fn test_exchange() {
        let ctx = zmq::Context::new();
        let (mut server, client) = server_and_client(&ctx, "sim_server_exchange");

        client.send("2", 0).unwrap();
        assert_eq!(server.recv().unwrap(), Some("2".to_string()));
        server.send_response(&SimResponse::None).unwrap();
        assert_eq!(client.recv_bytes(0).unwrap(), Vec::<u8>::new());

        client.send(TELEMETRY, 0).unwrap();
        assert_eq!(server.recv().unwrap(), Some(TELEMETRY.to_string()));
        server.send_response(&SimResponse::Reset).unwrap();
        assert_eq!(client.recv_string(0).unwrap().unwrap(), "42[\"reset\",{}]");

        // Nothing sent
        assert_eq!(server.recv().unwrap(), None);
    }

    #[test]
    fn test_recv_after_unanswered_request() {
        let ctx = zmq::Context::new();
        let (mut server, client) = server_and_client(&ctx, "sim_server_unanswered");

        client.send(TELEMETRY, 0).unwrap();
        assert!(server.recv().unwrap().is_some());

        // The reply never went out, receiving again must still work
        assert_eq!(server.recv().unwrap(), None);
        assert_eq!(client.recv_bytes(0).unwrap(), Vec::<u8>::new());

        client.send("42[\"telemetry\",null]", 0).unwrap();
        assert_eq!(
            server.recv().unwrap(),
            Some("42[\"telemetry\",null]".to_string())
        );
        server.send_response(&SimResponse::Manual).unwrap();
        assert_eq!(client.recv_string(0).unwrap().unwrap(), "42[\"manual\",{}]");
    }
}
