//! # Drive Control Executable
//!
//! This executable drives the simulated vehicle around the track. Telemetry frames from the
//! simulator are turned into steering and throttle commands by two PID controllers, whose gains
//! can optionally be tuned online with Twiddle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{Result, eyre::WrapErr};
use comms_if::net::{zmq, NetParams};
use log::{info, warn, trace};
use structopt::StructOpt;

// Internal
use ctrl_lib::{
    ctrl_loop::{self, CtrlLoop, TuneTarget},
    sim_server::{self, SimServer}
};
use util::{
    archive::Archived,
    logger::{logger_init, LevelFilter},
    module::State,
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Command line options.
#[derive(Debug, StructOpt)]
#[structopt(name = "ctrl_exec", about = "PID drive controller for the track simulator")]
struct Opts {
    /// Auto-tune the PID gains: 1 for steering, 2 for speed, any other integer (or "both") for
    /// both channels.
    #[structopt(short, long)]
    tune: Option<TuneTarget>,

    /// Maximum level of log messages.
    #[structopt(long, default_value = "debug")]
    log_level: LevelFilter,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {

    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    let opts = Opts::from_args();

    // Initialise session
    let session = Session::new(
        "ctrl_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(opts.log_level, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Drive Control Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams = util::params::load("net.toml")
        .wrap_err("Could not load net params")?;

    info!("Parameters loaded");

    // ---- MODULE INITIALISATION ----

    let mut ctrl = CtrlLoop::default();
    ctrl.init(
        ctrl_loop::InitData {
            params_file: "ctrl_exec.toml".into(),
            tune: opts.tune
        },
        &session
    ).wrap_err("Failed to initialise the control loop")?;

    info!("CtrlLoop init complete");

    // ---- SERVER INITIALISATION ----

    let ctx = zmq::Context::new();

    let mut server = SimServer::new(&ctx, &net_params)
        .wrap_err("Failed to initialise server")?;

    info!("Server initialised");

    // ---- MAIN LOOP ----

    info!("Initialisation complete, entering main loop");

    loop {
        let msg = match server.recv() {
            Ok(Some(m)) => m,
            Ok(None) => continue,
            Err(e) => {
                warn!("Couldn't read from the simulator: {}", e);
                continue
            }
        };

        trace!("Recieved: {}", msg);

        let response = sim_server::respond(&mut ctrl, &msg);

        if let Err(e) = ctrl.write() {
            warn!("Could not write control loop archives: {}", e);
        }

        trace!("Responding: {:?}", response);

        if let Err(e) = server.send_response(&response) {
            warn!("Couldn't send response to the simulator: {}", e);
        }
    }
}
