//! # Control Loop Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use comms_if::sim::SimResponse;
use ctrl_lib::{
    ctrl_loop::{CtrlLoop, Params, TuneTarget},
    sim_server
};

/// A frame as sent by the simulator.
const TELEMETRY: &str = r#"42["telemetry",{"cte":"0.7598","speed":"21.4380","steering_angle":"-1.2500","throttle":"0.3000","angle":"22.8061"}]"#;

fn ctrl_loop_benchmark(c: &mut Criterion) {
    // Fixed gains
    let mut ctrl = CtrlLoop::default();
    c.bench_function("respond_fixed", |b| b.iter(|| {
        let r = sim_server::respond(&mut ctrl, black_box(TELEMETRY));
        assert!(matches!(r, SimResponse::Steer { .. }));
    }));

    // Tuning both channels, with a tolerance that is never reached
    let params = Params {
        tune_tolerance: 0.0,
        ..Params::default()
    };
    let mut ctrl = CtrlLoop::new(params, Some(TuneTarget::Both));
    c.bench_function("respond_tuning", |b| b.iter(|| {
        sim_server::respond(&mut ctrl, black_box(TELEMETRY))
    }));
}

criterion_group!(benches, ctrl_loop_benchmark);
criterion_main!(benches);
