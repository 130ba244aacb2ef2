// Benchmark for the per-tick hot path: smoother step and a full MPC
// wrapper update against the simulated solver.
// Run with: cargo bench

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use longplan_rs::clock::ManualClock;
use longplan_rs::longitudinal::mpc::LongitudinalMpc;
use longplan_rs::longitudinal::speed_smoother;
use longplan_rs::messaging::msgs::{EgoState, LeadTrack};
use longplan_rs::sim::SimulatedMpc;

fn bench_speed_smoother(c: &mut Criterion) {
    c.bench_function("speed_smoother step", |b| {
        b.iter(|| {
            let (v, a) = speed_smoother(
                black_box(12.0),
                black_box(0.3),
                black_box(30.0),
                1.1,
                -1.0,
                1.1,
                -1.0,
                0.2,
            );
            black_box((v, a))
        });
    });
}

fn bench_mpc_tick(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new(0.0));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut mpc = LongitudinalMpc::new(1, Box::new(SimulatedMpc::new()), clock, tx);

    let ego = EgoState { v_ego: 20.0, distance_lines: 2, ..Default::default() };
    let lead = LeadTrack {
        status: true,
        d_rel: 30.0,
        v_lead: 18.0,
        v_lead_k: 18.0,
        a_lead_k: -0.5,
        a_lead_tau: 1.5,
        ..Default::default()
    };

    c.bench_function("mpc wrapper tick", |b| {
        b.iter(|| {
            mpc.set_cur_state(20.0, 0.0);
            mpc.update(black_box(&ego), black_box(Some(&lead)));
            // Drain telemetry so the channel never grows.
            while rx.try_recv().is_ok() {}
        });
    });
}

criterion_group!(benches, bench_speed_smoother, bench_mpc_tick);
criterion_main!(benches);
