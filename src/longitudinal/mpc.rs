// src/longitudinal/mpc.rs
//! Wrapper around the longitudinal MPC solver.
//!
//! The numerical solver is an external component reached through the
//! [`MpcSolver`] trait; this module owns everything around it: seeding the
//! state, conditioning the lead inputs, retuning the distance cost from the
//! driver's follow profile, and recovering when the solution diverges.

use std::f64::consts::PI;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::clock::MonotonicClock;
use crate::messaging::msgs::{EgoState, LeadTrack, MpcTelemetry};

use super::interp::interp;
use super::time_gap::desired_time_gap;
use super::{
    LEAD_ACCEL_TAU, MPC_COST_ACCELERATION, MPC_COST_DISTANCE, MPC_COST_JERK, MPC_COST_TTC, MPC_N,
};

/// Current-state seed handed to the solver each tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MpcState {
    pub x_ego: f64,
    pub v_ego: f64,
    pub a_ego: f64,
    pub x_l: f64,
    pub v_l: f64,
}

/// Solver output sampled at 0.2 s steps along the horizon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MpcSolution {
    pub x_ego: [f64; MPC_N],
    pub v_ego: [f64; MPC_N],
    pub a_ego: [f64; MPC_N],
    pub x_l: [f64; MPC_N],
    pub v_l: [f64; MPC_N],
    pub cost: f64,
}

impl Default for MpcSolution {
    fn default() -> Self {
        Self {
            x_ego: [0.0; MPC_N],
            v_ego: [0.0; MPC_N],
            a_ego: [0.0; MPC_N],
            x_l: [0.0; MPC_N],
            v_l: [0.0; MPC_N],
            cost: 0.0,
        }
    }
}

/// Contract of the external longitudinal solver.
pub trait MpcSolver: Send {
    /// Reset internal state and cost weights.
    fn init(&mut self, ttc_cost: f64, distance_cost: f64, accel_cost: f64, jerk_cost: f64);

    /// Warm-start from a simulated approach to the given lead.
    fn init_with_simulation(&mut self, v_ego: f64, x_lead: f64, v_lead: f64, a_lead: f64, a_lead_tau: f64);

    /// Solve one horizon; returns the iteration count.
    fn run_mpc(
        &mut self,
        state: &MpcState,
        solution: &mut MpcSolution,
        a_lead_tau: f64,
        a_lead: f64,
        tr: f64,
    ) -> i32;
}

/// Distance cost for a desired follow time. Short gaps are expensive to
/// violate; long gaps are soft.
pub fn generate_cost(distance: f64) -> f64 {
    let cost = interp(distance, &[0.9, 1.8, 2.7], &[1.0, 0.1, 0.05]);
    (cost * 100.0).round() / 100.0
}

pub struct LongitudinalMpc {
    mpc_id: u8,
    solver: Box<dyn MpcSolver>,
    clock: Arc<dyn MonotonicClock>,
    telemetry: UnboundedSender<MpcTelemetry>,

    cur_state: MpcState,
    solution: MpcSolution,
    a_lead_tau: f64,
    rel_vel: f64,
    last_cost: f64,
    last_distance_lines: u8,
    last_cloudlog_t: f64,

    pub v_mpc: f64,
    pub a_mpc: f64,
    pub v_mpc_future: f64,
    pub prev_lead_status: bool,
    pub prev_lead_x: f64,
    /// True only on a tick that re-seeded the solver on a fresh lead.
    pub new_lead: bool,
}

impl LongitudinalMpc {
    pub fn new(
        mpc_id: u8,
        mut solver: Box<dyn MpcSolver>,
        clock: Arc<dyn MonotonicClock>,
        telemetry: UnboundedSender<MpcTelemetry>,
    ) -> Self {
        solver.init(MPC_COST_TTC, MPC_COST_DISTANCE, MPC_COST_ACCELERATION, MPC_COST_JERK);
        Self {
            mpc_id,
            solver,
            clock,
            telemetry,
            cur_state: MpcState::default(),
            solution: MpcSolution::default(),
            a_lead_tau: LEAD_ACCEL_TAU,
            rel_vel: 0.0,
            last_cost: 0.0,
            last_distance_lines: 0,
            last_cloudlog_t: 0.0,
            v_mpc: 0.0,
            a_mpc: 0.0,
            v_mpc_future: 0.0,
            prev_lead_status: false,
            prev_lead_x: 0.0,
            new_lead: false,
        }
    }

    /// Seed `(v_ego, a_ego)` from the planner's extrapolated anchor.
    pub fn set_cur_state(&mut self, v: f64, a: f64) {
        self.cur_state.v_ego = v;
        self.cur_state.a_ego = a;
    }

    /// Latch the lead relative velocity for the dynamic follow profile.
    pub fn set_rel_vel(&mut self, rel_vel: f64) {
        self.rel_vel = rel_vel;
    }

    pub fn solution(&self) -> &MpcSolution {
        &self.solution
    }

    pub fn update(&mut self, ego: &EgoState, lead: Option<&LeadTrack>) {
        self.cur_state.x_ego = 0.0;
        self.new_lead = false;

        let a_lead = match lead {
            Some(lead) if lead.status => {
                let x_lead = (lead.d_rel - 1.0).max(0.0);
                let mut v_lead = lead.v_lead.max(0.0);
                let mut a_lead = lead.a_lead_k;

                // Stationary heuristic: a decelerating lead about to stop is
                // treated as stopped so the horizon does not chase it.
                if v_lead < 0.1 || -a_lead / 2.0 > v_lead {
                    v_lead = 0.0;
                    a_lead = 0.0;
                }

                self.a_lead_tau =
                    lead.a_lead_tau.max(a_lead.powi(2) * PI / (2.0 * (v_lead + 0.01).powi(2)));

                if !self.prev_lead_status || (x_lead - self.prev_lead_x).abs() > 2.5 {
                    self.solver.init_with_simulation(self.v_mpc, x_lead, v_lead, a_lead, self.a_lead_tau);
                    self.new_lead = true;
                }

                self.prev_lead_status = true;
                self.prev_lead_x = x_lead;
                self.cur_state.x_l = x_lead;
                self.cur_state.v_l = v_lead;
                a_lead
            }
            _ => {
                // Fake a fast, distant lead so the solver stays well
                // conditioned while nothing is tracked.
                self.prev_lead_status = false;
                self.cur_state.x_l = 50.0;
                self.cur_state.v_l = ego.v_ego + 10.0;
                self.a_lead_tau = LEAD_ACCEL_TAU;
                0.0
            }
        };

        let tr = self.select_time_gap(ego);

        let t = self.clock.now();
        let n_its = self.solver.run_mpc(&self.cur_state, &mut self.solution, self.a_lead_tau, a_lead, tr);
        let duration = ((self.clock.now() - t) * 1e9) as u64;
        self.send_solution(n_its, duration);

        self.v_mpc = self.solution.v_ego[1];
        self.a_mpc = self.solution.a_ego[1];
        self.v_mpc_future = self.solution.v_ego[10];

        // Reset if NaN, running backwards, or driving through the lead.
        let mut min_dl = f64::INFINITY;
        let mut min_v = f64::INFINITY;
        let mut nans = false;
        for i in 0..MPC_N {
            min_dl = min_dl.min(self.solution.x_l[i] - self.solution.x_ego[i]);
            min_v = min_v.min(self.solution.v_ego[i]);
            nans |= self.solution.v_ego[i].is_nan();
        }
        let crashing = min_dl < -50.0;
        let backwards = min_v < -0.01;

        if ((backwards || crashing) && self.prev_lead_status) || nans {
            if t > self.last_cloudlog_t + 5.0 {
                self.last_cloudlog_t = t;
                tracing::warn!(
                    mpc_id = self.mpc_id,
                    backwards,
                    crashing,
                    nans,
                    "longitudinal mpc reset"
                );
            }
            self.solver.init(MPC_COST_TTC, MPC_COST_DISTANCE, MPC_COST_ACCELERATION, MPC_COST_JERK);
            self.cur_state.v_ego = ego.v_ego;
            self.cur_state.a_ego = 0.0;
            self.v_mpc = ego.v_ego;
            self.a_mpc = ego.a_ego;
            self.prev_lead_status = false;
        }
    }

    /// Desired follow time for this tick, re-initializing the solver's
    /// distance cost when the driver's profile selection changes.
    fn select_time_gap(&mut self, ego: &EgoState) -> f64 {
        if ego.v_ego < 2.0 {
            return 1.8;
        }
        match ego.distance_lines {
            1 => {
                if self.last_distance_lines != 1 {
                    self.solver.init(MPC_COST_TTC, 1.0, MPC_COST_ACCELERATION, MPC_COST_JERK);
                    self.last_distance_lines = 1;
                }
                0.9
            }
            2 => {
                let tr = desired_time_gap(ego.v_ego, self.rel_vel);
                let cost = generate_cost(tr);
                // Hysteresis on the cost, not the gap, so small gap changes
                // do not thrash the solver.
                if (cost - self.last_cost).abs() > 0.2 {
                    self.solver.init(MPC_COST_TTC, cost, MPC_COST_ACCELERATION, MPC_COST_JERK);
                    self.last_cost = cost;
                }
                tr
            }
            3 => {
                if self.last_distance_lines != 3 {
                    self.solver.init(MPC_COST_TTC, 0.05, MPC_COST_ACCELERATION, MPC_COST_JERK);
                    self.last_distance_lines = 3;
                }
                2.7
            }
            _ => 1.8,
        }
    }

    fn send_solution(&self, qp_iterations: i32, calculation_time: u64) {
        let _ = self.telemetry.send(MpcTelemetry {
            mpc_id: self.mpc_id,
            x_ego: self.solution.x_ego,
            v_ego: self.solution.v_ego,
            a_ego: self.solution.a_ego,
            x_lead: self.solution.x_l,
            v_lead: self.solution.v_l,
            cost: self.solution.cost,
            a_lead_tau: self.a_lead_tau,
            qp_iterations: qp_iterations.max(0) as u32,
            calculation_time,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Init { distance_cost: f64 },
        InitWithSim { x_lead: f64, v_lead: f64 },
        Run { x_l: f64, v_l: f64, tr: f64 },
    }

    /// Scripted stand-in for the external solver: records every call and
    /// replays a canned solution.
    struct ScriptedSolver {
        calls: Arc<Mutex<Vec<Call>>>,
        next: Arc<Mutex<MpcSolution>>,
    }

    impl MpcSolver for ScriptedSolver {
        fn init(&mut self, _ttc: f64, distance_cost: f64, _accel: f64, _jerk: f64) {
            self.calls.lock().unwrap().push(Call::Init { distance_cost });
        }

        fn init_with_simulation(&mut self, _v: f64, x_lead: f64, v_lead: f64, _a: f64, _tau: f64) {
            self.calls.lock().unwrap().push(Call::InitWithSim { x_lead, v_lead });
        }

        fn run_mpc(
            &mut self,
            state: &MpcState,
            solution: &mut MpcSolution,
            _tau: f64,
            _a_lead: f64,
            tr: f64,
        ) -> i32 {
            self.calls.lock().unwrap().push(Call::Run { x_l: state.x_l, v_l: state.v_l, tr });
            *solution = *self.next.lock().unwrap();
            7
        }
    }

    fn healthy_solution(v: f64) -> MpcSolution {
        MpcSolution {
            x_ego: std::array::from_fn(|i| v * 0.2 * i as f64),
            v_ego: [v; MPC_N],
            a_ego: [0.0; MPC_N],
            x_l: std::array::from_fn(|i| 40.0 + v * 0.2 * i as f64),
            v_l: [v; MPC_N],
            cost: 1.0,
        }
    }

    struct Fixture {
        mpc: LongitudinalMpc,
        calls: Arc<Mutex<Vec<Call>>>,
        next: Arc<Mutex<MpcSolution>>,
        clock: Arc<ManualClock>,
        _rx: mpsc::UnboundedReceiver<MpcTelemetry>,
    }

    fn fixture() -> Fixture {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let next = Arc::new(Mutex::new(healthy_solution(10.0)));
        let clock = Arc::new(ManualClock::new(100.0));
        let (tx, rx) = mpsc::unbounded_channel();
        let solver = ScriptedSolver { calls: calls.clone(), next: next.clone() };
        let mut mpc = LongitudinalMpc::new(1, Box::new(solver), clock.clone(), tx);
        mpc.set_cur_state(10.0, 0.0);
        Fixture { mpc, calls, next, clock, _rx: rx }
    }

    fn ego(v: f64, distance_lines: u8) -> EgoState {
        EgoState { v_ego: v, a_ego: 0.0, distance_lines, ..Default::default() }
    }

    fn lead_at(d_rel: f64) -> LeadTrack {
        LeadTrack {
            status: true,
            d_rel,
            v_lead: 9.0,
            v_lead_k: 9.0,
            a_lead_k: 0.0,
            a_lead_tau: LEAD_ACCEL_TAU,
            ..Default::default()
        }
    }

    fn sim_inits(calls: &Arc<Mutex<Vec<Call>>>) -> usize {
        calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::InitWithSim { .. }))
            .count()
    }

    #[test]
    fn fresh_lead_pulses_once_until_it_jumps() {
        let mut f = fixture();

        f.mpc.update(&ego(10.0, 0), Some(&lead_at(30.0)));
        assert!(f.mpc.new_lead);
        assert!(f.mpc.prev_lead_status);
        assert_eq!(sim_inits(&f.calls), 1);

        // Same lead, slight drift: no re-seed.
        f.mpc.update(&ego(10.0, 0), Some(&lead_at(31.0)));
        assert!(!f.mpc.new_lead);
        assert_eq!(sim_inits(&f.calls), 1);

        // Track jump beyond the hysteresis window: re-seed.
        f.mpc.update(&ego(10.0, 0), Some(&lead_at(45.0)));
        assert!(f.mpc.new_lead);
        assert_eq!(sim_inits(&f.calls), 2);
    }

    #[test]
    fn no_lead_fakes_a_fast_distant_one() {
        let mut f = fixture();
        f.mpc.update(&ego(12.0, 0), None);

        assert!(!f.mpc.prev_lead_status);
        assert!(!f.mpc.new_lead);
        let calls = f.calls.lock().unwrap();
        let run = calls.iter().rev().find(|c| matches!(c, Call::Run { .. })).unwrap();
        match run {
            Call::Run { x_l, v_l, tr } => {
                assert_eq!(*x_l, 50.0);
                assert_eq!(*v_l, 22.0);
                assert_eq!(*tr, 1.8);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn nearly_stopped_lead_is_treated_as_stopped() {
        let mut f = fixture();
        let mut lead = lead_at(20.0);
        lead.v_lead = 0.05;
        lead.a_lead_k = -1.0;
        f.mpc.update(&ego(8.0, 0), Some(&lead));

        let calls = f.calls.lock().unwrap();
        let run = calls.iter().rev().find(|c| matches!(c, Call::Run { .. })).unwrap();
        match run {
            Call::Run { v_l, .. } => assert_eq!(*v_l, 0.0),
            _ => unreachable!(),
        }
    }

    #[test]
    fn profile_switch_reinitializes_with_new_cost() {
        let mut f = fixture();

        f.mpc.update(&ego(15.0, 1), Some(&lead_at(30.0)));
        let close_init = f
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Init { distance_cost } if *distance_cost == 1.0))
            .count();
        assert_eq!(close_init, 1);

        // Repeat: no further re-init while the profile is stable.
        f.mpc.update(&ego(15.0, 1), Some(&lead_at(30.0)));
        let close_init = f
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Init { distance_cost } if *distance_cost == 1.0))
            .count();
        assert_eq!(close_init, 1);

        // Switch close -> far re-inits with the soft cost and TR 2.7.
        f.mpc.update(&ego(15.0, 3), Some(&lead_at(30.0)));
        let calls = f.calls.lock().unwrap();
        assert!(calls.iter().any(|c| matches!(c, Call::Init { distance_cost } if *distance_cost == 0.05)));
        match calls.last().unwrap() {
            Call::Run { tr, .. } => assert_eq!(*tr, 2.7),
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn crawling_speed_pins_the_gap() {
        let mut f = fixture();
        f.mpc.update(&ego(1.0, 3), Some(&lead_at(10.0)));
        let calls = f.calls.lock().unwrap();
        match calls.last().unwrap() {
            Call::Run { tr, .. } => assert_eq!(*tr, 1.8),
            other => panic!("expected run, got {:?}", other),
        }
        // No profile re-init below the speed threshold.
        assert!(!calls.iter().any(|c| matches!(c, Call::Init { distance_cost } if *distance_cost == 0.05)));
    }

    #[test]
    fn dynamic_profile_retunes_only_past_hysteresis() {
        let mut f = fixture();
        f.mpc.set_rel_vel(0.0);
        f.mpc.update(&ego(30.0, 2), Some(&lead_at(40.0)));
        let inits_after_first = f
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Init { .. }))
            .count();

        // Same inputs: cost unchanged, no re-init.
        f.mpc.update(&ego(30.0, 2), Some(&lead_at(40.0)));
        let inits_after_second = f
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Init { .. }))
            .count();
        assert_eq!(inits_after_first, inits_after_second);
    }

    #[test]
    fn nan_solution_resets_state() {
        let mut f = fixture();
        f.mpc.update(&ego(10.0, 0), Some(&lead_at(30.0)));

        let mut bad = healthy_solution(10.0);
        bad.v_ego[5] = f64::NAN;
        *f.next.lock().unwrap() = bad;
        f.clock.advance(0.05);

        f.mpc.update(&ego(11.0, 0), Some(&lead_at(30.5)));
        assert_eq!(f.mpc.v_mpc, 11.0);
        assert_eq!(f.mpc.cur_state.v_ego, 11.0);
        assert_eq!(f.mpc.cur_state.a_ego, 0.0);
        assert!(!f.mpc.prev_lead_status);
        let default_inits = f
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Init { distance_cost } if *distance_cost == MPC_COST_DISTANCE))
            .count();
        // Once at construction, once for the recovery.
        assert_eq!(default_inits, 2);
    }

    #[test]
    fn backwards_solution_without_lead_is_tolerated() {
        let mut f = fixture();
        let mut bad = healthy_solution(5.0);
        bad.v_ego[20] = -0.5;
        *f.next.lock().unwrap() = bad;

        f.mpc.update(&ego(5.0, 0), None);
        // No lead tracked, so a slightly backwards horizon does not reset.
        assert_eq!(f.mpc.v_mpc, 5.0);
        let default_inits = f
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Init { distance_cost } if *distance_cost == MPC_COST_DISTANCE))
            .count();
        assert_eq!(default_inits, 1);
    }

    #[test]
    fn generate_cost_is_monotone_non_increasing() {
        let mut prev = f64::INFINITY;
        let mut d = 0.9;
        while d <= 2.7 {
            let c = generate_cost(d);
            assert!(c <= prev + 1e-12);
            prev = c;
            d += 0.05;
        }
    }
}
