// src/sim/mod.rs
//! Deterministic simulation backend.
//!
//! [`SimulatedMpc`] stands in for the external numerical solver: a
//! constant-time-headway follower integrated over the same 21-node horizon,
//! good enough to exercise every planner path. The scenario feeders produce
//! synthetic ingress streams for the harness and the integration tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::longitudinal::mpc::{MpcSolver, MpcSolution, MpcState};
use crate::longitudinal::{DT_MPC, MPC_N};
use crate::messaging::msgs::{
    CarStateMsg, EgoState, Ingress, LaneLine, LeadTrack, LongCtrlState, MapDataMsg, ModelMsg,
    RadarStateMsg,
};

// Follower gains and envelope for the simulated solver.
const K_GAP: f64 = 0.15;
const K_VEL: f64 = 0.9;
const SIM_A_MIN: f64 = -4.0;
const SIM_A_MAX: f64 = 2.0;
const SIM_JERK: f64 = 3.0; // m/s^3

/// Simple follower standing in for the longitudinal MPC.
pub struct SimulatedMpc {
    distance_cost: f64,
    warm_accel: Option<f64>,
}

impl SimulatedMpc {
    pub fn new() -> Self {
        Self { distance_cost: 0.1, warm_accel: None }
    }
}

impl Default for SimulatedMpc {
    fn default() -> Self {
        Self::new()
    }
}

impl MpcSolver for SimulatedMpc {
    fn init(&mut self, _ttc_cost: f64, distance_cost: f64, _accel_cost: f64, _jerk_cost: f64) {
        self.distance_cost = distance_cost;
        self.warm_accel = None;
    }

    fn init_with_simulation(
        &mut self,
        _v_ego: f64,
        _x_lead: f64,
        _v_lead: f64,
        a_lead: f64,
        _a_lead_tau: f64,
    ) {
        // Warm start: the next solve opens from the lead's accel instead of
        // the planner anchor.
        self.warm_accel = Some(a_lead.clamp(SIM_A_MIN, SIM_A_MAX));
    }

    fn run_mpc(
        &mut self,
        state: &MpcState,
        solution: &mut MpcSolution,
        a_lead_tau: f64,
        a_lead: f64,
        tr: f64,
    ) -> i32 {
        let mut x_e = state.x_ego;
        let mut v_e = state.v_ego.max(0.0);
        let mut a_e = self.warm_accel.take().unwrap_or(state.a_ego);
        let mut x_l = state.x_l;
        let mut v_l = state.v_l.max(0.0);
        let mut a_l = a_lead;
        let mut cost = 0.0;

        for i in 0..MPC_N {
            solution.x_ego[i] = x_e;
            solution.v_ego[i] = v_e;
            solution.a_ego[i] = a_e;
            solution.x_l[i] = x_l;
            solution.v_l[i] = v_l;

            let gap = x_l - x_e;
            let desired_gap = 4.0 + tr * v_e;
            cost += self.distance_cost * (gap - desired_gap).powi(2);

            let a_cmd = (K_GAP * (gap - desired_gap) + K_VEL * (v_l - v_e))
                .clamp(SIM_A_MIN, SIM_A_MAX);
            let jerk_step = SIM_JERK * DT_MPC;
            a_e = a_cmd.clamp(a_e - jerk_step, a_e + jerk_step);

            let v_next = (v_e + a_e * DT_MPC).max(0.0);
            x_e += (v_e + v_next) / 2.0 * DT_MPC;
            v_e = v_next;

            // Lead accel decays with its time constant.
            a_l *= (-DT_MPC / a_lead_tau.max(1e-3)).exp();
            let v_l_next = (v_l + a_l * DT_MPC).max(0.0);
            x_l += (v_l + v_l_next) / 2.0 * DT_MPC;
            v_l = v_l_next;
        }

        solution.cost = cost;
        8
    }
}

/// Built-in synthetic scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Free road, setpoint 30 m/s.
    SteadyCruise,
    /// Stationary lead 10 m ahead, ego crawling at 5 m/s.
    StationaryLead,
    /// Lead braking hard at -4 m/s^2 with the tracker flagging it.
    BrakingLead,
    /// Mapped 0.01 rad/m curve ahead with a 40 m/s setpoint.
    TightCurve,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 4] = [
        ScenarioKind::SteadyCruise,
        ScenarioKind::StationaryLead,
        ScenarioKind::BrakingLead,
        ScenarioKind::TightCurve,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::SteadyCruise => "steady-cruise",
            ScenarioKind::StationaryLead => "stationary-lead",
            ScenarioKind::BrakingLead => "braking-lead",
            ScenarioKind::TightCurve => "tight-curve",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

/// Produces one tick's worth of ingress messages at 20 Hz.
pub struct ScenarioFeeder {
    kind: ScenarioKind,
    rng: StdRng,
    tick: u64,
    v_lead: f64,
}

impl ScenarioFeeder {
    pub fn new(kind: ScenarioKind, seed: u64) -> Self {
        let v_lead = match kind {
            ScenarioKind::BrakingLead => 18.0,
            _ => 0.0,
        };
        Self { kind, rng: StdRng::seed_from_u64(seed), tick: 0, v_lead }
    }

    fn model(&self) -> ModelMsg {
        ModelMsg {
            mono_time: self.tick * 50_000_000,
            left_lane: LaneLine { poly: [0.0, 0.0, 0.0, 1.85], prob: 0.9 },
            right_lane: LaneLine { poly: [0.0, 0.0, 0.0, -1.85], prob: 0.9 },
            path: LaneLine { poly: [0.0; 4], prob: 0.8 },
            lane_width: 3.7,
        }
    }

    fn car_state(&self) -> CarStateMsg {
        let (v_ego, v_cruise_kph, distance_lines) = match self.kind {
            ScenarioKind::SteadyCruise => (29.0, 108.0, 2),
            ScenarioKind::StationaryLead => (5.0, 50.0, 2),
            ScenarioKind::BrakingLead => (20.0, 90.0, 2),
            ScenarioKind::TightCurve => (20.0, 144.0, 2),
        };
        CarStateMsg {
            ego: EgoState { v_ego, distance_lines, ..Default::default() },
            long_ctrl_state: LongCtrlState::Pid,
            v_cruise_kph,
            force_slow_decel: false,
        }
    }

    fn radar(&mut self) -> RadarStateMsg {
        let jitter: f64 = self.rng.random_range(-0.05..0.05);
        let lead_one = match self.kind {
            ScenarioKind::SteadyCruise | ScenarioKind::TightCurve => LeadTrack::default(),
            ScenarioKind::StationaryLead => LeadTrack {
                status: true,
                d_rel: 10.0 + jitter,
                v_lead: 0.0,
                v_lead_k: 0.0,
                a_lead_k: 0.0,
                a_lead_tau: 1.5,
                v_rel: -5.0,
                ..Default::default()
            },
            ScenarioKind::BrakingLead => LeadTrack {
                status: true,
                d_rel: 15.0 + jitter,
                v_lead: self.v_lead,
                v_lead_k: self.v_lead,
                a_lead_k: -4.0,
                a_lead_tau: 1.5,
                v_rel: self.v_lead - 20.0,
                fcw_hint: 1.0,
                ..Default::default()
            },
        };
        RadarStateMsg {
            mono_time: self.tick * 50_000_000,
            lead_one,
            lead_two: LeadTrack::default(),
            radar_errors: Vec::new(),
        }
    }

    fn map(&self) -> Option<MapDataMsg> {
        match self.kind {
            ScenarioKind::TightCurve => Some(MapDataMsg {
                map_valid: true,
                speed_limit_valid: false,
                speed_limit: 0.0,
                curvature_valid: true,
                curvature: 0.01,
                dist_to_turn: 200.0,
            }),
            _ => None,
        }
    }

    /// Messages for the next 50 ms tick.
    pub fn next_tick(&mut self) -> Vec<Ingress> {
        let mut out = vec![
            Ingress::CarState(self.car_state()),
            Ingress::Model(self.model()),
            Ingress::Live20(self.radar()),
        ];
        if let Some(map) = self.map() {
            out.push(Ingress::LiveMapData(map));
        }

        if self.kind == ScenarioKind::BrakingLead {
            self.v_lead = (self.v_lead - 4.0 * 0.05).max(0.0);
        }
        self.tick += 1;
        out
    }
}
