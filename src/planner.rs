// src/planner.rs
//! Planner orchestrator.
//!
//! Coordinates the longitudinal planning subsystems once per tick:
//! - drain the conflated input channels
//! - refresh the lane path from the vision model
//! - on radar data, smooth the cruise target, run both MPC instances,
//!   arbitrate, and evaluate the collision warning
//! - publish a plan every tick, stale inputs or not, with freshness events
//!   attached for the downstream controller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::clock::MonotonicClock;
use crate::config::{Config, ParamStore, VehicleConfig};
use crate::events::{Event, EventKind};
use crate::longitudinal::fcw::FcwChecker;
use crate::longitudinal::limits::{calc_cruise_accel_limits, limit_accel_in_turns};
use crate::longitudinal::mpc::{LongitudinalMpc, MpcSolver};
use crate::longitudinal::smoother::speed_smoother;
use crate::longitudinal::{
    AWARENESS_DECEL, A_Y_MAX, DT, DT_MPC, KPH_TO_MS, MIN_CAN_SPEED, NO_CURVATURE_SPEED,
};
use crate::messaging::msgs::{
    CarStateMsg, GpsPlanMsg, LatControlMsg, LeadTrack, LongCtrlState, MapDataMsg, MpcTelemetry,
    PlanMsg, PlanSource, RadarError,
};
use crate::messaging::{InputMux, PlanSink, TickInputs};
use crate::path::PathState;

/// Inputs older than this flag their stream as dead.
const FRESHNESS_WINDOW: f64 = 0.5; // s

pub struct Planner {
    clock: Arc<dyn MonotonicClock>,
    vehicle: VehicleConfig,
    params: ParamStore,
    fcw_enabled: bool,
    tick_interval: Duration,

    path: PathState,
    mpc1: LongitudinalMpc,
    mpc2: LongitudinalMpc,
    fcw_checker: FcwChecker,
    mpc_telemetry: UnboundedReceiver<MpcTelemetry>,

    // Latched inputs.
    car_state: CarStateMsg,
    lead_1: LeadTrack,
    lead_2: LeadTrack,
    last_map: Option<MapDataMsg>,
    last_lat: Option<LatControlMsg>,
    last_gps_plan: Option<GpsPlanMsg>,
    radar_errors: Vec<RadarError>,

    // Freshness.
    last_md_ts: u64,
    last_l20_ts: u64,
    last_model_t: f64,
    last_l20_t: f64,
    model_dead: bool,
    radar_dead: bool,

    // Longitudinal state.
    v_acc_start: f64,
    a_acc_start: f64,
    acc_start_time: f64,
    v_acc: f64,
    a_acc: f64,
    v_acc_sol: f64,
    a_acc_sol: f64,
    v_acc_future: f64,
    v_cruise: f64,
    a_cruise: f64,
    v_curvature: f64,
    v_speedlimit: f64,
    decel_for_turn: bool,
    map_valid: bool,
    gps_planner_active: bool,
    longitudinal_plan_source: PlanSource,
    fcw: bool,
}

impl Planner {
    pub fn new(
        config: &Config,
        clock: Arc<dyn MonotonicClock>,
        solver1: Box<dyn MpcSolver>,
        solver2: Box<dyn MpcSolver>,
    ) -> Self {
        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel();
        let mpc1 = LongitudinalMpc::new(1, solver1, clock.clone(), telemetry_tx.clone());
        let mpc2 = LongitudinalMpc::new(2, solver2, clock.clone(), telemetry_tx);
        let acc_start_time = clock.now();

        Self {
            vehicle: config.vehicle.clone(),
            params: config.params.clone(),
            fcw_enabled: config.planner.fcw_enabled,
            tick_interval: Duration::from_millis(config.planner.tick_interval_ms),
            clock,
            path: PathState::default(),
            mpc1,
            mpc2,
            fcw_checker: FcwChecker::new(),
            mpc_telemetry: telemetry_rx,
            car_state: CarStateMsg::default(),
            lead_1: LeadTrack::default(),
            lead_2: LeadTrack::default(),
            last_map: None,
            last_lat: None,
            last_gps_plan: None,
            radar_errors: Vec::new(),
            last_md_ts: 0,
            last_l20_ts: 0,
            last_model_t: 0.0,
            last_l20_t: 0.0,
            model_dead: true,
            radar_dead: true,
            v_acc_start: 0.0,
            a_acc_start: 0.0,
            acc_start_time,
            v_acc: 0.0,
            a_acc: 0.0,
            v_acc_sol: 0.0,
            a_acc_sol: 0.0,
            v_acc_future: 0.0,
            v_cruise: 0.0,
            a_cruise: 0.0,
            v_curvature: NO_CURVATURE_SPEED,
            v_speedlimit: NO_CURVATURE_SPEED,
            decel_for_turn: false,
            map_valid: false,
            gps_planner_active: false,
            longitudinal_plan_source: PlanSource::Cruise,
            fcw: false,
        }
    }

    /// Pick the slowest available trajectory and refresh the future bound.
    fn choose_solution(&mut self, v_cruise_setpoint: f64, enabled: bool) {
        if enabled {
            let mut slowest = (PlanSource::Cruise, self.v_cruise, self.a_cruise);
            if self.mpc1.prev_lead_status && self.mpc1.v_mpc < slowest.1 {
                slowest = (PlanSource::Mpc1, self.mpc1.v_mpc, self.mpc1.a_mpc);
            }
            if self.mpc2.prev_lead_status && self.mpc2.v_mpc < slowest.1 {
                slowest = (PlanSource::Mpc2, self.mpc2.v_mpc, self.mpc2.a_mpc);
            }
            self.longitudinal_plan_source = slowest.0;
            self.v_acc = slowest.1;
            self.a_acc = slowest.2;
        }

        self.v_acc_future = self
            .mpc1
            .v_mpc_future
            .min(self.mpc2.v_mpc_future)
            .min(v_cruise_setpoint);
    }

    /// One planning tick. Always returns a plan.
    pub fn update(&mut self, inputs: TickInputs) -> PlanMsg {
        let cur_time = self.clock.now();

        if let Some(cs) = inputs.car_state {
            self.car_state = cs;
        }
        if let Some(gps) = inputs.gps_planner_plan {
            self.last_gps_plan = Some(gps);
        }
        if let Some(map) = inputs.live_map_data {
            self.last_map = Some(map);
        }
        if let Some(lat) = inputs.lat_control {
            self.last_lat = Some(lat);
        }

        let cs = self.car_state.clone();
        let v_cruise_setpoint = cs.v_cruise_kph * KPH_TO_MS;

        if let Some(md) = &inputs.model {
            self.last_md_ts = md.mono_time;
            self.last_model_t = cur_time;
            self.model_dead = false;

            self.path.update_from_model(md);
            if let Some(gps) = &self.last_gps_plan {
                self.gps_planner_active = gps.valid;
                if gps.valid {
                    self.path.apply_gps_override(gps.poly);
                }
            }
        }

        if let Some(l20) = &inputs.live20 {
            self.last_l20_ts = l20.mono_time;
            self.last_l20_t = cur_time;
            self.radar_dead = false;
            self.radar_errors = l20.radar_errors.clone();

            // Anchor the between-tick extrapolation at this radar tick.
            self.v_acc_start = self.v_acc_sol;
            self.a_acc_start = self.a_acc_sol;
            self.acc_start_time = cur_time;

            self.lead_1 = l20.lead_one.clone();
            self.lead_2 = l20.lead_two.clone();
            self.mpc1.set_rel_vel(self.lead_1.v_rel);
            self.mpc2.set_rel_vel(self.lead_1.v_rel);

            let enabled = matches!(cs.long_ctrl_state, LongCtrlState::Pid | LongCtrlState::Stopping);
            let following = self.lead_1.status
                && self.lead_1.d_rel < 45.0
                && self.lead_1.v_lead_k > cs.ego.v_ego
                && self.lead_1.a_lead_k > 0.0;

            self.update_map_bounds();

            // Leave 1 m/s margin on v_ego to assess if the turn is what
            // limits our speed.
            self.decel_for_turn = self.v_curvature
                < v_cruise_setpoint.min(self.v_speedlimit).min(cs.ego.v_ego + 1.0);
            let v_cruise_setpoint =
                v_cruise_setpoint.min(self.v_curvature).min(self.v_speedlimit);

            if enabled {
                let limits = calc_cruise_accel_limits(cs.ego.v_ego, following);
                let (j_min, j_max) = (limits.min.min(-0.1), limits.max.max(0.1));

                let angle_later = match &self.last_lat {
                    Some(lat) if cs.ego.v_ego > 11.0 => lat.angle_later,
                    _ => 0.0,
                };
                let mut limits = limit_accel_in_turns(
                    cs.ego.v_ego,
                    cs.ego.steering_angle,
                    limits,
                    self.vehicle.steer_ratio,
                    self.vehicle.wheelbase,
                    angle_later * self.vehicle.steer_ratio,
                );

                if cs.force_slow_decel {
                    // Driver distracted: force a smooth deceleration.
                    limits.max = limits.max.min(AWARENESS_DECEL);
                    limits.min = limits.min.min(limits.max);
                }

                if self.decel_for_turn {
                    let dist_to_turn =
                        self.last_map.as_ref().map(|m| m.dist_to_turn).unwrap_or(0.0);
                    let time_to_turn = (dist_to_turn / self.v_cruise.max(1.0)).max(1.0);
                    let required_decel =
                        ((self.v_curvature - self.v_cruise) / time_to_turn).min(0.0);
                    limits.min = limits.min.max(required_decel);
                }

                let (v_cruise, a_cruise) = speed_smoother(
                    self.v_acc_start,
                    self.a_acc_start,
                    v_cruise_setpoint,
                    limits.max,
                    limits.min,
                    j_max,
                    j_min,
                    DT_MPC,
                );
                // Cruise speed can't go negative even while forced to slow.
                self.v_cruise = v_cruise.max(0.0);
                self.a_cruise = a_cruise;
            } else {
                let starting = cs.long_ctrl_state == LongCtrlState::Starting;
                let reset_speed = if starting { MIN_CAN_SPEED } else { cs.ego.v_ego };
                let reset_accel =
                    if starting { self.vehicle.start_accel } else { cs.ego.a_ego.min(0.0) };
                self.v_acc = reset_speed;
                self.a_acc = reset_accel;
                self.v_acc_start = reset_speed;
                self.a_acc_start = reset_accel;
                self.v_cruise = reset_speed;
                self.a_cruise = reset_accel;
                self.v_acc_sol = reset_speed;
                self.a_acc_sol = reset_accel;
            }

            self.mpc1.set_cur_state(self.v_acc_start, self.a_acc_start);
            self.mpc2.set_cur_state(self.v_acc_start, self.a_acc_start);
            self.mpc1.update(&cs.ego, Some(&self.lead_1));
            self.mpc2.update(&cs.ego, Some(&self.lead_2));

            self.choose_solution(v_cruise_setpoint, enabled);

            if self.mpc1.new_lead {
                self.fcw_checker.reset_lead(cur_time);
            }
            let blinkers = cs.ego.left_blinker || cs.ego.right_blinker;
            self.fcw = self.fcw_checker.update(
                self.mpc1.solution(),
                cur_time,
                cs.ego.v_ego,
                cs.ego.a_ego,
                self.lead_1.d_rel,
                self.lead_1.v_lead,
                self.lead_1.a_lead_k,
                self.lead_1.y_rel,
                self.lead_1.v_lat,
                self.lead_1.fcw_hint,
                blinkers,
            ) && !cs.ego.brake_pressed;
            if self.fcw {
                tracing::info!(counters = ?self.fcw_checker.counters(), "FCW triggered");
            }
        }

        if cur_time - self.last_model_t > FRESHNESS_WINDOW {
            self.model_dead = true;
        }
        if cur_time - self.last_l20_t > FRESHNESS_WINDOW {
            self.radar_dead = true;
        }

        self.assemble_plan(&cs, cur_time)
    }

    /// Map-derived upper bounds on the cruise setpoint.
    fn update_map_bounds(&mut self) {
        let Some(map) = self.last_map.clone() else { return };

        self.v_speedlimit = NO_CURVATURE_SPEED;
        self.v_curvature = NO_CURVATURE_SPEED;
        self.map_valid = map.map_valid;
        if !map.map_valid {
            return;
        }

        if map.speed_limit_valid && self.params.limit_set_speed_active() {
            let offset = self.params.speed_limit_offset().unwrap_or(0.0);
            self.v_speedlimit = map.speed_limit + offset;
        }
        if map.curvature_valid {
            let v_curvature = (A_Y_MAX / map.curvature.abs().max(1e-4)).sqrt();
            self.v_curvature = NO_CURVATURE_SPEED.min(v_curvature);
        }
    }

    fn assemble_plan(&mut self, cs: &CarStateMsg, cur_time: f64) -> PlanMsg {
        let mut events = Vec::new();
        if self.model_dead {
            events.push(Event::new(EventKind::ModelCommIssue));
        }
        if self.radar_dead || self.radar_errors.contains(&RadarError::CommIssue) {
            events.push(Event::new(EventKind::RadarCommIssue));
        }
        if self.radar_errors.contains(&RadarError::Fault) {
            events.push(Event::new(EventKind::RadarFault));
        }
        if let Some(lat) = &self.last_lat {
            if lat.mpc_cost > 10_000.0 || lat.mpc_nans {
                events.push(Event::new(EventKind::PlannerError));
            }
        }

        // Trajectory interpolation between MPC ticks, bounded so a stalled
        // radar stream cannot extrapolate far.
        let dt = (cur_time - self.acc_start_time).min(DT_MPC + DT) + DT;
        self.a_acc_sol = self.a_acc_start + (dt / DT_MPC) * (self.a_acc - self.a_acc_start);
        self.v_acc_sol = self.v_acc_start + dt * (self.a_acc_sol + self.a_acc_start) / 2.0;

        PlanMsg {
            md_mono_time: self.last_md_ts,
            l20_mono_time: self.last_l20_ts,
            events,

            lateral_valid: !self.model_dead,
            d_poly: self.path.d_poly,
            lane_width: self.path.lane_width,

            longitudinal_valid: !self.radar_dead,
            v_cruise: self.v_cruise,
            a_cruise: self.a_cruise,
            v_target: self.v_acc_sol,
            a_target: self.a_acc_sol,
            v_target_future: self.v_acc_future,
            has_lead: self.mpc1.prev_lead_status,
            longitudinal_plan_source: self.longitudinal_plan_source,

            has_left_lane: self.path.l_prob > 0.5,
            has_right_lane: self.path.r_prob > 0.5,
            has_left_lane_depart: self.path.l_poly[3] < 1.15 && !cs.ego.left_blinker,
            has_right_lane_depart: self.path.r_poly[3] > -1.15 && !cs.ego.right_blinker,

            gps_planner_active: self.gps_planner_active,
            v_curvature: self.v_curvature,
            decel_for_turn: self.decel_for_turn,
            map_valid: self.map_valid,

            fcw: self.fcw && (self.fcw_enabled || cs.long_ctrl_state != LongCtrlState::Off),
        }
    }

    /// Tick loop: poll inputs, plan, publish. Runs until the process exits.
    pub async fn run(mut self, mut mux: InputMux, sink: Arc<dyn PlanSink>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(tick = ?self.tick_interval, "planner loop started");

        loop {
            interval.tick().await;
            let inputs = mux.poll();
            let plan = self.update(inputs);
            sink.publish_plan(&plan).await;
            while let Ok(telemetry) = self.mpc_telemetry.try_recv() {
                sink.publish_mpc_telemetry(&telemetry).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sim::SimulatedMpc;

    fn planner_with_clock(clock: Arc<ManualClock>) -> Planner {
        Planner::new(
            &Config::default(),
            clock,
            Box::new(SimulatedMpc::new()),
            Box::new(SimulatedMpc::new()),
        )
    }

    #[test]
    fn arbiter_picks_the_slowest_candidate() {
        let clock = Arc::new(ManualClock::new(0.0));
        let mut planner = planner_with_clock(clock);

        planner.v_cruise = 20.0;
        planner.a_cruise = 0.1;
        planner.mpc1.prev_lead_status = true;
        planner.mpc1.v_mpc = 15.0;
        planner.mpc1.a_mpc = -0.5;
        planner.mpc2.prev_lead_status = true;
        planner.mpc2.v_mpc = 17.0;
        planner.mpc2.a_mpc = -0.2;

        planner.choose_solution(25.0, true);
        assert_eq!(planner.longitudinal_plan_source, PlanSource::Mpc1);
        assert_eq!(planner.v_acc, 15.0);
        assert_eq!(planner.a_acc, -0.5);
    }

    #[test]
    fn arbiter_ignores_mpcs_without_a_lead() {
        let clock = Arc::new(ManualClock::new(0.0));
        let mut planner = planner_with_clock(clock);

        planner.v_cruise = 20.0;
        planner.mpc1.prev_lead_status = false;
        planner.mpc1.v_mpc = 1.0;
        planner.mpc2.prev_lead_status = false;
        planner.mpc2.v_mpc = 2.0;

        planner.choose_solution(25.0, true);
        assert_eq!(planner.longitudinal_plan_source, PlanSource::Cruise);
        assert_eq!(planner.v_acc, 20.0);
    }

    #[test]
    fn future_speed_is_bounded_by_the_setpoint() {
        let clock = Arc::new(ManualClock::new(0.0));
        let mut planner = planner_with_clock(clock);

        planner.mpc1.v_mpc_future = 40.0;
        planner.mpc2.v_mpc_future = 35.0;
        planner.choose_solution(25.0, false);
        assert_eq!(planner.v_acc_future, 25.0);

        planner.mpc1.v_mpc_future = 10.0;
        planner.choose_solution(25.0, false);
        assert_eq!(planner.v_acc_future, 10.0);
    }

    #[test]
    fn disabled_arbiter_still_updates_future_but_not_targets() {
        let clock = Arc::new(ManualClock::new(0.0));
        let mut planner = planner_with_clock(clock);

        planner.v_acc = 7.0;
        planner.mpc1.prev_lead_status = true;
        planner.mpc1.v_mpc = 1.0;
        planner.choose_solution(25.0, false);
        assert_eq!(planner.v_acc, 7.0);
        assert_eq!(planner.longitudinal_plan_source, PlanSource::Cruise);
    }

    #[test]
    fn extrapolation_is_capped_between_radar_ticks() {
        let clock = Arc::new(ManualClock::new(10.0));
        let mut planner = planner_with_clock(clock.clone());
        planner.v_acc_start = 10.0;
        planner.a_acc_start = 0.0;
        planner.v_acc = 10.0;
        planner.a_acc = 1.0;
        planner.acc_start_time = 10.0;

        // Long after the anchor, dt saturates at DT_MPC + 2*DT.
        clock.set(15.0);
        let plan = planner.update(TickInputs::default());
        let dt = DT_MPC + DT + DT;
        let a_expected = 0.0 + (dt / DT_MPC) * (1.0 - 0.0);
        assert!((plan.a_target - a_expected).abs() < 1e-9);
        assert!((plan.v_target - (10.0 + dt * (a_expected + 0.0) / 2.0)).abs() < 1e-9);
    }

    #[test]
    fn plan_is_emitted_with_events_when_everything_is_stale() {
        let clock = Arc::new(ManualClock::new(100.0));
        let mut planner = planner_with_clock(clock);

        let plan = planner.update(TickInputs::default());
        assert!(!plan.lateral_valid);
        assert!(!plan.longitudinal_valid);
        let kinds: Vec<_> = plan.events.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EventKind::ModelCommIssue));
        assert!(kinds.contains(&EventKind::RadarCommIssue));
    }

    #[test]
    fn lateral_mpc_divergence_raises_planner_error() {
        let clock = Arc::new(ManualClock::new(100.0));
        let mut planner = planner_with_clock(clock);

        let inputs = TickInputs {
            lat_control: Some(LatControlMsg { angle_later: 0.0, mpc_cost: 20_000.0, mpc_nans: false }),
            ..Default::default()
        };
        let plan = planner.update(inputs);
        assert!(plan.events.iter().any(|e| e.kind == EventKind::PlannerError));
    }
}
