// src/messaging/msgs.rs
//! Wire schema for every planner endpoint. Upstream daemons publish tagged
//! records; decoding is validated here at ingress so the planner core never
//! touches loosely-typed data.

use serde::{Deserialize, Serialize};

use crate::events::Event;
use crate::longitudinal::MPC_N;

/// Car state sampled by the vehicle interface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EgoState {
    pub v_ego: f64,
    pub a_ego: f64,
    /// Steering wheel angle, degrees.
    pub steering_angle: f64,
    pub brake_pressed: bool,
    pub left_blinker: bool,
    pub right_blinker: bool,
    /// Driver-selected follow profile: 0 unset, 1 close, 2 dynamic, 3 far.
    pub distance_lines: u8,
}

/// Longitudinal controller state, mirrored from the control daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LongCtrlState {
    #[default]
    Off,
    Pid,
    Stopping,
    Starting,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CarStateMsg {
    pub ego: EgoState,
    pub long_ctrl_state: LongCtrlState,
    /// Driver cruise setpoint, km/h.
    pub v_cruise_kph: f64,
    /// Driver-distracted cue from the monitoring stack.
    pub force_slow_decel: bool,
}

/// One radar track hypothesis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadTrack {
    pub status: bool,
    /// Relative distance, m.
    pub d_rel: f64,
    pub v_lead: f64,
    /// Kalman-filtered lead speed, m/s.
    pub v_lead_k: f64,
    /// Kalman-filtered lead acceleration, m/s^2.
    pub a_lead_k: f64,
    /// Lead accel decay time constant, s.
    pub a_lead_tau: f64,
    pub v_rel: f64,
    pub y_rel: f64,
    pub v_lat: f64,
    /// Tracker confidence that this track warrants a collision warning.
    pub fcw_hint: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RadarError {
    CommIssue,
    Fault,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RadarStateMsg {
    pub mono_time: u64,
    pub lead_one: LeadTrack,
    pub lead_two: LeadTrack,
    #[serde(default)]
    pub radar_errors: Vec<RadarError>,
}

/// A lane line or path polynomial with its model probability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaneLine {
    pub poly: [f64; 4],
    pub prob: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelMsg {
    pub mono_time: u64,
    pub left_lane: LaneLine,
    pub right_lane: LaneLine,
    pub path: LaneLine,
    pub lane_width: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapDataMsg {
    pub map_valid: bool,
    pub speed_limit_valid: bool,
    /// m/s.
    pub speed_limit: f64,
    pub curvature_valid: bool,
    /// 1/m, signed.
    pub curvature: f64,
    /// Distance to the next turn, m.
    pub dist_to_turn: f64,
}

/// Lateral controller hint plus its MPC health, used for the turn lookahead
/// and the plannerError event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatControlMsg {
    /// Predicted future steering angle, degrees.
    pub angle_later: f64,
    pub mpc_cost: f64,
    pub mpc_nans: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpsPlanMsg {
    pub valid: bool,
    pub poly: [f64; 4],
}

/// Tagged ingress envelope carried over the byte transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "camelCase")]
pub enum Ingress {
    CarState(CarStateMsg),
    Model(ModelMsg),
    Live20(RadarStateMsg),
    LiveMapData(MapDataMsg),
    LatControl(LatControlMsg),
    GpsPlannerPlan(GpsPlanMsg),
}

/// Arbitration result naming whose trajectory the targets came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    #[default]
    Cruise,
    Mpc1,
    Mpc2,
}

/// The plan published every tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanMsg {
    pub md_mono_time: u64,
    pub l20_mono_time: u64,
    pub events: Vec<Event>,

    // Lateral pass-through.
    pub lateral_valid: bool,
    pub d_poly: [f64; 4],
    pub lane_width: f64,

    // Longitudinal targets.
    pub longitudinal_valid: bool,
    pub v_cruise: f64,
    pub a_cruise: f64,
    pub v_target: f64,
    pub a_target: f64,
    pub v_target_future: f64,
    pub has_lead: bool,
    pub longitudinal_plan_source: PlanSource,

    // Lane departure.
    pub has_left_lane: bool,
    pub has_right_lane: bool,
    pub has_left_lane_depart: bool,
    pub has_right_lane_depart: bool,

    // Map / GPS.
    pub gps_planner_active: bool,
    pub v_curvature: f64,
    pub decel_for_turn: bool,
    pub map_valid: bool,

    pub fcw: bool,
}

/// Per-tick MPC solution published for tooling and log analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpcTelemetry {
    pub mpc_id: u8,
    pub x_ego: [f64; MPC_N],
    pub v_ego: [f64; MPC_N],
    pub a_ego: [f64; MPC_N],
    pub x_lead: [f64; MPC_N],
    pub v_lead: [f64; MPC_N],
    pub cost: f64,
    pub a_lead_tau: f64,
    pub qp_iterations: u32,
    /// Solver wall time, ns.
    pub calculation_time: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_round_trips_with_channel_tag() {
        let msg = Ingress::Live20(RadarStateMsg {
            mono_time: 42,
            lead_one: LeadTrack { status: true, d_rel: 30.0, ..Default::default() },
            lead_two: LeadTrack::default(),
            radar_errors: vec![RadarError::CommIssue],
        });
        let line = serde_json::to_string(&msg).unwrap();
        assert!(line.contains("\"channel\":\"live20\""));

        match serde_json::from_str::<Ingress>(&line).unwrap() {
            Ingress::Live20(r) => {
                assert_eq!(r.mono_time, 42);
                assert!(r.lead_one.status);
                assert_eq!(r.radar_errors, vec![RadarError::CommIssue]);
            }
            other => panic!("wrong channel: {:?}", other),
        }
    }

    #[test]
    fn unknown_channel_is_a_decode_error() {
        let line = r#"{"channel":"bogus","x":1}"#;
        assert!(serde_json::from_str::<Ingress>(line).is_err());
    }

    #[test]
    fn long_ctrl_state_uses_lowercase_names() {
        let json = serde_json::to_string(&LongCtrlState::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
    }
}
