// src/longitudinal/fcw.rs
//! Forward-collision warning.
//!
//! A warning only fires once every gating signal has held long enough: each
//! signal owns a counter that increments while its predicate holds and
//! resets to zero the tick it fails. All counters must reach 10
//! simultaneously before the kinematic trigger is allowed through.

use super::interp::interp;
use super::mpc::MpcSolution;

const MAX_TTC: f64 = 5.0;

// Trigger threshold on planned decel vs lead speed.
const FCW_A_ACT_BP: [f64; 2] = [0.0, 30.0];
const FCW_A_ACT_V: [f64; 2] = [-3.0, -2.0];

/// One counter per gating signal. A fixed struct instead of a keyed map:
/// every counter is updated each tick and the compiler keeps the set closed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FcwCounters {
    pub v_ego: f64,
    pub ttc: f64,
    pub v_lead_max: f64,
    pub v_ego_lead: f64,
    pub lead_seen: f64,
    pub y_lead: f64,
    pub vlat_lead: f64,
    pub blinkers: f64,
}

impl FcwCounters {
    fn armed(&self) -> bool {
        self.v_ego >= 10.0
            && self.ttc >= 10.0
            && self.v_lead_max >= 10.0
            && self.v_ego_lead >= 10.0
            && self.lead_seen >= 10.0
            && self.y_lead >= 10.0
            && self.vlat_lead >= 10.0
            && self.blinkers >= 10.0
    }
}

#[derive(Debug)]
pub struct FcwChecker {
    last_fcw_a: f64,
    v_lead_max: f64,
    lead_seen_t: f64,
    last_fcw_time: f64,
    last_min_a: f64,
    counters: FcwCounters,
}

impl FcwChecker {
    pub fn new() -> Self {
        let mut checker = Self {
            last_fcw_a: 0.0,
            v_lead_max: 0.0,
            lead_seen_t: 0.0,
            last_fcw_time: 0.0,
            last_min_a: 0.0,
            counters: FcwCounters::default(),
        };
        checker.reset_lead(0.0);
        checker
    }

    /// Drop all armed state; called whenever the tracker hands over a fresh
    /// lead.
    pub fn reset_lead(&mut self, cur_time: f64) {
        self.last_fcw_a = 0.0;
        self.v_lead_max = 0.0;
        self.lead_seen_t = cur_time;
        self.last_fcw_time = 0.0;
        self.last_min_a = 0.0;
        self.counters = FcwCounters::default();
    }

    pub fn counters(&self) -> &FcwCounters {
        &self.counters
    }

    /// Time to collision in seconds, clamped to `[0, MAX_TTC]`.
    ///
    /// The closing accel is capped at `v_lead / 2` so a lead close to
    /// standstill cannot dominate the quadratic.
    pub fn calc_ttc(v_ego: f64, a_ego: f64, x_lead: f64, v_lead: f64, a_lead: f64) -> f64 {
        let v_rel = v_ego - v_lead;
        let a_rel = (a_ego - a_lead).min(v_lead / 2.0);

        let delta = v_rel.powi(2) + 2.0 * x_lead * a_rel;
        if delta < 0.1 || delta.sqrt() + v_rel < 0.1 {
            return MAX_TTC;
        }
        (2.0 * x_lead / (delta.sqrt() + v_rel)).min(MAX_TTC)
    }

    /// Returns true on a tick that fires the warning.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        mpc_solution: &MpcSolution,
        cur_time: f64,
        v_ego: f64,
        a_ego: f64,
        x_lead: f64,
        v_lead: f64,
        a_lead: f64,
        y_lead: f64,
        vlat_lead: f64,
        fcw_hint: f64,
        blinkers: bool,
    ) -> bool {
        if fcw_hint <= 0.99 {
            return false;
        }

        self.last_min_a = mpc_solution.a_ego.iter().copied().fold(f64::INFINITY, f64::min);
        self.v_lead_max = self.v_lead_max.max(v_lead);

        let ttc = Self::calc_ttc(v_ego, a_ego, x_lead, v_lead, a_lead);
        let c = &mut self.counters;
        c.v_ego = if v_ego > 5.0 { c.v_ego + 1.0 } else { 0.0 };
        c.ttc = if ttc < 2.5 { c.ttc + 1.0 } else { 0.0 };
        c.v_lead_max = if self.v_lead_max > 2.5 { c.v_lead_max + 1.0 } else { 0.0 };
        c.v_ego_lead = if v_ego > v_lead { c.v_ego_lead + 1.0 } else { 0.0 };
        c.lead_seen += 0.33;
        c.y_lead = if y_lead.abs() < 1.0 { c.y_lead + 1.0 } else { 0.0 };
        c.vlat_lead = if vlat_lead.abs() < 0.4 { c.vlat_lead + 1.0 } else { 0.0 };
        c.blinkers = if !blinkers { c.blinkers + 10.0 / 60.0 } else { 0.0 };

        let a_thr = interp(v_lead, &FCW_A_ACT_BP, &FCW_A_ACT_V);
        let a_delta = mpc_solution.a_ego[..15].iter().copied().fold(f64::INFINITY, f64::min)
            - a_ego.min(0.0);

        let fcw_allowed = self.counters.armed();
        if (self.last_min_a < -3.0 || a_delta < a_thr)
            && fcw_allowed
            && self.last_fcw_time + 5.0 < cur_time
        {
            self.last_fcw_time = cur_time;
            self.last_fcw_a = self.last_min_a;
            return true;
        }
        false
    }
}

impl Default for FcwChecker {
    fn default() -> Self {
        Self::new()
    }
}
