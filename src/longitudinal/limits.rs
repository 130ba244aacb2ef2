// src/longitudinal/limits.rs
//! Speed-indexed acceleration envelopes for cruise control.

use super::interp::interp;
use super::DEG_TO_RAD;

// Lookup tables vs speed to determine min and max accels in cruise.
// These must stay inside what the MPC itself allows.
const A_CRUISE_MIN_BP: [f64; 5] = [0.0, 5.0, 10.0, 20.0, 40.0];
const A_CRUISE_MIN_V: [f64; 5] = [-1.0, -0.8, -0.67, -0.5, -0.30];

// Need fast accel at very low speed for stop and go.
const A_CRUISE_MAX_BP: [f64; 5] = [0.0, 5.0, 10.0, 20.0, 40.0];
const A_CRUISE_MAX_V: [f64; 5] = [1.1, 1.1, 0.8, 0.5, 0.3];
const A_CRUISE_MAX_V_FOLLOWING: [f64; 5] = [1.6, 1.6, 1.2, 0.7, 0.3];

// Total (lateral + longitudinal) acceleration budget vs speed.
const A_TOTAL_MAX_BP: [f64; 3] = [0.0, 25.0, 40.0];
const A_TOTAL_MAX_V: [f64; 3] = [3.0, 3.5, 4.0];

/// Longitudinal acceleration envelope `[min, max]` in m/s^2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelLimits {
    pub min: f64,
    pub max: f64,
}

/// Cruise accel envelope at the given speed. Following a lead allows a
/// stronger launch so the gap does not open at green lights.
pub fn calc_cruise_accel_limits(v_ego: f64, following: bool) -> AccelLimits {
    let min = interp(v_ego, &A_CRUISE_MIN_BP, &A_CRUISE_MIN_V);
    let max = if following {
        interp(v_ego, &A_CRUISE_MAX_BP, &A_CRUISE_MAX_V_FOLLOWING)
    } else {
        interp(v_ego, &A_CRUISE_MAX_BP, &A_CRUISE_MAX_V)
    };
    AccelLimits { min, max }
}

/// Limit longitudinal accel by the lateral acceleration already in use, so
/// the car does not accelerate while losing the target in a turn.
///
/// `angle_steers` and `angle_later` are steering-wheel angles in degrees;
/// `angle_later` is the lateral controller's predicted future angle,
/// pre-multiplied by the steer ratio at the call site.
pub fn limit_accel_in_turns(
    v_ego: f64,
    angle_steers: f64,
    limits: AccelLimits,
    steer_ratio: f64,
    wheelbase: f64,
    angle_later: f64,
) -> AccelLimits {
    let a_total_max = interp(v_ego, &A_TOTAL_MAX_BP, &A_TOTAL_MAX_V);
    let a_y = v_ego.powi(2) * angle_steers.abs() * DEG_TO_RAD / (steer_ratio * wheelbase);
    let a_y2 = v_ego.powi(2) * angle_later.abs() * DEG_TO_RAD / (steer_ratio * wheelbase);

    let max = limits.max.min(a_total_max - a_y).min(a_total_max - a_y2);
    AccelLimits { min: limits.min.min(max), max }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cruise_limits_match_table_anchors() {
        let l = calc_cruise_accel_limits(0.0, false);
        assert_eq!(l.min, -1.0);
        assert_eq!(l.max, 1.1);

        let l = calc_cruise_accel_limits(40.0, false);
        assert_eq!(l.min, -0.30);
        assert_eq!(l.max, 0.3);
    }

    #[test]
    fn following_allows_harder_launch() {
        for v in [0.0, 7.5, 15.0, 30.0] {
            let free = calc_cruise_accel_limits(v, false);
            let following = calc_cruise_accel_limits(v, true);
            assert!(following.max >= free.max);
            assert_eq!(following.min, free.min);
        }
    }

    #[test]
    fn straight_wheel_leaves_limits_untouched() {
        let limits = calc_cruise_accel_limits(20.0, false);
        let out = limit_accel_in_turns(20.0, 0.0, limits, 15.3, 2.7, 0.0);
        assert_eq!(out, limits);
    }

    #[test]
    fn hard_turn_cuts_accel_and_caps_min() {
        let limits = AccelLimits { min: -0.5, max: 0.5 };
        let out = limit_accel_in_turns(30.0, 90.0, limits, 15.3, 2.7, 0.0);
        assert!(out.max < limits.max);
        assert!(out.min <= out.max);
    }

    #[test]
    fn future_angle_is_also_respected() {
        let limits = AccelLimits { min: -0.5, max: 0.5 };
        let now = limit_accel_in_turns(30.0, 0.0, limits, 15.3, 2.7, 0.0);
        let later = limit_accel_in_turns(30.0, 0.0, limits, 15.3, 2.7, 120.0);
        assert!(later.max < now.max);
    }
}
