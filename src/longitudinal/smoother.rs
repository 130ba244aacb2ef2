// src/longitudinal/smoother.rs
//! Accel- and jerk-limited speed profile generator for plain cruise.
//!
//! One call advances the profile a single MPC timestep: it picks the
//! acceleration that closes on the target speed as fast as the jerk and
//! accel envelopes allow, while staying on a profile that can still ramp its
//! acceleration back to zero exactly at the target (no overshoot).

/// Advance `(v_ego, a_ego)` one step of `dt` seconds toward `v_target`.
///
/// Returns the new `(v, a)`. The result satisfies `a_min <= a <= a_max` and
/// `|a - a_ego| <= max(|j_min|, |j_max|) * dt` whenever the accel and jerk
/// envelopes are mutually consistent; the accel envelope wins if they are
/// not (e.g. a sudden forced-decel clamp).
#[allow(clippy::too_many_arguments)]
pub fn speed_smoother(
    v_ego: f64,
    a_ego: f64,
    v_target: f64,
    a_max: f64,
    a_min: f64,
    j_max: f64,
    j_min: f64,
    dt: f64,
) -> (f64, f64) {
    let dv = v_target - v_ego;

    // Acceleration that would land exactly on the target this step, under
    // trapezoidal integration of accel over the step.
    let a_required = 2.0 * dv / dt - a_ego;

    // Quadratic feasibility: unwinding accel `a` to zero at the jerk limit
    // consumes `a^2/(2j) + a*dt/2` of speed headroom under trapezoidal
    // stepping, so cap the request by the positive root of that quadratic.
    let a_envelope = if dv >= 0.0 {
        let j = j_min.abs();
        -j * dt / 2.0 + ((j * dt / 2.0).powi(2) + 2.0 * j * dv).sqrt()
    } else {
        let j = j_max.abs();
        j * dt / 2.0 - ((j * dt / 2.0).powi(2) + 2.0 * j * (-dv)).sqrt()
    };

    let a_desired = if dv >= 0.0 {
        a_required.min(a_envelope)
    } else {
        a_required.max(a_envelope)
    };

    // Jerk clamp first, accel clamp last: when a forced clamp moves the
    // accel envelope discontinuously, the envelope still must hold.
    let a_sol = a_desired
        .max(a_ego + dt * j_min)
        .min(a_ego + dt * j_max)
        .max(a_min)
        .min(a_max);

    let v_sol = v_ego + dt * (a_ego + a_sol) / 2.0;
    (v_sol, a_sol)
}
