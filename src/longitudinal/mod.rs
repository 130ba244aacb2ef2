// src/longitudinal/mod.rs

// --- Submodules ---
pub mod fcw;
pub mod interp;
pub mod limits;
pub mod mpc;
pub mod smoother;
pub mod time_gap;

// --- Re-exports for external use ---
pub use fcw::FcwChecker;
pub use mpc::{LongitudinalMpc, MpcSolution, MpcSolver, MpcState};
pub use smoother::speed_smoother;

// Unit conversions
pub const MPH_TO_MS: f64 = 0.44704;
pub const KPH_TO_MS: f64 = 1.0 / 3.6;
pub const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

// Planner timing. The MPC horizon is sampled at 0.2 s; the tick loop runs
// much faster and extrapolates between MPC updates.
pub const DT: f64 = 0.01;
pub const DT_MPC: f64 = 0.2;

/// Nodes along the MPC horizon (4 s at `DT_MPC`).
pub const MPC_N: usize = 21;

/// Max lateral acceleration, used to calculate how much to slow down in turns.
pub const A_Y_MAX: f64 = 1.85; // m/s^2

/// Sentinel speed bound when no map constraint applies.
pub const NO_CURVATURE_SPEED: f64 = 200.0 * MPH_TO_MS;

/// Smooth decel applied when the driver is distracted.
pub const AWARENESS_DECEL: f64 = -0.2; // m/s^2

/// Lowest speed the downstream controller can command on CAN.
pub const MIN_CAN_SPEED: f64 = 0.3; // m/s

/// Default decay time constant for lead acceleration.
pub const LEAD_ACCEL_TAU: f64 = 1.5; // s

// Default MPC cost weights. Distance cost is retuned at runtime from the
// selected follow profile; the others stay fixed.
pub const MPC_COST_TTC: f64 = 5.0;
pub const MPC_COST_DISTANCE: f64 = 0.1;
pub const MPC_COST_ACCELERATION: f64 = 10.0;
pub const MPC_COST_JERK: f64 = 20.0;
