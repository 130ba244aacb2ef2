// src/path.rs
//! Lane polynomial pass-through.
//!
//! The planner does no lateral planning of its own: lane polynomials come in
//! from the vision model, get blended into a desired path, and go straight
//! back out on the plan. A valid GPS plan overrides the whole set.

use crate::messaging::msgs::ModelMsg;

#[derive(Debug, Clone)]
pub struct PathState {
    /// Desired path published on the plan.
    pub d_poly: [f64; 4],
    pub l_poly: [f64; 4],
    pub r_poly: [f64; 4],
    /// Model's own predicted path.
    pub p_poly: [f64; 4],
    /// Blended lane center.
    pub c_poly: [f64; 4],
    pub l_prob: f64,
    pub r_prob: f64,
    pub c_prob: f64,
    pub lane_width: f64,
}

impl Default for PathState {
    fn default() -> Self {
        Self {
            d_poly: [0.0; 4],
            l_poly: [0.0; 4],
            r_poly: [0.0; 4],
            p_poly: [0.0; 4],
            c_poly: [0.0; 4],
            l_prob: 0.0,
            r_prob: 0.0,
            c_prob: 0.0,
            lane_width: 3.7,
        }
    }
}

impl PathState {
    /// Refresh from a model frame: center each lane line by half a lane
    /// width, blend them by their probabilities, then mix with the model
    /// path by the combined lane confidence.
    pub fn update_from_model(&mut self, model: &ModelMsg) {
        self.l_poly = model.left_lane.poly;
        self.r_poly = model.right_lane.poly;
        self.p_poly = model.path.poly;
        self.l_prob = model.left_lane.prob;
        self.r_prob = model.right_lane.prob;
        self.c_prob = model.path.prob;
        if model.lane_width > 0.0 {
            self.lane_width = model.lane_width;
        }

        let half = self.lane_width / 2.0;
        let weight_sum = (self.l_prob + self.r_prob).max(1e-6);
        for i in 0..4 {
            let mut l = self.l_poly[i];
            let mut r = self.r_poly[i];
            if i == 3 {
                l -= half;
                r += half;
            }
            self.c_poly[i] = (l * self.l_prob + r * self.r_prob) / weight_sum;
        }

        let lr_prob = self.l_prob + self.r_prob - self.l_prob * self.r_prob;
        for i in 0..4 {
            self.d_poly[i] = lr_prob * self.c_poly[i] + (1.0 - lr_prob) * self.p_poly[i];
        }
    }

    /// Replace every polynomial slot with the GPS plan's. All three slots are
    /// aliased on purpose: downstream consumers read different slots and the
    /// override must win everywhere.
    pub fn apply_gps_override(&mut self, poly: [f64; 4]) {
        self.d_poly = poly;
        self.p_poly = poly;
        self.c_poly = poly;
        self.l_prob = 0.0;
        self.r_prob = 0.0;
        self.c_prob = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::msgs::LaneLine;

    fn model(l_prob: f64, r_prob: f64) -> ModelMsg {
        ModelMsg {
            mono_time: 0,
            left_lane: LaneLine { poly: [0.0, 0.0, 0.0, 1.8], prob: l_prob },
            right_lane: LaneLine { poly: [0.0, 0.0, 0.0, -1.8], prob: r_prob },
            path: LaneLine { poly: [0.0, 0.0, 0.0, 0.3], prob: 0.9 },
            lane_width: 3.6,
        }
    }

    #[test]
    fn confident_lanes_center_the_path() {
        let mut path = PathState::default();
        path.update_from_model(&model(1.0, 1.0));
        // Symmetric lane lines centered at zero offset.
        assert!(path.d_poly[3].abs() < 1e-9);
        assert_eq!(path.lane_width, 3.6);
    }

    #[test]
    fn no_lanes_falls_back_to_model_path() {
        let mut path = PathState::default();
        path.update_from_model(&model(0.0, 0.0));
        assert!((path.d_poly[3] - 0.3).abs() < 1e-9);
    }

    #[test]
    fn gps_override_aliases_every_slot() {
        let mut path = PathState::default();
        path.update_from_model(&model(1.0, 1.0));
        path.apply_gps_override([0.1, 0.2, 0.3, 0.4]);

        assert_eq!(path.d_poly, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(path.p_poly, path.d_poly);
        assert_eq!(path.c_poly, path.d_poly);
        assert_eq!((path.l_prob, path.c_prob, path.r_prob), (0.0, 1.0, 0.0));
    }
}
