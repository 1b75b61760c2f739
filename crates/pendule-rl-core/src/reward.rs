//! Reward shaping for the cart-pole

use serde::{Deserialize, Serialize};

/// Angular half-width of the sparse reward window (30°)
pub const SPARSE_ANGLE_WINDOW: f64 = std::f64::consts::PI * 30.0 / 180.0;

/// Position half-width of the sparse reward window (m)
pub const SPARSE_POSITION_WINDOW: f64 = 0.2;

/// Reward signal selected at plant construction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewardKind {
    /// `(1 - cos θ - kx·x²) / 2`
    Dense {
        /// Weight of the position term
        kx: f64,
    },
    /// 1 inside the angle/position window, 0 elsewhere
    Sparse,
}

impl Default for RewardKind {
    fn default() -> Self {
        Self::Dense { kx: 5.0 }
    }
}

/// Per-step reward, before any rail penalty
#[must_use]
pub fn reward(kind: RewardKind, x: f64, cos_theta: f64, sin_theta: f64) -> f64 {
    match kind {
        RewardKind::Dense { kx } => (1.0 - cos_theta - kx * x * x) / 2.0,
        RewardKind::Sparse => {
            let inside = sin_theta.atan2(cos_theta).abs() < SPARSE_ANGLE_WINDOW
                && x.abs() < SPARSE_POSITION_WINDOW;
            if inside {
                1.0
            } else {
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn dense_reward_decreases_with_distance(
            x in 0.0f64..0.36,
            dx in 1e-6f64..0.1,
            theta in -3.1f64..3.1,
        ) {
            let kind = RewardKind::default();
            let (c, s) = (theta.cos(), theta.sin());
            prop_assert!(reward(kind, x + dx, c, s) < reward(kind, x, c, s));
            prop_assert!(reward(kind, -(x + dx), c, s) < reward(kind, -x, c, s));
        }

        #[test]
        fn dense_reward_decreases_with_cosine(
            x in -0.36f64..0.36,
            c in -1.0f64..0.99,
            dc in 1e-6f64..0.01,
        ) {
            let kind = RewardKind::default();
            prop_assert!(reward(kind, x, c + dc, 0.0) < reward(kind, x, c, 0.0));
        }
    }

    #[test]
    fn test_sparse_window() {
        let inside = reward(RewardKind::Sparse, 0.1, 0.2f64.cos(), 0.2f64.sin());
        let outside_angle = reward(RewardKind::Sparse, 0.1, 1.0f64.cos(), 1.0f64.sin());
        let outside_x = reward(RewardKind::Sparse, 0.25, 1.0, 0.0);
        assert_eq!(inside, 1.0);
        assert_eq!(outside_angle, 0.0);
        assert_eq!(outside_x, 0.0);
    }

    #[test]
    fn test_dense_extremes() {
        let kind = RewardKind::Dense { kx: 5.0 };
        assert_eq!(reward(kind, 0.0, 1.0, 0.0), 0.0);
        assert_eq!(reward(kind, 0.0, -1.0, 0.0), 1.0);
    }
}
