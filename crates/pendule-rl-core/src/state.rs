//! Cart-pole state representation

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Observed cart-pole state
///
/// The pole angle is carried as `(cos θ, sin θ)` so the state is continuous
/// across the ±π boundary. θ = 0 is the rest configuration of the pendulum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CartPoleState {
    /// Cart position (m)
    pub x: f64,
    /// Cart velocity (m/s)
    pub x_dot: f64,
    /// Cosine of the pole angle
    pub cos_theta: f64,
    /// Sine of the pole angle
    pub sin_theta: f64,
    /// Pole angular velocity (rad/s)
    pub theta_dot: f64,
}

impl Default for CartPoleState {
    fn default() -> Self {
        Self::from_angle(0.0, 0.0, 0.0, 0.0)
    }
}

impl CartPoleState {
    /// Number of features in the observation vector
    pub const DIM: usize = 5;

    /// Build a state from an explicit angle
    #[must_use]
    pub fn from_angle(x: f64, x_dot: f64, theta: f64, theta_dot: f64) -> Self {
        Self {
            x,
            x_dot,
            cos_theta: theta.cos(),
            sin_theta: theta.sin(),
            theta_dot,
        }
    }

    /// Pole angle in `(-π, π]`
    #[must_use]
    pub fn theta(&self) -> f64 {
        self.sin_theta.atan2(self.cos_theta)
    }

    /// `cos² + sin²`, which stays at 1 for every state produced by a plant
    #[must_use]
    pub fn trig_norm(&self) -> f64 {
        self.cos_theta.mul_add(self.cos_theta, self.sin_theta * self.sin_theta)
    }

    /// Whether every component is finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.features().iter().all(|v| v.is_finite())
    }

    /// Copy with the cart position clamped to `[-limit, limit]`
    #[must_use]
    pub fn with_clamped_x(mut self, limit: f64) -> Self {
        self.x = self.x.clamp(-limit, limit);
        self
    }

    /// Feature vector `[x, x_dot, cos θ, sin θ, θ_dot]`
    #[must_use]
    pub fn features(&self) -> [f64; Self::DIM] {
        [self.x, self.x_dot, self.cos_theta, self.sin_theta, self.theta_dot]
    }

    /// Feature vector as an `ndarray` array
    #[must_use]
    pub fn to_array(&self) -> Array1<f64> {
        Array1::from(self.features().to_vec())
    }
}

impl From<CartPoleState> for [f64; CartPoleState::DIM] {
    fn from(state: CartPoleState) -> Self {
        state.features()
    }
}

/// Reconstructs the accumulated multi-turn angle from consecutive
/// `(cos θ, sin θ)` samples.
///
/// For display only; plants never integrate this value.
#[derive(Debug, Clone, Default)]
pub struct AngleUnwrapper {
    previous: Option<(f64, f64)>,
    total: f64,
}

impl AngleUnwrapper {
    /// Create an unwrapper with no history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next sample and get the accumulated angle
    ///
    /// Assumes less than half a turn between consecutive samples.
    pub fn update(&mut self, cos_theta: f64, sin_theta: f64) -> f64 {
        match self.previous {
            None => self.total = sin_theta.atan2(cos_theta),
            Some((c0, s0)) => {
                // angle of the rotation taking the previous sample to this one
                let delta =
                    (sin_theta * c0 - cos_theta * s0).atan2(cos_theta * c0 + sin_theta * s0);
                self.total += delta;
            }
        }
        self.previous = Some((cos_theta, sin_theta));
        self.total
    }

    /// Feed a state
    pub fn update_state(&mut self, state: &CartPoleState) -> f64 {
        self.update(state.cos_theta, state.sin_theta)
    }

    /// Current accumulated angle
    #[must_use]
    pub fn angle(&self) -> f64 {
        self.total
    }

    /// Forget history
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
