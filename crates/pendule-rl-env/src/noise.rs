//! Process noise, measurement noise and velocity filtering
//!
//! The stage runs after the integrator. Process noise perturbs the state the
//! plant keeps; measurement noise and the low-pass filters only touch what
//! the caller observes.

use rand::Rng;
use serde::{Deserialize, Serialize};

use pendule_rl_core::{CartPoleState, PlantError, Result};

use crate::params::gaussian;

/// Ratio between the noise on cart channels and pole channels
const CART_NOISE_SCALE: f64 = 6e-3;

/// Low-pass filter settings for the two velocity channels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Whether observed velocities are filtered
    pub enabled: bool,
    /// Butterworth order, even
    pub order: usize,
    /// Cart velocity cutoff, normalized to Nyquist
    pub x_dot_cutoff: f64,
    /// Angular velocity cutoff, normalized to Nyquist
    pub theta_dot_cutoff: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            order: 4,
            x_dot_cutoff: 0.5,
            theta_dot_cutoff: 0.9,
        }
    }
}

/// Gaussian noise and filtering applied after each control period
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseModel {
    /// Process noise std on the angle (rad)
    pub kp: f64,
    /// Measurement noise std on the angle (rad)
    pub km: f64,
    /// Velocity filtering
    pub filter: FilterConfig,
}

impl NoiseModel {
    /// Check noise levels and filter design parameters
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("kp", self.kp), ("km", self.km)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(PlantError::Config(format!("{name} must be >= 0, got {value}")));
            }
        }
        if self.filter.enabled {
            ButterworthLowpass::design(self.filter.order, self.filter.x_dot_cutoff)?;
            ButterworthLowpass::design(self.filter.order, self.filter.theta_dot_cutoff)?;
        }
        Ok(())
    }
}

/// One biquad in transposed direct form II
#[derive(Debug, Clone, Copy, PartialEq)]
struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
    z: [f64; 2],
}

impl Biquad {
    fn process(&mut self, input: f64) -> f64 {
        let output = self.b[0] * input + self.z[0];
        self.z[0] = self.b[1] * input - self.a[0] * output + self.z[1];
        self.z[1] = self.b[2] * input - self.a[1] * output;
        output
    }
}

/// Digital Butterworth low-pass as a cascade of second-order sections
#[derive(Debug, Clone, PartialEq)]
pub struct ButterworthLowpass {
    sections: Vec<Biquad>,
}

impl ButterworthLowpass {
    /// Design a filter of even `order` with `cutoff` normalized to Nyquist
    ///
    /// Analog prototype sections are mapped with the bilinear transform
    /// after pre-warping the cutoff.
    #[allow(clippy::cast_precision_loss)]
    pub fn design(order: usize, cutoff: f64) -> Result<Self> {
        if order == 0 || order % 2 != 0 {
            return Err(PlantError::Config(format!(
                "filter order must be even and positive, got {order}"
            )));
        }
        if !(cutoff > 0.0 && cutoff < 1.0) {
            return Err(PlantError::Config(format!(
                "filter cutoff must lie in (0, 1), got {cutoff}"
            )));
        }

        let k = 4.0;
        let wc = k * (std::f64::consts::FRAC_PI_2 * cutoff).tan();
        let n = order as f64;
        let sections = (1..=order / 2)
            .map(|i| {
                let angle = std::f64::consts::PI * (2.0 * i as f64 + n - 1.0) / (2.0 * n);
                let a1 = -2.0 * angle.cos() * wc;
                let a0 = wc * wc;
                let d0 = k * k + a1 * k + a0;
                let d1 = 2.0 * a0 - 2.0 * k * k;
                let d2 = k * k - a1 * k + a0;
                Biquad {
                    b: [a0 / d0, 2.0 * a0 / d0, a0 / d0],
                    a: [d1 / d0, d2 / d0],
                    z: [0.0; 2],
                }
            })
            .collect();

        Ok(Self { sections })
    }

    /// Filter one sample
    pub fn filter(&mut self, input: f64) -> f64 {
        self.sections
            .iter_mut()
            .fold(input, |signal, section| section.process(signal))
    }

    /// Zero the internal state
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.z = [0.0; 2];
        }
    }
}

/// Noise and filter pipeline with persistent filter state
#[derive(Debug, Clone)]
pub struct NoiseFilterStage {
    model: NoiseModel,
    period: f64,
    filters: Option<(ButterworthLowpass, ButterworthLowpass)>,
}

impl NoiseFilterStage {
    /// Build the stage for a control period of `period` seconds
    pub fn new(model: NoiseModel, period: f64) -> Result<Self> {
        model.validate()?;
        let filters = if model.filter.enabled {
            Some((
                ButterworthLowpass::design(model.filter.order, model.filter.x_dot_cutoff)?,
                ButterworthLowpass::design(model.filter.order, model.filter.theta_dot_cutoff)?,
            ))
        } else {
            None
        };
        Ok(Self {
            model,
            period,
            filters,
        })
    }

    /// Noise configuration
    #[must_use]
    pub fn model(&self) -> &NoiseModel {
        &self.model
    }

    fn perturb<R: Rng + ?Sized>(
        state: &CartPoleState,
        std: f64,
        period: f64,
        rng: &mut R,
    ) -> CartPoleState {
        let theta_dot = gaussian(rng, state.theta_dot, std / period);
        let x_dot = gaussian(rng, state.x_dot, CART_NOISE_SCALE * std / period);
        let theta = gaussian(rng, state.theta(), std);
        let x = gaussian(rng, state.x, CART_NOISE_SCALE * std);
        CartPoleState::from_angle(x, x_dot, theta, theta_dot)
    }

    /// Turn the integrator's output into `(stored_state, observation)`
    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        true_next: CartPoleState,
        rng: &mut R,
    ) -> (CartPoleState, CartPoleState) {
        let stored = if self.model.kp > 0.0 {
            Self::perturb(&true_next, self.model.kp, self.period, rng)
        } else {
            true_next
        };

        let mut observed = if self.model.km > 0.0 {
            Self::perturb(&stored, self.model.km, self.period, rng)
        } else {
            stored
        };

        if let Some((x_dot_filter, theta_dot_filter)) = &mut self.filters {
            observed.x_dot = x_dot_filter.filter(observed.x_dot);
            observed.theta_dot = theta_dot_filter.filter(observed.theta_dot);
        }

        (stored, observed)
    }

    /// Zero the filter state
    pub fn reset(&mut self) {
        if let Some((a, b)) = &mut self.filters {
            a.reset();
            b.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_filter_dc_gain_is_one() {
        for cutoff in [0.1, 0.5, 0.9] {
            let mut filter = ButterworthLowpass::design(4, cutoff).unwrap();
            let mut out = 0.0;
            for _ in 0..500 {
                out = filter.filter(2.5);
            }
            assert_abs_diff_eq!(out, 2.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_filter_attenuates_nyquist() {
        let mut filter = ButterworthLowpass::design(4, 0.2).unwrap();
        let mut peak: f64 = 0.0;
        for i in 0..400 {
            let input = if i % 2 == 0 { 1.0 } else { -1.0 };
            let out = filter.filter(input);
            if i > 200 {
                peak = peak.max(out.abs());
            }
        }
        assert!(peak < 1e-6, "peak {peak}");
    }

    #[test]
    fn test_filter_reset_clears_state() {
        let mut filter = ButterworthLowpass::design(2, 0.5).unwrap();
        let first = filter.filter(1.0);
        filter.filter(1.0);
        filter.reset();
        assert_eq!(filter.filter(1.0), first);
    }

    #[test]
    fn test_design_rejects_bad_parameters() {
        assert!(ButterworthLowpass::design(3, 0.5).is_err());
        assert!(ButterworthLowpass::design(4, 1.0).is_err());
        assert!(ButterworthLowpass::design(4, 0.0).is_err());
    }

    #[test]
    fn test_noiseless_stage_is_identity() {
        let mut stage = NoiseFilterStage::new(NoiseModel::default(), 0.05).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let state = CartPoleState::from_angle(0.1, -0.2, 0.4, 1.5);
        let (stored, observed) = stage.apply(state, &mut rng);
        assert_eq!(stored, state);
        assert_eq!(observed, state);
    }

    #[test]
    fn test_measurement_noise_leaves_stored_state() {
        let model = NoiseModel {
            km: 0.01,
            ..NoiseModel::default()
        };
        let mut stage = NoiseFilterStage::new(model, 0.05).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let state = CartPoleState::from_angle(0.0, 0.0, 0.2, 0.0);
        let (stored, observed) = stage.apply(state, &mut rng);
        assert_eq!(stored, state);
        assert_ne!(observed, state);
        assert_abs_diff_eq!(observed.trig_norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_process_noise_changes_stored_state() {
        let model = NoiseModel {
            kp: 0.01,
            ..NoiseModel::default()
        };
        let mut stage = NoiseFilterStage::new(model, 0.05).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let state = CartPoleState::default();
        let (stored, observed) = stage.apply(state, &mut rng);
        assert_ne!(stored, state);
        assert_eq!(stored, observed);
    }
}
