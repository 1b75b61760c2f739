//! Rigid-body dynamics of the cart-pole and its numerical integration

use serde::{Deserialize, Serialize};
use tracing::debug;

use pendule_rl_core::{CartPoleState, PlantError, Result};

use crate::params::{PhysicalParameters, Perturbation};

/// Numerical scheme used to advance one control period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegratorKind {
    /// Velocity first, then position, per sub-step
    SemiImplicitEuler {
        /// Sub-steps per control period
        substeps: usize,
    },
    /// Classic fourth-order Runge-Kutta
    RungeKutta4 {
        /// Sub-steps per control period
        substeps: usize,
    },
}

impl Default for IntegratorKind {
    fn default() -> Self {
        Self::SemiImplicitEuler { substeps: 1 }
    }
}

impl IntegratorKind {
    /// Sub-steps per control period
    #[must_use]
    pub fn substeps(self) -> usize {
        match self {
            Self::SemiImplicitEuler { substeps } | Self::RungeKutta4 { substeps } => substeps,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Coords {
    x: f64,
    x_dot: f64,
    theta: f64,
    theta_dot: f64,
}

#[derive(Debug, Clone, Copy)]
struct Deriv {
    x_dot: f64,
    x_ddot: f64,
    theta_dot: f64,
    theta_ddot: f64,
}

impl Coords {
    fn add_scaled(self, k: Deriv, h: f64) -> Self {
        Self {
            x: self.x + h * k.x_dot,
            x_dot: self.x_dot + h * k.x_ddot,
            theta: self.theta + h * k.theta_dot,
            theta_dot: self.theta_dot + h * k.theta_ddot,
        }
    }
}

/// Advances the cart-pole by one control period
#[derive(Debug, Clone)]
pub struct RigidBodyIntegrator {
    params: PhysicalParameters,
    kind: IntegratorKind,
}

impl RigidBodyIntegrator {
    /// Create an integrator, validating parameters and sub-step count
    pub fn new(params: PhysicalParameters, kind: IntegratorKind) -> Result<Self> {
        params.validate()?;
        if kind.substeps() == 0 {
            return Err(PlantError::Config("integrator needs at least one sub-step".into()));
        }
        Ok(Self { params, kind })
    }

    /// Nominal parameters
    #[must_use]
    pub fn params(&self) -> &PhysicalParameters {
        &self.params
    }

    /// Integration scheme
    #[must_use]
    pub fn kind(&self) -> IntegratorKind {
        self.kind
    }

    /// Force applied by the drive on the cart at velocity `x_dot`
    #[must_use]
    pub fn drive_force(&self, x_dot: f64, action: f64, perturbation: &Perturbation) -> f64 {
        let p = &self.params;
        let mut force = p.cart_mass
            * (-p.viscous_friction * x_dot - p.coulomb_friction * p.coulomb_model.factor(x_dot));
        if action != 0.0 {
            force += p.cart_mass * (p.drive_gain * p.tension_max * action - p.asymmetry);
        }
        force * perturbation.force_gain
    }

    fn derivatives(&self, c: Coords, action: f64, perturbation: &Perturbation) -> Deriv {
        let p = &self.params;
        let mp = perturbation.pole_mass;
        let w = perturbation.angular_frequency;
        let (sin, cos) = c.theta.sin_cos();

        let force = self.drive_force(c.x_dot, action, perturbation);
        let x_ddot = (force
            + mp * c.theta_dot * c.theta_dot * p.pole_length * sin
            + mp * p.gravity * sin * cos)
            / (p.cart_mass + mp * sin * sin);
        let theta_ddot =
            -w * w * sin - x_ddot / p.pole_length * cos - p.pendulum_damping * c.theta_dot;

        Deriv {
            x_dot: c.x_dot,
            x_ddot,
            theta_dot: c.theta_dot,
            theta_ddot,
        }
    }

    fn euler_step(&self, c: &mut Coords, h: f64, action: f64, perturbation: &Perturbation) {
        let k = self.derivatives(*c, action, perturbation);
        c.x_dot += h * k.x_ddot;
        c.x += h * c.x_dot;
        c.theta_dot += h * k.theta_ddot;
        c.theta += h * c.theta_dot;
    }

    fn rk4_step(&self, c: &mut Coords, h: f64, action: f64, perturbation: &Perturbation) {
        let k1 = self.derivatives(*c, action, perturbation);
        let k2 = self.derivatives(c.add_scaled(k1, 0.5 * h), action, perturbation);
        let k3 = self.derivatives(c.add_scaled(k2, 0.5 * h), action, perturbation);
        let k4 = self.derivatives(c.add_scaled(k3, h), action, perturbation);

        c.x += (h / 6.0) * (k1.x_dot + 2.0 * k2.x_dot + 2.0 * k3.x_dot + k4.x_dot);
        c.x_dot += (h / 6.0) * (k1.x_ddot + 2.0 * k2.x_ddot + 2.0 * k3.x_ddot + k4.x_ddot);
        c.theta +=
            (h / 6.0) * (k1.theta_dot + 2.0 * k2.theta_dot + 2.0 * k3.theta_dot + k4.theta_dot);
        c.theta_dot += (h / 6.0)
            * (k1.theta_ddot + 2.0 * k2.theta_ddot + 2.0 * k3.theta_ddot + k4.theta_ddot);
    }

    /// State after `period` seconds under a constant action fraction
    #[allow(clippy::cast_precision_loss)]
    pub fn advance(
        &self,
        state: &CartPoleState,
        action: f64,
        perturbation: &Perturbation,
        period: f64,
    ) -> Result<CartPoleState> {
        let substeps = self.kind.substeps();
        let h = period / substeps as f64;
        let mut c = Coords {
            x: state.x,
            x_dot: state.x_dot,
            theta: state.theta(),
            theta_dot: state.theta_dot,
        };

        for _ in 0..substeps {
            match self.kind {
                IntegratorKind::SemiImplicitEuler { .. } => {
                    self.euler_step(&mut c, h, action, perturbation);
                }
                IntegratorKind::RungeKutta4 { .. } => {
                    self.rk4_step(&mut c, h, action, perturbation);
                }
            }
        }

        let next = CartPoleState::from_angle(c.x, c.x_dot, c.theta, c.theta_dot);
        if !next.is_finite() {
            debug!(?state, action, "integration diverged");
            return Err(PlantError::Integration(format!(
                "non-finite state after {period}s from {state:?}"
            )));
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn nominal(params: &PhysicalParameters) -> Perturbation {
        Perturbation::nominal(params)
    }

    #[test]
    fn test_rest_is_equilibrium() {
        let params = PhysicalParameters::frictionless();
        let integrator = RigidBodyIntegrator::new(params, IntegratorKind::default()).unwrap();
        let next = integrator
            .advance(&CartPoleState::default(), 0.0, &nominal(&params), 0.05)
            .unwrap();
        assert_eq!(next, CartPoleState::default());
    }

    #[test]
    fn test_drive_force_sign() {
        let params = PhysicalParameters::default();
        let integrator = RigidBodyIntegrator::new(params, IntegratorKind::default()).unwrap();
        let p = nominal(&params);
        assert!(integrator.drive_force(0.0, 1.0, &p) > 0.0);
        assert!(integrator.drive_force(0.0, -1.0, &p) < 0.0);
        assert_eq!(integrator.drive_force(0.0, 0.0, &p), 0.0);
        // friction opposes motion when coasting
        assert!(integrator.drive_force(0.2, 0.0, &p) < 0.0);
    }

    #[test]
    fn test_force_gain_scales_force() {
        let params = PhysicalParameters::default();
        let integrator = RigidBodyIntegrator::new(params, IntegratorKind::default()).unwrap();
        let mut p = nominal(&params);
        let base = integrator.drive_force(0.1, 0.5, &p);
        p.force_gain = 1.1;
        assert_abs_diff_eq!(integrator.drive_force(0.1, 0.5, &p), base * 1.1, epsilon = 1e-12);
    }

    #[test]
    fn test_push_moves_cart() {
        let params = PhysicalParameters::default();
        let integrator =
            RigidBodyIntegrator::new(params, IntegratorKind::RungeKutta4 { substeps: 1 }).unwrap();
        let next = integrator
            .advance(&CartPoleState::default(), 1.0, &nominal(&params), 0.05)
            .unwrap();
        assert!(next.x > 0.0);
        assert!(next.x_dot > 0.0);
        assert!(next.theta_dot < 0.0);
    }

    #[test]
    fn test_non_finite_is_integration_error() {
        let params = PhysicalParameters::default();
        let integrator = RigidBodyIntegrator::new(params, IntegratorKind::default()).unwrap();
        let state = CartPoleState::from_angle(0.0, 0.0, 0.3, 1e300);
        let result = integrator.advance(&state, 0.0, &nominal(&params), 0.05);
        assert!(matches!(result, Err(PlantError::Integration(_))));
    }

    #[test]
    fn test_zero_substeps_rejected() {
        let result = RigidBodyIntegrator::new(
            PhysicalParameters::default(),
            IntegratorKind::SemiImplicitEuler { substeps: 0 },
        );
        assert!(matches!(result, Err(PlantError::Config(_))));
    }

    #[test]
    fn test_kind_serde_tag() {
        let kind: IntegratorKind =
            serde_json::from_str(r#"{"kind":"runge_kutta4","substeps":2}"#).unwrap();
        assert_eq!(kind, IntegratorKind::RungeKutta4 { substeps: 2 });
    }
}
