//! Physical parameters of the cart-pole and their randomization

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use pendule_rl_core::{PlantError, Result};

/// Static friction model of the drive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoulombModel {
    /// `sign(ẋ)`, discontinuous at rest
    Sign,
    /// `tanh(k·ẋ)`, smooth around rest
    Tanh {
        /// Sharpness `k` (s/m)
        sharpness: f64,
    },
}

impl Default for CoulombModel {
    fn default() -> Self {
        Self::Tanh { sharpness: 1000.0 }
    }
}

impl CoulombModel {
    /// Direction factor of the Coulomb term at cart velocity `x_dot`
    #[must_use]
    pub fn factor(self, x_dot: f64) -> f64 {
        match self {
            Self::Sign if x_dot == 0.0 => 0.0,
            Self::Sign => x_dot.signum(),
            Self::Tanh { sharpness } => (sharpness * x_dot).tanh(),
        }
    }
}

/// Identified parameters of the rig
///
/// Drive force: `F = mc·(−fa·ẋ − fc·coulomb(ẋ)) + [u ≠ 0]·mc·(fb·Umax·u − fd)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalParameters {
    /// Cart mass (kg)
    pub cart_mass: f64,
    /// Pole mass (kg)
    pub pole_mass: f64,
    /// Distance from pivot to the pole's centre of mass (m)
    pub pole_length: f64,
    /// Gravitational acceleration (m/s²)
    pub gravity: f64,
    /// Viscous friction of the drive, `fa`
    pub viscous_friction: f64,
    /// Voltage-to-force gain, `fb`
    pub drive_gain: f64,
    /// Coulomb friction of motor, reducer and cart, `fc`
    pub coulomb_friction: f64,
    /// Asymmetry offset of the drive, `fd`
    pub asymmetry: f64,
    /// Static friction shape
    pub coulomb_model: CoulombModel,
    /// Natural angular frequency of the pendulum (rad/s)
    pub angular_frequency: f64,
    /// Viscous damping of the pendulum (1/s)
    pub pendulum_damping: f64,
    /// Drive voltage at full action (V)
    pub tension_max: f64,
}

impl Default for PhysicalParameters {
    fn default() -> Self {
        Self {
            cart_mass: 0.5,
            pole_mass: 0.075,
            pole_length: 0.411_488_843_930_847,
            gravity: 9.806,
            viscous_friction: 20.751_800_955_416_54,
            drive_gain: 1.059_719_258_572_224,
            coulomb_friction: 1.166_390_864_012_042,
            asymmetry: 0.097_278_437_089_184_59,
            coulomb_model: CoulombModel::default(),
            angular_frequency: 4.881_653_071_189_049,
            pendulum_damping: 0.070_353_326_446_159_92,
            tension_max: 12.0,
        }
    }
}

impl PhysicalParameters {
    /// Parameters without friction, damping or drive asymmetry
    #[must_use]
    pub fn frictionless() -> Self {
        Self {
            viscous_friction: 0.0,
            coulomb_friction: 0.0,
            asymmetry: 0.0,
            pendulum_damping: 0.0,
            ..Self::default()
        }
    }

    /// Check physical plausibility
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("cart_mass", self.cart_mass),
            ("pole_mass", self.pole_mass),
            ("pole_length", self.pole_length),
            ("tension_max", self.tension_max),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(PlantError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        let finite = [
            ("gravity", self.gravity),
            ("viscous_friction", self.viscous_friction),
            ("drive_gain", self.drive_gain),
            ("coulomb_friction", self.coulomb_friction),
            ("asymmetry", self.asymmetry),
            ("angular_frequency", self.angular_frequency),
            ("pendulum_damping", self.pendulum_damping),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(PlantError::Config(format!("{name} must be finite, got {value}")));
            }
        }
        if let CoulombModel::Tanh { sharpness } = self.coulomb_model {
            if !(sharpness.is_finite() && sharpness > 0.0) {
                return Err(PlantError::Config(format!(
                    "coulomb sharpness must be positive, got {sharpness}"
                )));
            }
        }
        Ok(())
    }
}

/// When parameter jitter is redrawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterSchedule {
    /// Fresh draw every control period
    #[default]
    PerStep,
    /// One draw per episode, at reset
    PerEpisode,
}

/// Gaussian uncertainty on identified parameters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterJitter {
    /// Std-dev of the natural angular frequency (rad/s)
    pub angular_frequency_std: f64,
    /// Std-dev of the pole mass (kg)
    pub pole_mass_std: f64,
    /// Std-dev of the drive force, in percent of its magnitude
    pub force_std_percent: f64,
    /// Redraw policy for frequency and mass
    pub schedule: JitterSchedule,
}

impl ParameterJitter {
    /// Check the std-devs
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("angular_frequency_std", self.angular_frequency_std),
            ("pole_mass_std", self.pole_mass_std),
            ("force_std_percent", self.force_std_percent),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(PlantError::Config(format!("{name} must be >= 0, got {value}")));
            }
        }
        Ok(())
    }

    /// Draw the perturbed parameters used for the next period(s)
    pub fn draw<R: Rng + ?Sized>(&self, params: &PhysicalParameters, rng: &mut R) -> Perturbation {
        Perturbation {
            angular_frequency: gaussian(rng, params.angular_frequency, self.angular_frequency_std),
            pole_mass: gaussian(rng, params.pole_mass, self.pole_mass_std),
            force_gain: 1.0,
        }
    }

    /// Multiplicative force noise factor for one control period
    pub fn draw_force_gain<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        gaussian(rng, 1.0, self.force_std_percent / 100.0)
    }
}

/// Parameter values actually used by the integrator for one period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Perturbation {
    /// Natural angular frequency (rad/s)
    pub angular_frequency: f64,
    /// Pole mass (kg)
    pub pole_mass: f64,
    /// Multiplier applied to the drive force
    pub force_gain: f64,
}

impl Perturbation {
    /// Unperturbed parameters
    #[must_use]
    pub fn nominal(params: &PhysicalParameters) -> Self {
        Self {
            angular_frequency: params.angular_frequency,
            pole_mass: params.pole_mass,
            force_gain: 1.0,
        }
    }
}

/// Sample `N(mean, std)`; a zero std returns `mean` without consuming randomness
pub(crate) fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, std: f64) -> f64 {
    if std <= 0.0 {
        return mean;
    }
    match Normal::new(mean, std) {
        Ok(normal) => normal.sample(rng),
        Err(_) => mean,
    }
}
