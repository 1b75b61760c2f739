//! Named plant presets for easy plant creation

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pendule_rl_core::{PlantError, Result};

use crate::config::SimConfig;
use crate::dynamics::IntegratorKind;
use crate::noise::{FilterConfig, NoiseModel};
use crate::params::ParameterJitter;
use crate::simulated::SimulatedPlant;

lazy_static::lazy_static! {
    static ref REGISTRY: Arc<Mutex<PresetRegistry>> =
        Arc::new(Mutex::new(PresetRegistry::with_builtins()));
}

/// Registry of simulator configurations by name
#[derive(Debug, Default)]
pub struct PresetRegistry {
    presets: HashMap<String, SimConfig>,
}

impl PresetRegistry {
    /// Registry holding the built-in presets
    ///
    /// * `cartpole-euler`: identified model, semi-implicit Euler, no noise
    /// * `cartpole-rk4`: identified model, RK4
    /// * `cartpole-rk4-noisy`: RK4 with parameter jitter, noise and filtering
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register("cartpole-euler", SimConfig::default());
        registry.register(
            "cartpole-rk4",
            SimConfig {
                integrator: IntegratorKind::RungeKutta4 { substeps: 1 },
                ..SimConfig::default()
            },
        );
        registry.register(
            "cartpole-rk4-noisy",
            SimConfig {
                integrator: IntegratorKind::RungeKutta4 { substeps: 1 },
                jitter: ParameterJitter {
                    angular_frequency_std: 0.1,
                    pole_mass_std: 0.005,
                    force_std_percent: 5.0,
                    ..ParameterJitter::default()
                },
                noise: NoiseModel {
                    kp: 1e-3,
                    km: 1e-3,
                    filter: FilterConfig {
                        enabled: true,
                        ..FilterConfig::default()
                    },
                },
                ..SimConfig::default()
            },
        );
        registry
    }

    /// Register a preset, replacing any preset of the same name
    pub fn register(&mut self, name: impl Into<String>, config: SimConfig) {
        self.presets.insert(name.into(), config);
    }

    /// Configuration of a preset
    pub fn get(&self, name: &str) -> Result<&SimConfig> {
        self.presets
            .get(name)
            .ok_or_else(|| PlantError::Config(format!("unknown plant preset: {name}")))
    }

    /// Build a plant from a preset
    pub fn make(&self, name: &str) -> Result<SimulatedPlant> {
        SimulatedPlant::new(self.get(name)?.clone())
    }

    /// Registered preset names, sorted
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.presets.keys().cloned().collect();
        names.sort();
        names
    }
}

fn registry() -> MutexGuard<'static, PresetRegistry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register a preset globally
pub fn register_preset(name: impl Into<String>, config: SimConfig) {
    registry().register(name, config);
}

/// Create a simulated plant from a global preset
pub fn make_plant(name: &str) -> Result<SimulatedPlant> {
    registry().make(name)
}

/// Create a seeded simulated plant from a global preset
pub fn make_seeded_plant(name: &str, seed: u64) -> Result<SimulatedPlant> {
    let config = registry().get(name)?.clone().seeded(seed);
    SimulatedPlant::new(config)
}

/// List all registered presets
#[must_use]
pub fn list_presets() -> Vec<String> {
    registry().list()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pendule_rl_core::Plant;

    #[test]
    fn test_builtins_build() {
        for name in ["cartpole-euler", "cartpole-rk4", "cartpole-rk4-noisy"] {
            let plant = make_plant(name).unwrap();
            assert_eq!(plant.episode_index(), 0);
        }
    }

    #[test]
    fn test_unknown_preset() {
        assert!(matches!(make_plant("acrobot"), Err(PlantError::Config(_))));
    }

    #[test]
    fn test_register_custom() {
        register_preset("short-episodes", SimConfig::default().with_max_steps(10));
        assert!(list_presets().contains(&"short-episodes".to_string()));
        let plant = make_seeded_plant("short-episodes", 3).unwrap();
        assert_eq!(plant.config().rules.max_steps, 10);
        assert_eq!(plant.config().seed, Some(3));
    }
}
