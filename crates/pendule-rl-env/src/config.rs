//! Configuration of a simulated plant

use serde::{Deserialize, Serialize};
use std::path::Path;

use pendule_rl_core::{ActionKind, EpisodeRules, PlantError, ResetMode, Result};

use crate::dynamics::IntegratorKind;
use crate::noise::NoiseModel;
use crate::params::{ParameterJitter, PhysicalParameters};

/// Everything needed to build a [`SimulatedPlant`](crate::SimulatedPlant)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Identified rig parameters
    pub params: PhysicalParameters,
    /// Integration scheme
    pub integrator: IntegratorKind,
    /// Process and measurement noise
    pub noise: NoiseModel,
    /// Parameter uncertainty
    pub jitter: ParameterJitter,
    /// Termination and reward rules
    pub rules: EpisodeRules,
    /// Accepted action space
    pub action_kind: ActionKind,
    /// Default initial-state distribution
    pub reset_mode: ResetMode,
    /// Control period `Te` (s)
    pub period: f64,
    /// Seed of the plant's generator; entropy when absent
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            params: PhysicalParameters::default(),
            integrator: IntegratorKind::default(),
            noise: NoiseModel::default(),
            jitter: ParameterJitter::default(),
            rules: EpisodeRules::default(),
            action_kind: ActionKind::default(),
            reset_mode: ResetMode::default(),
            period: 0.05,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Set the episode length, keeping the rail penalty at half of it
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.rules.max_steps = max_steps;
        self.rules.rail_penalty = max_steps as f64 / 2.0;
        self
    }

    /// Set the seed
    #[must_use]
    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        if !(self.period.is_finite() && self.period > 0.0) {
            return Err(PlantError::Config(format!(
                "period must be positive, got {}",
                self.period
            )));
        }
        if self.integrator.substeps() == 0 {
            return Err(PlantError::Config("integrator needs at least one sub-step".into()));
        }
        self.params.validate()?;
        self.jitter.validate()?;
        self.noise.validate()?;
        self.rules.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pendule_rl_core::RewardKind;

    #[test]
    fn test_default_is_valid() {
        SimConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = SimConfig::from_json_str(
            r#"{
                "integrator": {"kind": "runge_kutta4", "substeps": 1},
                "rules": {"reward": {"kind": "sparse"}},
                "reset_mode": "random_theta_thetaDot",
                "action_kind": "continuous",
                "seed": 42
            }"#,
        )
        .unwrap();
        assert_eq!(config.integrator, IntegratorKind::RungeKutta4 { substeps: 1 });
        assert_eq!(config.rules.reward, RewardKind::Sparse);
        assert_eq!(config.rules.max_steps, 800);
        assert_eq!(config.reset_mode, ResetMode::RandomThetaThetaDot);
        assert_eq!(config.action_kind, ActionKind::Continuous);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.params, PhysicalParameters::default());
    }

    #[test]
    fn test_invalid_period() {
        let result = SimConfig::from_json_str(r#"{"period": 0.0}"#);
        assert!(matches!(result, Err(PlantError::Config(_))));
    }

    #[test]
    fn test_malformed_json() {
        let result = SimConfig::from_json_str("{ period: }");
        assert!(matches!(result, Err(PlantError::Serialization(_))));
    }

    #[test]
    fn test_max_steps_moves_penalty() {
        let config = SimConfig::default().with_max_steps(100);
        assert_eq!(config.rules.max_steps, 100);
        assert_eq!(config.rules.rail_penalty, 50.0);
    }
}
