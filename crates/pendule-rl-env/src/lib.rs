//! Simulated cart-pole plants for the pendule rig
//!
//! This crate provides:
//! - the identified rigid-body model and its integrators
//! - parameter jitter, process and measurement noise, velocity filtering
//! - [`SimulatedPlant`], a [`Plant`] with the rig's episode contract
//! - named presets and a [`Monitor`] wrapper

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dynamics;
pub mod noise;
pub mod params;
pub mod registry;
pub mod simulated;
pub mod wrappers;

// Re-export plant building blocks
pub use config::SimConfig;
pub use dynamics::{IntegratorKind, RigidBodyIntegrator};
pub use noise::{ButterworthLowpass, FilterConfig, NoiseFilterStage, NoiseModel};
pub use params::{CoulombModel, JitterSchedule, ParameterJitter, Perturbation, PhysicalParameters};
pub use registry::{list_presets, make_plant, make_seeded_plant, register_preset, PresetRegistry};
pub use simulated::SimulatedPlant;
pub use wrappers::{Monitor, MonitorRecord};

// Re-export core types
pub use pendule_rl_core::{
    Action, ActionKind, CartPoleState, Direction, EpisodeRules, Plant, PlantError, ResetMode,
    ResetOptions, Result, RewardKind, Step, Termination,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{make_plant, IntegratorKind, Monitor, SimConfig, SimulatedPlant};
    pub use pendule_rl_core::prelude::*;
}
