//! The plant contract shared by the simulator and the rig

use serde::{Deserialize, Serialize};

use crate::{Action, ActionKind, CartPoleState, EpisodeSummary, PlantPhase, Termination};

/// Result of a single plant step
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Observed state
    pub state: CartPoleState,
    /// Reward signal
    pub reward: f64,
    /// Whether the episode is over
    pub done: bool,
    /// Why the episode ended, when `done`
    pub termination: Option<Termination>,
    /// Episode report, when `done`
    pub summary: Option<EpisodeSummary>,
}

impl Step {
    /// Whether the episode ended on a position rail
    #[must_use]
    pub fn hit_rail(&self) -> bool {
        self.termination == Some(Termination::RailHit)
    }
}

/// How a simulated plant draws its initial state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    /// Deterministic rest state at the origin
    #[default]
    Experimental,
    /// Inverted pole, small position jitter
    Goal,
    /// Full-range jitter on every coordinate
    Random,
    /// Small angle and angular velocity jitter only
    #[serde(rename = "random_theta_thetaDot")]
    RandomThetaThetaDot,
}

/// Options accepted by [`Plant::reset`]
///
/// Explicit coordinates take precedence over the sampled ones.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetOptions {
    /// Overrides the plant's configured reset mode
    pub mode: Option<ResetMode>,
    /// Initial cart position
    pub x: Option<f64>,
    /// Initial cart velocity
    pub x_dot: Option<f64>,
    /// Initial pole angle
    pub theta: Option<f64>,
    /// Initial angular velocity
    pub theta_dot: Option<f64>,
    /// Reseed the plant's random generator
    pub seed: Option<u64>,
}

impl ResetOptions {
    /// Options selecting a reset mode
    #[must_use]
    pub fn with_mode(mode: ResetMode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }

    /// Set the seed
    #[must_use]
    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Whether any coordinate override is present
    #[must_use]
    pub fn has_overrides(&self) -> bool {
        self.x.is_some() || self.x_dot.is_some() || self.theta.is_some() || self.theta_dot.is_some()
    }
}

/// Core plant trait
///
/// Implementations are synchronous state machines: one call completes
/// before the next is issued.
pub trait Plant: Send {
    /// Action space of the plant
    fn action_kind(&self) -> ActionKind;

    /// Start a new episode and return its first state
    fn reset(&mut self, options: &ResetOptions) -> crate::Result<CartPoleState>;

    /// Apply an action for one control period
    fn step(&mut self, action: Action) -> crate::Result<Step>;

    /// Release resources
    fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Current lifecycle phase
    fn phase(&self) -> PlantPhase;

    /// Index of the current episode
    fn episode_index(&self) -> u64;

    /// Seconds elapsed since creation, simulated or physical
    fn elapsed_time(&self) -> f64;
}

impl<P: Plant + ?Sized> Plant for Box<P> {
    fn action_kind(&self) -> ActionKind {
        (**self).action_kind()
    }

    fn reset(&mut self, options: &ResetOptions) -> crate::Result<CartPoleState> {
        (**self).reset(options)
    }

    fn step(&mut self, action: Action) -> crate::Result<Step> {
        (**self).step(action)
    }

    fn close(&mut self) -> crate::Result<()> {
        (**self).close()
    }

    fn phase(&self) -> PlantPhase {
        (**self).phase()
    }

    fn episode_index(&self) -> u64 {
        (**self).episode_index()
    }

    fn elapsed_time(&self) -> f64 {
        (**self).elapsed_time()
    }
}
