//! Core plant traits and types for the pendule cart-pole rig
//!
//! This crate provides the abstractions shared by the simulated and the
//! physical cart-pole: the observed state, actions, reward shaping, episode
//! bookkeeping and the [`Plant`] contract every controller talks to.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod environment;
pub mod episode;
pub mod error;
pub mod reward;
pub mod state;

// Re-export core traits and types
pub use action::{Action, ActionKind, Direction};
pub use environment::{Plant, ResetMode, ResetOptions, Step};
pub use episode::{
    EpisodeClock, EpisodeRules, EpisodeSummary, EpisodeTracker, PlantPhase, Termination, Verdict,
};
pub use error::{PlantError, Result};
pub use reward::{reward, RewardKind};
pub use state::{AngleUnwrapper, CartPoleState};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Action, ActionKind, CartPoleState, Direction, EpisodeSummary, Plant, PlantError,
        ResetMode, ResetOptions, Result, Step, Termination,
    };
}
