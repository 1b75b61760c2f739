//! Simulated cart-pole plant

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use pendule_rl_core::{
    Action, ActionKind, CartPoleState, EpisodeClock, EpisodeTracker, Plant, PlantError,
    PlantPhase, ResetMode, ResetOptions, Result, Step, Termination,
};

use crate::config::SimConfig;
use crate::dynamics::RigidBodyIntegrator;
use crate::noise::NoiseFilterStage;
use crate::params::{JitterSchedule, Perturbation};

/// Cart-pole simulated from the identified rig model
///
/// Owns its random generator, so two plants built from the same seeded
/// configuration produce identical trajectories.
#[derive(Debug)]
pub struct SimulatedPlant {
    config: SimConfig,
    integrator: RigidBodyIntegrator,
    noise: NoiseFilterStage,
    rng: StdRng,
    state: CartPoleState,
    episode_perturbation: Perturbation,
    tracker: EpisodeTracker,
}

impl SimulatedPlant {
    /// Build a plant from a validated configuration
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let integrator = RigidBodyIntegrator::new(config.params, config.integrator)?;
        let noise = NoiseFilterStage::new(config.noise, config.period)?;
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        debug!(
            integrator = ?config.integrator,
            period = config.period,
            action_kind = ?config.action_kind,
            "simulated plant created"
        );

        Ok(Self {
            episode_perturbation: Perturbation::nominal(&config.params),
            tracker: EpisodeTracker::new(EpisodeClock::Simulated {
                period: config.period,
            }),
            state: CartPoleState::default(),
            config,
            integrator,
            noise,
            rng,
        })
    }

    /// Configuration the plant was built with
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// State kept by the plant, before measurement noise and filtering
    #[must_use]
    pub fn true_state(&self) -> CartPoleState {
        self.state
    }

    /// Steps taken since creation
    #[must_use]
    pub fn total_steps(&self) -> u64 {
        self.tracker.total_steps()
    }

    /// Steps taken in the current episode
    #[must_use]
    pub fn steps(&self) -> usize {
        self.tracker.steps()
    }

    fn sample_initial(&mut self, mode: ResetMode) -> (f64, f64, f64, f64, f64) {
        use std::f64::consts::PI;

        let rng = &mut self.rng;
        match mode {
            ResetMode::Experimental => (0.0, 0.0, 1.0, 0.0, 0.0),
            ResetMode::Goal => (rng.gen_range(-0.1..0.1), 0.0, -1.0, 0.0, 0.0),
            ResetMode::Random => {
                let x = rng.gen_range(-0.35..0.35);
                let x_dot = rng.gen_range(-0.5..0.5);
                let theta_dot = rng.gen_range(-5.0..5.0);
                let theta: f64 = rng.gen_range(-PI..PI);
                (x, x_dot, theta.cos(), theta.sin(), theta_dot)
            }
            ResetMode::RandomThetaThetaDot => {
                let theta: f64 = rng.gen_range(-PI / 18.0..PI / 18.0);
                (0.0, 0.0, theta.cos(), theta.sin(), 0.0)
            }
        }
    }

    fn perturbation(&mut self) -> Perturbation {
        let jitter = self.config.jitter;
        let mut perturbation = match jitter.schedule {
            JitterSchedule::PerStep => jitter.draw(&self.config.params, &mut self.rng),
            JitterSchedule::PerEpisode => self.episode_perturbation,
        };
        perturbation.force_gain = jitter.draw_force_gain(&mut self.rng);
        perturbation
    }
}

impl Plant for SimulatedPlant {
    fn action_kind(&self) -> ActionKind {
        self.config.action_kind
    }

    fn reset(&mut self, options: &ResetOptions) -> Result<CartPoleState> {
        let overrides = [
            ("x", options.x),
            ("x_dot", options.x_dot),
            ("theta", options.theta),
            ("theta_dot", options.theta_dot),
        ];
        for (name, value) in overrides {
            if let Some(value) = value.filter(|v| !v.is_finite()) {
                return Err(PlantError::Config(format!(
                    "reset override {name} must be finite, got {value}"
                )));
            }
        }

        if let Some(seed) = options.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }

        let mode = options.mode.unwrap_or(self.config.reset_mode);
        let (mut x, mut x_dot, mut cos_theta, mut sin_theta, mut theta_dot) =
            self.sample_initial(mode);
        if let Some(value) = options.x {
            x = value;
        }
        if let Some(value) = options.x_dot {
            x_dot = value;
        }
        if let Some(theta) = options.theta {
            (sin_theta, cos_theta) = theta.sin_cos();
        }
        if let Some(value) = options.theta_dot {
            theta_dot = value;
        }

        self.state = CartPoleState {
            x,
            x_dot,
            cos_theta,
            sin_theta,
            theta_dot,
        }
        .with_clamped_x(self.config.rules.x_threshold);
        self.tracker.begin();
        self.noise.reset();
        if self.config.jitter.schedule == JitterSchedule::PerEpisode {
            self.episode_perturbation = self.config.jitter.draw(&self.config.params, &mut self.rng);
        }

        debug!(
            episode = self.tracker.episode(),
            ?mode,
            state = ?self.state,
            "simulated plant reset"
        );
        Ok(self.state)
    }

    fn step(&mut self, action: Action) -> Result<Step> {
        self.tracker.ensure_steppable()?;
        let fraction = action.fraction(self.config.action_kind)?;

        let perturbation = self.perturbation();
        let next = self
            .integrator
            .advance(&self.state, fraction, &perturbation, self.config.period)?;
        let (stored, observed) = self.noise.apply(next, &mut self.rng);
        self.state = stored;

        let steps = self.tracker.advance();
        let verdict = self.config.rules.judge(&stored, steps);
        let observation = observed.with_clamped_x(self.config.rules.x_threshold);
        let summary = self.tracker.record(&verdict);

        debug!(step = steps, %action, reward = verdict.reward, "simulated step");
        if let Some(summary) = &summary {
            if summary.termination == Termination::RailHit {
                warn!(episode = summary.episode, x = stored.x, "cart hit the rail");
            }
            info!(
                episode = summary.episode,
                length = summary.length,
                episode_return = summary.episode_return,
                termination = ?summary.termination,
                "episode finished"
            );
        }

        Ok(Step {
            state: observation,
            reward: verdict.reward,
            done: verdict.termination.is_some(),
            termination: verdict.termination,
            summary,
        })
    }

    fn phase(&self) -> PlantPhase {
        self.tracker.phase()
    }

    fn episode_index(&self) -> u64 {
        self.tracker.episode()
    }

    fn elapsed_time(&self) -> f64 {
        self.tracker.elapsed_time()
    }
}
