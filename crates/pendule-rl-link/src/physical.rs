//! Plant backed by the physical rig

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use pendule_rl_core::{
    Action, ActionKind, CartPoleState, Direction, EpisodeClock, EpisodeRules, EpisodeTracker, Plant,
    PlantError, PlantPhase, ResetOptions, Result, Step, Termination,
};

use crate::link::{HardwareLink, LinkConfig, RigLink};
use crate::protocol::{StateSample, PWM_LIMIT};

/// Configuration of a [`PhysicalPlant`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalConfig {
    /// Controller endpoints
    pub link: LinkConfig,
    /// PWM sent for a full action
    pub max_pwm: i32,
    /// Termination and reward rules
    pub rules: EpisodeRules,
    /// PWM used to drive the cart back toward the centre
    pub corrective_pwm: i32,
    /// Minimum `cos θ` for the pole to count as settled
    pub settle_cos: f64,
    /// Maximum `|θ̇|` for the pole to count as settled
    pub settle_angvel: f64,
    /// Delay between two settle polls (s)
    pub settle_poll_secs: f64,
    /// Accepted action space
    pub action_kind: ActionKind,
}

impl Default for PhysicalConfig {
    fn default() -> Self {
        let max_steps: u16 = 800;
        Self {
            link: LinkConfig::default(),
            max_pwm: 130,
            rules: EpisodeRules {
                x_threshold: 0.3,
                max_steps: usize::from(max_steps),
                theta_dot_limit: 13.0,
                rail_penalty: f64::from(max_steps) / 5.0,
                ..EpisodeRules::default()
            },
            corrective_pwm: 50,
            settle_cos: 0.999,
            settle_angvel: 1e-5,
            settle_poll_secs: 1.0,
            action_kind: ActionKind::default(),
        }
    }
}

impl PhysicalConfig {
    /// Load and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check PWM ranges, settle thresholds and rules
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("max_pwm", self.max_pwm), ("corrective_pwm", self.corrective_pwm)] {
            if !(1..=PWM_LIMIT).contains(&value) {
                return Err(PlantError::Config(format!(
                    "{name} must lie in 1..={PWM_LIMIT}, got {value}"
                )));
            }
        }
        if !(self.settle_poll_secs.is_finite() && self.settle_poll_secs >= 0.0) {
            return Err(PlantError::Config(format!(
                "settle_poll_secs must be >= 0, got {}",
                self.settle_poll_secs
            )));
        }
        if self.settle_cos.is_nan() || self.settle_angvel.is_nan() {
            return Err(PlantError::Config("settle thresholds must be numbers".into()));
        }
        self.link.validate()?;
        self.rules.validate()
    }

    fn settle_poll(&self) -> Duration {
        Duration::try_from_secs_f64(self.settle_poll_secs).unwrap_or(Duration::from_secs(1))
    }
}

/// Sends a zero command when dropped while armed
///
/// Wraps the link for the duration of a step or reset so that any early
/// return or unwind leaves the motor stopped.
struct ZeroCommandGuard<'a, L: RigLink> {
    link: &'a mut L,
    armed: bool,
}

impl<'a, L: RigLink> ZeroCommandGuard<'a, L> {
    fn new(link: &'a mut L) -> Self {
        Self { link, armed: true }
    }

    fn send(&mut self, pwm: i32) -> Result<()> {
        self.link.send_command(pwm)
    }

    fn read(&mut self) -> Result<StateSample> {
        self.link
            .read_state(true)?
            .ok_or_else(|| PlantError::Protocol("blocking read returned no state".into()))
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<L: RigLink> Drop for ZeroCommandGuard<'_, L> {
    fn drop(&mut self) {
        if self.armed {
            warn!("aborting rig operation, stopping the motor");
            let _ = self.link.send_command(0);
        }
    }
}

/// Cart-pole plant driving the real rig through a [`RigLink`]
pub struct PhysicalPlant<L: RigLink = HardwareLink> {
    link: L,
    config: PhysicalConfig,
    tracker: EpisodeTracker,
    last_state: Option<CartPoleState>,
    closed: bool,
}

impl PhysicalPlant<HardwareLink> {
    /// Connect to the rig described by `config.link`
    pub fn connect(config: PhysicalConfig) -> Result<Self> {
        config.validate()?;
        let link = HardwareLink::connect(config.link.clone())?;
        Self::with_link(link, config)
    }
}

impl<L: RigLink> PhysicalPlant<L> {
    /// Build a plant over an already connected link
    pub fn with_link(link: L, config: PhysicalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            link,
            config,
            tracker: EpisodeTracker::new(EpisodeClock::wall_clock()),
            last_state: None,
            closed: false,
        })
    }

    /// Configuration of the plant
    #[must_use]
    pub fn config(&self) -> &PhysicalConfig {
        &self.config
    }

    /// Underlying link
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Last state observed, if any
    #[must_use]
    pub fn last_state(&self) -> Option<CartPoleState> {
        self.last_state
    }

    /// Steps taken since creation
    #[must_use]
    pub fn total_steps(&self) -> u64 {
        self.tracker.total_steps()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn pwm_for(&self, action: Action, fraction: f64) -> i32 {
        match action {
            Action::Discrete(Direction::Positive) => self.config.max_pwm,
            Action::Discrete(Direction::Negative) => -self.config.max_pwm,
            Action::Discrete(Direction::Zero) => 0,
            Action::Continuous(_) => (fraction * f64::from(self.config.max_pwm)) as i32,
        }
    }
}

impl<L: RigLink> Plant for PhysicalPlant<L> {
    fn action_kind(&self) -> ActionKind {
        self.config.action_kind
    }

    fn reset(&mut self, options: &ResetOptions) -> Result<CartPoleState> {
        if self.closed {
            return Err(PlantError::Closed);
        }
        if options.has_overrides() || options.mode.is_some() {
            info!(?options, "reset options ignored by the physical rig");
        }

        let corrective = self.config.corrective_pwm;
        let mut guard = ZeroCommandGuard::new(&mut self.link);

        let mut sample = guard.read()?;
        debug!(position = sample.position, "centring cart");
        if sample.position > 0.0 {
            while sample.position > 0.0 {
                guard.send(-corrective)?;
                sample = guard.read()?;
            }
        } else {
            while sample.position < 0.0 {
                guard.send(corrective)?;
                sample = guard.read()?;
            }
        }
        guard.send(0)?;

        sample = guard.read()?;
        let poll = self.config.settle_poll();
        while sample.angle.cos() < self.config.settle_cos
            || sample.angvel.abs() > self.config.settle_angvel
        {
            debug!(angle = sample.angle, angvel = sample.angvel, "waiting for the pole to settle");
            std::thread::sleep(poll);
            sample = guard.read()?;
        }
        guard.disarm();

        self.tracker.begin();
        let state = sample.to_state();
        self.last_state = Some(state);
        debug!(episode = self.tracker.episode(), ?state, "rig reset");
        Ok(state)
    }

    fn step(&mut self, action: Action) -> Result<Step> {
        if self.closed {
            return Err(PlantError::Closed);
        }
        self.tracker.ensure_steppable()?;
        let fraction = action.fraction(self.config.action_kind)?;
        let pwm = self.pwm_for(action, fraction);
        let threshold = self.config.rules.x_threshold;
        let corrective = self.config.corrective_pwm;

        let mut guard = ZeroCommandGuard::new(&mut self.link);
        guard.send(pwm)?;
        // the first sample absorbs the actuation delay
        guard.read()?;
        let sample = guard.read()?;
        if sample.position > threshold {
            guard.send(-corrective)?;
        } else if sample.position < -threshold {
            guard.send(corrective)?;
        }
        guard.disarm();

        let steps = self.tracker.advance();
        let verdict = self.config.rules.judge(&sample.to_state(), steps);
        let summary = self.tracker.record(&verdict);
        self.last_state = Some(verdict.state);

        debug!(step = steps, pwm, reward = verdict.reward, "rig step");
        if let Some(summary) = &summary {
            if summary.termination == Termination::RailHit {
                warn!(episode = summary.episode, position = sample.position, "out of bound");
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
            state: verdict.state,
            reward: verdict.reward,
            done: verdict.termination.is_some(),
            termination: verdict.termination,
            summary,
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let stop = self.link.send_command(0);
        self.link.close()?;
        stop
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

impl<L: RigLink> Drop for PhysicalPlant<L> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.link.send_command(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Link replaying scripted samples and recording commands
    #[derive(Default)]
    struct ScriptedLink {
        samples: VecDeque<StateSample>,
        commands: Vec<i32>,
        closed: bool,
    }

    impl ScriptedLink {
        fn with_positions(positions: &[f64]) -> Self {
            Self {
                samples: positions
                    .iter()
                    .map(|&position| sample(position, 0.0, 0.0))
                    .collect(),
                ..Self::default()
            }
        }
    }

    fn sample(position: f64, angle: f64, angvel: f64) -> StateSample {
        StateSample {
            time: 0.0,
            position,
            angle,
            linvel: 0.0,
            angvel,
        }
    }

    impl RigLink for ScriptedLink {
        fn read_state(&mut self, _blocking: bool) -> Result<Option<StateSample>> {
            self.samples
                .pop_front()
                .map(Some)
                .ok_or_else(|| PlantError::Protocol("script exhausted".into()))
        }

        fn send_command(&mut self, pwm: i32) -> Result<()> {
            self.commands.push(pwm);
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn config() -> PhysicalConfig {
        PhysicalConfig {
            settle_poll_secs: 0.0,
            ..PhysicalConfig::default()
        }
    }

    #[test]
    fn test_reset_centres_then_settles() {
        let mut link = ScriptedLink::with_positions(&[0.2, 0.1, -0.01]);
        link.samples.push_back(sample(-0.01, 0.3, 0.0));
        link.samples.push_back(sample(-0.01, 0.0, 0.5));
        link.samples.push_back(sample(-0.01, 0.0, 0.0));
        let mut plant = PhysicalPlant::with_link(link, config()).unwrap();

        let state = plant.reset(&ResetOptions::default()).unwrap();
        assert_eq!(state.x, -0.01);
        assert_eq!(plant.link_mut().commands, vec![-50, -50, 0]);
        assert!(plant.link_mut().samples.is_empty());
        assert_eq!(plant.phase(), PlantPhase::Ready);
    }

    #[test]
    fn test_step_reads_twice_and_maps_pwm() {
        let link = ScriptedLink::with_positions(&[0.0, 0.0, 0.0, 0.01, 0.02, 0.03, 0.04]);
        let mut plant = PhysicalPlant::with_link(link, config()).unwrap();
        plant.reset(&ResetOptions::default()).unwrap();

        let step = plant.step(Direction::Positive.into()).unwrap();
        assert_eq!(step.state.x, 0.01);
        let step = plant.step(Direction::Negative.into()).unwrap();
        assert_eq!(step.state.x, 0.03);
        assert!(!step.done);
        assert_eq!(plant.link_mut().commands, vec![0, 130, -130]);
    }

    #[test]
    fn test_rail_sends_corrective_command() {
        let link = ScriptedLink::with_positions(&[0.0, 0.0, 0.2, 0.31]);
        let mut plant = PhysicalPlant::with_link(link, config()).unwrap();
        plant.reset(&ResetOptions::default()).unwrap();

        let step = plant.step(Direction::Positive.into()).unwrap();
        assert!(step.done);
        assert_eq!(step.termination, Some(Termination::RailHit));
        assert_eq!(step.state.x, 0.3);
        assert!(step.reward < -159.0);
        assert_eq!(plant.link_mut().commands, vec![0, 130, -50]);
    }

    #[test]
    fn test_error_stops_motor() {
        let link = ScriptedLink::with_positions(&[0.0, 0.0, 0.0]);
        let mut plant = PhysicalPlant::with_link(link, config()).unwrap();
        plant.reset(&ResetOptions::default()).unwrap();

        let err = plant.step(Direction::Positive.into()).unwrap_err();
        assert!(matches!(err, PlantError::Protocol(_)));
        assert_eq!(plant.link_mut().commands, vec![0, 130, 0]);
    }

    #[test]
    fn test_reset_error_while_centring_stops_motor() {
        let link = ScriptedLink::with_positions(&[0.2, 0.1]);
        let mut plant = PhysicalPlant::with_link(link, config()).unwrap();

        let err = plant.reset(&ResetOptions::default()).unwrap_err();
        assert!(matches!(err, PlantError::Protocol(_)));
        assert_eq!(plant.link_mut().commands, vec![-50, -50, 0]);
        assert_eq!(plant.phase(), PlantPhase::Uninitialized);
    }

    #[test]
    fn test_reset_error_while_settling_stops_motor() {
        let mut link = ScriptedLink::with_positions(&[-0.05, 0.0]);
        link.samples.push_back(sample(0.0, 0.3, 0.0));
        let mut plant = PhysicalPlant::with_link(link, config()).unwrap();

        let err = plant.reset(&ResetOptions::default()).unwrap_err();
        assert!(matches!(err, PlantError::Protocol(_)));
        // centring command, explicit stop, then the stop sent on abort
        assert_eq!(plant.link_mut().commands, vec![50, 0, 0]);
        assert!(plant.last_state().is_none());
    }

    #[test]
    fn test_continuous_pwm_truncates() {
        let link = ScriptedLink::with_positions(&[0.0, 0.0, 0.0, 0.0, 0.0]);
        let config = PhysicalConfig {
            action_kind: ActionKind::Continuous,
            ..config()
        };
        let mut plant = PhysicalPlant::with_link(link, config).unwrap();
        plant.reset(&ResetOptions::default()).unwrap();
        plant.step(Action::Continuous(-0.5)).unwrap();
        assert_eq!(plant.link_mut().commands, vec![0, -65]);
    }

    #[test]
    fn test_close_stops_and_closes() {
        let link = ScriptedLink::default();
        let mut plant = PhysicalPlant::with_link(link, config()).unwrap();
        plant.close().unwrap();
        assert!(plant.link_mut().closed);
        assert_eq!(plant.link_mut().commands, vec![0]);
        assert!(matches!(
            plant.step(Direction::Zero.into()),
            Err(PlantError::Closed)
        ));
    }

    #[test]
    fn test_invalid_config() {
        let config = PhysicalConfig {
            max_pwm: 300,
            ..PhysicalConfig::default()
        };
        assert!(matches!(config.validate(), Err(PlantError::Config(_))));
    }
}
