//! Episode rules and bookkeeping shared by every plant

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::{reward, CartPoleState, PlantError, Result, RewardKind};

/// Lifecycle phase of a plant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlantPhase {
    /// Constructed, never reset
    Uninitialized,
    /// Reset, no step taken yet
    Ready,
    /// At least one non-terminal step taken
    Running,
    /// Last step ended the episode
    Terminal,
}

/// Why an episode ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The cart reached a position rail (penalized)
    RailHit,
    /// The step budget was used up
    StepBudget,
    /// The pole spun faster than the rate limit
    RateLimit,
}

/// Termination and reward rules of an episode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeRules {
    /// Position rail (m)
    pub x_threshold: f64,
    /// Steps per episode
    pub max_steps: usize,
    /// Angular velocity limit (rad/s)
    pub theta_dot_limit: f64,
    /// Subtracted from the reward of a rail-hit step
    pub rail_penalty: f64,
    /// Reward signal
    pub reward: RewardKind,
}

impl Default for EpisodeRules {
    fn default() -> Self {
        Self {
            x_threshold: 0.36,
            max_steps: 800,
            theta_dot_limit: 100.0,
            rail_penalty: 400.0,
            reward: RewardKind::default(),
        }
    }
}

/// Outcome of judging one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    /// State with `x` clamped to the rails
    pub state: CartPoleState,
    /// Reward including the rail penalty
    pub reward: f64,
    /// Set when the episode ends on this step
    pub termination: Option<Termination>,
}

impl EpisodeRules {
    /// Check the rules for consistency
    pub fn validate(&self) -> Result<()> {
        if !(self.x_threshold.is_finite() && self.x_threshold > 0.0) {
            return Err(PlantError::Config(format!(
                "x_threshold must be positive, got {}",
                self.x_threshold
            )));
        }
        if self.max_steps == 0 {
            return Err(PlantError::Config("max_steps must be at least 1".into()));
        }
        if self.theta_dot_limit.is_nan() || self.theta_dot_limit <= 0.0 {
            return Err(PlantError::Config(format!(
                "theta_dot_limit must be positive, got {}",
                self.theta_dot_limit
            )));
        }
        Ok(())
    }

    /// Judge the state reached after `steps` steps of the episode
    #[must_use]
    pub fn judge(&self, state: &CartPoleState, steps: usize) -> Verdict {
        let rail_hit = state.x.abs() >= self.x_threshold;
        let termination = if rail_hit {
            Some(Termination::RailHit)
        } else if steps >= self.max_steps {
            Some(Termination::StepBudget)
        } else if state.theta_dot.abs() > self.theta_dot_limit {
            Some(Termination::RateLimit)
        } else {
            None
        };

        let state = state.with_clamped_x(self.x_threshold);
        let mut value = reward(self.reward, state.x, state.cos_theta, state.sin_theta);
        if rail_hit {
            value -= self.rail_penalty;
        }

        Verdict {
            state,
            reward: value,
            termination,
        }
    }
}

/// Summary of a finished episode, handed to external writers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    /// Episode index (1-based)
    pub episode: u64,
    /// Sum of rewards
    pub episode_return: f64,
    /// Number of steps
    pub length: usize,
    /// Seconds since the plant was created
    pub elapsed_time: f64,
    /// Why it ended
    pub termination: Termination,
    /// Wall-clock end time
    pub finished_at: DateTime<Utc>,
}

/// Source of elapsed time for episode reports
#[derive(Debug, Clone, Copy)]
pub enum EpisodeClock {
    /// Simulated seconds: steps taken times the control period
    Simulated {
        /// Control period (s)
        period: f64,
    },
    /// Wall-clock seconds since the plant was created
    WallClock {
        /// Creation instant
        started: Instant,
    },
}

impl EpisodeClock {
    /// Wall clock starting now
    #[must_use]
    pub fn wall_clock() -> Self {
        Self::WallClock {
            started: Instant::now(),
        }
    }
}

/// Step counters, return and lifecycle phase of the current episode
#[derive(Debug, Clone)]
pub struct EpisodeTracker {
    phase: PlantPhase,
    episode: u64,
    steps: usize,
    total_steps: u64,
    episode_return: f64,
    clock: EpisodeClock,
}

impl EpisodeTracker {
    /// Create a tracker in the `Uninitialized` phase
    #[must_use]
    pub fn new(clock: EpisodeClock) -> Self {
        Self {
            phase: PlantPhase::Uninitialized,
            episode: 0,
            steps: 0,
            total_steps: 0,
            episode_return: 0.0,
            clock,
        }
    }

    /// Start a new episode, folding the previous one into the totals
    pub fn begin(&mut self) {
        self.total_steps += self.steps as u64;
        self.steps = 0;
        self.episode_return = 0.0;
        self.episode += 1;
        self.phase = PlantPhase::Ready;
        debug!(episode = self.episode, total_steps = self.total_steps, "episode started");
    }

    /// Fail unless a step is allowed in the current phase
    pub fn ensure_steppable(&self) -> Result<()> {
        match self.phase {
            PlantPhase::Ready | PlantPhase::Running => Ok(()),
            phase => Err(PlantError::ResetRequired(phase)),
        }
    }

    /// Count a step; returns the step number within the episode
    pub fn advance(&mut self) -> usize {
        self.steps += 1;
        self.steps
    }

    /// Record the verdict of the step counted by [`advance`](Self::advance)
    pub fn record(&mut self, verdict: &Verdict) -> Option<EpisodeSummary> {
        self.episode_return += verdict.reward;
        let termination = match verdict.termination {
            None => {
                self.phase = PlantPhase::Running;
                return None;
            }
            Some(t) => t,
        };

        self.phase = PlantPhase::Terminal;
        debug!(
            episode = self.episode,
            length = self.steps,
            episode_return = self.episode_return,
            ?termination,
            "episode ended"
        );
        Some(EpisodeSummary {
            episode: self.episode,
            episode_return: self.episode_return,
            length: self.steps,
            elapsed_time: self.elapsed_time(),
            termination,
            finished_at: Utc::now(),
        })
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> PlantPhase {
        self.phase
    }

    /// Index of the current episode (0 before the first reset)
    #[must_use]
    pub fn episode(&self) -> u64 {
        self.episode
    }

    /// Steps taken in the current episode
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Steps taken since creation
    #[must_use]
    pub fn total_steps(&self) -> u64 {
        self.total_steps + self.steps as u64
    }

    /// Return accumulated so far in the current episode
    #[must_use]
    pub fn episode_return(&self) -> f64 {
        self.episode_return
    }

    /// Seconds elapsed according to the tracker's clock
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn elapsed_time(&self) -> f64 {
        match self.clock {
            EpisodeClock::Simulated { period } => self.total_steps() as f64 * period,
            EpisodeClock::WallClock { started } => started.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    fn rules() -> EpisodeRules {
        EpisodeRules {
            x_threshold: 0.3,
            max_steps: 10,
            theta_dot_limit: 13.0,
            rail_penalty: 2.0,
            reward: RewardKind::Dense { kx: 5.0 },
        }
    }

    #[test]
    fn test_rail_hit_clamps_and_penalizes() {
        let state = CartPoleState::from_angle(0.4, 1.0, 0.0, 0.0);
        let verdict = rules().judge(&state, 3);
        assert_eq!(verdict.termination, Some(Termination::RailHit));
        assert_eq!(verdict.state.x, 0.3);
        assert_abs_diff_eq!(verdict.reward, -5.0 * 0.09 / 2.0 - 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rail_wins_over_budget_and_rate() {
        let state = CartPoleState::from_angle(-0.3, 0.0, 0.0, 20.0);
        let verdict = rules().judge(&state, 10);
        assert_eq!(verdict.termination, Some(Termination::RailHit));
    }

    #[test]
    fn test_budget_and_rate() {
        let calm = CartPoleState::default();
        assert_eq!(rules().judge(&calm, 9).termination, None);
        assert_eq!(rules().judge(&calm, 10).termination, Some(Termination::StepBudget));

        let spinning = CartPoleState::from_angle(0.0, 0.0, 0.0, -13.5);
        assert_eq!(rules().judge(&spinning, 1).termination, Some(Termination::RateLimit));
    }

    #[test]
    fn test_tracker_lifecycle() {
        let mut tracker = EpisodeTracker::new(EpisodeClock::Simulated { period: 0.05 });
        assert!(matches!(
            tracker.ensure_steppable(),
            Err(PlantError::ResetRequired(PlantPhase::Uninitialized))
        ));

        tracker.begin();
        assert_eq!(tracker.episode(), 1);
        tracker.ensure_steppable().unwrap();

        let r = rules();
        let mut summary = None;
        while summary.is_none() {
            let steps = tracker.advance();
            summary = tracker.record(&r.judge(&CartPoleState::default(), steps));
        }
        let summary = summary.unwrap();
        assert_eq!(summary.length, 10);
        assert_eq!(summary.termination, Termination::StepBudget);
        assert_abs_diff_eq!(summary.elapsed_time, 0.5, epsilon = 1e-12);
        assert_eq!(tracker.phase(), PlantPhase::Terminal);
        assert!(tracker.ensure_steppable().is_err());

        tracker.begin();
        assert_eq!(tracker.episode(), 2);
        assert_eq!(tracker.steps(), 0);
        assert_eq!(tracker.total_steps(), 10);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_tracker_logs_episode_boundaries() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut tracker = EpisodeTracker::new(EpisodeClock::Simulated { period: 0.05 });
            tracker.begin();
            let r = rules();
            let steps = tracker.advance();
            let rail = CartPoleState::from_angle(0.5, 0.0, 0.0, 0.0);
            assert!(tracker.record(&r.judge(&rail, steps)).is_some());
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("episode started"), "{output}");
        assert!(output.contains("episode ended"), "{output}");
        assert!(output.contains("RailHit"), "{output}");
    }

    #[test]
    fn test_invalid_rules() {
        let mut bad = rules();
        bad.max_steps = 0;
        assert!(matches!(bad.validate(), Err(PlantError::Config(_))));
        assert!(rules().validate().is_ok());
    }
}
