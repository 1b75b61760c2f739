//! Plant wrappers

use serde::Serialize;
use tracing::debug;

use pendule_rl_core::{
    Action, ActionKind, CartPoleState, EpisodeSummary, Plant, PlantPhase, ResetOptions, Result,
    Step,
};

/// Episode statistics collected by a [`Monitor`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorRecord {
    /// Return of each finished episode
    pub episode_rewards: Vec<f64>,
    /// Length of each finished episode
    pub episode_lengths: Vec<usize>,
    /// Elapsed plant time at the end of each episode
    pub episode_times: Vec<f64>,
}

/// Wrapper that records every finished episode of the inner plant
pub struct Monitor<P> {
    /// Inner plant
    pub plant: P,
    record: MonitorRecord,
    summaries: Vec<EpisodeSummary>,
}

impl<P: Plant> Monitor<P> {
    /// Wrap a plant
    pub fn new(plant: P) -> Self {
        Self {
            plant,
            record: MonitorRecord::default(),
            summaries: Vec::new(),
        }
    }

    /// Collected statistics
    #[must_use]
    pub fn record(&self) -> &MonitorRecord {
        &self.record
    }

    /// Full summaries, in completion order
    #[must_use]
    pub fn summaries(&self) -> &[EpisodeSummary] {
        &self.summaries
    }

    /// Mean return over the last `window` episodes
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_return(&self, window: usize) -> Option<f64> {
        let rewards = &self.record.episode_rewards;
        let recent = &rewards[rewards.len().saturating_sub(window)..];
        if recent.is_empty() {
            None
        } else {
            Some(recent.iter().sum::<f64>() / recent.len() as f64)
        }
    }

    /// Collected statistics as JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.record)?)
    }

    /// Unwrap the inner plant
    pub fn into_inner(self) -> P {
        self.plant
    }
}

impl<P: Plant> Plant for Monitor<P> {
    fn action_kind(&self) -> ActionKind {
        self.plant.action_kind()
    }

    fn reset(&mut self, options: &ResetOptions) -> Result<CartPoleState> {
        self.plant.reset(options)
    }

    fn step(&mut self, action: Action) -> Result<Step> {
        let step = self.plant.step(action)?;
        if let Some(summary) = &step.summary {
            debug!(episode = summary.episode, "monitor recorded episode");
            self.record.episode_rewards.push(summary.episode_return);
            self.record.episode_lengths.push(summary.length);
            self.record.episode_times.push(summary.elapsed_time);
            self.summaries.push(summary.clone());
        }
        Ok(step)
    }

    fn close(&mut self) -> Result<()> {
        self.plant.close()
    }

    fn phase(&self) -> PlantPhase {
        self.plant.phase()
    }

    fn episode_index(&self) -> u64 {
        self.plant.episode_index()
    }

    fn elapsed_time(&self) -> f64 {
        self.plant.elapsed_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SimConfig, SimulatedPlant};
    use pendule_rl_core::Direction;

    #[test]
    fn test_monitor_collects_episodes() {
        let plant = SimulatedPlant::new(SimConfig::default().with_max_steps(5).seeded(0)).unwrap();
        let mut monitor = Monitor::new(plant);
        assert_eq!(monitor.mean_return(10), None);

        for _ in 0..3 {
            monitor.reset(&ResetOptions::default()).unwrap();
            while !monitor.step(Direction::Zero.into()).unwrap().done {}
        }

        let record = monitor.record();
        assert_eq!(record.episode_lengths, vec![5, 5, 5]);
        for (time, expected) in record.episode_times.iter().zip([0.25, 0.5, 0.75]) {
            assert!((time - expected).abs() < 1e-12);
        }
        assert_eq!(monitor.mean_return(2), Some(0.0));
        assert_eq!(monitor.summaries()[2].episode, 3);
        assert!(monitor.to_json().unwrap().contains("episode_lengths"));
    }
}
