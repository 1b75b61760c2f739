//! Example: random actions on a simulated cart-pole

use rand::Rng;
use tracing_subscriber::EnvFilter;

use pendule_rl_env::{
    list_presets, make_seeded_plant, Action, Monitor, Plant, ResetMode, ResetOptions,
};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let preset = std::env::args().nth(1).unwrap_or_else(|| "cartpole-rk4-noisy".into());
    println!("Available presets: {}", list_presets().join(", "));

    let plant = make_seeded_plant(&preset, 42)?;
    let mut plant = Monitor::new(plant);
    let mut rng = rand::thread_rng();

    // Run episodes
    let num_episodes = 10;
    for _ in 0..num_episodes {
        plant.reset(&ResetOptions::with_mode(ResetMode::Random))?;
        loop {
            let action = Action::from_ordinal(rng.gen_range(0..3))?;
            let step = plant.step(action)?;
            if step.done {
                break;
            }
        }
    }

    let record = plant.record();
    for (i, (reward, length)) in record
        .episode_rewards
        .iter()
        .zip(&record.episode_lengths)
        .enumerate()
    {
        println!("Episode {}: Total Reward = {reward:.2}, Steps = {length}", i + 1);
    }
    if let Some(mean) = plant.mean_return(num_episodes) {
        println!("\nAverage Reward over {num_episodes} episodes: {mean:.2}");
    }
    println!("Simulated time: {:.1} s", plant.elapsed_time());

    plant.close()?;
    Ok(())
}
