//! Example: stabilize the pole with a linear state feedback
//!
//! Without arguments the controller runs against a local rig emulator
//! started with the pole just off upright. Pass a link configuration file
//! to drive a real rig instead.

use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pendule_rl_core::CartPoleState;
use pendule_rl_link::{
    clamp_pwm, EmulatorConfig, HardwareLink, LinkConfig, RigEmulator, StateSample,
};

/// Feedback gains on position, linear velocity, angle error and angular velocity
const GAINS: [f64; 4] = [-31.463_082_58, -817.632_403_18, 2_230.151_057_79, 436.329_521_45];

/// Angle error beyond which the controller lets go (rad)
const CAPTURE_WINDOW: f64 = 0.1;

/// Cart travel allowed to the controller (m)
const MAX_POSITION: f64 = 0.25;

#[allow(clippy::cast_possible_truncation)]
fn control(sample: &StateSample) -> i32 {
    let error = sample.angle - std::f64::consts::PI;
    if error.abs() > CAPTURE_WINDOW {
        return 0;
    }
    let [kp, kpd, kt, ktd] = GAINS;
    let pwm = -kp * sample.position - kpd * sample.linvel - kt * error - ktd * sample.angvel;
    let pwm = clamp_pwm(pwm as i32);

    // never push further past the soft limit
    if (sample.position > MAX_POSITION && pwm > 0) || (sample.position < -MAX_POSITION && pwm < 0)
    {
        0
    } else {
        pwm
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let (config, emulator) = match std::env::args().nth(1) {
        Some(path) => (LinkConfig::from_json_file(path)?, None),
        None => {
            let upright = CartPoleState::from_angle(0.0, 0.0, std::f64::consts::PI - 0.05, 0.0);
            let emulator = RigEmulator::spawn(EmulatorConfig {
                initial_state: upright,
                ..EmulatorConfig::default()
            })?;
            (emulator.link_config(), Some(emulator))
        }
    };

    let mut link = HardwareLink::connect(config)?;
    let samples = 400;
    let mut captured = 0;
    for _ in 0..samples {
        let Some(sample) = link.read_state(true)? else {
            continue;
        };
        let pwm = control(&sample);
        if (sample.angle - std::f64::consts::PI).abs() <= CAPTURE_WINDOW {
            captured += 1;
        }
        link.send_command(pwm)?;
    }
    link.send_command(0)?;
    std::thread::sleep(Duration::from_millis(50));

    if let Some(sample) = link.last_sample() {
        info!(%sample, "final state");
    }
    let (received, dropped) = link.stats();
    println!("Samples inside the capture window: {captured}/{samples}");
    println!("State messages received: {received}, overwritten unread: {dropped}");

    link.close()?;
    if let Some(emulator) = emulator {
        emulator.shutdown();
    }
    Ok(())
}
