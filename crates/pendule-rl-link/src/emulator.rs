//! Emulator of the rig's low-level interface
//!
//! Serves the controller's two feeds as newline-delimited TCP
//! ([`Transport::Tcp`]): state lines are published every sampling period to
//! every subscriber (freshest only), command lines set the PWM applied to a
//! simulated cart-pole. A missed
//! command watchdog and soft position limits behave like the firmware's.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use pendule_rl_core::{AngleUnwrapper, CartPoleState, PlantError, Result};
use pendule_rl_env::{IntegratorKind, Perturbation, PhysicalParameters, RigidBodyIntegrator};

use crate::link::{LinkConfig, Transport};
use crate::protocol::{clamp_pwm, parse_command, StateSample, PWM_LIMIT};

/// Configuration of a [`RigEmulator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Interface to bind
    pub host: String,
    /// State feed port, 0 for any free port
    pub state_port: u16,
    /// Command port, 0 for any free port
    pub command_port: u16,
    /// Sampling period (s)
    pub sample_period_secs: f64,
    /// Beyond this position, PWM pushing further out is zeroed (m)
    pub soft_limit: f64,
    /// Mechanical end of the track (m)
    pub track_limit: f64,
    /// Simulated rig
    pub params: PhysicalParameters,
    /// Integration scheme for one sampling period
    pub integrator: IntegratorKind,
    /// State at start-up
    pub initial_state: CartPoleState,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            state_port: 0,
            command_port: 0,
            sample_period_secs: 0.025,
            soft_limit: 0.35,
            track_limit: 0.42,
            params: PhysicalParameters::default(),
            integrator: IntegratorKind::RungeKutta4 { substeps: 2 },
            initial_state: CartPoleState::default(),
        }
    }
}

impl EmulatorConfig {
    /// Check timing and limits
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_period_secs.is_finite() && self.sample_period_secs > 0.0) {
            return Err(PlantError::Config(format!(
                "sample_period_secs must be positive, got {}",
                self.sample_period_secs
            )));
        }
        if !(self.soft_limit > 0.0 && self.soft_limit <= self.track_limit) {
            return Err(PlantError::Config(format!(
                "need 0 < soft_limit <= track_limit, got {} and {}",
                self.soft_limit, self.track_limit
            )));
        }
        Ok(())
    }

    /// Commands missed before the watchdog zeroes the PWM
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn max_missed_commands(&self) -> u32 {
        1 + (1.0 / self.sample_period_secs) as u32
    }
}

/// Snapshot of the emulated rig
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmulatorStatus {
    /// Last sample published
    pub sample: StateSample,
    /// Last command received
    pub last_command: i32,
    /// PWM applied during the last period
    pub applied_pwm: i32,
    /// Commands received since start
    pub commands_received: u64,
}

/// Handle on a running emulator
///
/// Dropping the handle stops the emulator.
#[derive(Debug)]
pub struct EmulatorHandle {
    state_addr: SocketAddr,
    command_addr: SocketAddr,
    status: Arc<Mutex<EmulatorStatus>>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl EmulatorHandle {
    /// Address of the state feed
    #[must_use]
    pub fn state_addr(&self) -> SocketAddr {
        self.state_addr
    }

    /// Address of the command port
    #[must_use]
    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    /// Link configuration pointing at this emulator
    #[must_use]
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            host: self.state_addr.ip().to_string(),
            state_port: self.state_addr.port(),
            command_port: self.command_addr.port(),
            transport: Transport::Tcp,
            ..LinkConfig::default()
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> EmulatorStatus {
        *self.status.lock()
    }

    /// Last command received
    #[must_use]
    pub fn last_command(&self) -> i32 {
        self.status.lock().last_command
    }

    /// Stop the emulator and wait for its thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("emulator thread panicked");
            }
        }
    }
}

impl Drop for EmulatorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Emulated low-level interface
pub struct RigEmulator;

impl RigEmulator {
    /// Bind both ports and start the emulator on its own runtime thread
    pub fn spawn(config: EmulatorConfig) -> Result<EmulatorHandle> {
        config.validate()?;
        let integrator = RigidBodyIntegrator::new(config.params, config.integrator)?;

        let state_listener = StdTcpListener::bind((config.host.as_str(), config.state_port))?;
        let command_listener = StdTcpListener::bind((config.host.as_str(), config.command_port))?;
        state_listener.set_nonblocking(true)?;
        command_listener.set_nonblocking(true)?;
        let state_addr = state_listener.local_addr()?;
        let command_addr = command_listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("pendule-emulator")
            .enable_all()
            .build()?;

        let initial = sample_of(&config.initial_state, config.initial_state.theta(), 0.0);
        let status = Arc::new(Mutex::new(EmulatorStatus {
            sample: initial,
            last_command: 0,
            applied_pwm: 0,
            commands_received: 0,
        }));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let thread = {
            let status = Arc::clone(&status);
            thread::Builder::new()
                .name("pendule-emulator-main".into())
                .spawn(move || {
                    runtime.block_on(async move {
                        let (state_tx, _) = watch::channel(initial.to_string());
                        let (command_tx, command_rx) = mpsc::unbounded_channel();

                        let listeners = TcpListener::from_std(state_listener)
                            .and_then(|s| Ok((s, TcpListener::from_std(command_listener)?)));
                        let (state_listener, command_listener) = match listeners {
                            Ok(listeners) => listeners,
                            Err(e) => {
                                error!(error = %e, "emulator cannot register listeners");
                                return;
                            }
                        };

                        tokio::spawn(serve_states(state_listener, state_tx.clone()));
                        tokio::spawn(serve_commands(command_listener, command_tx));

                        tokio::select! {
                            () = run_physics(config, integrator, state_tx, command_rx, status) => {}
                            _ = shutdown_rx => debug!("emulator shutting down"),
                        }
                    });
                    runtime.shutdown_timeout(Duration::from_millis(100));
                })?
        };

        info!(%state_addr, %command_addr, "rig emulator listening");
        Ok(EmulatorHandle {
            state_addr,
            command_addr,
            status,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

fn sample_of(state: &CartPoleState, angle: f64, time: f64) -> StateSample {
    StateSample {
        time,
        position: state.x,
        angle,
        linvel: state.x_dot,
        angvel: state.theta_dot,
    }
}

async fn serve_states(listener: TcpListener, states: watch::Sender<String>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "state feed accept failed");
                continue;
            }
        };
        debug!(%peer, "state subscriber connected");
        let rx = states.subscribe();
        tokio::spawn(publish_states(stream, rx));
    }
}

async fn publish_states(mut stream: TcpStream, mut rx: watch::Receiver<String>) {
    let _ = stream.set_nodelay(true);
    loop {
        let line = format!("{}\n", *rx.borrow_and_update());
        if stream.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

async fn serve_commands(listener: TcpListener, commands: mpsc::UnboundedSender<i32>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "command accept failed");
                continue;
            }
        };
        debug!(%peer, "command publisher connected");
        let commands = commands.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_command(&line) {
                    Ok(pwm) => {
                        if commands.send(pwm).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed command ignored"),
                }
            }
        });
    }
}

async fn run_physics(
    config: EmulatorConfig,
    integrator: RigidBodyIntegrator,
    states: watch::Sender<String>,
    mut commands: mpsc::UnboundedReceiver<i32>,
    status: Arc<Mutex<EmulatorStatus>>,
) {
    let period = config.sample_period_secs;
    let max_missed = config.max_missed_commands();
    let nominal = Perturbation::nominal(integrator.params());

    let mut state = config.initial_state;
    let mut unwrapper = AngleUnwrapper::new();
    unwrapper.update_state(&state);
    let mut time = 0.0;
    let mut pwm = 0;
    let mut missed = 0;

    let mut ticker = interval(Duration::from_secs_f64(period));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let fraction = f64::from(pwm) / f64::from(PWM_LIMIT);
        state = match integrator.advance(&state, fraction, &nominal, period) {
            Ok(next) => next,
            Err(e) => {
                error!(error = %e, "emulated rig diverged");
                return;
            }
        };
        if state.x.abs() > config.track_limit {
            state.x = state.x.clamp(-config.track_limit, config.track_limit);
            state.x_dot = 0.0;
        }
        time += period;
        let sample = sample_of(&state, unwrapper.update_state(&state), time);
        states.send_replace(sample.to_string());

        let mut received = None;
        let mut count = 0;
        while let Ok(command) = commands.try_recv() {
            received = Some(command);
            count += 1;
        }
        let mut snapshot = status.lock();
        snapshot.commands_received += count;
        match received {
            Some(command) => {
                pwm = clamp_pwm(command);
                missed = 0;
                snapshot.last_command = pwm;
            }
            None => {
                missed += 1;
                if missed > max_missed && pwm != 0 {
                    warn!(missed, "too many missed commands, stopping the motor");
                    pwm = 0;
                }
            }
        }

        if (state.x > config.soft_limit && pwm > 0) || (state.x < -config.soft_limit && pwm < 0) {
            pwm = 0;
        }
        snapshot.sample = sample;
        snapshot.applied_pwm = pwm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchdog_threshold() {
        let config = EmulatorConfig::default();
        assert_eq!(config.max_missed_commands(), 41);
    }

    #[test]
    fn test_invalid_limits() {
        let config = EmulatorConfig {
            soft_limit: 0.5,
            track_limit: 0.4,
            ..EmulatorConfig::default()
        };
        assert!(matches!(config.validate(), Err(PlantError::Config(_))));
    }

    #[test]
    fn test_spawn_and_shutdown() {
        let handle = RigEmulator::spawn(EmulatorConfig::default()).unwrap();
        assert_ne!(handle.state_addr().port(), 0);
        assert_ne!(handle.state_addr(), handle.command_addr());
        assert_eq!(handle.last_command(), 0);
        handle.shutdown();
    }
}
