//! Duplex link to the rig's low-level controller
//!
//! The controller publishes state messages and subscribes to commands over
//! ZeroMQ. Plain newline-delimited TCP carries the same messages for the
//! [`RigEmulator`](crate::RigEmulator).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use pendule_rl_core::{PlantError, Result};

use crate::protocol::{clamp_pwm, format_command, StateSample};
use crate::slot::StateSlot;

/// Interval between two handshake polls
const HANDSHAKE_POLL: Duration = Duration::from_secs(1);

/// Read timeout of the state feed; bounds how long the reader thread
/// takes to notice a close
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Message transport spoken by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// ZeroMQ: conflating SUB for states, PUB for commands
    #[default]
    Zmq,
    /// Newline-delimited text over TCP
    Tcp,
}

/// Endpoints and timing of the link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Message transport
    pub transport: Transport,
    /// Controller host
    pub host: String,
    /// Port publishing state messages
    pub state_port: u16,
    /// Port receiving command messages
    pub command_port: u16,
    /// Handshake timeout (s); zero or negative waits forever
    pub timeout_secs: f64,
    /// Delay between reconnection attempts (s)
    pub reconnect_secs: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            host: "127.0.0.1".into(),
            state_port: 10001,
            command_port: 10002,
            timeout_secs: 10.0,
            reconnect_secs: 0.1,
        }
    }
}

impl LinkConfig {
    /// Load and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check host and timings
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(PlantError::Config("host must not be empty".into()));
        }
        if !self.timeout_secs.is_finite() {
            return Err(PlantError::Config(format!(
                "timeout_secs must be finite, got {}",
                self.timeout_secs
            )));
        }
        if !(self.reconnect_secs.is_finite() && self.reconnect_secs >= 0.0) {
            return Err(PlantError::Config(format!(
                "reconnect_secs must be >= 0, got {}",
                self.reconnect_secs
            )));
        }
        Ok(())
    }

    /// `host:state_port`
    #[must_use]
    pub fn state_endpoint(&self) -> String {
        format!("{}:{}", self.host, self.state_port)
    }

    /// `host:command_port`
    #[must_use]
    pub fn command_endpoint(&self) -> String {
        format!("{}:{}", self.host, self.command_port)
    }

    fn reconnect_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.reconnect_secs).unwrap_or(Duration::from_millis(100))
    }
}

/// Minimal duplex interface a physical plant needs from its link
pub trait RigLink: Send {
    /// Take the freshest state sample; `None` only when non-blocking and idle
    fn read_state(&mut self, blocking: bool) -> Result<Option<StateSample>>;

    /// Send a PWM command, fire-and-forget
    fn send_command(&mut self, pwm: i32) -> Result<()>;

    /// Release the link
    fn close(&mut self) -> Result<()>;
}

/// Closes a [`HardwareLink`] from another thread
#[derive(Debug, Clone)]
pub struct CloseHandle {
    slot: Arc<StateSlot<String>>,
}

impl CloseHandle {
    /// Close the link, unblocking any pending read
    pub fn close(&self) {
        self.slot.close();
    }
}

fn resolve(endpoint: &str) -> Result<SocketAddr> {
    endpoint
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| PlantError::Config(format!("cannot resolve {endpoint}")))
}

fn zmq_error(e: zmq::Error) -> PlantError {
    PlantError::Io(std::io::Error::other(e))
}

/// Outgoing half of the link
enum CommandChannel {
    Zmq(zmq::Socket),
    Tcp {
        addr: SocketAddr,
        delay: Duration,
        stream: Option<TcpStream>,
    },
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zmq(_) => f.write_str("Zmq"),
            Self::Tcp { addr, stream, .. } => f
                .debug_struct("Tcp")
                .field("addr", addr)
                .field("connected", &stream.is_some())
                .finish(),
        }
    }
}

impl CommandChannel {
    /// At-most-once send; failures are logged and the message dropped
    fn send(&mut self, pwm: i32) {
        match self {
            Self::Zmq(socket) => {
                let message = clamp_pwm(pwm).to_string();
                if let Err(e) = socket.send(message.as_bytes(), zmq::DONTWAIT) {
                    warn!(pwm, error = %e, "command publish failed, command dropped");
                }
            }
            Self::Tcp {
                addr,
                delay,
                stream,
            } => {
                if stream.is_none() {
                    match TcpStream::connect_timeout(addr, *delay) {
                        Ok(s) => {
                            let _ = s.set_nodelay(true);
                            *stream = Some(s);
                        }
                        Err(e) => {
                            warn!(pwm, error = %e, "command channel unavailable, command dropped");
                            return;
                        }
                    }
                }
                if let Some(s) = stream {
                    if let Err(e) = s.write_all(format_command(pwm).as_bytes()) {
                        warn!(pwm, error = %e, "command write failed, command dropped");
                        *stream = None;
                    }
                }
            }
        }
    }
}

/// Link to the low-level controller
///
/// A reader thread keeps the most recent state message in a conflating
/// slot. Over TCP it reconnects whenever the state connection drops and the
/// command connection is re-opened lazily on send; ZeroMQ handles both on
/// its own.
#[derive(Debug)]
pub struct HardwareLink {
    config: LinkConfig,
    command: Option<CommandChannel>,
    slot: Arc<StateSlot<String>>,
    reader: Option<JoinHandle<()>>,
    last_sample: Option<StateSample>,
}

impl HardwareLink {
    /// Open both channels and wait for the first state message
    ///
    /// Polls once per second until a message arrives or `timeout_secs`
    /// elapses.
    pub fn connect(config: LinkConfig) -> Result<Self> {
        config.validate()?;
        let slot = Arc::new(StateSlot::new());
        let (command, reader) = match config.transport {
            Transport::Zmq => Self::open_zmq(&config, &slot)?,
            Transport::Tcp => Self::open_tcp(&config, &slot)?,
        };

        let mut link = Self {
            config,
            command: Some(command),
            slot,
            reader: Some(reader),
            last_sample: None,
        };
        link.handshake()?;
        info!(
            endpoint = %link.config.state_endpoint(),
            transport = ?link.config.transport,
            "connected to rig"
        );
        Ok(link)
    }

    fn open_zmq(
        config: &LinkConfig,
        slot: &Arc<StateSlot<String>>,
    ) -> Result<(CommandChannel, JoinHandle<()>)> {
        let context = zmq::Context::new();
        let timeout_ms = i32::try_from(READ_TIMEOUT.as_millis()).unwrap_or(i32::MAX);

        let state = context.socket(zmq::SUB).map_err(zmq_error)?;
        state.set_conflate(true).map_err(zmq_error)?;
        state.set_rcvtimeo(timeout_ms).map_err(zmq_error)?;
        state.set_linger(0).map_err(zmq_error)?;
        state.set_subscribe(b"").map_err(zmq_error)?;
        state
            .connect(&format!("tcp://{}", config.state_endpoint()))
            .map_err(zmq_error)?;

        let command = context.socket(zmq::PUB).map_err(zmq_error)?;
        command.set_linger(0).map_err(zmq_error)?;
        command
            .connect(&format!("tcp://{}", config.command_endpoint()))
            .map_err(zmq_error)?;

        let slot = Arc::clone(slot);
        let reader = thread::Builder::new()
            .name("pendule-state-reader".into())
            .spawn(move || zmq_reader_loop(&state, &slot))?;
        Ok((CommandChannel::Zmq(command), reader))
    }

    fn open_tcp(
        config: &LinkConfig,
        slot: &Arc<StateSlot<String>>,
    ) -> Result<(CommandChannel, JoinHandle<()>)> {
        let state_addr = resolve(&config.state_endpoint())?;
        let command_addr = resolve(&config.command_endpoint())?;
        let delay = config.reconnect_delay();

        let slot = Arc::clone(slot);
        let reader = thread::Builder::new()
            .name("pendule-state-reader".into())
            .spawn(move || tcp_reader_loop(state_addr, &slot, delay))?;

        let command = CommandChannel::Tcp {
            addr: command_addr,
            delay,
            stream: TcpStream::connect_timeout(&command_addr, delay).ok(),
        };
        Ok((command, reader))
    }

    fn handshake(&mut self) -> Result<()> {
        let started = Instant::now();
        let limit = (self.config.timeout_secs > 0.0).then(|| {
            Duration::try_from_secs_f64(self.config.timeout_secs).unwrap_or(Duration::MAX)
        });

        loop {
            let wait = match limit {
                Some(limit) => {
                    let remaining = limit.saturating_sub(started.elapsed());
                    if remaining.is_zero() {
                        let _ = self.close();
                        return Err(PlantError::ConnectionTimeout {
                            endpoint: self.config.state_endpoint(),
                            timeout_secs: self.config.timeout_secs,
                        });
                    }
                    remaining.min(HANDSHAKE_POLL)
                }
                None => HANDSHAKE_POLL,
            };
            if self.slot.wait_available(wait)? {
                return Ok(());
            }
            debug!(
                endpoint = %self.config.state_endpoint(),
                waited = started.elapsed().as_secs_f64(),
                "waiting for the rig"
            );
        }
    }

    /// Configuration of the link
    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Handle closing this link from another thread
    #[must_use]
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Most recent sample returned by [`read_state`](Self::read_state)
    #[must_use]
    pub fn last_sample(&self) -> Option<StateSample> {
        self.last_sample
    }

    /// Statistics of the state feed: (received, overwritten unread)
    #[must_use]
    pub fn stats(&self) -> (usize, usize) {
        self.slot.stats()
    }

    /// Take the freshest state message
    ///
    /// Blocking waits for a message newer than the last one read;
    /// non-blocking returns `None` when none is queued.
    pub fn read_state(&mut self, blocking: bool) -> Result<Option<StateSample>> {
        let line = if blocking {
            Some(self.slot.take_blocking()?)
        } else {
            self.slot.try_take()?
        };
        let sample = line.as_deref().map(StateSample::parse).transpose()?;
        if sample.is_some() {
            self.last_sample = sample;
        }
        Ok(sample)
    }

    /// Send a PWM command, clamped to the driver range
    ///
    /// At-most-once: a failed send drops the message.
    pub fn send_command(&mut self, pwm: i32) -> Result<()> {
        if self.slot.is_closed() {
            return Err(PlantError::Closed);
        }
        match &mut self.command {
            Some(command) => {
                command.send(pwm);
                Ok(())
            }
            None => Err(PlantError::Closed),
        }
    }

    /// Close both channels and stop the reader thread
    pub fn close(&mut self) -> Result<()> {
        self.slot.close();
        self.command = None;
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("state reader thread panicked");
            }
        }
        Ok(())
    }
}

impl RigLink for HardwareLink {
    fn read_state(&mut self, blocking: bool) -> Result<Option<StateSample>> {
        HardwareLink::read_state(self, blocking)
    }

    fn send_command(&mut self, pwm: i32) -> Result<()> {
        HardwareLink::send_command(self, pwm)
    }

    fn close(&mut self) -> Result<()> {
        HardwareLink::close(self)
    }
}

impl Drop for HardwareLink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn zmq_reader_loop(socket: &zmq::Socket, slot: &StateSlot<String>) {
    while !slot.is_closed() {
        match socket.recv_bytes(0) {
            // malformed bytes still surface as a protocol error on read
            Ok(bytes) => {
                slot.publish(String::from_utf8_lossy(&bytes).trim_end().to_owned());
            }
            Err(zmq::Error::EAGAIN) => {}
            Err(e) => {
                debug!(error = %e, "state subscription error");
                thread::sleep(READ_TIMEOUT);
            }
        }
    }
}

fn tcp_reader_loop(addr: SocketAddr, slot: &StateSlot<String>, delay: Duration) {
    while !slot.is_closed() {
        let stream = match TcpStream::connect_timeout(&addr, delay.max(READ_TIMEOUT)) {
            Ok(stream) => stream,
            Err(e) => {
                debug!(%addr, error = %e, "state feed unavailable");
                thread::sleep(delay);
                continue;
            }
        };
        if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
            warn!(error = %e, "cannot set read timeout on state feed");
            thread::sleep(delay);
            continue;
        }
        debug!(%addr, "state feed connected");

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            if slot.is_closed() {
                return;
            }
            match reader.read_line(&mut line) {
                Ok(0) => {
                    debug!(%addr, "state feed closed by peer");
                    break;
                }
                Ok(_) if line.ends_with('\n') => {
                    slot.publish(line.trim_end().to_owned());
                    line.clear();
                }
                // partial line, keep accumulating
                Ok(_) => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => {
                    debug!(%addr, error = %e, "state feed error");
                    break;
                }
            }
        }
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_transport_is_zmq() {
        let config: LinkConfig = serde_json::from_str(r#"{"host":"pendule.local"}"#).unwrap();
        assert_eq!(config.transport, Transport::Zmq);
        assert_eq!(config.state_endpoint(), "pendule.local:10001");

        let config: LinkConfig = serde_json::from_str(r#"{"transport":"tcp"}"#).unwrap();
        assert_eq!(config.transport, Transport::Tcp);
    }

    #[test]
    fn test_validate_rejects_non_finite_timeout() {
        for timeout_secs in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let config = LinkConfig {
                timeout_secs,
                ..LinkConfig::default()
            };
            assert!(matches!(config.validate(), Err(PlantError::Config(_))));
            assert!(matches!(
                HardwareLink::connect(config),
                Err(PlantError::Config(_))
            ));
        }

        let bad_reconnect = LinkConfig {
            reconnect_secs: f64::NAN,
            ..LinkConfig::default()
        };
        assert!(bad_reconnect.validate().is_err());

        let forever = LinkConfig {
            timeout_secs: -1.0,
            ..LinkConfig::default()
        };
        assert!(forever.validate().is_ok());
    }
}
