//! Hardware side of the pendule cart-pole
//!
//! This crate provides:
//! - the text wire protocol spoken by the rig's low-level controller
//! - [`HardwareLink`], a conflating duplex link to that controller over
//!   ZeroMQ (the rig) or plain TCP (the emulator)
//! - [`PhysicalPlant`], a [`Plant`](pendule_rl_core::Plant) driving the rig
//! - [`RigEmulator`], a tokio emulation of the controller for bench work

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod emulator;
pub mod link;
pub mod physical;
pub mod protocol;
pub mod slot;

pub use emulator::{EmulatorConfig, EmulatorHandle, EmulatorStatus, RigEmulator};
pub use link::{CloseHandle, HardwareLink, LinkConfig, RigLink, Transport};
pub use physical::{PhysicalConfig, PhysicalPlant};
pub use protocol::{clamp_pwm, format_command, parse_command, StateSample, PWM_LIMIT};
pub use slot::StateSlot;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{HardwareLink, LinkConfig, PhysicalConfig, PhysicalPlant, RigEmulator};
    pub use pendule_rl_core::prelude::*;
}
