//! Text wire format between the host and the low-level controller
//!
//! State lines carry five whitespace-separated decimals
//! `time position angle linvel angvel`; command lines carry one signed
//! PWM integer.

use serde::{Deserialize, Serialize};
use std::fmt;

use pendule_rl_core::{CartPoleState, PlantError, Result};

/// Largest PWM magnitude accepted by the motor driver
pub const PWM_LIMIT: i32 = 255;

/// Number of fields in a state line
pub const STATE_FIELDS: usize = 5;

/// One state sample published by the controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateSample {
    /// Controller time (s)
    pub time: f64,
    /// Cart position (m)
    pub position: f64,
    /// Pole angle (rad), not wrapped
    pub angle: f64,
    /// Cart velocity (m/s)
    pub linvel: f64,
    /// Angular velocity (rad/s)
    pub angvel: f64,
}

impl StateSample {
    /// Parse a state line
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != STATE_FIELDS {
            return Err(PlantError::Protocol(format!(
                "expected {STATE_FIELDS} fields, got {} in {line:?}",
                fields.len()
            )));
        }

        let mut values = [0.0; STATE_FIELDS];
        for (value, field) in values.iter_mut().zip(&fields) {
            *value = field
                .parse()
                .map_err(|e| PlantError::Protocol(format!("bad field {field:?}: {e}")))?;
        }
        let [time, position, angle, linvel, angvel] = values;

        Ok(Self {
            time,
            position,
            angle,
            linvel,
            angvel,
        })
    }

    /// Observed cart-pole state
    #[must_use]
    pub fn to_state(&self) -> CartPoleState {
        CartPoleState::from_angle(self.position, self.linvel, self.angle, self.angvel)
    }
}

impl fmt::Display for StateSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} {:.6} {:.6} {:.6} {:.6}",
            self.time, self.position, self.angle, self.linvel, self.angvel
        )
    }
}

/// Clamp a PWM command to the driver range
#[must_use]
pub fn clamp_pwm(pwm: i32) -> i32 {
    pwm.clamp(-PWM_LIMIT, PWM_LIMIT)
}

/// Command line for `pwm`, clamped, newline terminated
#[must_use]
pub fn format_command(pwm: i32) -> String {
    format!("{}\n", clamp_pwm(pwm))
}

/// Parse a command line
pub fn parse_command(line: &str) -> Result<i32> {
    let trimmed = line.trim();
    trimmed
        .parse::<i32>()
        .map(clamp_pwm)
        .map_err(|e| PlantError::Protocol(format!("bad command {trimmed:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state_line() {
        let sample =
            StateSample::parse("12.500000 0.010000 3.141593 -0.200000 1.500000\n").unwrap();
        assert_eq!(sample.time, 12.5);
        assert_eq!(sample.position, 0.01);
        assert_eq!(sample.linvel, -0.2);
        assert_eq!(sample.angvel, 1.5);
        assert!(sample.to_state().cos_theta < -0.999);
    }

    #[test]
    fn test_wrong_field_count() {
        assert!(matches!(StateSample::parse("1 2 3 4"), Err(PlantError::Protocol(_))));
        assert!(matches!(StateSample::parse("1 2 3 4 5 6"), Err(PlantError::Protocol(_))));
        assert!(matches!(StateSample::parse(""), Err(PlantError::Protocol(_))));
    }

    #[test]
    fn test_unparsable_field() {
        let err = StateSample::parse("1 2 three 4 5").unwrap_err();
        assert!(err.to_string().contains("three"));
    }

    #[test]
    fn test_display_parses_back() {
        let sample = StateSample {
            time: 1.0,
            position: -0.125,
            angle: 0.5,
            linvel: 0.25,
            angvel: -2.0,
        };
        assert_eq!(StateSample::parse(&sample.to_string()).unwrap(), sample);
    }

    #[test]
    fn test_commands() {
        assert_eq!(format_command(130), "130\n");
        assert_eq!(format_command(-400), "-255\n");
        assert_eq!(parse_command(" -50\n").unwrap(), -50);
        assert_eq!(parse_command("1000").unwrap(), 255);
        assert!(matches!(parse_command("fast"), Err(PlantError::Protocol(_))));
    }
}
