//! Actions and action kinds

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{PlantError, Result};

/// Three-way discrete push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Full drive toward negative x
    Negative,
    /// No drive
    Zero,
    /// Full drive toward positive x
    Positive,
}

impl Direction {
    /// All directions in ordinal order
    pub const ALL: [Direction; 3] = [Self::Negative, Self::Zero, Self::Positive];

    /// Signed unit value of the direction
    #[must_use]
    pub fn sign(self) -> f64 {
        match self {
            Self::Negative => -1.0,
            Self::Zero => 0.0,
            Self::Positive => 1.0,
        }
    }

    /// Ordinal used by discrete learners (0, 1, 2)
    #[must_use]
    pub fn ordinal(self) -> usize {
        match self {
            Self::Negative => 0,
            Self::Zero => 1,
            Self::Positive => 2,
        }
    }
}

impl TryFrom<usize> for Direction {
    type Error = PlantError;

    fn try_from(ordinal: usize) -> Result<Self> {
        match ordinal {
            0 => Ok(Self::Negative),
            1 => Ok(Self::Zero),
            2 => Ok(Self::Positive),
            n => Err(PlantError::InvalidAction(format!(
                "discrete action ordinal {n} out of range 0..3"
            ))),
        }
    }
}

/// Which action space a plant exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// `Action::Discrete`
    #[default]
    Discrete,
    /// `Action::Continuous`
    Continuous,
}

/// Actuation request, as a fraction of the maximum drive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Discrete push
    Discrete(Direction),
    /// Continuous drive in `[-1, 1]`
    Continuous(f64),
}

impl Action {
    /// Build a discrete action from its ordinal
    pub fn from_ordinal(ordinal: usize) -> Result<Self> {
        Direction::try_from(ordinal).map(Self::Discrete)
    }

    /// Kind of this action
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Discrete(_) => ActionKind::Discrete,
            Self::Continuous(_) => ActionKind::Continuous,
        }
    }

    /// Validate the action against a plant's action kind and return the
    /// normalized drive fraction in `[-1, 1]`
    pub fn fraction(&self, expected: ActionKind) -> Result<f64> {
        if self.kind() != expected {
            return Err(PlantError::InvalidAction(format!(
                "{self} sent to a plant expecting {expected:?} actions"
            )));
        }
        match *self {
            Self::Discrete(direction) => Ok(direction.sign()),
            Self::Continuous(u) if u.is_finite() && (-1.0..=1.0).contains(&u) => Ok(u),
            Self::Continuous(u) => Err(PlantError::InvalidAction(format!(
                "continuous action {u} outside [-1, 1]"
            ))),
        }
    }
}

impl From<Direction> for Action {
    fn from(direction: Direction) -> Self {
        Self::Discrete(direction)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discrete(d) => write!(f, "discrete({d:?})"),
            Self::Continuous(u) => write!(f, "continuous({u})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_round_trip() {
        for direction in Direction::ALL {
            assert_eq!(Direction::try_from(direction.ordinal()).unwrap(), direction);
        }
    }

    #[test]
    fn test_invalid_ordinal_fails_fast() {
        let err = Action::from_ordinal(3).unwrap_err();
        assert!(matches!(err, PlantError::InvalidAction(_)));
    }

    #[test]
    fn test_fraction_checks_kind_and_range() {
        let push = Action::Discrete(Direction::Negative);
        assert_eq!(push.fraction(ActionKind::Discrete).unwrap(), -1.0);
        assert!(push.fraction(ActionKind::Continuous).is_err());

        assert_eq!(Action::Continuous(0.25).fraction(ActionKind::Continuous).unwrap(), 0.25);
        assert!(Action::Continuous(1.5).fraction(ActionKind::Continuous).is_err());
        assert!(Action::Continuous(f64::NAN).fraction(ActionKind::Continuous).is_err());
    }
}
