//! The closed set of subteam roles that gate form access.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A subteam role. Each role owns at most one form; non-admin users carry
/// one or two of these, admins carry none.
///
/// The set is closed: roles are not stored in the database as free text
/// anywhere access decisions are made, only as members of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "DAQ")]
    Daq,
    #[serde(rename = "Chief")]
    Chief,
    #[serde(rename = "suspension")]
    Suspension,
    #[serde(rename = "electronic")]
    Electronic,
    #[serde(rename = "drivetrain")]
    Drivetrain,
    #[serde(rename = "driver")]
    Driver,
    #[serde(rename = "chasis")]
    Chasis,
    #[serde(rename = "aero")]
    Aero,
    #[serde(rename = "ergo")]
    Ergo,
    #[serde(rename = "powertrain")]
    Powertrain,
}

impl Role {
    /// Every role, in catalog order.
    pub const ALL: [Self; 10] = [
        Self::Daq,
        Self::Chief,
        Self::Suspension,
        Self::Electronic,
        Self::Drivetrain,
        Self::Driver,
        Self::Chasis,
        Self::Aero,
        Self::Ergo,
        Self::Powertrain,
    ];

    /// Number of roles in the closed set.
    pub const COUNT: usize = Self::ALL.len();

    /// The wire/storage spelling of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daq => "DAQ",
            Self::Chief => "Chief",
            Self::Suspension => "suspension",
            Self::Electronic => "electronic",
            Self::Drivetrain => "drivetrain",
            Self::Driver => "driver",
            Self::Chasis => "chasis",
            Self::Aero => "aero",
            Self::Ergo => "ergo",
            Self::Powertrain => "powertrain",
        }
    }

    /// Stable index into `ALL`, used for per-role lock tables.
    #[must_use]
    pub fn index(self) -> usize {
        Self::ALL.iter().position(|r| *r == self).unwrap_or(0)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a role name outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_roles() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!("marketing".parse::<Role>().is_err());
        // Case matters: the closed set is exact spellings.
        assert!("daq".parse::<Role>().is_err());
    }

    #[test]
    fn test_serde_uses_wire_spelling() {
        let json = serde_json::to_string(&Role::Daq).unwrap();
        assert_eq!(json, "\"DAQ\"");
        let back: Role = serde_json::from_str("\"powertrain\"").unwrap();
        assert_eq!(back, Role::Powertrain);
    }

    #[test]
    fn test_indices_are_dense() {
        for (i, role) in Role::ALL.iter().enumerate() {
            assert_eq!(role.index(), i);
        }
    }
}
