use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(ProjectId);
id_newtype!(CategoryId);
id_newtype!(WalletAddress);

/// Lower bound of a percentage allocation.
pub const MIN_ALLOCATION: f64 = 0.0;
/// Upper bound of a percentage allocation and the target of every balanced set.
pub const MAX_ALLOCATION: f64 = 100.0;
/// Tolerance used when comparing allocation sums against 100.
pub const ALLOCATION_EPSILON: f64 = 0.01;

/// Clamps to `[0, 100]`, mapping NaN to 0.
pub fn clamp_allocation(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_ALLOCATION;
    }
    value.clamp(MIN_ALLOCATION, MAX_ALLOCATION)
}

/// Rounds to the 2 decimal places allocations are stored with.
pub fn round_allocation(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub allocation: f64,
    pub locked: bool,
}

impl AllocationEntry {
    pub fn unlocked(allocation: f64) -> Self {
        Self {
            allocation,
            locked: false,
        }
    }

    pub fn locked(allocation: f64) -> Self {
        Self {
            allocation,
            locked: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum ImpactScore {
    ConflictOfInterest,
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
    Skip,
}

impl ImpactScore {
    pub const SKIP_VALUE: u16 = 999;

    pub fn value(self) -> u16 {
        match self {
            Self::ConflictOfInterest => 0,
            Self::VeryLow => 1,
            Self::Low => 2,
            Self::Medium => 3,
            Self::High => 4,
            Self::VeryHigh => 5,
            Self::Skip => Self::SKIP_VALUE,
        }
    }

    pub fn is_conflict(self) -> bool {
        self == Self::ConflictOfInterest
    }

    pub fn is_skip(self) -> bool {
        self == Self::Skip
    }

    /// Scores the server records: 0 through 5.
    pub fn is_persisted(self) -> bool {
        !self.is_skip()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid impact score {0}: expected 0-5 or 999")]
pub struct InvalidImpactScore(pub u16);

impl TryFrom<u16> for ImpactScore {
    type Error = InvalidImpactScore;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::ConflictOfInterest,
            1 => Self::VeryLow,
            2 => Self::Low,
            3 => Self::Medium,
            4 => Self::High,
            5 => Self::VeryHigh,
            Self::SKIP_VALUE => Self::Skip,
            other => return Err(InvalidImpactScore(other)),
        })
    }
}

impl From<ImpactScore> for u16 {
    fn from(value: ImpactScore) -> Self {
        value.value()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionMethod {
    TopToBottom,
    ImpactGroups,
    TopWeighted,
    Custom,
}

impl DistributionMethod {
    pub const ALL: [DistributionMethod; 4] = [
        Self::TopToBottom,
        Self::ImpactGroups,
        Self::TopWeighted,
        Self::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopToBottom => "TOP_TO_BOTTOM",
            Self::ImpactGroups => "IMPACT_GROUPS",
            Self::TopWeighted => "TOP_WEIGHTED",
            Self::Custom => "CUSTOM",
        }
    }

    /// Drag and typed-position reordering only make sense for rank-driven methods.
    pub fn is_movable(self) -> bool {
        matches!(self, Self::TopToBottom | Self::TopWeighted)
    }

    /// Methods whose allocations the server recomputes from positions or scores.
    pub fn is_server_computed(self) -> bool {
        !matches!(self, Self::Custom)
    }
}

impl fmt::Display for DistributionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown distribution method '{0}'")]
pub struct UnknownDistributionMethod(pub String);

impl FromStr for DistributionMethod {
    type Err = UnknownDistributionMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == normalized)
            .ok_or_else(|| UnknownDistributionMethod(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BallotStatus {
    #[default]
    Draft,
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub address: WalletAddress,
    pub is_badgeholder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub siwe: Option<String>,
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
