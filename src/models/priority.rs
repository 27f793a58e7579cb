use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Wire value meaning "let the resolver decide".
pub const UNASSIGNED_PRIORITY: i32 = -1;

/// Number of partitions every channel stream carries, one per tier.
pub const CHANNEL_PARTITION_COUNT: i32 = 3;

/// Priority tier of a notification. `High` is delivered first.
///
/// The partition mapping below is the only place the tier/partition relation is
/// defined: fan-out writes with [`Tier::partition`] and the scheduler reads
/// priority back with [`Tier::from_partition`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "i32", into = "i32")]
pub enum Tier {
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::High, Tier::Medium, Tier::Low];

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn topic(self) -> &'static str {
        match self {
            Tier::High => "priority-1",
            Tier::Medium => "priority-2",
            Tier::Low => "priority-3",
        }
    }

    pub fn partition(self) -> i32 {
        self.as_i32() - 1
    }

    pub fn from_partition(partition: i32) -> Option<Self> {
        Self::from_i32(partition + 1)
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Tier::High),
            2 => Some(Tier::Medium),
            3 => Some(Tier::Low),
            _ => None,
        }
    }

    /// Parses a cached or stored priority string.
    pub fn parse(value: &str) -> Option<Self> {
        value.trim().parse::<i32>().ok().and_then(Self::from_i32)
    }
}

impl TryFrom<i32> for Tier {
    type Error = ValidationError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Tier::from_i32(value).ok_or(ValidationError::InvalidPriority(value))
    }
}

impl From<Tier> for i32 {
    fn from(tier: Tier) -> Self {
        tier.as_i32()
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_i32())
    }
}

/// Interprets the raw `notificationPriority` field of a request.
///
/// Returns `Ok(None)` for the unassigned marker and an error for anything outside
/// 1/2/3/-1.
pub fn requested_tier(raw: i32) -> Result<Option<Tier>, ValidationError> {
    if raw == UNASSIGNED_PRIORITY {
        return Ok(None);
    }

    Tier::try_from(raw).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_map_is_tier_minus_one() {
        assert_eq!(Tier::High.partition(), 0);
        assert_eq!(Tier::Medium.partition(), 1);
        assert_eq!(Tier::Low.partition(), 2);

        for tier in Tier::ALL {
            assert_eq!(Tier::from_partition(tier.partition()), Some(tier));
        }
        assert_eq!(Tier::from_partition(CHANNEL_PARTITION_COUNT), None);
    }

    #[test]
    fn requested_tier_accepts_unassigned_marker() {
        assert_eq!(requested_tier(-1), Ok(None));
        assert_eq!(requested_tier(3), Ok(Some(Tier::Low)));
        assert_eq!(requested_tier(0), Err(ValidationError::InvalidPriority(0)));
        assert_eq!(requested_tier(4), Err(ValidationError::InvalidPriority(4)));
    }

    #[test]
    fn tier_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Tier::Low).unwrap(), "3");
        assert_eq!(serde_json::from_str::<Tier>("1").unwrap(), Tier::High);
        assert!(serde_json::from_str::<Tier>("7").is_err());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(Tier::parse(" 2 "), Some(Tier::Medium));
        assert_eq!(Tier::parse("high"), None);
        assert_eq!(Tier::parse("9"), None);
    }
}
