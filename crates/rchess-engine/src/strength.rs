//! Strength level handling: clamping, search budgets and difficulty presets.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const MIN_STRENGTH: i32 = 0;
pub const MAX_STRENGTH: i32 = 20;

/// Levels below this use the shallow tier.
pub const MEDIUM_TIER_FROM: i32 = 5;
/// Levels from this upward use the deepest tier.
pub const DEEP_TIER_FROM: i32 = 15;

pub fn clamp_strength(level: i32) -> i32 {
    level.clamp(MIN_STRENGTH, MAX_STRENGTH)
}

/// Depth and time handed to `go depth D movetime T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchBudget {
    pub depth: u32,
    #[serde(rename = "move_time_ms", with = "millis")]
    pub move_time: Duration,
}

impl SearchBudget {
    pub const fn new(depth: u32, move_time_ms: u64) -> Self {
        Self {
            depth,
            move_time: Duration::from_millis(move_time_ms),
        }
    }

    fn strictly_below(&self, other: &SearchBudget) -> bool {
        self.depth < other.depth && self.move_time < other.move_time
    }
}

/// Three-tier step function from strength level to search budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetTiers {
    pub shallow: SearchBudget,
    pub medium: SearchBudget,
    pub deep: SearchBudget,
}

impl Default for BudgetTiers {
    fn default() -> Self {
        Self {
            shallow: SearchBudget::new(5, 500),
            medium: SearchBudget::new(12, 1000),
            deep: SearchBudget::new(18, 2000),
        }
    }
}

impl BudgetTiers {
    /// Budget for an already-clamped or raw level; the level is clamped first.
    pub fn budget_for(&self, level: i32) -> SearchBudget {
        let level = clamp_strength(level);
        if level < MEDIUM_TIER_FROM {
            self.shallow
        } else if level < DEEP_TIER_FROM {
            self.medium
        } else {
            self.deep
        }
    }

    /// Tiers must grow strictly in both depth and time.
    pub fn validate(&self) -> Result<(), String> {
        if !self.shallow.strictly_below(&self.medium) || !self.medium.strictly_below(&self.deep) {
            return Err(format!(
                "search tiers must increase strictly in depth and time: {self:?}"
            ));
        }
        Ok(())
    }
}

/// Play-screen difficulty presets mapped onto strength levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
    Master,
    Custom(i32),
}

impl Difficulty {
    pub fn strength(self) -> i32 {
        match self {
            Difficulty::Easy => 2,
            Difficulty::Medium => 8,
            Difficulty::Hard => 14,
            Difficulty::Master => 20,
            Difficulty::Custom(level) => clamp_strength(level),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
            Difficulty::Master => write!(f, "master"),
            Difficulty::Custom(level) => write!(f, "custom:{level}"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    /// `easy`, `medium`, `hard`, `master`, or a bare level number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            "master" => Ok(Difficulty::Master),
            other => {
                let level = other.strip_prefix("custom:").unwrap_or(other);
                level
                    .parse::<i32>()
                    .map(Difficulty::Custom)
                    .map_err(|_| format!("unknown difficulty: {s}"))
            }
        }
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(crate::types::duration_to_millis(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
