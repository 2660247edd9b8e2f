//! Savings goal record

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::GoalId;
use super::money::Money;

/// Lifecycle of a savings goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Active,
    Completed,
    Paused,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" | "in_progress" | "in progress" => Ok(Self::Active),
            "completed" | "complete" | "done" | "achieved" => Ok(Self::Completed),
            "paused" | "on_hold" | "on hold" => Ok(Self::Paused),
            other => Err(format!("unknown goal status '{}'", other)),
        }
    }
}

/// A savings goal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalRecord {
    pub id: GoalId,
    pub name: String,
    pub target_amount: Money,
    #[serde(default)]
    pub current_amount: Money,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub status: GoalStatus,
}

impl GoalRecord {
    pub fn new(name: impl Into<String>, target_amount: Money) -> Self {
        Self {
            id: GoalId::new(),
            name: name.into(),
            target_amount,
            current_amount: Money::zero(),
            deadline: None,
            status: GoalStatus::Active,
        }
    }

    /// Progress toward the target, 0-100
    pub fn percent_complete(&self) -> u8 {
        if !self.target_amount.is_positive() {
            return 100;
        }
        let pct = self.current_amount.cents().max(0) * 100 / self.target_amount.cents();
        pct.min(100) as u8
    }
}
