//! Budget record
//!
//! A spending limit for one category over a recurring period.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::BudgetId;
use super::money::Money;

/// How often a budget resets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Weekly,
    #[default]
    Monthly,
    Yearly,
}

impl BudgetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BudgetPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weekly" | "week" => Ok(Self::Weekly),
            "monthly" | "month" => Ok(Self::Monthly),
            "yearly" | "year" | "annual" | "annually" => Ok(Self::Yearly),
            other => Err(format!("unknown budget period '{}'", other)),
        }
    }
}

/// A budget for a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRecord {
    pub id: BudgetId,
    pub name: String,
    /// Category name the budget applies to
    pub category: String,
    /// Limit per period
    pub amount: Money,
    pub period: BudgetPeriod,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl BudgetRecord {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        amount: Money,
        period: BudgetPeriod,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            id: BudgetId::new(),
            name: name.into(),
            category: category.into(),
            amount,
            period,
            start_date,
            end_date: None,
        }
    }

    /// Whether the budget is in effect on a given date
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.end_date.map_or(true, |end| date <= end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_parse() {
        assert_eq!("Monthly".parse::<BudgetPeriod>().unwrap(), BudgetPeriod::Monthly);
        assert_eq!("annual".parse::<BudgetPeriod>().unwrap(), BudgetPeriod::Yearly);
        assert!("daily".parse::<BudgetPeriod>().is_err());
    }

    #[test]
    fn test_is_active_on() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut budget = BudgetRecord::new(
            "Food",
            "Groceries",
            Money::from_cents(40000),
            BudgetPeriod::Monthly,
            start,
        );
        assert!(budget.is_active_on(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()));
        budget.end_date = NaiveDate::from_ymd_opt(2025, 3, 31);
        assert!(budget.is_active_on(NaiveDate::from_ymd_opt(2025, 3, 31).unwrap()));
        assert!(!budget.is_active_on(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()));
        assert!(!budget.is_active_on(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
    }
}
