//! Category record
//!
//! Categories label transactions and budgets by name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::CategoryId;

/// Maximum length of a category name
pub const MAX_CATEGORY_NAME_LEN: usize = 50;

/// Whether a category collects income or expenses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Income,
    #[default]
    Expense,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" | "expenses" => Ok(Self::Expense),
            other => Err(format!("unknown category type '{}'", other)),
        }
    }
}

/// A transaction/budget category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: CategoryId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CategoryKind,
    /// Display color, e.g. "#4caf50"
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

impl CategoryRecord {
    pub fn new(name: impl Into<String>, kind: CategoryKind) -> Self {
        Self {
            id: CategoryId::new(),
            name: name.into(),
            kind,
            color: None,
            icon: None,
        }
    }
}

impl fmt::Display for CategoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_category() {
        let cat = CategoryRecord::new("Groceries", CategoryKind::Expense);
        assert_eq!(cat.to_string(), "Groceries");
        assert!(cat.color.is_none());
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("INCOME".parse::<CategoryKind>().unwrap(), CategoryKind::Income);
        assert!("savings".parse::<CategoryKind>().is_err());
    }
}
